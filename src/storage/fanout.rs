//! Fan-out storage coordinator
//!
//! [`FanoutStorage`] presents several backends as one [`Storage`]. Every
//! request is filtered down to the eligible backends, dispatched to all of
//! them concurrently, and the successful answers are merged. A backend's
//! failure is handled according to its [`ErrorBehavior`]:
//!
//! | backend result | Fail | Warn | Ignore |
//! |---|---|---|---|
//! | success | merge | merge | merge |
//! | failure | abort with this error | record warning, exclude, continue | exclude, continue |
//!
//! Backend calls are polled inside the caller's future, so dropping that
//! future (for example on a timeout) cancels every outstanding backend call.
//!
//! # Example
//!
//! ```rust
//! use kuba_fanout::storage::{FanoutStorageBuilder, FetchOptions, FetchQuery, StorageType};
//! use kuba_fanout::storage::stubs::InMemoryStorage;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let fanout = FanoutStorageBuilder::new()
//!     .with_backend(InMemoryStorage::new("local", StorageType::LocalDc))
//!     .with_backend(InMemoryStorage::new("remote", StorageType::RemoteDc))
//!     .build()?;
//!
//! let query = FetchQuery::new(Vec::new(), 0, 1_000);
//! let result = fanout.fetch(Some(&query), &FetchOptions::new()).await?;
//! assert!(result.series_list.is_empty());
//! # Ok(())
//! # }
//! ```

use super::filter::{self, CompleteTagsFilter, StorageFilter};
use super::merge::{CompleteTagsResultBuilder, MultiBlockResult, MultiFetchResult, MultiSearchResult};
use super::traits::{
    CompleteTagsQuery, CompleteTagsResult, ErrorBehavior, FetchOptions, FetchQuery, FetchResult,
    Operation, Query, SearchResults, Storage, StorageType, WriteQuery,
};
use crate::block::{BlockResult, Warning};
use crate::config::{Config, MonitoringConfig};
use crate::error::{Error, Result, StorageError};
use crate::metrics;
use async_trait::async_trait;
use futures::future::{join_all, BoxFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Name the coordinator reports when used as a backend itself
pub const FANOUT_STORE_NAME: &str = "fanout_store";

/// Instrumentation settings for the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrumentOptions {
    /// Record prometheus metrics for operations and backend failures
    pub metrics_enabled: bool,
}

impl InstrumentOptions {
    /// Instrumentation with metrics enabled
    pub fn new() -> Self {
        Self {
            metrics_enabled: true,
        }
    }

    /// Instrumentation that records nothing
    pub fn disabled() -> Self {
        Self {
            metrics_enabled: false,
        }
    }
}

impl Default for InstrumentOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&MonitoringConfig> for InstrumentOptions {
    fn from(config: &MonitoringConfig) -> Self {
        Self {
            metrics_enabled: config.metrics_enabled,
        }
    }
}

/// Successful answers of one fan-out, in backend order
struct Gathered<T> {
    results: Vec<(T, StorageType)>,
    warnings: Vec<Warning>,
}

// =============================================================================
// Coordinator
// =============================================================================

/// Storage that fans every request out to a set of backends
pub struct FanoutStorage {
    stores: Vec<Arc<dyn Storage>>,
    fetch_filter: StorageFilter,
    write_filter: StorageFilter,
    complete_tags_filter: CompleteTagsFilter,
    instrument: InstrumentOptions,
}

impl FanoutStorage {
    /// Create a coordinator over `stores`
    ///
    /// Fails with a configuration error when `stores` is empty.
    pub fn new(
        stores: Vec<Arc<dyn Storage>>,
        fetch_filter: StorageFilter,
        write_filter: StorageFilter,
        complete_tags_filter: CompleteTagsFilter,
        instrument: InstrumentOptions,
    ) -> Result<Self> {
        if stores.is_empty() {
            return Err(Error::Configuration(
                "fan-out storage requires at least one backend".to_string(),
            ));
        }

        info!(
            backends = stores.len(),
            metrics_enabled = instrument.metrics_enabled,
            "Fan-out storage created"
        );

        Ok(Self {
            stores,
            fetch_filter,
            write_filter,
            complete_tags_filter,
            instrument,
        })
    }

    /// Backends in dispatch order
    pub fn stores(&self) -> &[Arc<dyn Storage>] {
        &self.stores
    }

    /// Instrumentation settings
    pub fn instrument_options(&self) -> InstrumentOptions {
        self.instrument
    }

    /// Fetch series from every eligible backend
    ///
    /// A `None` query, or a query no backend is eligible for, yields an
    /// empty result.
    pub async fn fetch(
        &self,
        query: Option<&FetchQuery>,
        options: &FetchOptions,
    ) -> std::result::Result<FetchResult, StorageError> {
        let Some(query) = query else {
            return Ok(FetchResult::empty());
        };
        let stores = self.filter_stores(Query::Fetch(query), &self.fetch_filter);
        if stores.is_empty() {
            return Ok(FetchResult::empty());
        }

        self.instrumented(Operation::Fetch, async {
            let gathered = self
                .fan_out(Operation::Fetch, stores, |store| store.fetch(query, options))
                .await?;

            let mut merged = MultiFetchResult::new();
            for warning in &gathered.warnings {
                merged.add_warning(&warning.name, &warning.message);
            }
            for (result, storage_type) in gathered.results {
                merged.add(result, storage_type);
            }
            Ok(merged.finalize())
        })
        .await
    }

    /// Write to every eligible backend
    ///
    /// Every eligible backend is attempted. Once all writes have completed,
    /// the first failure (in backend order) of a backend with
    /// [`ErrorBehavior::Fail`] is returned. Successful writes are not rolled
    /// back.
    pub async fn write(&self, query: Option<&WriteQuery>) -> std::result::Result<(), StorageError> {
        let Some(query) = query else {
            return Ok(());
        };
        let stores = self.filter_stores(Query::Write(query), &self.write_filter);
        if stores.is_empty() {
            return Ok(());
        }

        self.instrumented(Operation::Write, async {
            let results = join_all(stores.iter().map(|store| store.write(query))).await;

            let mut first_err = None;
            for (store, result) in stores.iter().zip(results) {
                if let Err(err) = result {
                    if let Err(e) = self.handle_error(Operation::Write, store.as_ref(), err) {
                        first_err.get_or_insert(e);
                    }
                }
            }
            first_err.map_or(Ok(()), Err)
        })
        .await
    }

    /// Search series identities on every eligible backend
    pub async fn search_series(
        &self,
        query: Option<&FetchQuery>,
        options: &FetchOptions,
    ) -> std::result::Result<SearchResults, StorageError> {
        let Some(query) = query else {
            return Ok(SearchResults::empty());
        };
        let stores = self.filter_stores(Query::Fetch(query), &self.fetch_filter);
        if stores.is_empty() {
            return Ok(SearchResults::empty());
        }

        self.instrumented(Operation::SearchSeries, async {
            let gathered = self
                .fan_out(Operation::SearchSeries, stores, |store| {
                    store.search_series(query, options)
                })
                .await?;

            let mut merged = MultiSearchResult::new();
            for warning in &gathered.warnings {
                merged.add_warning(&warning.name, &warning.message);
            }
            for (result, storage_type) in gathered.results {
                merged.add(result, storage_type);
            }
            Ok(merged.finalize())
        })
        .await
    }

    /// Complete tags on every backend accepted by the complete-tags filter
    ///
    /// The result mode follows the query's `complete_name_only`; a backend
    /// answering in the other mode is an error.
    pub async fn complete_tags(
        &self,
        query: Option<&CompleteTagsQuery>,
        options: &FetchOptions,
    ) -> std::result::Result<CompleteTagsResult, StorageError> {
        let Some(query) = query else {
            return Ok(CompleteTagsResult::empty(false));
        };
        let stores: Vec<&Arc<dyn Storage>> = self
            .stores
            .iter()
            .filter(|store| (self.complete_tags_filter)(query, store.as_ref()))
            .collect();
        if stores.is_empty() {
            return Ok(CompleteTagsResult::empty(query.complete_name_only));
        }

        self.instrumented(Operation::CompleteTags, async {
            let gathered = self
                .fan_out(Operation::CompleteTags, stores, |store| {
                    store.complete_tags(query, options)
                })
                .await?;

            let mut builder = CompleteTagsResultBuilder::new(query.complete_name_only);
            for warning in &gathered.warnings {
                builder.add_warning(&warning.name, &warning.message);
            }
            for (result, storage_type) in gathered.results {
                builder.add(result, storage_type)?;
            }
            Ok(builder.build())
        })
        .await
    }

    /// Fetch blocks from every eligible backend
    ///
    /// Blocks are concatenated in backend order.
    pub async fn fetch_blocks(
        &self,
        query: Option<&FetchQuery>,
        options: &FetchOptions,
    ) -> std::result::Result<BlockResult, StorageError> {
        let Some(query) = query else {
            return Ok(BlockResult::empty());
        };
        let stores = self.filter_stores(Query::Fetch(query), &self.fetch_filter);
        if stores.is_empty() {
            return Ok(BlockResult::empty());
        }

        self.instrumented(Operation::FetchBlocks, async {
            let gathered = self
                .fan_out(Operation::FetchBlocks, stores, |store| {
                    store.fetch_blocks(query, options)
                })
                .await?;

            let mut merged = MultiBlockResult::new();
            for warning in &gathered.warnings {
                merged.add_warning(&warning.name, &warning.message);
            }
            for (result, storage_type) in gathered.results {
                merged.add(result, storage_type);
            }
            Ok(merged.finalize())
        })
        .await
    }

    /// Close every backend, returning the first error
    pub async fn close(&self) -> std::result::Result<(), StorageError> {
        let results = join_all(self.stores.iter().map(|store| store.close())).await;

        let mut first_err = None;
        for (store, result) in self.stores.iter().zip(results) {
            if let Err(err) = result {
                warn!(backend = store.name(), error = %err, "Failed to close backend");
                first_err.get_or_insert_with(|| {
                    StorageError::from_backend(store.name(), Operation::Close.as_str(), err)
                });
            }
        }

        debug!(backends = self.stores.len(), "Fan-out storage closed");
        first_err.map_or(Ok(()), Err)
    }

    // ===== Dispatch =====

    fn filter_stores(&self, query: Query<'_>, filter: &StorageFilter) -> Vec<&Arc<dyn Storage>> {
        self.stores
            .iter()
            .filter(|store| filter(query, store.as_ref()))
            .collect()
    }

    /// Run `call` against every store concurrently
    ///
    /// Returns on the first failure of a `Fail` backend, dropping the calls
    /// still in flight. Tolerated failures become warnings (for `Warn`) or are
    /// dropped (for `Ignore`).
    async fn fan_out<'a, T, F>(
        &'a self,
        operation: Operation,
        stores: Vec<&'a Arc<dyn Storage>>,
        call: F,
    ) -> std::result::Result<Gathered<T>, StorageError>
    where
        T: Send + 'a,
        F: Fn(&'a dyn Storage) -> BoxFuture<'a, std::result::Result<T, StorageError>>,
    {
        let mut pending = FuturesUnordered::new();
        for (idx, store) in stores.iter().copied().enumerate() {
            let fut = call(&**store);
            pending.push(async move { (idx, fut.await) });
        }

        let mut results = Vec::with_capacity(stores.len());
        let mut warnings = Vec::new();
        while let Some((idx, result)) = pending.next().await {
            let store = stores[idx];
            match result {
                Ok(value) => results.push((idx, value, store.storage_type())),
                Err(err) => {
                    if let Some(warning) = self.handle_error(operation, store.as_ref(), err)? {
                        warnings.push((idx, warning));
                    }
                }
            }
        }

        results.sort_by_key(|(idx, _, _)| *idx);
        warnings.sort_by_key(|(idx, _)| *idx);

        Ok(Gathered {
            results: results
                .into_iter()
                .map(|(_, value, storage_type)| (value, storage_type))
                .collect(),
            warnings: warnings.into_iter().map(|(_, w)| w).collect(),
        })
    }

    /// Classify a backend failure by the backend's error behavior
    fn handle_error(
        &self,
        operation: Operation,
        store: &dyn Storage,
        err: StorageError,
    ) -> std::result::Result<Option<Warning>, StorageError> {
        let behavior = store.error_behavior();
        if self.instrument.metrics_enabled {
            metrics::record_backend_error(store.name(), behavior.as_str(), operation.as_str());
        }

        match behavior {
            ErrorBehavior::Fail => Err(StorageError::from_backend(
                store.name(),
                operation.as_str(),
                err,
            )),
            ErrorBehavior::Warn => {
                warn!(
                    backend = store.name(),
                    operation = %operation,
                    error = %err,
                    "Backend failed, continuing without its results"
                );
                Ok(Some(Warning::new(store.name(), err.to_string())))
            }
            ErrorBehavior::Ignore => {
                debug!(
                    backend = store.name(),
                    operation = %operation,
                    error = %err,
                    "Ignoring backend failure"
                );
                Ok(None)
            }
        }
    }

    async fn instrumented<T, Fut>(
        &self,
        operation: Operation,
        fut: Fut,
    ) -> std::result::Result<T, StorageError>
    where
        Fut: Future<Output = std::result::Result<T, StorageError>>,
    {
        let start = Instant::now();
        let result = fut.await;
        if self.instrument.metrics_enabled {
            metrics::record_operation(
                operation.as_str(),
                start.elapsed().as_secs_f64(),
                result.is_ok(),
            );
        }
        result
    }
}

impl fmt::Debug for FanoutStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.stores.iter().map(|s| s.name()).collect();
        f.debug_struct("FanoutStorage")
            .field("stores", &names)
            .field("instrument", &self.instrument)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Storage for FanoutStorage {
    async fn fetch(
        &self,
        query: &FetchQuery,
        options: &FetchOptions,
    ) -> std::result::Result<FetchResult, StorageError> {
        FanoutStorage::fetch(self, Some(query), options).await
    }

    async fn write(&self, query: &WriteQuery) -> std::result::Result<(), StorageError> {
        FanoutStorage::write(self, Some(query)).await
    }

    async fn search_series(
        &self,
        query: &FetchQuery,
        options: &FetchOptions,
    ) -> std::result::Result<SearchResults, StorageError> {
        FanoutStorage::search_series(self, Some(query), options).await
    }

    async fn complete_tags(
        &self,
        query: &CompleteTagsQuery,
        options: &FetchOptions,
    ) -> std::result::Result<CompleteTagsResult, StorageError> {
        FanoutStorage::complete_tags(self, Some(query), options).await
    }

    async fn fetch_blocks(
        &self,
        query: &FetchQuery,
        options: &FetchOptions,
    ) -> std::result::Result<BlockResult, StorageError> {
        FanoutStorage::fetch_blocks(self, Some(query), options).await
    }

    fn error_behavior(&self) -> ErrorBehavior {
        ErrorBehavior::Fail
    }

    fn name(&self) -> &str {
        FANOUT_STORE_NAME
    }

    fn storage_type(&self) -> StorageType {
        StorageType::MultiDc
    }

    async fn close(&self) -> std::result::Result<(), StorageError> {
        FanoutStorage::close(self).await
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`FanoutStorage`]
///
/// Filters default to [`filter::allow_all`].
pub struct FanoutStorageBuilder {
    stores: Vec<Arc<dyn Storage>>,
    fetch_filter: Option<StorageFilter>,
    write_filter: Option<StorageFilter>,
    complete_tags_filter: Option<CompleteTagsFilter>,
    instrument: InstrumentOptions,
}

impl FanoutStorageBuilder {
    /// Create a builder without backends
    pub fn new() -> Self {
        Self {
            stores: Vec::new(),
            fetch_filter: None,
            write_filter: None,
            complete_tags_filter: None,
            instrument: InstrumentOptions::default(),
        }
    }

    /// Add a backend
    pub fn with_backend<S>(mut self, store: S) -> Self
    where
        S: Storage,
    {
        self.stores.push(Arc::new(store));
        self
    }

    /// Add a backend from an existing Arc
    ///
    /// Use this when the caller keeps a handle on the backend, e.g. to
    /// inspect it in tests.
    pub fn with_backend_arc(mut self, store: Arc<dyn Storage>) -> Self {
        self.stores.push(store);
        self
    }

    /// Set the predicate selecting backends for fetch-side operations
    pub fn with_fetch_filter(mut self, filter: StorageFilter) -> Self {
        self.fetch_filter = Some(filter);
        self
    }

    /// Set the predicate selecting backends for writes
    pub fn with_write_filter(mut self, filter: StorageFilter) -> Self {
        self.write_filter = Some(filter);
        self
    }

    /// Set the predicate selecting backends for tag completion
    pub fn with_complete_tags_filter(mut self, filter: CompleteTagsFilter) -> Self {
        self.complete_tags_filter = Some(filter);
        self
    }

    /// Set instrumentation options
    pub fn with_instrument_options(mut self, instrument: InstrumentOptions) -> Self {
        self.instrument = instrument;
        self
    }

    /// Apply the filter policies and monitoring settings of a configuration
    pub fn with_config(mut self, config: &Config) -> Self {
        self.fetch_filter = Some(config.filter.read.storage_filter());
        self.write_filter = Some(config.filter.write.storage_filter());
        self.complete_tags_filter = Some(config.filter.complete_tags.complete_tags_filter());
        self.instrument = InstrumentOptions::from(&config.monitoring);
        self
    }

    /// Build the coordinator
    pub fn build(self) -> Result<FanoutStorage> {
        FanoutStorage::new(
            self.stores,
            self.fetch_filter.unwrap_or_else(filter::allow_all),
            self.write_filter.unwrap_or_else(filter::allow_all),
            self.complete_tags_filter
                .unwrap_or_else(filter::complete_tags_allow_all),
            self.instrument,
        )
    }
}

impl Default for FanoutStorageBuilder {
    fn default() -> Self {
        Self::new()
    }
}
