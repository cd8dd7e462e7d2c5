//! In-memory storage backend
//!
//! [`InMemoryStorage`] keeps series in a map and evaluates tag matchers
//! directly. It is intended for:
//! - **Unit and integration testing** of fan-out behavior without real stores
//! - **Development and prototyping** of filters and merge policies
//!
//! Failures and latency can be injected at runtime to exercise every
//! [`ErrorBehavior`] path of a coordinator.
//!
//! # Warning
//!
//! This backend is NOT suitable for production use: data lives only in
//! memory and is lost when the backend is dropped.
//!
//! # Example
//!
//! ```rust
//! use kuba_fanout::storage::stubs::InMemoryStorage;
//! use kuba_fanout::storage::{ErrorBehavior, Storage, StorageType};
//!
//! let store = InMemoryStorage::new("remote-1", StorageType::RemoteDc)
//!     .with_behavior(ErrorBehavior::Warn);
//! store.fail_with("connection refused");
//!
//! assert_eq!(store.name(), "remote-1");
//! assert_eq!(store.error_behavior(), ErrorBehavior::Warn);
//! ```

use super::traits::{
    CompleteTagsQuery, CompleteTagsResult, CompletedTag, ErrorBehavior, FetchOptions, FetchQuery,
    FetchResult, Operation, SearchResults, Storage, StorageType, WriteQuery,
};
use crate::block::{Block, BlockResult, Bounds, ColumnBlockBuilder, Metadata, SeriesMeta};
use crate::error::StorageError;
use crate::types::{matches_all, Datapoint, Metric, Series};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

const OPERATION_COUNT: usize = 6;

fn operation_slot(operation: Operation) -> usize {
    match operation {
        Operation::Fetch => 0,
        Operation::Write => 1,
        Operation::SearchSeries => 2,
        Operation::CompleteTags => 3,
        Operation::FetchBlocks => 4,
        Operation::Close => 5,
    }
}

/// Storage backend holding series in memory
#[derive(Debug)]
pub struct InMemoryStorage {
    name: String,
    storage_type: StorageType,
    behavior: ErrorBehavior,
    series: RwLock<BTreeMap<Bytes, Series>>,
    failure: RwLock<Option<String>>,
    latency: Option<Duration>,
    calls: [AtomicU64; OPERATION_COUNT],
    closed: AtomicBool,
}

impl InMemoryStorage {
    /// Create an empty backend with [`ErrorBehavior::Fail`]
    pub fn new(name: impl Into<String>, storage_type: StorageType) -> Self {
        Self {
            name: name.into(),
            storage_type,
            behavior: ErrorBehavior::Fail,
            series: RwLock::new(BTreeMap::new()),
            failure: RwLock::new(None),
            latency: None,
            calls: Default::default(),
            closed: AtomicBool::new(false),
        }
    }

    /// Set how a coordinator treats this backend's failures
    pub fn with_behavior(mut self, behavior: ErrorBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Delay every operation by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make every subsequent operation fail with `message`
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.write() = Some(message.into());
    }

    /// Stop injecting failures
    pub fn clear_failure(&self) {
        *self.failure.write() = None;
    }

    /// Store a series, replacing any series with the same name
    pub fn insert_series(&self, series: Series) {
        self.series.write().insert(series.name().clone(), series);
    }

    /// Number of stored series
    pub fn series_count(&self) -> usize {
        self.series.read().len()
    }

    /// Stored series by name
    pub fn get_series(&self, name: &[u8]) -> Option<Series> {
        self.series.read().get(name).cloned()
    }

    /// How many times `operation` was invoked
    pub fn calls(&self, operation: Operation) -> u64 {
        self.calls[operation_slot(operation)].load(Ordering::Relaxed)
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Common prologue of every operation: count, delay, then check state
    async fn enter(&self, operation: Operation) -> Result<(), StorageError> {
        self.calls[operation_slot(operation)].fetch_add(1, Ordering::Relaxed);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if self.is_closed() {
            return Err(StorageError::Closed(self.name.clone()));
        }

        if let Some(message) = self.failure.read().clone() {
            debug!(backend = %self.name, operation = %operation, "Injected failure");
            return Err(StorageError::Unavailable(message));
        }

        Ok(())
    }

    fn matching_series(&self, query: &FetchQuery, limit: Option<usize>) -> (Vec<Series>, bool) {
        let series = self.series.read();
        let mut matched = Vec::new();
        let mut exhaustive = true;

        for s in series.values() {
            if !matches_all(&query.tag_matchers, s.tags()) {
                continue;
            }
            let points: Vec<Datapoint> = s
                .datapoints()
                .iter()
                .copied()
                .filter(|dp| query.contains(dp.timestamp))
                .collect();
            if points.is_empty() {
                continue;
            }
            if limit.is_some_and(|l| matched.len() >= l) {
                exhaustive = false;
                break;
            }
            matched.push(Series::new(s.name().clone(), s.tags().clone(), points));
        }

        (matched, exhaustive)
    }
}

/// Last datapoint value in `[start, start + step)`, or NaN
fn sample(points: &[Datapoint], start: i64, step: i64) -> f64 {
    points
        .iter()
        .rev()
        .find(|dp| dp.timestamp >= start && dp.timestamp < start.saturating_add(step))
        .map_or(f64::NAN, |dp| dp.value)
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn fetch(
        &self,
        query: &FetchQuery,
        options: &FetchOptions,
    ) -> Result<FetchResult, StorageError> {
        self.enter(Operation::Fetch).await?;

        let (series_list, exhaustive) = self.matching_series(query, options.limit);
        let mut result = FetchResult::new(series_list);
        result.metadata.exhaustive = exhaustive;
        Ok(result)
    }

    async fn write(&self, query: &WriteQuery) -> Result<(), StorageError> {
        self.enter(Operation::Write).await?;

        let id = query.tags.id();
        let mut series = self.series.write();
        let points = match series.remove(&id) {
            Some(existing) => {
                let mut points = existing.datapoints().to_vec();
                points.extend_from_slice(&query.datapoints);
                points.sort_by_key(|dp| dp.timestamp);
                points
            }
            None => query.datapoints.clone(),
        };
        series.insert(id.clone(), Series::new(id, query.tags.clone(), points));
        Ok(())
    }

    async fn search_series(
        &self,
        query: &FetchQuery,
        options: &FetchOptions,
    ) -> Result<SearchResults, StorageError> {
        self.enter(Operation::SearchSeries).await?;

        let series = self.series.read();
        let mut metrics = Vec::new();
        let mut exhaustive = true;
        for s in series.values() {
            if !matches_all(&query.tag_matchers, s.tags()) {
                continue;
            }
            if options.limit.is_some_and(|l| metrics.len() >= l) {
                exhaustive = false;
                break;
            }
            metrics.push(Metric::new(s.name().clone(), s.tags().clone()));
        }

        let mut result = SearchResults::new(metrics);
        result.metadata.exhaustive = exhaustive;
        Ok(result)
    }

    async fn complete_tags(
        &self,
        query: &CompleteTagsQuery,
        _options: &FetchOptions,
    ) -> Result<CompleteTagsResult, StorageError> {
        self.enter(Operation::CompleteTags).await?;

        let series = self.series.read();
        let mut tags: BTreeMap<Bytes, BTreeSet<Bytes>> = BTreeMap::new();
        for s in series.values() {
            if !matches_all(&query.tag_matchers, s.tags()) {
                continue;
            }
            for tag in s.tags().iter() {
                if !query.filter_name_tags.is_empty() && !query.filter_name_tags.contains(&tag.name)
                {
                    continue;
                }
                let values = tags.entry(tag.name.clone()).or_default();
                if !query.complete_name_only {
                    values.insert(tag.value.clone());
                }
            }
        }

        let completed = tags
            .into_iter()
            .map(|(name, values)| CompletedTag::with_values(name, values.into_iter().collect()))
            .collect();
        Ok(CompleteTagsResult::new(query.complete_name_only, completed))
    }

    async fn fetch_blocks(
        &self,
        query: &FetchQuery,
        options: &FetchOptions,
    ) -> Result<BlockResult, StorageError> {
        self.enter(Operation::FetchBlocks).await?;

        let (series_list, exhaustive) = self.matching_series(query, options.limit);
        let duration = Duration::from_millis(query.end.saturating_sub(query.start).max(0) as u64);
        let bounds = Bounds::new(query.start, duration, query.interval);
        let step = i64::try_from(query.interval.as_millis()).unwrap_or(i64::MAX);

        let series_meta = series_list
            .iter()
            .map(|s| SeriesMeta::new(s.name().clone(), s.tags().clone()))
            .collect();
        let mut builder =
            ColumnBlockBuilder::new(&options.query_context, Metadata::new(bounds), series_meta);

        let steps = bounds.steps();
        if steps > 0 {
            builder.add_cols(steps)?;
            for idx in 0..steps {
                let start = bounds.time_for_index(idx)?;
                let values: Vec<f64> = series_list
                    .iter()
                    .map(|s| sample(s.datapoints(), start, step))
                    .collect();
                builder.append_values(idx, &values)?;
            }
        }

        let block: Box<dyn Block> = Box::new(builder.build());
        let mut result = BlockResult::new(vec![block]);
        result.metadata.exhaustive = exhaustive;
        Ok(result)
    }

    fn error_behavior(&self) -> ErrorBehavior {
        self.behavior
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn storage_type(&self) -> StorageType {
        self.storage_type
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.calls[operation_slot(Operation::Close)].fetch_add(1, Ordering::Relaxed);
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
