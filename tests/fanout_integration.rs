//! Integration tests for the fan-out storage coordinator
//!
//! Covers:
//! 1. Empty queries and queries with no eligible backends
//! 2. Merging when every backend succeeds
//! 3. Fail / Warn / Ignore failure handling for every operation
//! 4. Local-datacenter precedence when de-duplicating series
//! 5. Cancellation through the caller's future
//! 6. Nested coordinators and configuration-driven filters
use async_trait::async_trait;
use bytes::Bytes;
use kuba_fanout::block::{Block, BlockResult, Bounds, Metadata, Scalar};
use kuba_fanout::config::Config;
use kuba_fanout::context::QueryContext;
use kuba_fanout::cost::{ChainedEnforcer, Limit, QUERY_LEVEL};
use kuba_fanout::error::StorageError;
use kuba_fanout::storage::stubs::InMemoryStorage;
use kuba_fanout::storage::{
    CompleteTagsQuery, CompleteTagsResult, CompletedTag, ErrorBehavior, FanoutStorage,
    FanoutStorageBuilder, FetchOptions, FetchQuery, FetchResult, FilterPolicy, InstrumentOptions,
    Operation, SearchResults, Storage, StorageType, WriteQuery,
};
use kuba_fanout::types::{Datapoint, Matcher, Metric, Series, Tags};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Scripted backend
// ============================================================================

/// Backend answering every request with a fixed payload named `label`
///
/// When `fails` is set the payload is discarded and an error returned, the
/// way a backend that hit an error mid-request behaves.
#[derive(Debug)]
struct ScriptedStorage {
    name: String,
    label: String,
    value: f64,
    storage_type: StorageType,
    behavior: ErrorBehavior,
    fails: bool,
    closes: AtomicUsize,
}

impl ScriptedStorage {
    fn ok(name: &str, label: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            value,
            storage_type: StorageType::LocalDc,
            behavior: ErrorBehavior::Fail,
            fails: false,
            closes: AtomicUsize::new(0),
        }
    }

    fn failing(name: &str, label: &str, value: f64, behavior: ErrorBehavior) -> Self {
        Self {
            behavior,
            fails: true,
            storage_type: StorageType::RemoteDc,
            ..Self::ok(name, label, value)
        }
    }

    fn outcome<T>(&self, payload: T) -> Result<T, StorageError> {
        if self.fails {
            Err(StorageError::QueryFailed(format!("{} failed", self.name)))
        } else {
            Ok(payload)
        }
    }
}

#[async_trait]
impl Storage for ScriptedStorage {
    async fn fetch(
        &self,
        _query: &FetchQuery,
        _options: &FetchOptions,
    ) -> Result<FetchResult, StorageError> {
        self.outcome(FetchResult::new(vec![Series::new(
            self.label.clone(),
            Tags::new(),
            vec![Datapoint::new(0, self.value)],
        )]))
    }

    async fn write(&self, _query: &WriteQuery) -> Result<(), StorageError> {
        self.outcome(())
    }

    async fn search_series(
        &self,
        _query: &FetchQuery,
        _options: &FetchOptions,
    ) -> Result<SearchResults, StorageError> {
        self.outcome(SearchResults::new(vec![Metric::new(
            self.label.clone(),
            Tags::new(),
        )]))
    }

    async fn complete_tags(
        &self,
        query: &CompleteTagsQuery,
        _options: &FetchOptions,
    ) -> Result<CompleteTagsResult, StorageError> {
        self.outcome(CompleteTagsResult::new(
            query.complete_name_only,
            vec![CompletedTag::name_only(self.label.clone())],
        ))
    }

    async fn fetch_blocks(
        &self,
        query: &FetchQuery,
        _options: &FetchOptions,
    ) -> Result<BlockResult, StorageError> {
        let bounds = Bounds::new(
            query.start,
            Duration::from_millis((query.end - query.start) as u64),
            query.interval,
        );
        let block: Box<dyn Block> = Box::new(Scalar::new(self.value, Metadata::new(bounds)));
        self.outcome(BlockResult::new(vec![block]))
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
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.outcome(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn build(stores: Vec<Arc<dyn Storage>>) -> FanoutStorage {
    stores
        .into_iter()
        .fold(FanoutStorageBuilder::new(), |b, s| b.with_backend_arc(s))
        .with_instrument_options(InstrumentOptions::disabled())
        .build()
        .expect("fan-out storage")
}

fn cpu_series(host: &str, value: f64) -> Series {
    let tags = Tags::new()
        .with_tag("__name__", "cpu")
        .with_tag("host", host.to_string());
    Series::new(tags.id(), tags, vec![Datapoint::new(10, value)])
}

fn cpu_query() -> FetchQuery {
    FetchQuery::new(vec![Matcher::equal("__name__", "cpu")], 0, 100)
        .with_interval(Duration::from_millis(50))
}

fn mem_store(name: &str, storage_type: StorageType) -> Arc<InMemoryStorage> {
    Arc::new(InMemoryStorage::new(name, storage_type))
}

fn write_query() -> WriteQuery {
    WriteQuery::new(
        Tags::new().with_tag("__name__", "cpu"),
        vec![Datapoint::new(1, 1.0)],
    )
    .expect("write query")
}

// ============================================================================
// CATEGORY 1: EMPTY QUERIES AND NO ELIGIBLE BACKENDS
// ============================================================================

#[tokio::test]
async fn test_none_queries_succeed_with_empty_results() {
    let failing = Arc::new(ScriptedStorage::failing(
        "down",
        "x",
        0.0,
        ErrorBehavior::Fail,
    ));
    let fanout = build(vec![failing]);
    let options = FetchOptions::new();

    assert!(fanout.fetch(None, &options).await.unwrap().series_list.is_empty());
    assert!(fanout.search_series(None, &options).await.unwrap().metrics.is_empty());
    assert!(fanout
        .complete_tags(None, &options)
        .await
        .unwrap()
        .completed_tags
        .is_empty());
    assert!(fanout.fetch_blocks(None, &options).await.unwrap().blocks.is_empty());
    assert!(fanout.write(None).await.is_ok());
}

#[tokio::test]
async fn test_no_eligible_backends_is_empty_not_error() {
    let store = mem_store("local", StorageType::LocalDc);
    store.fail_with("should never be called");

    let fanout = FanoutStorageBuilder::new()
        .with_backend_arc(store.clone())
        .with_fetch_filter(FilterPolicy::RemoteOnly.storage_filter())
        .with_write_filter(FilterPolicy::AllowNone.storage_filter())
        .with_complete_tags_filter(FilterPolicy::RemoteOnly.complete_tags_filter())
        .build()
        .unwrap();
    let options = FetchOptions::new();

    assert!(fanout
        .fetch(Some(&cpu_query()), &options)
        .await
        .unwrap()
        .series_list
        .is_empty());
    assert!(fanout.write(Some(&write_query())).await.is_ok());

    let query = CompleteTagsQuery {
        complete_name_only: true,
        ..Default::default()
    };
    let tags = fanout.complete_tags(Some(&query), &options).await.unwrap();
    assert!(tags.complete_name_only);
    assert!(tags.completed_tags.is_empty());

    assert_eq!(store.calls(Operation::Fetch), 0);
    assert_eq!(store.calls(Operation::Write), 0);
    assert_eq!(store.calls(Operation::CompleteTags), 0);
}

// ============================================================================
// CATEGORY 2: ALL BACKENDS SUCCEED
// ============================================================================

#[tokio::test]
async fn test_all_backends_succeed_merges() {
    let a = mem_store("a", StorageType::LocalDc);
    let b = mem_store("b", StorageType::RemoteDc);
    a.insert_series(cpu_series("h1", 1.0));
    b.insert_series(cpu_series("h2", 2.0));
    let fanout = build(vec![a, b]);

    let result = fanout
        .fetch(Some(&cpu_query()), &FetchOptions::new())
        .await
        .unwrap();
    assert_eq!(result.series_list.len(), 2);
    assert!(result.metadata.warnings.is_empty());
    assert!(result.metadata.exhaustive);
    assert!(!result.metadata.local_only);

    let search = fanout
        .search_series(Some(&cpu_query()), &FetchOptions::new())
        .await
        .unwrap();
    assert_eq!(search.metrics.len(), 2);
}

#[tokio::test]
async fn test_merge_order_follows_backend_order() {
    let slow = Arc::new(
        InMemoryStorage::new("slow", StorageType::LocalDc)
            .with_latency(Duration::from_millis(30)),
    );
    let fast = mem_store("fast", StorageType::LocalDc);
    slow.insert_series(cpu_series("slow-host", 1.0));
    fast.insert_series(cpu_series("fast-host", 2.0));
    let fanout = build(vec![slow, fast]);

    let result = fanout
        .search_series(Some(&cpu_query()), &FetchOptions::new())
        .await
        .unwrap();
    let hosts: Vec<_> = result
        .metrics
        .iter()
        .map(|m| m.tags.get(b"host").cloned().unwrap())
        .collect();
    assert_eq!(hosts, vec![Bytes::from("slow-host"), Bytes::from("fast-host")]);
}

// ============================================================================
// CATEGORY 3: FAIL BEHAVIOR
// ============================================================================

#[tokio::test]
async fn test_all_failing_backends_return_error() {
    let fanout = build(vec![
        Arc::new(ScriptedStorage::failing("a", "x", 0.0, ErrorBehavior::Fail)),
        Arc::new(ScriptedStorage::failing("b", "y", 0.0, ErrorBehavior::Fail)),
    ]);
    let options = FetchOptions::new();
    let query = cpu_query();

    assert!(fanout.fetch(Some(&query), &options).await.is_err());
    assert!(fanout.search_series(Some(&query), &options).await.is_err());
    assert!(fanout
        .complete_tags(Some(&CompleteTagsQuery::default()), &options)
        .await
        .is_err());
    assert!(fanout.write(Some(&write_query())).await.is_err());
}

#[tokio::test]
async fn test_fail_error_names_backend() {
    let fanout = build(vec![
        Arc::new(ScriptedStorage::ok("good", "ok", 1.0)),
        Arc::new(ScriptedStorage::failing("bad", "x", 0.0, ErrorBehavior::Fail)),
    ]);

    let err = fanout
        .fetch_blocks(Some(&cpu_query()), &FetchOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.backend(), Some("bad"));
    assert!(err.to_string().contains("fetch_blocks"));
}

#[tokio::test]
async fn test_write_attempts_every_backend() {
    let first = mem_store("first", StorageType::LocalDc);
    let second = mem_store("second", StorageType::RemoteDc);
    let third = mem_store("third", StorageType::RemoteDc);
    first.fail_with("disk full");
    let fanout = build(vec![first.clone(), second.clone(), third.clone()]);

    let err = fanout.write(Some(&write_query())).await.unwrap_err();
    assert_eq!(err.backend(), Some("first"));

    assert_eq!(first.calls(Operation::Write), 1);
    assert_eq!(second.calls(Operation::Write), 1);
    assert_eq!(third.calls(Operation::Write), 1);
    assert_eq!(second.series_count(), 1);
    assert_eq!(third.series_count(), 1);
}

// ============================================================================
// CATEGORY 4: WARN AND IGNORE BEHAVIOR
// ============================================================================

fn warn_then_ok() -> FanoutStorage {
    build(vec![
        Arc::new(ScriptedStorage::failing("warn", "warn", 2.0, ErrorBehavior::Warn)),
        Arc::new(ScriptedStorage::ok("ok", "ok", 1.0)),
    ])
}

#[tokio::test]
async fn test_warn_search_keeps_successful_metrics() {
    let result = warn_then_ok()
        .search_series(Some(&cpu_query()), &FetchOptions::new())
        .await
        .unwrap();

    let ids: Vec<_> = result.metrics.iter().map(|m| m.id.clone()).collect();
    assert_eq!(ids, vec![Bytes::from("ok")]);
    assert_eq!(result.metadata.warnings.len(), 1);
    assert_eq!(result.metadata.warnings[0].name, "warn");
}

#[tokio::test]
async fn test_warn_complete_tags_keeps_successful_tags() {
    let query = CompleteTagsQuery {
        complete_name_only: true,
        ..Default::default()
    };
    let result = warn_then_ok()
        .complete_tags(Some(&query), &FetchOptions::new())
        .await
        .unwrap();

    assert!(result.complete_name_only);
    assert_eq!(result.completed_tags, vec![CompletedTag::name_only("ok")]);
}

#[tokio::test]
async fn test_warn_fetch_blocks_keeps_successful_blocks() {
    let result = warn_then_ok()
        .fetch_blocks(Some(&cpu_query()), &FetchOptions::new())
        .await
        .unwrap();

    assert_eq!(result.blocks.len(), 1);
    let scalar = result.blocks[0]
        .as_any()
        .downcast_ref::<Scalar>()
        .expect("scalar block");
    assert_eq!(scalar.value(), 1.0);
}

#[tokio::test]
async fn test_warn_fetch_keeps_successful_series() {
    let result = warn_then_ok()
        .fetch(Some(&cpu_query()), &FetchOptions::new())
        .await
        .unwrap();

    assert_eq!(result.series_list.len(), 1);
    assert_eq!(result.series_list[0].name(), &Bytes::from("ok"));
    assert!(result.metadata.local_only);
}

#[tokio::test]
async fn test_ignore_failure_records_nothing() {
    let fanout = build(vec![
        Arc::new(ScriptedStorage::failing("quiet", "x", 0.0, ErrorBehavior::Ignore)),
        Arc::new(ScriptedStorage::ok("ok", "ok", 1.0)),
    ]);

    let result = fanout
        .fetch(Some(&cpu_query()), &FetchOptions::new())
        .await
        .unwrap();
    assert_eq!(result.series_list.len(), 1);
    assert!(result.metadata.warnings.is_empty());
    assert!(fanout.write(Some(&write_query())).await.is_ok());
}

#[tokio::test]
async fn test_only_warn_backends_failing_yields_empty_result() {
    let fanout = build(vec![Arc::new(ScriptedStorage::failing(
        "warn",
        "warn",
        0.0,
        ErrorBehavior::Warn,
    ))]);

    let result = fanout
        .search_series(Some(&cpu_query()), &FetchOptions::new())
        .await
        .unwrap();
    assert!(result.metrics.is_empty());
    assert_eq!(result.metadata.warnings.len(), 1);
}

#[tokio::test]
async fn test_warn_write_failure_still_writes_elsewhere() {
    let warn = Arc::new(
        InMemoryStorage::new("warn", StorageType::RemoteDc).with_behavior(ErrorBehavior::Warn),
    );
    let ok = mem_store("ok", StorageType::LocalDc);
    warn.fail_with("replica lagging");
    let fanout = build(vec![warn.clone(), ok.clone()]);

    fanout.write(Some(&write_query())).await.unwrap();

    assert_eq!(warn.calls(Operation::Write), 1);
    assert_eq!(ok.calls(Operation::Write), 1);
    assert_eq!(warn.series_count(), 0);
    let id = Tags::new().with_tag("__name__", "cpu").id();
    let stored = ok.get_series(&id).expect("series written to healthy backend");
    assert_eq!(stored.datapoints(), &[Datapoint::new(1, 1.0)]);
}

#[tokio::test]
async fn test_rejected_warn_blocks_return_their_cost() {
    let warn = Arc::new(
        InMemoryStorage::new("warn", StorageType::RemoteDc).with_behavior(ErrorBehavior::Warn),
    );
    for host in ["a", "b", "c"] {
        warn.insert_series(cpu_series(host, 1.0));
    }
    let ok = mem_store("ok", StorageType::LocalDc);
    ok.insert_series(cpu_series("d", 2.0));
    let fanout = build(vec![warn.clone(), ok.clone()]);

    let ctx = QueryContext::new(ChainedEnforcer::root(
        QUERY_LEVEL,
        Limit::new(10),
        Limit::new(4),
    ));
    let options = FetchOptions::new().with_query_context(ctx.clone());

    let result = fanout
        .fetch_blocks(Some(&cpu_query()), &options)
        .await
        .unwrap();
    assert_eq!(result.blocks.len(), 1);
    assert_eq!(result.metadata.warnings.len(), 1);
    assert_eq!(result.metadata.warnings[0].name, "warn");
    assert_eq!(ctx.enforcer().current(), 2);

    drop(result);
    assert_eq!(ctx.enforcer().current(), 0);
}

// ============================================================================
// CATEGORY 5: DE-DUPLICATION
// ============================================================================

#[tokio::test]
async fn test_local_copy_wins_over_remote() {
    let remote = mem_store("remote", StorageType::RemoteDc);
    let local = mem_store("local", StorageType::LocalDc);
    remote.insert_series(cpu_series("h1", 9.0));
    local.insert_series(cpu_series("h1", 1.0));
    let fanout = build(vec![remote, local]);

    let result = fanout
        .fetch(Some(&cpu_query()), &FetchOptions::new())
        .await
        .unwrap();
    assert_eq!(result.series_list.len(), 1);
    assert_eq!(result.series_list[0].datapoints()[0].value, 1.0);
}

#[tokio::test]
async fn test_complete_tags_dedups_values() {
    let a = mem_store("a", StorageType::LocalDc);
    let b = mem_store("b", StorageType::RemoteDc);
    a.insert_series(cpu_series("h1", 1.0));
    b.insert_series(cpu_series("h1", 1.0));
    b.insert_series(cpu_series("h2", 1.0));
    let fanout = build(vec![a, b]);

    let query = CompleteTagsQuery {
        filter_name_tags: vec![Bytes::from("host")],
        ..Default::default()
    };
    let result = fanout
        .complete_tags(Some(&query), &FetchOptions::new())
        .await
        .unwrap();
    assert!(!result.complete_name_only);
    assert_eq!(
        result.completed_tags,
        vec![CompletedTag::with_values(
            "host",
            vec![Bytes::from("h1"), Bytes::from("h2")]
        )]
    );
}

// ============================================================================
// CATEGORY 6: CANCELLATION, CLOSE, NESTING, CONFIG
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_caller_timeout_cancels_backend_calls() {
    let slow = Arc::new(
        InMemoryStorage::new("slow", StorageType::RemoteDc).with_latency(Duration::from_secs(60)),
    );
    let fanout = build(vec![slow.clone()]);
    let query = cpu_query();
    let options = FetchOptions::new();

    let outcome = tokio::time::timeout(
        Duration::from_millis(100),
        fanout.fetch(Some(&query), &options),
    )
    .await;
    assert!(outcome.is_err());
    assert_eq!(slow.calls(Operation::Fetch), 1);
}

#[tokio::test]
async fn test_close_returns_first_error_after_closing_all() {
    let a = Arc::new(ScriptedStorage::failing("a", "x", 0.0, ErrorBehavior::Ignore));
    let b = Arc::new(ScriptedStorage::ok("b", "ok", 1.0));
    let fanout = build(vec![a.clone(), b.clone()]);

    let err = fanout.close().await.unwrap_err();
    assert_eq!(err.backend(), Some("a"));
    assert_eq!(a.closes.load(Ordering::SeqCst), 1);
    assert_eq!(b.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_nested_fanout() {
    let inner_local = mem_store("inner-local", StorageType::LocalDc);
    inner_local.insert_series(cpu_series("h1", 1.0));
    let inner = build(vec![inner_local]);

    let outer_local = mem_store("outer-local", StorageType::LocalDc);
    outer_local.insert_series(cpu_series("h2", 2.0));
    let outer = build(vec![Arc::new(inner), outer_local]);

    let result = outer
        .fetch(Some(&cpu_query()), &FetchOptions::new())
        .await
        .unwrap();
    assert_eq!(result.series_list.len(), 2);
    assert!(!result.metadata.local_only);
}

#[tokio::test]
async fn test_config_driven_filters() {
    let config: Config = toml::from_str(
        r#"
        [filter]
        read = "local_only"
        write = "remote_only"

        [monitoring]
        metrics_enabled = false
        "#,
    )
    .unwrap();

    let local = mem_store("local", StorageType::LocalDc);
    let remote = mem_store("remote", StorageType::RemoteDc);
    let fanout = FanoutStorageBuilder::new()
        .with_backend_arc(local.clone())
        .with_backend_arc(remote.clone())
        .with_config(&config)
        .build()
        .unwrap();
    assert!(!fanout.instrument_options().metrics_enabled);

    fanout.write(Some(&write_query())).await.unwrap();
    fanout
        .fetch(Some(&cpu_query()), &FetchOptions::new())
        .await
        .unwrap();

    assert_eq!(local.calls(Operation::Write), 0);
    assert_eq!(remote.calls(Operation::Write), 1);
    assert_eq!(local.calls(Operation::Fetch), 1);
    assert_eq!(remote.calls(Operation::Fetch), 0);
}
