//! Backend capability trait and the request/response types it exchanges

use crate::block::{BlockResult, ResultMetadata};
use crate::context::QueryContext;
use crate::error::StorageError;
use crate::types::{Datapoint, Matchers, Metric, Series, Tags};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// =============================================================================
// Backend classification
// =============================================================================

/// How a backend failure affects a fan-out operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorBehavior {
    /// Abort the whole operation with the backend's error
    #[default]
    Fail,
    /// Log and record a warning, drop the backend's contribution
    Warn,
    /// Drop the backend's contribution silently
    Ignore,
}

impl ErrorBehavior {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorBehavior::Fail => "fail",
            ErrorBehavior::Warn => "warn",
            ErrorBehavior::Ignore => "ignore",
        }
    }
}

impl fmt::Display for ErrorBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a backend's data lives relative to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    /// Store in the local datacenter
    LocalDc,
    /// Store in a remote datacenter
    RemoteDc,
    /// Store spanning several datacenters (e.g. a nested fan-out)
    MultiDc,
}

impl StorageType {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::LocalDc => "local_dc",
            StorageType::RemoteDc => "remote_dc",
            StorageType::MultiDc => "multi_dc",
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage operations, for logging and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `fetch`
    Fetch,
    /// `write`
    Write,
    /// `search_series`
    SearchSeries,
    /// `complete_tags`
    CompleteTags,
    /// `fetch_blocks`
    FetchBlocks,
    /// `close`
    Close,
}

impl Operation {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Fetch => "fetch",
            Operation::Write => "write",
            Operation::SearchSeries => "search_series",
            Operation::CompleteTags => "complete_tags",
            Operation::FetchBlocks => "fetch_blocks",
            Operation::Close => "close",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Requests
// =============================================================================

/// Read request selecting series by tag matchers over a time range
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchQuery {
    /// Original query text, for logging
    pub raw: String,
    /// Series must satisfy every matcher
    pub tag_matchers: Matchers,
    /// Start of the range in milliseconds (inclusive)
    pub start: i64,
    /// End of the range in milliseconds (exclusive)
    pub end: i64,
    /// Step size for block results
    pub interval: Duration,
}

impl FetchQuery {
    /// Create a query over `[start, end)`
    pub fn new(tag_matchers: Matchers, start: i64, end: i64) -> Self {
        Self {
            raw: String::new(),
            tag_matchers,
            start,
            end,
            interval: Duration::ZERO,
        }
    }

    /// Set the block step size
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the raw query text
    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = raw.into();
        self
    }

    /// Whether a timestamp falls in the query range
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }
}

/// Write request for a single series
#[derive(Debug, Clone, PartialEq)]
pub struct WriteQuery {
    /// Series tags; their id names the series
    pub tags: Tags,
    /// Datapoints to write
    pub datapoints: Vec<Datapoint>,
    /// Opaque per-write annotation
    pub annotation: Option<Bytes>,
}

impl WriteQuery {
    /// Create a write, rejecting requests without datapoints
    pub fn new(tags: Tags, datapoints: Vec<Datapoint>) -> Result<Self, StorageError> {
        if datapoints.is_empty() {
            return Err(StorageError::InvalidQuery(
                "write requires at least one datapoint".to_string(),
            ));
        }
        Ok(Self {
            tags,
            datapoints,
            annotation: None,
        })
    }

    /// Attach an annotation
    pub fn with_annotation(mut self, annotation: impl Into<Bytes>) -> Self {
        self.annotation = Some(annotation.into());
        self
    }
}

/// Tag completion request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompleteTagsQuery {
    /// Return tag names only, without values
    pub complete_name_only: bool,
    /// Restrict completion to these tag names (empty means all)
    pub filter_name_tags: Vec<Bytes>,
    /// Series must satisfy every matcher
    pub tag_matchers: Matchers,
    /// Start of the range in milliseconds
    pub start: i64,
    /// End of the range in milliseconds
    pub end: i64,
}

/// Any request a fetch/write filter may inspect
#[derive(Debug, Clone, Copy)]
pub enum Query<'a> {
    /// Read-side request
    Fetch(&'a FetchQuery),
    /// Write request
    Write(&'a WriteQuery),
}

/// Per-call options forwarded to every backend
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Maximum series a backend should return
    pub limit: Option<usize>,
    /// Query context; blocks built by backends are charged to its enforcer
    pub query_context: QueryContext,
}

impl FetchOptions {
    /// Default options: no limit, unlimited cost budget
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the number of series per backend
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Use a specific query context
    pub fn with_query_context(mut self, ctx: QueryContext) -> Self {
        self.query_context = ctx;
        self
    }
}

// =============================================================================
// Responses
// =============================================================================

/// Series returned by `fetch`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchResult {
    /// Fetched series
    pub series_list: Vec<Series>,
    /// Completeness information
    pub metadata: ResultMetadata,
}

impl FetchResult {
    /// Create a result from series
    pub fn new(series_list: Vec<Series>) -> Self {
        Self {
            series_list,
            metadata: ResultMetadata::new(),
        }
    }

    /// Empty result
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Series identities returned by `search_series`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResults {
    /// Matching metrics
    pub metrics: Vec<Metric>,
    /// Completeness information
    pub metadata: ResultMetadata,
}

impl SearchResults {
    /// Create a result from metrics
    pub fn new(metrics: Vec<Metric>) -> Self {
        Self {
            metrics,
            metadata: ResultMetadata::new(),
        }
    }

    /// Empty result
    pub fn empty() -> Self {
        Self::default()
    }
}

/// One completed tag
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletedTag {
    /// Tag name
    pub name: Bytes,
    /// Known values; empty for name-only completion
    pub values: Vec<Bytes>,
}

impl CompletedTag {
    /// Completed tag without values
    pub fn name_only(name: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
        }
    }

    /// Completed tag with values
    pub fn with_values(name: impl Into<Bytes>, values: Vec<Bytes>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// Tags returned by `complete_tags`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompleteTagsResult {
    /// Whether values were omitted
    pub complete_name_only: bool,
    /// Completed tags, sorted by name
    pub completed_tags: Vec<CompletedTag>,
    /// Completeness information
    pub metadata: ResultMetadata,
}

impl CompleteTagsResult {
    /// Create a result
    pub fn new(complete_name_only: bool, completed_tags: Vec<CompletedTag>) -> Self {
        Self {
            complete_name_only,
            completed_tags,
            metadata: ResultMetadata::new(),
        }
    }

    /// Empty result in the given mode
    pub fn empty(complete_name_only: bool) -> Self {
        Self::new(complete_name_only, Vec::new())
    }
}

// =============================================================================
// Storage Trait
// =============================================================================

/// Capability set of a storage backend
///
/// Backends are shared between concurrent requests, so every method takes
/// `&self`. Errors are classified by the caller using
/// [`Storage::error_behavior`].
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Fetch series matching the query
    async fn fetch(
        &self,
        query: &FetchQuery,
        options: &FetchOptions,
    ) -> Result<FetchResult, StorageError>;

    /// Write datapoints for one series
    async fn write(&self, query: &WriteQuery) -> Result<(), StorageError>;

    /// Find identities of series matching the query
    async fn search_series(
        &self,
        query: &FetchQuery,
        options: &FetchOptions,
    ) -> Result<SearchResults, StorageError>;

    /// Complete tag names (and values) for series matching the query
    async fn complete_tags(
        &self,
        query: &CompleteTagsQuery,
        options: &FetchOptions,
    ) -> Result<CompleteTagsResult, StorageError>;

    /// Fetch matching series as blocks
    async fn fetch_blocks(
        &self,
        query: &FetchQuery,
        options: &FetchOptions,
    ) -> Result<BlockResult, StorageError>;

    /// How failures of this backend are treated by a coordinator
    fn error_behavior(&self) -> ErrorBehavior;

    /// Backend name, used in logs and warnings
    fn name(&self) -> &str;

    /// Backend placement
    fn storage_type(&self) -> StorageType;

    /// Release the backend's resources
    async fn close(&self) -> Result<(), StorageError>;
}
