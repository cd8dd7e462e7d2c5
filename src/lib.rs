//! Kuba Fanout - Fan-out storage coordination for time-series backends
//!
//! This library provides:
//! - A coordinator presenting several storage backends as one, with
//!   per-backend failure policies (fail, warn, ignore)
//! - Pluggable backend selection filters (local-only, remote-only, ...)
//! - Columnar query blocks with step and series iteration
//! - Chained cost accounting bounding the datapoints a query may hold
//!
//! # Example
//!
//! ```rust
//! use kuba_fanout::storage::stubs::InMemoryStorage;
//! use kuba_fanout::storage::{ErrorBehavior, FanoutStorageBuilder, FetchOptions, FetchQuery, StorageType};
//! use kuba_fanout::types::{Datapoint, Matcher, Series, Tags};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let local = InMemoryStorage::new("local", StorageType::LocalDc);
//! local.insert_series(Series::new(
//!     "cpu",
//!     Tags::new().with_tag("__name__", "cpu"),
//!     vec![Datapoint::new(10, 0.5)],
//! ));
//!
//! let remote = InMemoryStorage::new("remote", StorageType::RemoteDc)
//!     .with_behavior(ErrorBehavior::Warn);
//! remote.fail_with("connection refused");
//!
//! let fanout = FanoutStorageBuilder::new()
//!     .with_backend(local)
//!     .with_backend(remote)
//!     .build()?;
//!
//! let query = FetchQuery::new(vec![Matcher::equal("__name__", "cpu")], 0, 100);
//! let result = fanout.fetch(Some(&query), &FetchOptions::new()).await?;
//!
//! assert_eq!(result.series_list.len(), 1);
//! assert_eq!(result.metadata.warnings[0].name, "remote");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod block;
pub mod error;
pub mod storage;
pub mod types;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Hierarchical cost enforcement
pub mod cost;

/// Per-query context
pub mod context;

// Re-export main types
pub use block::{Block, BlockResult, ColumnBlockBuilder};
pub use config::Config;
pub use context::QueryContext;
pub use error::{Error, Result};
pub use storage::{FanoutStorage, FanoutStorageBuilder, Storage};
