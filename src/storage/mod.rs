//! Storage layer: backend trait and the fan-out coordinator
//!
//! This module defines the [`Storage`] capability set every backend
//! implements, and [`FanoutStorage`], which presents several backends as a
//! single one.
//!
//! # Architecture
//!
//! ```text
//! Request Flow:
//! caller → FanoutStorage → filter → backend₁ ┐
//!                                 → backend₂ ├→ merge (backend order) → result
//!                                 → backend₃ ┘
//! ```
//!
//! # Key Components
//!
//! - **Storage**: async trait implemented by every backend (and by the
//!   coordinator itself, so coordinators nest)
//! - **Filters**: per-request predicates choosing the participating backends
//! - **Mergers**: per-call accumulators deduplicating backend answers
//! - **InMemoryStorage**: in-memory backend for tests and prototyping

/// Fan-out coordinator and its builder
pub mod fanout;
/// Backend selection predicates and named policies
pub mod filter;
/// Accumulators merging backend answers
pub mod merge;
/// In-memory backend with failure injection
pub mod stubs;
/// Backend trait and request/response types
pub mod traits;

pub use fanout::{FanoutStorage, FanoutStorageBuilder, InstrumentOptions, FANOUT_STORE_NAME};
pub use filter::{CompleteTagsFilter, FilterPolicy, StorageFilter};
pub use traits::{
    CompleteTagsQuery, CompleteTagsResult, CompletedTag, ErrorBehavior, FetchOptions, FetchQuery,
    FetchResult, Operation, Query, SearchResults, Storage, StorageType, WriteQuery,
};
