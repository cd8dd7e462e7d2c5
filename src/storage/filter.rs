//! Backend selection predicates
//!
//! A coordinator evaluates its filters once per backend on every request.
//! Filters must be pure: they run on the request path and may run
//! concurrently for different requests.

use super::traits::{CompleteTagsQuery, Query, Storage, StorageType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Decides whether a backend serves a fetch or write request
pub type StorageFilter = Arc<dyn Fn(Query<'_>, &dyn Storage) -> bool + Send + Sync>;

/// Decides whether a backend serves a tag completion request
pub type CompleteTagsFilter = Arc<dyn Fn(&CompleteTagsQuery, &dyn Storage) -> bool + Send + Sync>;

fn accept(_: Query<'_>, _: &dyn Storage) -> bool {
    true
}

fn reject(_: Query<'_>, _: &dyn Storage) -> bool {
    false
}

fn is_local(_: Query<'_>, store: &dyn Storage) -> bool {
    store.storage_type() == StorageType::LocalDc
}

fn is_remote(_: Query<'_>, store: &dyn Storage) -> bool {
    store.storage_type() != StorageType::LocalDc
}

fn accept_tags(_: &CompleteTagsQuery, _: &dyn Storage) -> bool {
    true
}

fn reject_tags(_: &CompleteTagsQuery, _: &dyn Storage) -> bool {
    false
}

fn is_local_tags(_: &CompleteTagsQuery, store: &dyn Storage) -> bool {
    store.storage_type() == StorageType::LocalDc
}

fn is_remote_tags(_: &CompleteTagsQuery, store: &dyn Storage) -> bool {
    store.storage_type() != StorageType::LocalDc
}

/// Every backend participates
pub fn allow_all() -> StorageFilter {
    Arc::new(accept)
}

/// No backend participates
pub fn allow_none() -> StorageFilter {
    Arc::new(reject)
}

/// Only local-datacenter backends participate
pub fn local_only() -> StorageFilter {
    Arc::new(is_local)
}

/// Only backends outside the local datacenter participate
pub fn remote_only() -> StorageFilter {
    Arc::new(is_remote)
}

/// Every backend completes tags
pub fn complete_tags_allow_all() -> CompleteTagsFilter {
    Arc::new(accept_tags)
}

/// No backend completes tags
pub fn complete_tags_allow_none() -> CompleteTagsFilter {
    Arc::new(reject_tags)
}

/// Only local-datacenter backends complete tags
pub fn complete_tags_local_only() -> CompleteTagsFilter {
    Arc::new(is_local_tags)
}

/// Only backends outside the local datacenter complete tags
pub fn complete_tags_remote_only() -> CompleteTagsFilter {
    Arc::new(is_remote_tags)
}

/// Named filter policy, as found in configuration files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterPolicy {
    /// See [`allow_all`]
    #[default]
    AllowAll,
    /// See [`allow_none`]
    AllowNone,
    /// See [`local_only`]
    LocalOnly,
    /// See [`remote_only`]
    RemoteOnly,
}

impl FilterPolicy {
    /// Predicate for fetch and write requests
    pub fn storage_filter(&self) -> StorageFilter {
        match self {
            FilterPolicy::AllowAll => allow_all(),
            FilterPolicy::AllowNone => allow_none(),
            FilterPolicy::LocalOnly => local_only(),
            FilterPolicy::RemoteOnly => remote_only(),
        }
    }

    /// Predicate for tag completion requests
    pub fn complete_tags_filter(&self) -> CompleteTagsFilter {
        match self {
            FilterPolicy::AllowAll => complete_tags_allow_all(),
            FilterPolicy::AllowNone => complete_tags_allow_none(),
            FilterPolicy::LocalOnly => complete_tags_local_only(),
            FilterPolicy::RemoteOnly => complete_tags_remote_only(),
        }
    }
}

impl fmt::Display for FilterPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterPolicy::AllowAll => "allow_all",
            FilterPolicy::AllowNone => "allow_none",
            FilterPolicy::LocalOnly => "local_only",
            FilterPolicy::RemoteOnly => "remote_only",
        };
        f.write_str(name)
    }
}

impl FromStr for FilterPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow_all" => Ok(FilterPolicy::AllowAll),
            "allow_none" => Ok(FilterPolicy::AllowNone),
            "local_only" => Ok(FilterPolicy::LocalOnly),
            "remote_only" => Ok(FilterPolicy::RemoteOnly),
            other => Err(format!("unknown filter policy '{}'", other)),
        }
    }
}
