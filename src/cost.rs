//! Chained cost enforcement for query resource accounting
//!
//! A query owns a root enforcer; every block built for that query gets a child
//! enforcer. Adding cost to a child adds it to every ancestor as well, and the
//! add is rejected if any scope along the chain would exceed its threshold.
//! Closing a child releases its accumulated cost from the ancestors, so a
//! query's budget frees up as its intermediate blocks are discarded.
//!
//! # Example
//!
//! ```rust
//! use kuba_fanout::cost::{ChainedEnforcer, Limit, BLOCK_LEVEL};
//!
//! let query = ChainedEnforcer::root("query", Limit::new(100), Limit::new(10));
//! let block = query.child(BLOCK_LEVEL);
//!
//! assert!(block.add(8).is_ok());
//! assert!(block.add(5).is_err()); // block budget is 10
//! assert_eq!(query.current(), 8);
//!
//! block.close();
//! assert_eq!(query.current(), 0);
//! ```

use crate::error::CostError;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Name of the query-level scope
pub const QUERY_LEVEL: &str = "query";

/// Name of the block-level scope
pub const BLOCK_LEVEL: &str = "block";

/// Cost threshold of one enforcer scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    /// Maximum cost the scope may accumulate
    pub threshold: u64,
    /// Disabled limits accept any cost
    pub enabled: bool,
}

impl Limit {
    /// Enabled limit with the given threshold
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold,
            enabled: true,
        }
    }

    /// Limit that never rejects
    pub fn unlimited() -> Self {
        Self {
            threshold: u64::MAX,
            enabled: false,
        }
    }

    fn accepts(&self, cost: u64) -> bool {
        !self.enabled || cost <= self.threshold
    }
}

impl Default for Limit {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// Hierarchical cost enforcer
///
/// All accounting is lock-free; concurrent `add` calls on the same scope see a
/// consistent add-and-check through a compare-and-swap loop.
#[derive(Debug)]
pub struct ChainedEnforcer {
    resource: String,
    current: AtomicU64,
    limit: Limit,
    child_limit: Limit,
    parent: Option<Arc<ChainedEnforcer>>,
    closed: AtomicBool,
}

impl ChainedEnforcer {
    /// Create a root enforcer
    ///
    /// `child_limit` is applied to every scope created through [`Self::child`].
    pub fn root(resource: impl Into<String>, limit: Limit, child_limit: Limit) -> Arc<Self> {
        Arc::new(Self {
            resource: resource.into(),
            current: AtomicU64::new(0),
            limit,
            child_limit,
            parent: None,
            closed: AtomicBool::new(false),
        })
    }

    /// Enforcer that accepts every cost
    pub fn noop() -> Arc<Self> {
        Self::root(QUERY_LEVEL, Limit::unlimited(), Limit::unlimited())
    }

    /// Create a child scope whose costs also count against this scope
    pub fn child(self: &Arc<Self>, resource: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            resource: resource.into(),
            current: AtomicU64::new(0),
            limit: self.child_limit,
            child_limit: self.child_limit,
            parent: Some(Arc::clone(self)),
            closed: AtomicBool::new(false),
        })
    }

    /// Add cost to this scope and every ancestor
    ///
    /// On rejection nothing is committed anywhere in the chain.
    pub fn add(&self, cost: u64) -> Result<(), CostError> {
        self.try_add_local(cost)?;

        if let Some(parent) = &self.parent {
            if let Err(e) = parent.add(cost) {
                self.current.fetch_sub(cost, Ordering::AcqRel);
                return Err(e);
            }
        }

        Ok(())
    }

    fn try_add_local(&self, cost: u64) -> Result<(), CostError> {
        let mut current = self.current.load(Ordering::Acquire);
        loop {
            let next = current.saturating_add(cost);
            if !self.limit.accepts(next) {
                return Err(CostError::LimitExceeded {
                    resource: self.resource.clone(),
                    current: next,
                    threshold: self.limit.threshold,
                });
            }

            match self.current.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    fn release(&self, cost: u64) {
        let _ = self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                Some(c.saturating_sub(cost))
            });
        if let Some(parent) = &self.parent {
            parent.release(cost);
        }
    }

    /// Cost accumulated in this scope
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    /// Accumulated cost and limit of this scope
    pub fn state(&self) -> (u64, Limit) {
        (self.current(), self.limit)
    }

    /// Scope name
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Release this scope's cost from its ancestors
    ///
    /// Only the first call has an effect.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let cost = self.current();
        if let Some(parent) = &self.parent {
            parent.release(cost);
        }
    }

    /// Whether [`Self::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
