//! Per-query context shared by the coordinator, backends and block builders

use crate::config::CostConfig;
use crate::cost::{ChainedEnforcer, Limit, QUERY_LEVEL};
use std::sync::Arc;

/// State attached to a single query
///
/// Cheap to clone; clones share the same query-level enforcer.
#[derive(Debug, Clone)]
pub struct QueryContext {
    enforcer: Arc<ChainedEnforcer>,
}

impl QueryContext {
    /// Create a context around an existing enforcer
    pub fn new(enforcer: Arc<ChainedEnforcer>) -> Self {
        Self { enforcer }
    }

    /// Create a context whose enforcer follows the cost configuration
    pub fn from_config(config: &CostConfig) -> Self {
        let (query, block) = if config.enabled {
            (Limit::new(config.query_limit), Limit::new(config.block_limit))
        } else {
            (Limit::unlimited(), Limit::unlimited())
        };
        Self::new(ChainedEnforcer::root(QUERY_LEVEL, query, block))
    }

    /// Query-level enforcer
    pub fn enforcer(&self) -> &Arc<ChainedEnforcer> {
        &self.enforcer
    }
}

impl Default for QueryContext {
    fn default() -> Self {
        Self::new(ChainedEnforcer::noop())
    }
}
