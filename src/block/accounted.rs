//! Block decorator that owns a cost enforcer

use super::{Block, BlockInfo, Metadata, SeriesIter, SeriesMeta, StepIter};
use crate::cost::ChainedEnforcer;
use crate::error::BlockError;
use std::any::Any;
use std::sync::Arc;

/// Wraps a block together with the enforcer its construction was charged to
///
/// Closing (or dropping) the block closes the enforcer, which returns the
/// block's cost to the query budget.
#[derive(Debug)]
pub struct AccountedBlock {
    inner: Box<dyn Block>,
    enforcer: Arc<ChainedEnforcer>,
}

impl AccountedBlock {
    /// Wrap a block
    pub fn new(inner: Box<dyn Block>, enforcer: Arc<ChainedEnforcer>) -> Self {
        Self { inner, enforcer }
    }

    /// Enforcer released by this block
    pub fn enforcer(&self) -> &Arc<ChainedEnforcer> {
        &self.enforcer
    }
}

impl Block for AccountedBlock {
    fn meta(&self) -> &Metadata {
        self.inner.meta()
    }

    fn series_meta(&self) -> &[SeriesMeta] {
        self.inner.series_meta()
    }

    fn step_count(&self) -> usize {
        self.inner.step_count()
    }

    fn step_iter(&self) -> Result<Box<dyn StepIter<'_> + '_>, BlockError> {
        self.inner.step_iter()
    }

    fn series_iter(&self) -> Result<Box<dyn SeriesIter<'_> + '_>, BlockError> {
        self.inner.series_iter()
    }

    fn with_metadata(
        &self,
        meta: Metadata,
        series_meta: Vec<SeriesMeta>,
    ) -> Result<Box<dyn Block>, BlockError> {
        self.inner.with_metadata(meta, series_meta)
    }

    fn info(&self) -> BlockInfo {
        self.inner.info()
    }

    fn close(&self) -> Result<(), BlockError> {
        self.enforcer.close();
        self.inner.close()
    }

    /// Downcasts see the wrapped block
    fn as_any(&self) -> &dyn Any {
        self.inner.as_any()
    }
}

impl Drop for AccountedBlock {
    fn drop(&mut self) {
        self.enforcer.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{ColumnBlock, ColumnBlockBuilder};
    use crate::context::QueryContext;

    fn built(ctx: &QueryContext, values: &[f64]) -> AccountedBlock {
        let mut builder = ColumnBlockBuilder::new(ctx, Metadata::default(), Vec::new());
        builder.add_cols(1).unwrap();
        builder.append_values(0, values).unwrap();
        builder.build()
    }

    #[test]
    fn test_close_releases_cost() {
        let ctx = QueryContext::default();
        let block = built(&ctx, &[1.0, 2.0, 3.0]);
        assert_eq!(ctx.enforcer().current(), 3);

        block.close().unwrap();
        assert_eq!(ctx.enforcer().current(), 0);
        assert!(block.enforcer().is_closed());
    }

    #[test]
    fn test_drop_releases_cost() {
        let ctx = QueryContext::default();
        {
            let _block = built(&ctx, &[1.0, 2.0]);
            assert_eq!(ctx.enforcer().current(), 2);
        }
        assert_eq!(ctx.enforcer().current(), 0);
    }

    #[test]
    fn test_as_any_reaches_inner_block() {
        let block = built(&QueryContext::default(), &[1.0]);
        assert!(block.as_any().downcast_ref::<ColumnBlock>().is_some());
    }
}
