//! Column-major block and its builder
//!
//! Values are stored one column per step, each column holding one value per
//! series. Step iteration hands out borrowed columns directly; series
//! iteration gathers one value from every column into an owned [`Series`].

use super::{
    AccountedBlock, Block, BlockInfo, BlockType, Metadata, Series, SeriesIter, SeriesMeta, Step,
    StepIter,
};
use crate::context::QueryContext;
use crate::cost::{ChainedEnforcer, BLOCK_LEVEL};
use crate::error::BlockError;
use crate::metrics;
use prometheus::IntCounter;
use std::any::Any;
use std::sync::Arc;

/// Values of every series at one step
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Column {
    pub(crate) values: Vec<f64>,
}

/// Immutable column-major block
#[derive(Debug, Clone)]
pub struct ColumnBlock {
    block_type: BlockType,
    columns: Arc<Vec<Column>>,
    meta: Metadata,
    series_meta: Vec<SeriesMeta>,
}

impl Block for ColumnBlock {
    fn meta(&self) -> &Metadata {
        &self.meta
    }

    fn series_meta(&self) -> &[SeriesMeta] {
        &self.series_meta
    }

    fn step_count(&self) -> usize {
        self.columns.len()
    }

    fn step_iter(&self) -> Result<Box<dyn StepIter<'_> + '_>, BlockError> {
        let steps = self.meta.bounds.steps();
        if self.columns.len() != steps {
            return Err(BlockError::StepMismatch {
                columns: self.columns.len(),
                steps,
            });
        }

        Ok(Box::new(ColumnStepIter {
            columns: &self.columns,
            series_meta: &self.series_meta,
            meta: &self.meta,
            idx: 0,
            err: None,
        }))
    }

    fn series_iter(&self) -> Result<Box<dyn SeriesIter<'_> + '_>, BlockError> {
        Ok(Box::new(ColumnSeriesIter::new(
            &self.columns,
            &self.series_meta,
        )))
    }

    fn with_metadata(
        &self,
        meta: Metadata,
        series_meta: Vec<SeriesMeta>,
    ) -> Result<Box<dyn Block>, BlockError> {
        Ok(Box::new(ColumnBlock {
            block_type: BlockType::Decompressed,
            columns: Arc::clone(&self.columns),
            meta,
            series_meta,
        }))
    }

    fn info(&self) -> BlockInfo {
        BlockInfo::new(self.block_type)
    }

    // Nothing pooled yet, so nothing to hand back.
    fn close(&self) -> Result<(), BlockError> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct ColumnStepIter<'a> {
    columns: &'a [Column],
    series_meta: &'a [SeriesMeta],
    meta: &'a Metadata,
    idx: usize,
    err: Option<BlockError>,
}

impl<'a> Iterator for ColumnStepIter<'a> {
    type Item = Step<'a>;

    fn next(&mut self) -> Option<Step<'a>> {
        if self.err.is_some() || self.idx >= self.columns.len() {
            return None;
        }

        match self.meta.bounds.time_for_index(self.idx) {
            Ok(time) => {
                let step = Step::new(time, &self.columns[self.idx].values);
                self.idx += 1;
                Some(step)
            }
            Err(e) => {
                self.err = Some(e);
                None
            }
        }
    }
}

impl<'a> StepIter<'a> for ColumnStepIter<'a> {
    fn series_meta(&self) -> &'a [SeriesMeta] {
        self.series_meta
    }

    fn step_count(&self) -> usize {
        self.columns.len()
    }

    fn err(&self) -> Option<&BlockError> {
        self.err.as_ref()
    }
}

/// Series iterator; assumes every column has the same length
struct ColumnSeriesIter<'a> {
    columns: &'a [Column],
    series_meta: &'a [SeriesMeta],
    idx: usize,
    scratch: Vec<f64>,
}

impl<'a> ColumnSeriesIter<'a> {
    fn new(columns: &'a [Column], series_meta: &'a [SeriesMeta]) -> Self {
        Self {
            columns,
            series_meta,
            idx: 0,
            scratch: vec![0.0; columns.len()],
        }
    }

    fn total(&self) -> usize {
        self.columns.first().map_or(0, |c| c.values.len())
    }
}

impl<'a> Iterator for ColumnSeriesIter<'a> {
    type Item = Series;

    fn next(&mut self) -> Option<Series> {
        if self.idx >= self.total() {
            return None;
        }

        for (slot, column) in self.scratch.iter_mut().zip(self.columns) {
            *slot = column.values.get(self.idx).copied().unwrap_or(f64::NAN);
        }

        // TODO: pool series buffers once blocks release pooled state on close
        let meta = self.series_meta.get(self.idx).cloned().unwrap_or_default();
        self.idx += 1;
        Some(Series::new(self.scratch.clone(), meta))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total().saturating_sub(self.idx);
        (remaining, Some(remaining))
    }
}

impl<'a> SeriesIter<'a> for ColumnSeriesIter<'a> {
    fn series_meta(&self) -> &'a [SeriesMeta] {
        self.series_meta
    }

    fn series_count(&self) -> usize {
        self.total()
    }
}

/// Builds a [`ColumnBlock`] under a block-level cost budget
///
/// Every append is charged to a child of the query's enforcer before any
/// value is written, so a rejected append leaves the block untouched. The
/// child enforcer travels with the built block and is released when the
/// block is closed or dropped. A builder dropped before [`Self::build`]
/// releases it itself.
pub struct ColumnBlockBuilder {
    block_type: BlockType,
    columns: Vec<Column>,
    meta: Metadata,
    series_meta: Vec<SeriesMeta>,
    enforcer: Arc<ChainedEnforcer>,
    datapoints: IntCounter,
    built: bool,
}

impl ColumnBlockBuilder {
    /// Create a builder with no columns
    pub fn new(ctx: &QueryContext, meta: Metadata, series_meta: Vec<SeriesMeta>) -> Self {
        Self {
            block_type: BlockType::Decompressed,
            columns: Vec::new(),
            meta,
            series_meta,
            enforcer: ctx.enforcer().child(BLOCK_LEVEL),
            datapoints: metrics::BLOCK_DATAPOINTS.with_label_values(&["generated"]),
            built: false,
        }
    }

    /// Append `num` empty columns
    pub fn add_cols(&mut self, num: usize) -> Result<(), BlockError> {
        if num < 1 {
            return Err(BlockError::InvalidColumnCount(num));
        }

        self.columns
            .try_reserve(num)
            .map_err(|_| BlockError::TooManyColumns(num))?;
        self.columns
            .extend(std::iter::repeat_with(Column::default).take(num));
        Ok(())
    }

    /// Append one value to the column at `idx`
    pub fn append_value(&mut self, idx: usize, value: f64) -> Result<(), BlockError> {
        let len = self.columns.len();
        let column = self
            .columns
            .get_mut(idx)
            .ok_or(BlockError::IndexOutOfRange { idx, len })?;

        self.enforcer.add(1)?;
        self.datapoints.inc();

        column.values.push(value);
        Ok(())
    }

    /// Append a batch of values to the column at `idx`
    ///
    /// The batch is charged as a whole; a rejection appends nothing.
    pub fn append_values(&mut self, idx: usize, values: &[f64]) -> Result<(), BlockError> {
        let len = self.columns.len();
        let column = self
            .columns
            .get_mut(idx)
            .ok_or(BlockError::IndexOutOfRange { idx, len })?;

        self.enforcer.add(values.len() as u64)?;
        self.datapoints.inc_by(values.len() as u64);

        column.values.extend_from_slice(values);
        Ok(())
    }

    /// Current number of columns
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Values appended so far to the column at `idx`
    pub fn column_values(&self, idx: usize) -> Option<&[f64]> {
        self.columns.get(idx).map(|c| c.values.as_slice())
    }

    /// Block-level enforcer charged by appends
    pub fn enforcer(&self) -> &Arc<ChainedEnforcer> {
        &self.enforcer
    }

    /// Finish the block
    pub fn build(mut self) -> AccountedBlock {
        self.built = true;
        let block = ColumnBlock {
            block_type: self.block_type,
            columns: Arc::new(std::mem::take(&mut self.columns)),
            meta: std::mem::take(&mut self.meta),
            series_meta: std::mem::take(&mut self.series_meta),
        };
        AccountedBlock::new(Box::new(block), Arc::clone(&self.enforcer))
    }

    /// Finish the block under a different block type
    pub fn build_as_type(mut self, block_type: BlockType) -> AccountedBlock {
        self.block_type = block_type;
        self.build()
    }
}

impl Drop for ColumnBlockBuilder {
    fn drop(&mut self) {
        if !self.built {
            self.enforcer.close();
        }
    }
}
