//! Scalar block: one value repeated over every step

use super::{
    Block, BlockInfo, BlockType, Metadata, Series, SeriesIter, SeriesMeta, Step, StepIter,
};
use crate::error::BlockError;
use std::any::Any;

/// Block holding a single value for a single series at every step
#[derive(Debug, Clone)]
pub struct Scalar {
    value: f64,
    meta: Metadata,
    series_meta: Vec<SeriesMeta>,
}

impl Scalar {
    /// Create a scalar block over the metadata's bounds
    pub fn new(value: f64, meta: Metadata) -> Self {
        let series_meta = vec![SeriesMeta::new("", meta.tags.clone())];
        Self {
            value,
            meta,
            series_meta,
        }
    }

    /// The scalar value
    pub fn value(&self) -> f64 {
        self.value
    }
}

impl Block for Scalar {
    fn meta(&self) -> &Metadata {
        &self.meta
    }

    fn series_meta(&self) -> &[SeriesMeta] {
        &self.series_meta
    }

    fn step_count(&self) -> usize {
        self.meta.bounds.steps()
    }

    fn step_iter(&self) -> Result<Box<dyn StepIter<'_> + '_>, BlockError> {
        Ok(Box::new(ScalarStepIter {
            block: self,
            idx: 0,
            err: None,
        }))
    }

    fn series_iter(&self) -> Result<Box<dyn SeriesIter<'_> + '_>, BlockError> {
        Ok(Box::new(ScalarSeriesIter {
            block: self,
            done: false,
        }))
    }

    fn with_metadata(
        &self,
        meta: Metadata,
        series_meta: Vec<SeriesMeta>,
    ) -> Result<Box<dyn Block>, BlockError> {
        Ok(Box::new(Scalar {
            value: self.value,
            meta,
            series_meta,
        }))
    }

    fn info(&self) -> BlockInfo {
        BlockInfo::new(BlockType::Scalar)
    }

    fn close(&self) -> Result<(), BlockError> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct ScalarStepIter<'a> {
    block: &'a Scalar,
    idx: usize,
    err: Option<BlockError>,
}

impl<'a> Iterator for ScalarStepIter<'a> {
    type Item = Step<'a>;

    fn next(&mut self) -> Option<Step<'a>> {
        if self.err.is_some() || self.idx >= self.block.step_count() {
            return None;
        }

        match self.block.meta.bounds.time_for_index(self.idx) {
            Ok(time) => {
                self.idx += 1;
                Some(Step::new(time, std::slice::from_ref(&self.block.value)))
            }
            Err(e) => {
                self.err = Some(e);
                None
            }
        }
    }
}

impl<'a> StepIter<'a> for ScalarStepIter<'a> {
    fn series_meta(&self) -> &'a [SeriesMeta] {
        &self.block.series_meta
    }

    fn step_count(&self) -> usize {
        self.block.step_count()
    }

    fn err(&self) -> Option<&BlockError> {
        self.err.as_ref()
    }
}

struct ScalarSeriesIter<'a> {
    block: &'a Scalar,
    done: bool,
}

impl<'a> Iterator for ScalarSeriesIter<'a> {
    type Item = Series;

    fn next(&mut self) -> Option<Series> {
        if self.done {
            return None;
        }
        self.done = true;

        let values = vec![self.block.value; self.block.step_count()];
        let meta = self.block.series_meta.first().cloned().unwrap_or_default();
        Some(Series::new(values, meta))
    }
}

impl<'a> SeriesIter<'a> for ScalarSeriesIter<'a> {
    fn series_meta(&self) -> &'a [SeriesMeta] {
        &self.block.series_meta
    }

    fn series_count(&self) -> usize {
        1
    }
}
