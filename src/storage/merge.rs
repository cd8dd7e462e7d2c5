//! Accumulators combining per-backend results into one response
//!
//! Each accumulator is local to a single coordinator call; results are added
//! in backend order and `finalize` produces the merged response.

use super::traits::{CompleteTagsResult, CompletedTag, FetchResult, SearchResults, StorageType};
use crate::block::{Block, BlockResult, ResultMetadata};
use crate::error::StorageError;
use crate::types::{Metric, Series};
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

// =============================================================================
// Fetch
// =============================================================================

/// Merges series from several backends
///
/// Series are identified by name. The first copy seen wins, except that a
/// copy from a [`StorageType::LocalDc`] backend replaces a copy that came from
/// anywhere else.
#[derive(Debug)]
pub struct MultiFetchResult {
    series: Vec<(Series, StorageType)>,
    index: HashMap<Bytes, usize>,
    metadata: ResultMetadata,
}

impl MultiFetchResult {
    /// Empty accumulator
    pub fn new() -> Self {
        Self {
            series: Vec::new(),
            index: HashMap::new(),
            metadata: ResultMetadata::new(),
        }
    }

    /// Add one backend's result
    pub fn add(&mut self, result: FetchResult, storage_type: StorageType) {
        let mut metadata = result.metadata;
        metadata.local_only = metadata.local_only && storage_type == StorageType::LocalDc;
        self.metadata = std::mem::take(&mut self.metadata).combine(metadata);

        for series in result.series_list {
            match self.index.get(series.name()) {
                Some(&pos) => {
                    let existing = &mut self.series[pos];
                    if storage_type == StorageType::LocalDc && existing.1 != StorageType::LocalDc {
                        *existing = (series, storage_type);
                    }
                }
                None => {
                    self.index.insert(series.name().clone(), self.series.len());
                    self.series.push((series, storage_type));
                }
            }
        }
    }

    /// Record a tolerated backend failure
    pub fn add_warning(&mut self, name: &str, message: &str) {
        self.metadata.add_warning(name, message);
    }

    /// Number of distinct series accumulated
    pub fn len(&self) -> usize {
        self.series.len()
    }

    /// Whether no series were accumulated
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Produce the merged result
    pub fn finalize(self) -> FetchResult {
        FetchResult {
            series_list: self.series.into_iter().map(|(s, _)| s).collect(),
            metadata: self.metadata,
        }
    }
}

impl Default for MultiFetchResult {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Search
// =============================================================================

/// Union of metrics keyed by id; the first copy seen wins
#[derive(Debug, Default)]
pub struct MultiSearchResult {
    metrics: Vec<Metric>,
    ids: HashSet<Bytes>,
    metadata: ResultMetadata,
}

impl MultiSearchResult {
    /// Empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one backend's result
    pub fn add(&mut self, result: SearchResults, storage_type: StorageType) {
        let mut metadata = result.metadata;
        metadata.local_only = metadata.local_only && storage_type == StorageType::LocalDc;
        self.metadata = std::mem::take(&mut self.metadata).combine(metadata);

        for metric in result.metrics {
            if self.ids.insert(metric.id.clone()) {
                self.metrics.push(metric);
            }
        }
    }

    /// Record a tolerated backend failure
    pub fn add_warning(&mut self, name: &str, message: &str) {
        self.metadata.add_warning(name, message);
    }

    /// Produce the merged result
    pub fn finalize(self) -> SearchResults {
        SearchResults {
            metrics: self.metrics,
            metadata: self.metadata,
        }
    }
}

// =============================================================================
// Complete tags
// =============================================================================

/// Deduplicates completed tags across backends
///
/// Output is sorted by tag name, and by value within a tag.
#[derive(Debug)]
pub struct CompleteTagsResultBuilder {
    name_only: bool,
    tags: BTreeMap<Bytes, BTreeSet<Bytes>>,
    metadata: ResultMetadata,
}

impl CompleteTagsResultBuilder {
    /// Accumulator for the given completion mode
    pub fn new(name_only: bool) -> Self {
        Self {
            name_only,
            tags: BTreeMap::new(),
            metadata: ResultMetadata::new(),
        }
    }

    /// Add one backend's result
    ///
    /// Results in the other completion mode cannot be merged and are rejected
    /// without changing the accumulator.
    pub fn add(
        &mut self,
        result: CompleteTagsResult,
        storage_type: StorageType,
    ) -> Result<(), StorageError> {
        if result.complete_name_only != self.name_only {
            return Err(StorageError::IncompatibleCompletion {
                expected: self.name_only,
                actual: result.complete_name_only,
            });
        }

        let mut metadata = result.metadata;
        metadata.local_only = metadata.local_only && storage_type == StorageType::LocalDc;
        self.metadata = std::mem::take(&mut self.metadata).combine(metadata);

        for tag in result.completed_tags {
            let values = self.tags.entry(tag.name).or_default();
            if !self.name_only {
                values.extend(tag.values);
            }
        }
        Ok(())
    }

    /// Record a tolerated backend failure
    pub fn add_warning(&mut self, name: &str, message: &str) {
        self.metadata.add_warning(name, message);
    }

    /// Produce the merged result
    pub fn build(self) -> CompleteTagsResult {
        let completed_tags = self
            .tags
            .into_iter()
            .map(|(name, values)| CompletedTag {
                name,
                values: values.into_iter().collect(),
            })
            .collect();

        CompleteTagsResult {
            complete_name_only: self.name_only,
            completed_tags,
            metadata: self.metadata,
        }
    }
}

// =============================================================================
// Blocks
// =============================================================================

/// Concatenation of every backend's blocks
#[derive(Debug, Default)]
pub struct MultiBlockResult {
    blocks: Vec<Box<dyn Block>>,
    metadata: ResultMetadata,
}

impl MultiBlockResult {
    /// Empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one backend's blocks
    pub fn add(&mut self, result: BlockResult, storage_type: StorageType) {
        let mut metadata = result.metadata;
        metadata.local_only = metadata.local_only && storage_type == StorageType::LocalDc;
        self.metadata = std::mem::take(&mut self.metadata).combine(metadata);
        self.blocks.extend(result.blocks);
    }

    /// Record a tolerated backend failure
    pub fn add_warning(&mut self, name: &str, message: &str) {
        self.metadata.add_warning(name, message);
    }

    /// Produce the merged result
    pub fn finalize(self) -> BlockResult {
        BlockResult {
            blocks: self.blocks,
            metadata: self.metadata,
        }
    }
}
