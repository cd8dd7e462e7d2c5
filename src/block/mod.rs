//! Query blocks: fixed-shape matrices of step × series values
//!
//! A block covers a time window split into steps (see [`Bounds`]) and holds
//! one value per series per step. Blocks are produced by backends
//! (`fetch_blocks`) or by builders such as [`ColumnBlockBuilder`] and are
//! read through two iterators:
//!
//! - [`StepIter`] walks the window in time order, yielding every series'
//!   value at one instant (a borrowed view of one column).
//! - [`SeriesIter`] walks series in index order, yielding every value of one
//!   series (an owned copy).
//!
//! # Example
//!
//! ```rust
//! use kuba_fanout::block::{Block, Bounds, ColumnBlockBuilder, Metadata, SeriesMeta};
//! use kuba_fanout::context::QueryContext;
//! use kuba_fanout::types::Tags;
//! use std::time::Duration;
//!
//! let ctx = QueryContext::default();
//! let meta = Metadata::new(Bounds::new(0, Duration::from_secs(2), Duration::from_secs(1)));
//! let series = vec![SeriesMeta::new("a", Tags::new()), SeriesMeta::new("b", Tags::new())];
//!
//! let mut builder = ColumnBlockBuilder::new(&ctx, meta, series);
//! builder.add_cols(2).unwrap();
//! builder.append_values(0, &[1.0, 2.0]).unwrap();
//! builder.append_values(1, &[3.0, 4.0]).unwrap();
//! let block = builder.build();
//!
//! let times: Vec<i64> = block.step_iter().unwrap().map(|s| s.time()).collect();
//! assert_eq!(times, vec![0, 1_000]);
//!
//! let first = block.series_iter().unwrap().next().unwrap();
//! assert_eq!(first.values(), &[1.0, 3.0]);
//! ```

pub mod accounted;
pub mod bounds;
pub mod column;
pub mod scalar;

pub use accounted::AccountedBlock;
pub use bounds::Bounds;
pub use column::{ColumnBlock, ColumnBlockBuilder};
pub use scalar::Scalar;

use crate::error::BlockError;
use crate::types::Tags;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;

/// Kind of a block, used by consumers to pick fast paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    /// Block without data
    Empty,
    /// Single value broadcast over every step
    Scalar,
    /// Materialized column-major values
    Decompressed,
    /// Values still held in a backend's compressed encoding
    Compressed,
    /// Values computed on access
    Lazy,
    /// Wrapper around several blocks
    Container,
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlockType::Empty => "empty",
            BlockType::Scalar => "scalar",
            BlockType::Decompressed => "decompressed",
            BlockType::Compressed => "compressed",
            BlockType::Lazy => "lazy",
            BlockType::Container => "container",
        };
        f.write_str(name)
    }
}

/// Descriptive information about a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    block_type: BlockType,
}

impl BlockInfo {
    /// Create block info for a block type
    pub fn new(block_type: BlockType) -> Self {
        Self { block_type }
    }

    /// Block type
    pub fn block_type(&self) -> BlockType {
        self.block_type
    }
}

/// Block-wide metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Time window of the block
    pub bounds: Bounds,
    /// Tags common to every series in the block
    pub tags: Tags,
}

impl Metadata {
    /// Metadata with the given bounds and no common tags
    pub fn new(bounds: Bounds) -> Self {
        Self {
            bounds,
            tags: Tags::new(),
        }
    }

    /// Set the common tags
    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bounds: {{{}}}, tags: {}", self.bounds, self.tags)
    }
}

/// Identity of one series (one row) in a block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesMeta {
    /// Series name
    pub name: Bytes,
    /// Series tags
    pub tags: Tags,
}

impl SeriesMeta {
    /// Create series metadata
    pub fn new(name: impl Into<Bytes>, tags: Tags) -> Self {
        Self {
            name: name.into(),
            tags,
        }
    }
}

/// Values of every series at one instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step<'a> {
    time: i64,
    values: &'a [f64],
}

impl<'a> Step<'a> {
    /// Create a step
    pub fn new(time: i64, values: &'a [f64]) -> Self {
        Self { time, values }
    }

    /// Timestamp of the step in milliseconds
    pub fn time(&self) -> i64 {
        self.time
    }

    /// One value per series
    pub fn values(&self) -> &'a [f64] {
        self.values
    }
}

/// Values of one series across every step
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    values: Vec<f64>,
    meta: SeriesMeta,
}

impl Series {
    /// Create a series
    pub fn new(values: Vec<f64>, meta: SeriesMeta) -> Self {
        Self { values, meta }
    }

    /// One value per step
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Mutable access to the values; the series owns its copy
    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// Series identity
    pub fn meta(&self) -> &SeriesMeta {
        &self.meta
    }

    /// Number of values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the series has no values
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Forward-only iterator over the steps of a block
///
/// A failure while resolving a step's timestamp ends the iteration; the error
/// stays available from [`StepIter::err`].
pub trait StepIter<'a>: Iterator<Item = Step<'a>> {
    /// Metadata of the series in every step
    fn series_meta(&self) -> &'a [SeriesMeta];

    /// Total number of steps
    fn step_count(&self) -> usize;

    /// Error that stopped the iteration, if any
    fn err(&self) -> Option<&BlockError>;
}

/// Forward-only iterator over the series of a block
pub trait SeriesIter<'a>: Iterator<Item = Series> {
    /// Metadata of every series
    fn series_meta(&self) -> &'a [SeriesMeta];

    /// Total number of series
    fn series_count(&self) -> usize;
}

/// A read-only block of query data
pub trait Block: fmt::Debug + Send + Sync {
    /// Block-wide metadata
    fn meta(&self) -> &Metadata;

    /// Per-series metadata
    fn series_meta(&self) -> &[SeriesMeta];

    /// Number of steps held by the block
    fn step_count(&self) -> usize;

    /// Iterate over steps in time order
    fn step_iter(&self) -> Result<Box<dyn StepIter<'_> + '_>, BlockError>;

    /// Iterate over series in index order
    fn series_iter(&self) -> Result<Box<dyn SeriesIter<'_> + '_>, BlockError>;

    /// Same data under different metadata
    fn with_metadata(
        &self,
        meta: Metadata,
        series_meta: Vec<SeriesMeta>,
    ) -> Result<Box<dyn Block>, BlockError>;

    /// Block description
    fn info(&self) -> BlockInfo;

    /// Release the block's resources; reads after close are undefined
    fn close(&self) -> Result<(), BlockError>;

    /// Concrete block, for consumers with type-specific fast paths
    fn as_any(&self) -> &dyn Any;
}

/// Warning recorded when a backend failed without aborting the operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Warning {
    /// Name of the backend that failed
    pub name: String,
    /// Failure description
    pub message: String,
}

impl Warning {
    /// Create a warning
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.name, self.message)
    }
}

/// Metadata describing how complete a result is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMetadata {
    /// Every contributing backend returned all matching data
    pub exhaustive: bool,
    /// Only local backends contributed
    pub local_only: bool,
    /// Backend failures tolerated while building the result
    pub warnings: Vec<Warning>,
}

impl ResultMetadata {
    /// Fresh metadata: exhaustive, local and without warnings
    pub fn new() -> Self {
        Self {
            exhaustive: true,
            local_only: true,
            warnings: Vec::new(),
        }
    }

    /// Record a warning, ignoring exact duplicates
    pub fn add_warning(&mut self, name: impl Into<String>, message: impl Into<String>) {
        let warning = Warning::new(name, message);
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
    }

    /// Fold another result's metadata into this one
    pub fn combine(mut self, other: ResultMetadata) -> Self {
        self.exhaustive = self.exhaustive && other.exhaustive;
        self.local_only = self.local_only && other.local_only;
        for warning in other.warnings {
            if !self.warnings.contains(&warning) {
                self.warnings.push(warning);
            }
        }
        self
    }
}

impl Default for ResultMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// Blocks returned by a `fetch_blocks` call
#[derive(Debug, Default)]
pub struct BlockResult {
    /// Blocks in backend order
    pub blocks: Vec<Box<dyn Block>>,
    /// Completeness information
    pub metadata: ResultMetadata,
}

impl BlockResult {
    /// Create a result from blocks
    pub fn new(blocks: Vec<Box<dyn Block>>) -> Self {
        Self {
            blocks,
            metadata: ResultMetadata::new(),
        }
    }

    /// Empty result
    pub fn empty() -> Self {
        Self::default()
    }

    /// Close every block, returning the first error
    pub fn close(&self) -> Result<(), BlockError> {
        let mut first = None;
        for block in &self.blocks {
            if let Err(e) = block.close() {
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}
