//! Core data types shared by backends, the fan-out coordinator and blocks
//!
//! # Key Types
//!
//! - **`Tags`**: Ordered tag name/value pairs identifying a series
//! - **`Datapoint`**: A single measurement (timestamp + value)
//! - **`Series`**: A named, tagged list of datapoints returned by `fetch`
//! - **`Metric`**: A series identity returned by `search_series`
//! - **`Matcher`**: A tag predicate carried by fetch and completion queries
//!
//! # Example
//!
//! ```rust
//! use kuba_fanout::types::{Datapoint, Series, Tags};
//!
//! let tags = Tags::new()
//!     .with_tag("__name__", "cpu_usage")
//!     .with_tag("host", "web-01");
//!
//! let series = Series::new(tags.id(), tags, vec![Datapoint::new(1000, 42.5)]);
//! assert_eq!(series.len(), 1);
//! ```

use crate::error::StorageError;
use bytes::Bytes;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tag holding the metric name, following the Prometheus convention
pub const METRIC_NAME_TAG: &str = "__name__";

/// A single tag name/value pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag {
    /// Tag name
    pub name: Bytes,
    /// Tag value
    pub value: Bytes,
}

impl Tag {
    /// Create a new tag
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Ordered set of tags
///
/// Tags are kept sorted by name so that two tag sets built in different
/// insertion orders produce the same [`Tags::id`]. Adding a tag whose name
/// already exists replaces the value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tags {
    tags: Vec<Tag>,
}

impl Tags {
    /// Create an empty tag set
    pub fn new() -> Self {
        Self { tags: Vec::new() }
    }

    /// Add a tag, replacing any existing value for the same name
    pub fn add_tag(&mut self, tag: Tag) {
        match self.tags.binary_search_by(|t| t.name.cmp(&tag.name)) {
            Ok(pos) => self.tags[pos] = tag,
            Err(pos) => self.tags.insert(pos, tag),
        }
    }

    /// Builder-style variant of [`Tags::add_tag`]
    pub fn with_tag(mut self, name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        self.add_tag(Tag::new(name, value));
        self
    }

    /// Look up a tag value by name
    pub fn get(&self, name: &[u8]) -> Option<&Bytes> {
        self.tags
            .binary_search_by(|t| t.name.as_ref().cmp(name))
            .ok()
            .map(|pos| &self.tags[pos].value)
    }

    /// Iterate over tags in name order
    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.tags.iter()
    }

    /// Number of tags
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Whether the tag set is empty
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Canonical identifier of the tag set: `name=value` pairs joined by `,`
    pub fn id(&self) -> Bytes {
        let mut id = Vec::with_capacity(self.tags.iter().map(|t| t.name.len() + t.value.len() + 2).sum());
        for (i, tag) in self.tags.iter().enumerate() {
            if i > 0 {
                id.push(b',');
            }
            id.extend_from_slice(&tag.name);
            id.push(b'=');
            id.extend_from_slice(&tag.value);
        }
        Bytes::from(id)
    }
}

impl FromIterator<Tag> for Tags {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        let mut tags = Tags::new();
        for tag in iter {
            tags.add_tag(tag);
        }
        tags
    }
}

impl fmt::Display for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", String::from_utf8_lossy(&self.id()))
    }
}

/// A single timestamped value
///
/// Timestamps are Unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    /// Measurement value
    pub value: f64,
}

impl Datapoint {
    /// Create a new datapoint
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// A fetched series: identity, tags and datapoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    name: Bytes,
    tags: Tags,
    datapoints: Vec<Datapoint>,
}

impl Series {
    /// Create a new series
    pub fn new(name: impl Into<Bytes>, tags: Tags, datapoints: Vec<Datapoint>) -> Self {
        Self {
            name: name.into(),
            tags,
            datapoints,
        }
    }

    /// Series name (its identity for de-duplication)
    pub fn name(&self) -> &Bytes {
        &self.name
    }

    /// Series tags
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Series datapoints
    pub fn datapoints(&self) -> &[Datapoint] {
        &self.datapoints
    }

    /// Number of datapoints
    pub fn len(&self) -> usize {
        self.datapoints.len()
    }

    /// Whether the series has no datapoints
    pub fn is_empty(&self) -> bool {
        self.datapoints.is_empty()
    }
}

/// A series identity returned by searches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    /// Series identifier
    pub id: Bytes,
    /// Series tags
    pub tags: Tags,
}

impl Metric {
    /// Create a new metric
    pub fn new(id: impl Into<Bytes>, tags: Tags) -> Self {
        Self {
            id: id.into(),
            tags,
        }
    }
}

/// Matcher comparison kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// Tag value equals the matcher value
    Equal,
    /// Tag value differs from the matcher value
    NotEqual,
    /// Tag value matches the (fully anchored) regular expression
    Regexp,
    /// Tag value does not match the regular expression
    NotRegexp,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            MatchType::Equal => "=",
            MatchType::NotEqual => "!=",
            MatchType::Regexp => "=~",
            MatchType::NotRegexp => "!~",
        };
        f.write_str(op)
    }
}

/// A single tag predicate
///
/// A missing tag is treated as an empty value, so `host=""` selects series
/// without a `host` tag.
#[derive(Debug, Clone)]
pub struct Matcher {
    match_type: MatchType,
    name: Bytes,
    value: Bytes,
    regex: Option<Regex>,
}

impl Matcher {
    /// Create a matcher, compiling the pattern for regex match types
    pub fn new(
        match_type: MatchType,
        name: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Result<Self, StorageError> {
        let name = name.into();
        let value = value.into();

        let regex = match match_type {
            MatchType::Regexp | MatchType::NotRegexp => {
                let pattern = std::str::from_utf8(&value).map_err(|e| {
                    StorageError::InvalidQuery(format!("matcher pattern is not UTF-8: {}", e))
                })?;
                let anchored = format!("^(?:{})$", pattern);
                let regex = Regex::new(&anchored).map_err(|e| {
                    StorageError::InvalidQuery(format!("invalid matcher regex '{}': {}", pattern, e))
                })?;
                Some(regex)
            }
            MatchType::Equal | MatchType::NotEqual => None,
        };

        Ok(Self {
            match_type,
            name,
            value,
            regex,
        })
    }

    /// Shorthand for an equality matcher
    pub fn equal(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            match_type: MatchType::Equal,
            name: name.into(),
            value: value.into(),
            regex: None,
        }
    }

    /// Match type
    pub fn match_type(&self) -> MatchType {
        self.match_type
    }

    /// Tag name the matcher applies to
    pub fn name(&self) -> &Bytes {
        &self.name
    }

    /// Matcher value or pattern
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Check the matcher against a tag set
    pub fn matches(&self, tags: &Tags) -> bool {
        let empty = Bytes::new();
        let actual = tags.get(&self.name).unwrap_or(&empty);

        match self.match_type {
            MatchType::Equal => actual == &self.value,
            MatchType::NotEqual => actual != &self.value,
            MatchType::Regexp | MatchType::NotRegexp => {
                let is_match = match (&self.regex, std::str::from_utf8(actual)) {
                    (Some(regex), Ok(text)) => regex.is_match(text),
                    _ => false,
                };
                if self.match_type == MatchType::Regexp {
                    is_match
                } else {
                    !is_match
                }
            }
        }
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.match_type == other.match_type && self.name == other.name && self.value == other.value
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}\"{}\"",
            String::from_utf8_lossy(&self.name),
            self.match_type,
            String::from_utf8_lossy(&self.value)
        )
    }
}

/// Conjunction of matchers
pub type Matchers = Vec<Matcher>;

/// Check that every matcher in the list accepts the tags
pub fn matches_all(matchers: &[Matcher], tags: &Tags) -> bool {
    matchers.iter().all(|m| m.matches(tags))
}
