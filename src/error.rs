//! Error types for the fan-out coordinator and block layer

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    /// Storage (backend or coordinator) error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Block construction or iteration error
    #[error("Block error: {0}")]
    Block(#[from] BlockError),

    /// Cost accounting error
    #[error("Cost error: {0}")]
    Cost(#[from] CostError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage errors
///
/// Returned by backends and by the fan-out coordinator. A failing backend's
/// error is wrapped in [`StorageError::Backend`] so callers can see which
/// backend aborted the operation.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend could not be reached
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Read-side query failed inside a backend
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Query was rejected before execution
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Backend was closed and cannot serve requests
    #[error("Storage closed: {0}")]
    Closed(String),

    /// Tag completion results of different modes cannot be merged
    #[error(
        "Incompatible tag completion results: expected name_only={expected}, got name_only={actual}"
    )]
    IncompatibleCompletion {
        /// Mode requested by the query
        expected: bool,
        /// Mode reported by the backend
        actual: bool,
    },

    /// Error from a specific backend during a fan-out operation
    #[error("{operation} failed on backend '{backend}': {source}")]
    Backend {
        /// Name of the failing backend
        backend: String,
        /// Operation that failed
        operation: &'static str,
        /// Underlying backend error
        #[source]
        source: Box<StorageError>,
    },

    /// Block error raised while a backend assembled its result
    #[error("Block error: {0}")]
    Block(#[from] BlockError),

    /// Cost limit hit while a backend assembled its result
    #[error("Cost error: {0}")]
    Cost(#[from] CostError),
}

impl StorageError {
    /// Wrap an error with the backend and operation that produced it
    pub fn from_backend(
        backend: impl Into<String>,
        operation: &'static str,
        source: StorageError,
    ) -> Self {
        StorageError::Backend {
            backend: backend.into(),
            operation,
            source: Box::new(source),
        }
    }

    /// Name of the backend that produced this error, if known
    pub fn backend(&self) -> Option<&str> {
        match self {
            StorageError::Backend { backend, .. } => Some(backend),
            _ => None,
        }
    }
}

/// Block errors
#[derive(Error, Debug)]
pub enum BlockError {
    /// Column count for `add_cols` must be positive
    #[error("must add more than 0 columns, adding: {0}")]
    InvalidColumnCount(usize),

    /// Append targeted a column that has not been added yet
    #[error("idx out of range for append: {idx} (columns: {len})")]
    IndexOutOfRange {
        /// Requested column index
        idx: usize,
        /// Current column count
        len: usize,
    },

    /// Number of columns disagrees with the step count of the bounds
    #[error("mismatch in block columns and meta bounds, columns: {columns}, steps: {steps}")]
    StepMismatch {
        /// Column count of the block
        columns: usize,
        /// Steps implied by the bounds
        steps: usize,
    },

    /// Step index lies outside the bounds
    #[error("step index {idx} out of bounds, steps: {steps}")]
    StepOutOfBounds {
        /// Requested step index
        idx: usize,
        /// Steps implied by the bounds
        steps: usize,
    },

    /// Timestamp for a step could not be represented
    #[error("timestamp overflow resolving step {idx}")]
    TimeOverflow {
        /// Step index being resolved
        idx: usize,
    },

    /// Append rejected by the cost enforcer
    #[error("{0}")]
    Cost(#[from] CostError),

    /// Column storage for `add_cols` could not be allocated
    #[error("cannot allocate {0} columns")]
    TooManyColumns(usize),
}

/// Cost accounting errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CostError {
    /// Accumulated cost would exceed the configured threshold
    #[error("exceeded {resource} limit: {current} > {threshold}")]
    LimitExceeded {
        /// Name of the enforcer scope that rejected the cost
        resource: String,
        /// Cost that the add would have produced
        current: u64,
        /// Configured threshold
        threshold: u64,
    },
}

/// Validation errors
///
/// Used by configuration and construction-time checks.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Value is out of allowed range
    #[error("{field} value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        /// Field name being validated
        field: String,
        /// The invalid value
        value: String,
        /// Minimum allowed value
        min: String,
        /// Maximum allowed value
        max: String,
    },

    /// Required field is missing
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Invalid format
    #[error("Invalid format for {field}: {message}")]
    InvalidFormat {
        /// Field name being validated
        field: String,
        /// Description of the format error
        message: String,
    },
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Error::Configuration(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_display() {
        let err = StorageError::from_backend(
            "remote-east",
            "fetch",
            StorageError::Unavailable("connection refused".to_string()),
        );
        let display = err.to_string();
        assert!(display.contains("remote-east"));
        assert!(display.contains("fetch"));
        assert!(display.contains("connection refused"));
        assert_eq!(err.backend(), Some("remote-east"));
    }

    #[test]
    fn test_backend_error_source() {
        use std::error::Error as _;
        let err = StorageError::from_backend(
            "local",
            "write",
            StorageError::QueryFailed("disk full".to_string()),
        );
        let source = err.source().expect("backend error has a source");
        assert!(source.to_string().contains("disk full"));
    }

    #[test]
    fn test_cost_error_converts_into_block_error() {
        let cost = CostError::LimitExceeded {
            resource: "block".to_string(),
            current: 11,
            threshold: 10,
        };
        let block: BlockError = cost.clone().into();
        assert!(matches!(block, BlockError::Cost(ref c) if *c == cost));
        assert_eq!(block.to_string(), "exceeded block limit: 11 > 10");
    }

    #[test]
    fn test_validation_error_into_configuration() {
        let err: Error = ValidationError::MissingField("backends".to_string()).into();
        assert!(matches!(err, Error::Configuration(ref m) if m.contains("backends")));
    }
}
