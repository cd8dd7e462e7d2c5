//! Time bounds of a block

use crate::error::BlockError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Time window of a block, split into fixed-size steps
///
/// Steps start at `start` and are `step_size` apart; the window holds
/// `duration / step_size` of them. Timestamps are Unix milliseconds.
///
/// # Example
///
/// ```rust
/// use kuba_fanout::block::Bounds;
/// use std::time::Duration;
///
/// let bounds = Bounds::new(1_000, Duration::from_secs(60), Duration::from_secs(10));
/// assert_eq!(bounds.steps(), 6);
/// assert_eq!(bounds.time_for_index(2).unwrap(), 21_000);
/// assert!(bounds.time_for_index(6).is_err());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    /// First step timestamp in milliseconds
    pub start: i64,
    /// Length of the window
    pub duration: Duration,
    /// Distance between steps
    pub step_size: Duration,
}

impl Bounds {
    /// Create new bounds
    pub fn new(start: i64, duration: Duration, step_size: Duration) -> Self {
        Self {
            start,
            duration,
            step_size,
        }
    }

    /// Number of steps in the window; zero when the step size is zero
    pub fn steps(&self) -> usize {
        let step = self.step_size.as_millis();
        if step == 0 {
            return 0;
        }
        usize::try_from(self.duration.as_millis() / step).unwrap_or(usize::MAX)
    }

    /// Timestamp of the step at `idx`
    pub fn time_for_index(&self, idx: usize) -> Result<i64, BlockError> {
        let steps = self.steps();
        if idx >= steps {
            return Err(BlockError::StepOutOfBounds { idx, steps });
        }

        i64::try_from(self.step_size.as_millis())
            .ok()
            .and_then(|step| step.checked_mul(idx as i64))
            .and_then(|offset| self.start.checked_add(offset))
            .ok_or(BlockError::TimeOverflow { idx })
    }

    /// End of the window (exclusive), saturating on overflow
    pub fn end(&self) -> i64 {
        let duration = i64::try_from(self.duration.as_millis()).unwrap_or(i64::MAX);
        self.start.saturating_add(duration)
    }

    /// Whether a timestamp falls within `[start, end)`
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end()
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "start: {}, duration: {:?}, step_size: {:?}, steps: {}",
            self.start,
            self.duration,
            self.step_size,
            self.steps()
        )
    }
}
