//! Media segments derived from a probe result.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A `[start, end)` interval of the input media, processed by one
/// transcode task.
///
/// Segments partition the input with no gaps and no overlap; every
/// non-initial segment begins on a keyframe when the source has any.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Segment {
    /// Index within the plan
    pub index: u32,
    /// Start time, seconds
    pub start: f64,
    /// End time, seconds (exclusive)
    pub end: f64,
}

impl Segment {
    pub fn new(index: u32, start: f64, end: f64) -> Self {
        Self { index, start, end }
    }

    /// Segment duration in seconds.
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration() {
        let seg = Segment::new(0, 10.0, 42.5);
        assert!((seg.duration() - 32.5).abs() < f64::EPSILON);
    }
}
