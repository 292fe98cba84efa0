//! Point reduction for captured pointer paths.
//!
//! Short paths are kept verbatim. Longer paths keep every `stride`-th point
//! starting at the first, plus the final point so the stroke always ends
//! where the pointer was released.

use crate::model::{Point, RawPath};

/// Paths with at most this many points are returned unchanged.
pub const DEFAULT_THRESHOLD: usize = 100;

/// Keep every n-th point above the threshold.
pub const DEFAULT_STRIDE: usize = 2;

/// Configurable stride-based reducer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointReducer {
    threshold: usize,
    stride: usize,
}

impl Default for PointReducer {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            stride: DEFAULT_STRIDE,
        }
    }
}

impl PointReducer {
    /// A stride of 0 is treated as 1.
    pub fn new(threshold: usize, stride: usize) -> Self {
        Self {
            threshold,
            stride: stride.max(1),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Reduce an already normalized path.
    pub fn reduce_points(&self, points: Vec<Point>) -> Vec<Point> {
        let n = points.len();
        if n <= self.threshold {
            return points;
        }

        let last_index = n - 1;
        let mut out = Vec::with_capacity(n / self.stride + 2);
        out.extend(points.iter().step_by(self.stride).copied());
        if last_index % self.stride != 0 {
            out.push(points[last_index]);
        }
        out
    }

    /// Normalize a raw path (flat or paired) and reduce it.
    pub fn reduce(&self, raw: impl Into<RawPath>) -> Vec<Point> {
        self.reduce_points(raw.into().into_points())
    }
}

/// Reduce with the default threshold and stride.
pub fn reduce(raw: impl Into<RawPath>) -> Vec<Point> {
    PointReducer::default().reduce(raw)
}
