//! Regions of interest: per-axis `[start, stop)` bounds over a slot's shape.
//!
//! A [`Roi`] always satisfies `start[i] <= stop[i]`; whether it also fits a
//! given shape (`stop[i] <= shape[i]`) is checked with [`Roi::check_within`]
//! at the point where a shape is known.

use std::fmt;

use ndarray::Slice;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{CoreError, CoreResult};
use crate::value::Array;

/// Inline storage for up to five axes (`tzyxc`) before spilling to the heap.
pub type Bounds = SmallVec<[usize; 5]>;

/// A per-axis half-open region.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Roi {
    start: Bounds,
    stop: Bounds,
}

impl Roi {
    /// Builds a ROI, rejecting axis count mismatches and inverted bounds.
    pub fn new(start: &[usize], stop: &[usize]) -> CoreResult<Self> {
        if start.len() != stop.len() {
            return Err(CoreError::InvalidRoi {
                roi: format!("{start:?}..{stop:?}"),
                reason: "start and stop have different axis counts".into(),
            });
        }
        if let Some(axis) = (0..start.len()).find(|&i| start[i] > stop[i]) {
            return Err(CoreError::InvalidRoi {
                roi: format!("{start:?}..{stop:?}"),
                reason: format!("start exceeds stop on axis {axis}"),
            });
        }
        Ok(Roi {
            start: start.iter().copied().collect(),
            stop: stop.iter().copied().collect(),
        })
    }

    /// The ROI covering an entire shape.
    pub fn full(shape: &[usize]) -> Self {
        Roi {
            start: std::iter::repeat(0).take(shape.len()).collect(),
            stop: shape.iter().copied().collect(),
        }
    }

    /// A zero-dimensional ROI, used for slots that carry no array shape.
    pub fn scalar() -> Self {
        Roi {
            start: Bounds::new(),
            stop: Bounds::new(),
        }
    }

    pub fn start(&self) -> &[usize] {
        &self.start
    }

    pub fn stop(&self) -> &[usize] {
        &self.stop
    }

    pub fn ndim(&self) -> usize {
        self.start.len()
    }

    /// Extent along every axis.
    pub fn shape(&self) -> Vec<usize> {
        self.start
            .iter()
            .zip(&self.stop)
            .map(|(a, b)| b - a)
            .collect()
    }

    /// True if any axis has zero extent.
    pub fn is_empty(&self) -> bool {
        self.start.iter().zip(&self.stop).any(|(a, b)| a == b)
    }

    /// Fails unless the ROI has `shape.len()` axes and `stop <= shape`.
    pub fn check_within(&self, shape: &[usize]) -> CoreResult<()> {
        if self.ndim() != shape.len() {
            return Err(CoreError::InvalidRoi {
                roi: self.to_string(),
                reason: format!("expected {} axes, shape is {shape:?}", shape.len()),
            });
        }
        if let Some(axis) = (0..shape.len()).find(|&i| self.stop[i] > shape[i]) {
            return Err(CoreError::InvalidRoi {
                roi: self.to_string(),
                reason: format!("axis {axis} exceeds shape {shape:?}"),
            });
        }
        Ok(())
    }

    /// True if `other` lies entirely inside `self`.
    pub fn contains(&self, other: &Roi) -> bool {
        self.ndim() == other.ndim()
            && (0..self.ndim()).all(|i| self.start[i] <= other.start[i] && other.stop[i] <= self.stop[i])
    }

    /// Overlap of two ROIs, or `None` if they do not overlap.
    pub fn intersect(&self, other: &Roi) -> Option<Roi> {
        if self.ndim() != other.ndim() {
            return None;
        }
        let mut start = Bounds::new();
        let mut stop = Bounds::new();
        for i in 0..self.ndim() {
            let lo = self.start[i].max(other.start[i]);
            let hi = self.stop[i].min(other.stop[i]);
            if lo >= hi {
                return None;
            }
            start.push(lo);
            stop.push(hi);
        }
        Some(Roi { start, stop })
    }

    /// Re-expresses `self` relative to `origin` (which must not exceed `self.start`).
    pub fn relative_to(&self, origin: &[usize]) -> Roi {
        Roi {
            start: self.start.iter().zip(origin).map(|(a, o)| a - o).collect(),
            stop: self.stop.iter().zip(origin).map(|(b, o)| b - o).collect(),
        }
    }

    /// Reorders axes: axis `i` of the result is axis `perm[i]` of `self`.
    pub fn permuted(&self, perm: &[usize]) -> Roi {
        Roi {
            start: perm.iter().map(|&p| self.start[p]).collect(),
            stop: perm.iter().map(|&p| self.stop[p]).collect(),
        }
    }

    /// Copies the region out of `array`, whose origin is the ROI origin of
    /// whatever produced it.
    pub fn slice(&self, array: &Array) -> Array {
        array
            .slice_each_axis(|ax| {
                let i = ax.axis.index();
                Slice::from(self.start[i]..self.stop[i])
            })
            .to_owned()
            .into_shared()
    }
}

impl fmt::Display for Roi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for i in 0..self.ndim() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", self.start[i], self.stop[i])?;
        }
        write!(f, "]")
    }
}
