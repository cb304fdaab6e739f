//! Block addressing over a fixed grid.
//!
//! A [`BlockGrid`] partitions an array shape into axis-aligned blocks of a
//! fixed extent. Blocks on the upper edge of an axis are clipped to the
//! shape, so every block ROI lies inside it.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use roiflow_core::{CoreError, CoreResult, Roi};

/// Integer block-grid coordinates, one per axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockAddress(pub SmallVec<[usize; 5]>);

impl BlockAddress {
    pub fn new(coords: &[usize]) -> Self {
        BlockAddress(coords.iter().copied().collect())
    }

    pub fn coords(&self) -> &[usize] {
        &self.0
    }

    /// Compact key used in persisted group names, e.g. `"3_0_0"`.
    pub fn key(&self) -> String {
        self.0
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join("_")
    }

    pub fn from_key(key: &str) -> Option<Self> {
        if key.is_empty() {
            return Some(BlockAddress(SmallVec::new()));
        }
        key.split('_')
            .map(|part| part.parse::<usize>().ok())
            .collect::<Option<SmallVec<[usize; 5]>>>()
            .map(BlockAddress)
    }
}

impl fmt::Display for BlockAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{c}")?;
        }
        write!(f, ")")
    }
}

/// A shape partitioned into fixed-size blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockGrid {
    shape: Vec<usize>,
    block: Vec<usize>,
}

impl BlockGrid {
    /// Builds a grid. A block extent of 0 (or one larger than the axis)
    /// means the full axis.
    pub fn new(shape: &[usize], block_shape: &[usize]) -> CoreResult<Self> {
        if shape.len() != block_shape.len() {
            return Err(CoreError::constraint(
                "BlockCache",
                format!(
                    "block shape {block_shape:?} has {} axes, data shape {shape:?} has {}",
                    block_shape.len(),
                    shape.len()
                ),
            ));
        }
        let block = shape
            .iter()
            .zip(block_shape)
            .map(|(&n, &b)| if b == 0 || b > n { n.max(1) } else { b })
            .collect();
        Ok(BlockGrid {
            shape: shape.to_vec(),
            block,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn block_shape(&self) -> &[usize] {
        &self.block
    }

    /// Number of blocks along each axis.
    pub fn grid_shape(&self) -> Vec<usize> {
        self.shape
            .iter()
            .zip(&self.block)
            .map(|(&n, &b)| n.div_ceil(b))
            .collect()
    }

    pub fn contains(&self, addr: &BlockAddress) -> bool {
        addr.0.len() == self.shape.len()
            && addr.0.iter().zip(self.grid_shape()).all(|(&c, g)| c < g)
    }

    /// The region a block covers, clipped to the shape.
    pub fn block_roi(&self, addr: &BlockAddress) -> CoreResult<Roi> {
        if !self.contains(addr) {
            return Err(CoreError::InvalidRoi {
                roi: addr.to_string(),
                reason: format!("block outside grid {:?}", self.grid_shape()),
            });
        }
        let start: Vec<usize> = addr.0.iter().zip(&self.block).map(|(c, b)| c * b).collect();
        let stop: Vec<usize> = start
            .iter()
            .zip(&self.block)
            .zip(&self.shape)
            .map(|((s, b), n)| (s + b).min(*n))
            .collect();
        Roi::new(&start, &stop)
    }

    /// Every block address intersecting `roi`, in row-major order.
    pub fn blocks_overlapping(&self, roi: &Roi) -> CoreResult<Vec<BlockAddress>> {
        roi.check_within(&self.shape)?;
        if roi.is_empty() {
            return Ok(Vec::new());
        }
        let ranges: Vec<(usize, usize)> = (0..self.shape.len())
            .map(|i| {
                let b = self.block[i];
                (roi.start()[i] / b, roi.stop()[i].div_ceil(b))
            })
            .collect();

        let mut out = Vec::new();
        let mut cur: Vec<usize> = ranges.iter().map(|r| r.0).collect();
        loop {
            out.push(BlockAddress::new(&cur));
            // Odometer increment, last axis fastest.
            let mut axis = cur.len();
            loop {
                if axis == 0 {
                    return Ok(out);
                }
                axis -= 1;
                cur[axis] += 1;
                if cur[axis] < ranges[axis].1 {
                    break;
                }
                cur[axis] = ranges[axis].0;
            }
        }
    }
}
