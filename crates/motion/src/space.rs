//! The motion space: a regular N-D grid of cell centers with a Boolean
//! accessibility mask.
//!
//! Dimension 0 is the first drive axis, dimension 1 the second, and so
//! on. The mask is stored row-major over the dimensions in that order and
//! starts out all-true; exclusion layers carve it down.

use crate::MotionError;
use serde::{Deserialize, Serialize};

/// One dimension of the motion space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceDim {
    /// Axis label, e.g. `"x"`.
    pub label: String,
    /// Inclusive range of cell centers, `[min, max]`.
    pub range: [f64; 2],
    /// Number of cells along the dimension.
    pub num: usize,
}

/// A regular N-D grid of cell centers with equal spacing per dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionSpace {
    dims: Vec<SpaceDim>,
}

impl MotionSpace {
    /// Builds a motion space from its dimension specs.
    pub fn new(dims: Vec<SpaceDim>) -> Result<Self, MotionError> {
        if dims.is_empty() {
            return Err(MotionError::Config(
                "motion space needs at least one dimension".to_string(),
            ));
        }
        for dim in &dims {
            if dim.num < 2 {
                return Err(MotionError::Config(format!(
                    "dimension {:?} needs num >= 2, got {}",
                    dim.label, dim.num
                )));
            }
            if !(dim.range[0] < dim.range[1])
                || !dim.range[0].is_finite()
                || !dim.range[1].is_finite()
            {
                return Err(MotionError::Config(format!(
                    "dimension {:?} needs a finite range with min < max, got {:?}",
                    dim.label, dim.range
                )));
            }
        }

        let mut labels: Vec<&str> = dims.iter().map(|d| d.label.as_str()).collect();
        labels.sort_unstable();
        labels.dedup();
        if labels.len() != dims.len() {
            return Err(MotionError::Config(
                "motion space dimension labels must be unique".to_string(),
            ));
        }

        Ok(Self { dims })
    }

    /// The canonical LaPD XY motion space: x, y on [-55, 55] cm at a
    /// half-centimeter grid.
    pub fn lapd_xy() -> Self {
        Self {
            dims: vec![
                SpaceDim {
                    label: "x".to_string(),
                    range: [-55.0, 55.0],
                    num: 221,
                },
                SpaceDim {
                    label: "y".to_string(),
                    range: [-55.0, 55.0],
                    num: 221,
                },
            ],
        }
    }

    pub fn dims(&self) -> &[SpaceDim] {
        &self.dims
    }

    /// Dimensionality of the space.
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Shape of the cell grid.
    pub fn shape(&self) -> Vec<usize> {
        self.dims.iter().map(|d| d.num).collect()
    }

    /// Cell-center coordinates along dimension `dim`.
    pub fn coords(&self, dim: usize) -> Vec<f64> {
        let d = &self.dims[dim];
        linspace(d.range[0], d.range[1], d.num)
    }

    /// Cell spacing along dimension `dim`.
    pub fn resolution(&self, dim: usize) -> f64 {
        let d = &self.dims[dim];
        (d.range[1] - d.range[0]) / (d.num - 1) as f64
    }

    /// Cell spacing along every dimension.
    pub fn resolutions(&self) -> Vec<f64> {
        (0..self.ndim()).map(|i| self.resolution(i)).collect()
    }

    /// The extent of the space along `dim`: cell centers plus a
    /// half-cell margin on either side (the outer cell boundaries).
    pub fn extent(&self, dim: usize) -> (f64, f64) {
        let d = &self.dims[dim];
        let half = 0.5 * self.resolution(dim);
        (d.range[0] - half, d.range[1] + half)
    }

    /// Whether `point` lies within the extent of the space.
    pub fn contains(&self, point: &[f64]) -> Result<bool, MotionError> {
        self.check_arity(point)?;
        Ok(point.iter().enumerate().all(|(i, &p)| {
            let (lo, hi) = self.extent(i);
            p >= lo && p <= hi
        }))
    }

    /// Index of the nearest cell along each dimension (clamped to the
    /// grid for points outside the extent).
    pub fn nearest_cell(&self, point: &[f64]) -> Result<Vec<usize>, MotionError> {
        self.check_arity(point)?;
        Ok(point
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                let d = &self.dims[i];
                let res = self.resolution(i);
                let idx = ((p - d.range[0]) / res).round();
                idx.clamp(0.0, (d.num - 1) as f64) as usize
            })
            .collect())
    }

    /// Coordinates of the cell center at `index`.
    pub fn cell_center(&self, index: &[usize]) -> Vec<f64> {
        index
            .iter()
            .enumerate()
            .map(|(i, &ix)| self.dims[i].range[0] + ix as f64 * self.resolution(i))
            .collect()
    }

    fn check_arity(&self, point: &[f64]) -> Result<(), MotionError> {
        if point.len() != self.ndim() {
            return Err(MotionError::DimensionMismatch {
                expected: self.ndim(),
                got: point.len(),
            });
        }
        Ok(())
    }
}

/// `num` evenly spaced values from `start` to `stop`, inclusive.
pub fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    if num == 1 {
        return vec![start];
    }
    let step = (stop - start) / (num - 1) as f64;
    (0..num).map(|i| start + i as f64 * step).collect()
}

/// An N-D Boolean array over the motion-space grid, `true` where the
/// probe may go.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    shape: Vec<usize>,
    data: Vec<bool>,
}

impl Mask {
    /// An all-true mask shaped like `space`.
    pub fn all_true(space: &MotionSpace) -> Self {
        let shape = space.shape();
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![true; len],
        }
    }

    /// An all-false mask with the same shape as `self`.
    pub fn to_all_false(&self) -> Self {
        Self {
            shape: self.shape.clone(),
            data: vec![false; self.data.len()],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn offset(&self, index: &[usize]) -> usize {
        debug_assert_eq!(index.len(), self.shape.len());
        let mut offset = 0;
        for (i, &ix) in index.iter().enumerate() {
            debug_assert!(ix < self.shape[i]);
            offset = offset * self.shape[i] + ix;
        }
        offset
    }

    pub fn get(&self, index: &[usize]) -> bool {
        self.data[self.offset(index)]
    }

    pub fn set(&mut self, index: &[usize], value: bool) {
        let offset = self.offset(index);
        self.data[offset] = value;
    }

    /// 2-D accessor; valid only for two-dimensional masks.
    pub fn get2(&self, ix: usize, iy: usize) -> bool {
        debug_assert_eq!(self.shape.len(), 2);
        self.data[ix * self.shape[1] + iy]
    }

    /// 2-D mutator; valid only for two-dimensional masks.
    pub fn set2(&mut self, ix: usize, iy: usize, value: bool) {
        debug_assert_eq!(self.shape.len(), 2);
        self.data[ix * self.shape[1] + iy] = value;
    }

    pub fn fill(&mut self, value: bool) {
        self.data.fill(value);
    }

    pub fn all(&self) -> bool {
        self.data.iter().all(|&v| v)
    }

    pub fn any(&self) -> bool {
        self.data.iter().any(|&v| v)
    }

    /// Number of true cells.
    pub fn count_true(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }

    /// In-place logical AND with another mask of the same shape.
    pub fn and_assign(&mut self, other: &Mask) {
        debug_assert_eq!(self.shape, other.shape);
        for (a, &b) in self.data.iter_mut().zip(other.data.iter()) {
            *a &= b;
        }
    }

    /// In-place logical OR with another mask of the same shape.
    pub fn or_assign(&mut self, other: &Mask) {
        debug_assert_eq!(self.shape, other.shape);
        for (a, &b) in self.data.iter_mut().zip(other.data.iter()) {
            *a |= b;
        }
    }

    /// `true` if every true cell of `self` is also true in `other`.
    pub fn is_subset_of(&self, other: &Mask) -> bool {
        debug_assert_eq!(self.shape, other.shape);
        self.data
            .iter()
            .zip(other.data.iter())
            .all(|(&a, &b)| !a || b)
    }
}
