//! Point layers: declarative generators of target points inside the
//! motion space.

use crate::space::{linspace, MotionSpace};
use crate::MotionError;
use serde::{Deserialize, Serialize};

/// Declarative description of a point layer, as it appears in a
/// configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    /// A regularly spaced grid, inclusive of its limits.
    Grid {
        /// `[min, max]` pairs per dimension. A single pair broadcasts
        /// across all dimensions.
        limits: Vec<Vec<f64>>,
        /// Point counts per dimension. A single count broadcasts across
        /// all dimensions.
        steps: Vec<usize>,
    },
}

/// An instantiated point layer. Closed set of variants; the tag in the
/// configuration selects which one is built.
#[derive(Debug, Clone, PartialEq)]
pub enum PointLayer {
    Grid(GridLayer),
}

impl PointLayer {
    /// Builds a layer from its spec against the given motion space.
    pub fn from_spec(
        name: String,
        spec: &LayerSpec,
        space: &MotionSpace,
    ) -> Result<Self, MotionError> {
        match spec {
            LayerSpec::Grid { limits, steps } => Ok(PointLayer::Grid(GridLayer::new(
                name,
                limits.clone(),
                steps.clone(),
                space.ndim(),
            )?)),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            PointLayer::Grid(layer) => &layer.name,
        }
    }

    /// The generated points, flattened row-major.
    pub fn points(&self) -> Vec<Vec<f64>> {
        match self {
            PointLayer::Grid(layer) => layer.points(),
        }
    }

    /// The declarative spec this layer was built from.
    pub fn spec(&self) -> LayerSpec {
        match self {
            PointLayer::Grid(layer) => LayerSpec::Grid {
                limits: layer.limits.iter().map(|l| l.to_vec()).collect(),
                steps: layer.steps.clone(),
            },
        }
    }
}

/// A regularly spaced grid of points, inclusive on both endpoints of
/// every dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct GridLayer {
    name: String,
    limits: Vec<[f64; 2]>,
    steps: Vec<usize>,
}

impl GridLayer {
    /// Validates and broadcasts `limits`/`steps` against the motion-space
    /// dimensionality.
    ///
    /// A single `[min, max]` pair or a single step count applies to every
    /// dimension. A dimension whose min equals its max is fixed and its
    /// step count is forced to one.
    pub fn new(
        name: String,
        limits: Vec<Vec<f64>>,
        steps: Vec<usize>,
        ndim: usize,
    ) -> Result<Self, MotionError> {
        if limits.is_empty() || (limits.len() != 1 && limits.len() != ndim) {
            return Err(MotionError::Config(format!(
                "grid layer needs 1 or {ndim} limit pairs, got {}",
                limits.len()
            )));
        }
        if steps.is_empty() || (steps.len() != 1 && steps.len() != ndim) {
            return Err(MotionError::Config(format!(
                "grid layer needs 1 or {ndim} step counts, got {}",
                steps.len()
            )));
        }

        let mut pairs = Vec::with_capacity(ndim);
        for lim in &limits {
            if lim.len() != 2 || !lim[0].is_finite() || !lim[1].is_finite() {
                return Err(MotionError::Config(format!(
                    "grid limits must be finite [min, max] pairs, got {lim:?}"
                )));
            }
            pairs.push([lim[0], lim[1]]);
        }
        if pairs.len() == 1 {
            pairs = vec![pairs[0]; ndim];
        }

        let mut counts = steps.clone();
        if counts.len() == 1 {
            counts = vec![counts[0]; ndim];
        }

        for (lim, num) in pairs.iter().zip(counts.iter_mut()) {
            if lim[0] == lim[1] {
                // Fixed along this axis.
                *num = 1;
            } else if *num < 2 {
                return Err(MotionError::Config(format!(
                    "grid dimension spanning {lim:?} needs at least 2 steps"
                )));
            }
        }

        Ok(Self {
            name,
            limits: pairs,
            steps: counts,
        })
    }

    /// All combinations of the per-dimension linspaces, row-major (the
    /// last dimension varies fastest).
    pub fn points(&self) -> Vec<Vec<f64>> {
        let axes: Vec<Vec<f64>> = self
            .limits
            .iter()
            .zip(self.steps.iter())
            .map(|(lim, &num)| linspace(lim[0], lim[1], num))
            .collect();

        let total: usize = self.steps.iter().product();
        let mut points = Vec::with_capacity(total);
        let mut index = vec![0usize; axes.len()];
        for _ in 0..total {
            points.push(
                index
                    .iter()
                    .enumerate()
                    .map(|(dim, &i)| axes[dim][i])
                    .collect(),
            );
            for dim in (0..axes.len()).rev() {
                index[dim] += 1;
                if index[dim] < axes[dim].len() {
                    break;
                }
                index[dim] = 0;
            }
        }
        points
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::SpaceDim;

    fn space_2d() -> MotionSpace {
        MotionSpace::new(vec![
            SpaceDim {
                label: "x".to_string(),
                range: [-10.0, 10.0],
                num: 21,
            },
            SpaceDim {
                label: "y".to_string(),
                range: [-10.0, 10.0],
                num: 21,
            },
        ])
        .unwrap()
    }

    #[test]
    fn grid_is_inclusive_and_row_major() {
        let layer = GridLayer::new(
            "point_layer1".to_string(),
            vec![vec![0.0, 30.0], vec![-30.0, 30.0]],
            vec![11, 21],
            2,
        )
        .unwrap();
        let points = layer.points();
        assert_eq!(points.len(), 11 * 21);
        assert_eq!(points[0], vec![0.0, -30.0]);
        // Last dimension varies fastest.
        assert_eq!(points[1], vec![0.0, -27.0]);
        assert_eq!(points.last().unwrap(), &vec![30.0, 30.0]);
    }

    #[test]
    fn single_limit_pair_broadcasts() {
        let layer = GridLayer::new(
            "point_layer1".to_string(),
            vec![vec![-5.0, 5.0]],
            vec![3],
            2,
        )
        .unwrap();
        let points = layer.points();
        assert_eq!(points.len(), 9);
        assert_eq!(points[0], vec![-5.0, -5.0]);
        assert_eq!(points[8], vec![5.0, 5.0]);
    }

    #[test]
    fn degenerate_limit_fixes_dimension() {
        let layer = GridLayer::new(
            "point_layer1".to_string(),
            vec![vec![0.0, 10.0], vec![2.5, 2.5]],
            vec![5, 7],
            2,
        )
        .unwrap();
        let points = layer.points();
        assert_eq!(points.len(), 5);
        assert!(points.iter().all(|p| p[1] == 2.5));
    }

    #[test]
    fn wrong_arity_is_rejected() {
        assert!(GridLayer::new(
            "point_layer1".to_string(),
            vec![vec![0.0, 1.0], vec![0.0, 1.0], vec![0.0, 1.0]],
            vec![2],
            2,
        )
        .is_err());
    }

    #[test]
    fn spec_round_trips_through_layer() {
        let space = space_2d();
        let spec = LayerSpec::Grid {
            limits: vec![vec![-5.0, 5.0], vec![0.0, 10.0]],
            steps: vec![11, 6],
        };
        let layer = PointLayer::from_spec("point_layer1".to_string(), &spec, &space).unwrap();
        assert_eq!(layer.spec(), spec);
    }

    #[test]
    fn spec_deserializes_from_toml() {
        let spec: LayerSpec = toml::from_str(
            r#"
            type = "grid"
            limits = [[0.0, 30.0], [-30.0, 30.0]]
            steps = [11, 21]
            "#,
        )
        .unwrap();
        assert!(matches!(spec, LayerSpec::Grid { .. }));
    }
}
