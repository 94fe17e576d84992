//! Coordinate transforms between motion space and drive space.
//!
//! Every transform is realized through per-point affine matrices of
//! shape `(N+1) x (N+1)`: a point gains a homogeneous 1 in the extra
//! coordinate, the extra row's output is discarded. The matrix depends
//! on the point being transformed; the LaPD ball-valve geometry is not
//! a single linear map.

pub mod droop;
pub mod identity;
pub mod lapd;

pub use droop::DroopCorrect;
pub use identity::IdentityTransform;
pub use lapd::LaPDXYTransform;

use crate::units::LengthUnit;
use crate::MotionError;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Which way a conversion runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Motion-space coordinates to drive-space coordinates.
    ToDrive,
    /// Drive-space coordinates to motion-space coordinates.
    ToMotionSpace,
}

fn default_drive_polarity() -> [i8; 2] {
    [1, 1]
}

fn default_mspace_polarity() -> [i8; 2] {
    [-1, 1]
}

fn default_droop_scale() -> f64 {
    1.0
}

/// Declarative description of a transform, as it appears in a
/// configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransformSpec {
    /// Motion space and drive space coincide.
    #[serde(rename = "identity")]
    Identity,
    /// The LaPD XY ball-valve linkage.
    #[serde(rename = "lapd_xy")]
    LapdXy {
        /// Signed distance from the chamber center to the ball-valve
        /// pivot; positive for an East-side drive, negative for West.
        pivot_to_center: f64,
        /// Moment arm from the pivot to the linear drive stage.
        pivot_to_drive: f64,
        /// Distance from the pivot to the vacuum feed-through face.
        pivot_to_feedthru: f64,
        /// Perpendicular offset of the probe-shaft center line from the
        /// pivot-through-stage line.
        probe_axis_offset: f64,
        #[serde(default = "default_drive_polarity")]
        drive_polarity: [i8; 2],
        #[serde(default = "default_mspace_polarity")]
        mspace_polarity: [i8; 2],
        #[serde(default)]
        droop_correct: bool,
        #[serde(default = "default_droop_scale")]
        droop_scale: f64,
    },
}

/// An instantiated coordinate transform. Closed set of variants; the
/// tag in the configuration selects which one is built.
#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    Identity(IdentityTransform),
    LapdXy(LaPDXYTransform),
}

impl Transform {
    /// Builds a transform from its spec for a drive with `naxes` axes.
    ///
    /// `axis_units` carries the length unit of each drive axis and is
    /// only consulted by droop correction, whose fit polynomial lives in
    /// fixed units.
    pub fn from_spec(
        spec: &TransformSpec,
        naxes: usize,
        axis_units: Option<&[LengthUnit]>,
    ) -> Result<Self, MotionError> {
        let transform = match spec {
            TransformSpec::Identity => {
                Transform::Identity(IdentityTransform::new(naxes)?)
            }
            TransformSpec::LapdXy {
                pivot_to_center,
                pivot_to_drive,
                pivot_to_feedthru,
                probe_axis_offset,
                drive_polarity,
                mspace_polarity,
                droop_correct,
                droop_scale,
            } => {
                if naxes != 2 {
                    return Err(MotionError::Config(format!(
                        "the lapd_xy transform requires a 2-axis drive, got {naxes}"
                    )));
                }
                Transform::LapdXy(LaPDXYTransform::new(
                    *pivot_to_center,
                    *pivot_to_drive,
                    *pivot_to_feedthru,
                    *probe_axis_offset,
                    *drive_polarity,
                    *mspace_polarity,
                    *droop_correct,
                    *droop_scale,
                    axis_units,
                )?)
            }
        };

        transform.validate_matrix_shapes()?;
        Ok(transform)
    }

    /// Number of drive axes the transform spans.
    pub fn naxes(&self) -> usize {
        match self {
            Transform::Identity(t) => t.naxes(),
            Transform::LapdXy(_) => 2,
        }
    }

    /// Designed dimensionality; `-1` morphs to any drive.
    pub fn dimensionality(&self) -> isize {
        match self {
            Transform::Identity(_) => -1,
            Transform::LapdXy(_) => 2,
        }
    }

    pub fn transform_type(&self) -> &'static str {
        match self {
            Transform::Identity(_) => "identity",
            Transform::LapdXy(_) => "lapd_xy",
        }
    }

    /// The per-point `(N+1) x (N+1)` affine matrices for `points`.
    pub fn matrices(
        &self,
        points: &[Vec<f64>],
        direction: Direction,
    ) -> Result<Vec<DMatrix<f64>>, MotionError> {
        self.check_points(points)?;
        match self {
            Transform::Identity(t) => Ok(t.matrices(points)),
            Transform::LapdXy(t) => t.matrices(points, direction),
        }
    }

    /// Transforms `points` in the given direction.
    pub fn convert(
        &self,
        points: &[Vec<f64>],
        direction: Direction,
    ) -> Result<Vec<Vec<f64>>, MotionError> {
        self.check_points(points)?;
        match self {
            // The identity map needs no matrix multiplication.
            Transform::Identity(_) => Ok(points.to_vec()),
            Transform::LapdXy(t) => t.convert(points, direction),
        }
    }

    /// Convenience for a single point.
    pub fn convert_one(
        &self,
        point: &[f64],
        direction: Direction,
    ) -> Result<Vec<f64>, MotionError> {
        let mut out = self.convert(&[point.to_vec()], direction)?;
        Ok(out.remove(0))
    }

    /// Motion-space points into drive-space points.
    pub fn to_drive(&self, points: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, MotionError> {
        self.convert(points, Direction::ToDrive)
    }

    /// Drive-space points into motion-space points.
    pub fn to_motion_space(&self, points: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, MotionError> {
        self.convert(points, Direction::ToMotionSpace)
    }

    /// The declarative spec this transform was built from.
    pub fn spec(&self) -> TransformSpec {
        match self {
            Transform::Identity(_) => TransformSpec::Identity,
            Transform::LapdXy(t) => t.spec(),
        }
    }

    fn check_points(&self, points: &[Vec<f64>]) -> Result<(), MotionError> {
        let naxes = self.naxes();
        for point in points {
            if point.len() != naxes {
                return Err(MotionError::DimensionMismatch {
                    expected: naxes,
                    got: point.len(),
                });
            }
        }
        Ok(())
    }

    /// Probes both matrix methods with a bundle of `N + 2` zero points
    /// and checks the emitted shapes. A mismatch is a defect in the
    /// transform implementation, not in caller input.
    fn validate_matrix_shapes(&self) -> Result<(), MotionError> {
        let naxes = self.naxes();
        let probe: Vec<Vec<f64>> = vec![vec![0.0; naxes]; naxes + 2];
        for direction in [Direction::ToDrive, Direction::ToMotionSpace] {
            let matrices = self.matrices(&probe, direction)?;
            if matrices.len() != naxes + 2 {
                return Err(MotionError::Config(format!(
                    "{} transform emitted {} matrices for {} probe points",
                    self.transform_type(),
                    matrices.len(),
                    naxes + 2
                )));
            }
            for matrix in &matrices {
                if matrix.nrows() != naxes + 1 || matrix.ncols() != naxes + 1 {
                    return Err(MotionError::Config(format!(
                        "{} transform emitted a {}x{} matrix, expected {}x{}",
                        self.transform_type(),
                        matrix.nrows(),
                        matrix.ncols(),
                        naxes + 1,
                        naxes + 1
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Applies per-point affine matrices: append a homogeneous 1, multiply,
/// drop the extra coordinate.
pub(crate) fn affine_apply(matrices: &[DMatrix<f64>], points: &[Vec<f64>]) -> Vec<Vec<f64>> {
    matrices
        .iter()
        .zip(points.iter())
        .map(|(matrix, point)| {
            let mut homogeneous = DVector::zeros(point.len() + 1);
            for (i, &value) in point.iter().enumerate() {
                homogeneous[i] = value;
            }
            homogeneous[point.len()] = 1.0;
            let out = matrix * homogeneous;
            out.iter().take(point.len()).copied().collect()
        })
        .collect()
}
