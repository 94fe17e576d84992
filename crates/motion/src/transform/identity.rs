//! The identity transform: motion space and drive space coincide.

use nalgebra::DMatrix;

/// Identity coordinate transform for a drive of any dimensionality.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityTransform {
    naxes: usize,
}

impl IdentityTransform {
    pub fn new(naxes: usize) -> Result<Self, crate::MotionError> {
        if naxes == 0 {
            return Err(crate::MotionError::Config(
                "identity transform needs at least one axis".to_string(),
            ));
        }
        Ok(Self { naxes })
    }

    pub fn naxes(&self) -> usize {
        self.naxes
    }

    /// One `diag(1, ..., 1, 0)` matrix per point; the zero keeps the
    /// homogeneous coordinate out of the output.
    pub fn matrices(&self, points: &[Vec<f64>]) -> Vec<DMatrix<f64>> {
        let mut matrix = DMatrix::identity(self.naxes + 1, self.naxes + 1);
        matrix[(self.naxes, self.naxes)] = 0.0;
        points.iter().map(|_| matrix.clone()).collect()
    }
}
