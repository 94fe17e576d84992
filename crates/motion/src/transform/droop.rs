//! Probe-shaft droop correction.
//!
//! A cantilevered probe shaft sags under gravity. The deflection of the
//! stainless-steel shaft used on the LaPD (0.375" OD x 0.035" wall,
//! SS 304) was fitted from finite-element runs as
//!
//! ```text
//! ds = (a3 * L^3 + a2 * L^2 + a1 * L + a0) * L * cos(psi)
//! ```
//!
//! with `L` the shaft length from the support (the distance from the
//! ball-valve pivot plus the pivot-to-feed-through offset) and `psi` the
//! shaft angle. The fit was produced in centimeters; points in other
//! units scale through the fit units and back.
//!
//! The forward map (non-drooped to drooped) is closed-form. The inverse
//! has no closed form and is solved by damped fixed-point iteration.

use crate::units::LengthUnit;
use crate::MotionError;

/// Fit coefficients `[a0, a1, a2, a3]` for the nominal shaft.
const FIT_COEFFS: [f64; 4] = [6.208863e-6, -2.210800e-7, 2.083731e-9, -5.490692e-9];

/// Unit system the fit polynomial was generated in.
const FIT_UNIT: LengthUnit = LengthUnit::Cm;

/// Damping factor of the fixed-point inverse. Empirical; overshoots the
/// raw residual to converge in a handful of iterations at LaPD scales.
const INVERSE_STEP: f64 = -1.5;

/// Convergence tolerance of the inverse, in fit units.
const INVERSE_TOL: f64 = 1e-8;

/// Iteration cap of the inverse.
const MAX_ITERATIONS: usize = 100;

/// Droop/non-droop correction for points expressed in ball-valve pivot
/// coordinates (x positive into the chamber, y vertical).
#[derive(Debug, Clone, PartialEq)]
pub struct DroopCorrect {
    pivot_to_feedthru: f64,
    droop_scale: f64,
    coeffs: [f64; 4],
    axis_units: [LengthUnit; 2],
}

impl DroopCorrect {
    pub fn new(
        pivot_to_feedthru: f64,
        droop_scale: f64,
        axis_units: Option<&[LengthUnit]>,
    ) -> Result<Self, MotionError> {
        if !(pivot_to_feedthru >= 0.0) || !pivot_to_feedthru.is_finite() {
            return Err(MotionError::Config(format!(
                "pivot_to_feedthru must be non-negative, got {pivot_to_feedthru}"
            )));
        }
        if !(droop_scale >= 0.0) || !droop_scale.is_finite() {
            return Err(MotionError::Config(format!(
                "droop_scale must be non-negative, got {droop_scale}"
            )));
        }

        let axis_units = match axis_units {
            None => [FIT_UNIT; 2],
            Some([a, b]) => [*a, *b],
            Some(other) => {
                return Err(MotionError::Config(format!(
                    "droop correction needs 2 axis units, got {}",
                    other.len()
                )))
            }
        };

        let mut coeffs = FIT_COEFFS;
        for c in &mut coeffs {
            *c *= droop_scale;
        }

        Ok(Self {
            pivot_to_feedthru,
            droop_scale,
            coeffs,
            axis_units,
        })
    }

    pub fn droop_scale(&self) -> f64 {
        self.droop_scale
    }

    fn to_fit_units(&self, point: &[f64; 2]) -> [f64; 2] {
        [
            point[0] * self.axis_units[0].factor_to(FIT_UNIT),
            point[1] * self.axis_units[1].factor_to(FIT_UNIT),
        ]
    }

    fn to_axis_units(&self, point: &[f64; 2]) -> [f64; 2] {
        [
            point[0] * FIT_UNIT.factor_to(self.axis_units[0]),
            point[1] * FIT_UNIT.factor_to(self.axis_units[1]),
        ]
    }

    /// Deflection at shaft length `length` in fit units.
    fn deflection(&self, length: f64, psi: f64) -> f64 {
        let [a0, a1, a2, a3] = self.coeffs;
        (a3 * length.powi(3) + a2 * length.powi(2) + a1 * length + a0) * length * psi.cos()
    }

    fn to_droop_fit_units(&self, point: [f64; 2]) -> [f64; 2] {
        let radius = (point[0] * point[0] + point[1] * point[1]).sqrt()
            + self.pivot_to_feedthru;
        let psi = (point[1] / point[0]).atan();
        let ds = self.deflection(radius, psi);
        // The droop lowers the tip; dx counteracts along the shaft tilt.
        [point[0] - ds * psi.sin(), point[1] + ds * psi.cos()]
    }

    /// Non-drooped points into their drooped positions.
    pub fn to_droop(&self, points: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, MotionError> {
        points
            .iter()
            .map(|p| {
                let point = self.check_point(p)?;
                let drooped = self.to_droop_fit_units(self.to_fit_units(&point));
                Ok(self.to_axis_units(&drooped).to_vec())
            })
            .collect()
    }

    /// Drooped points back to their non-drooped positions, by damped
    /// fixed-point iteration on the forward map.
    pub fn to_nondroop(&self, points: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, MotionError> {
        points
            .iter()
            .map(|p| {
                let point = self.check_point(p)?;
                let target = self.to_fit_units(&point);
                let mut guess = target;
                let mut trial = self.to_droop_fit_units(guess);

                let mut iterations = 0;
                while (trial[0] - target[0]).abs() > INVERSE_TOL
                    || (trial[1] - target[1]).abs() > INVERSE_TOL
                {
                    iterations += 1;
                    if iterations > MAX_ITERATIONS {
                        return Err(MotionError::NoConvergence(MAX_ITERATIONS));
                    }
                    guess[0] += INVERSE_STEP * (trial[0] - target[0]);
                    guess[1] += INVERSE_STEP * (trial[1] - target[1]);
                    trial = self.to_droop_fit_units(guess);
                }

                Ok(self.to_axis_units(&guess).to_vec())
            })
            .collect()
    }

    fn check_point(&self, point: &[f64]) -> Result<[f64; 2], MotionError> {
        if point.len() != 2 {
            return Err(MotionError::DimensionMismatch {
                expected: 2,
                got: point.len(),
            });
        }
        Ok([point[0], point[1]])
    }
}
