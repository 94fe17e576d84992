//! Divider exclusion: an affine half-plane.

use super::{DividerSide, ExclusionSpec};
use crate::space::{Mask, MotionSpace};
use crate::MotionError;

/// Excludes one side of the line `y = slope * x + intercept` in a 2-D
/// motion space.
///
/// A vertical line is encoded with an infinite slope; `intercept` then
/// holds the x-position of the line. The excluded side is named by the
/// axis direction pointing into it (`+e0` excludes everything at larger
/// x than the line, `-e1` everything at smaller y). Points exactly on
/// the line stay accessible.
#[derive(Debug, Clone, PartialEq)]
pub struct DividerExclusion {
    name: String,
    slope: f64,
    intercept: f64,
    exclude: DividerSide,
}

impl DividerExclusion {
    pub fn new(
        name: String,
        slope: f64,
        intercept: f64,
        exclude: DividerSide,
    ) -> Result<Self, MotionError> {
        if slope.is_nan() || !intercept.is_finite() {
            return Err(MotionError::Config(format!(
                "divider needs a finite intercept and a non-NaN slope, got \
                 slope {slope}, intercept {intercept}"
            )));
        }

        // A vertical line has no +/-e1 side; a horizontal one no +/-e0.
        let e0_side = matches!(exclude, DividerSide::PlusE0 | DividerSide::MinusE0);
        if slope.is_infinite() && !e0_side {
            return Err(MotionError::Config(
                "a vertical divider can only exclude a +e0 or -e0 side".to_string(),
            ));
        }
        if slope == 0.0 && e0_side {
            return Err(MotionError::Config(
                "a horizontal divider can only exclude a +e1 or -e1 side".to_string(),
            ));
        }

        Ok(Self {
            name,
            slope,
            intercept,
            exclude,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn excludes_point(&self, x: f64, y: f64) -> bool {
        if self.slope.is_infinite() {
            return match self.exclude {
                DividerSide::PlusE0 => x > self.intercept,
                DividerSide::MinusE0 => x < self.intercept,
                _ => unreachable!("validated at construction"),
            };
        }

        match self.exclude {
            DividerSide::PlusE1 => y > self.slope * x + self.intercept,
            DividerSide::MinusE1 => y < self.slope * x + self.intercept,
            DividerSide::PlusE0 => x > (y - self.intercept) / self.slope,
            DividerSide::MinusE0 => x < (y - self.intercept) / self.slope,
        }
    }

    /// The stand-alone layer: `true` where the probe may go.
    pub fn compute(&self, space: &MotionSpace) -> Result<Mask, MotionError> {
        let xs = space.coords(0);
        let ys = space.coords(1);

        let mut layer = Mask::all_true(space);
        for (ix, &x) in xs.iter().enumerate() {
            for (iy, &y) in ys.iter().enumerate() {
                layer.set2(ix, iy, !self.excludes_point(x, y));
            }
        }
        Ok(layer)
    }

    pub fn spec(&self) -> ExclusionSpec {
        ExclusionSpec::Divider {
            slope: self.slope,
            intercept: self.intercept,
            exclude: self.exclude,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::SpaceDim;

    fn space() -> MotionSpace {
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
    fn plus_e1_excludes_above_the_line() {
        let space = space();
        let ex = DividerExclusion::new(
            "mask_ex1".to_string(),
            1.0,
            0.0,
            DividerSide::PlusE1,
        )
        .unwrap();
        let layer = ex.compute(&space).unwrap();
        // y > x excluded; on and below the line allowed.
        assert!(!layer.get2(10, 15)); // (0, 5)
        assert!(layer.get2(10, 10)); // (0, 0) on the line
        assert!(layer.get2(15, 10)); // (5, 0)
    }

    #[test]
    fn vertical_divider_uses_x_intercept() {
        let space = space();
        let ex = DividerExclusion::new(
            "mask_ex1".to_string(),
            f64::INFINITY,
            4.0,
            DividerSide::PlusE0,
        )
        .unwrap();
        let layer = ex.compute(&space).unwrap();
        assert!(layer.get2(14, 10)); // x = 4 on the line
        assert!(!layer.get2(15, 10)); // x = 5
        assert!(layer.get2(0, 0));
    }

    #[test]
    fn minus_e0_excludes_left_of_sloped_line() {
        let space = space();
        let ex = DividerExclusion::new(
            "mask_ex1".to_string(),
            2.0,
            0.0,
            DividerSide::MinusE0,
        )
        .unwrap();
        let layer = ex.compute(&space).unwrap();
        // Line x = y/2: (5, 0) is right of it, (-5, 0) left.
        assert!(layer.get2(15, 10));
        assert!(!layer.get2(5, 10));
    }

    #[test]
    fn incompatible_sides_are_rejected() {
        assert!(DividerExclusion::new(
            "mask_ex1".to_string(),
            f64::INFINITY,
            0.0,
            DividerSide::PlusE1,
        )
        .is_err());
        assert!(DividerExclusion::new(
            "mask_ex1".to_string(),
            0.0,
            0.0,
            DividerSide::MinusE0,
        )
        .is_err());
    }
}
