//! Circular exclusion: a radial half-space around a center point.

use super::{CircleSide, ExclusionSpec};
use crate::space::{Mask, MotionSpace};
use crate::MotionError;

/// Excludes the inside or outside of a circle in a 2-D motion space.
///
/// With `exclude = outside` (the default) the circle bounds the
/// accessible region, which is how a chamber wall is modelled.
#[derive(Debug, Clone, PartialEq)]
pub struct CircularExclusion {
    name: String,
    radius: f64,
    center: [f64; 2],
    exclude: CircleSide,
}

impl CircularExclusion {
    pub fn new(
        name: String,
        radius: f64,
        center: [f64; 2],
        exclude: CircleSide,
    ) -> Result<Self, MotionError> {
        if radius == 0.0 || !radius.is_finite() {
            return Err(MotionError::Config(format!(
                "circle exclusion needs a nonzero finite radius, got {radius}"
            )));
        }
        if !center[0].is_finite() || !center[1].is_finite() {
            return Err(MotionError::Config(format!(
                "circle exclusion center must be finite, got {center:?}"
            )));
        }
        Ok(Self {
            name,
            radius: radius.abs(),
            center,
            exclude,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// The stand-alone layer: `true` where the probe may go.
    pub fn compute(&self, space: &MotionSpace) -> Result<Mask, MotionError> {
        let xs = space.coords(0);
        let ys = space.coords(1);
        let r2 = self.radius * self.radius;

        let mut layer = Mask::all_true(space);
        for (ix, &x) in xs.iter().enumerate() {
            for (iy, &y) in ys.iter().enumerate() {
                let dx = x - self.center[0];
                let dy = y - self.center[1];
                let inside = dx * dx + dy * dy <= r2;
                let allowed = match self.exclude {
                    CircleSide::Outside => inside,
                    CircleSide::Inside => !inside,
                };
                layer.set2(ix, iy, allowed);
            }
        }
        Ok(layer)
    }

    pub fn spec(&self) -> ExclusionSpec {
        ExclusionSpec::Circle {
            radius: self.radius,
            center: Some(self.center),
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
    fn outside_exclusion_allows_interior() {
        let space = space();
        let ex = CircularExclusion::new(
            "mask_ex1".to_string(),
            5.0,
            [0.0, 0.0],
            CircleSide::Outside,
        )
        .unwrap();
        let layer = ex.compute(&space).unwrap();
        // (0, 0) is cell (10, 10); (8, 8) is well outside radius 5.
        assert!(layer.get2(10, 10));
        assert!(layer.get2(10, 15)); // (0, 5) on the boundary is allowed
        assert!(!layer.get2(18, 18));
    }

    #[test]
    fn inside_exclusion_is_the_complement() {
        let space = space();
        let outside = CircularExclusion::new(
            "mask_ex1".to_string(),
            5.0,
            [2.0, 0.0],
            CircleSide::Outside,
        )
        .unwrap()
        .compute(&space)
        .unwrap();
        let inside = CircularExclusion::new(
            "mask_ex2".to_string(),
            5.0,
            [2.0, 0.0],
            CircleSide::Inside,
        )
        .unwrap()
        .compute(&space)
        .unwrap();

        for ix in 0..21 {
            for iy in 0..21 {
                assert_ne!(outside.get2(ix, iy), inside.get2(ix, iy));
            }
        }
    }

    #[test]
    fn negative_radius_takes_magnitude() {
        let ex = CircularExclusion::new(
            "mask_ex1".to_string(),
            -5.0,
            [0.0, 0.0],
            CircleSide::Outside,
        )
        .unwrap();
        assert_eq!(ex.radius(), 5.0);
    }
}
