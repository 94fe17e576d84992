//! The LaPD XY composite exclusion: chamber wall, port aperture,
//! ball-valve cone, and line-of-sight shadow in one governing layer.

use super::{
    CircleSide, CircularExclusion, DividerExclusion, DividerSide, ExclusionSpec,
    PortLocation, Shadow2DExclusion,
};
use crate::space::{Mask, MotionSpace};
use crate::MotionError;

/// Governing exclusion for a probe mounted on a LaPD ball valve.
///
/// The accessible region is built from five sub-layers, each computed
/// stand-alone and combined as
/// `(chamber OR port) AND cone_upper AND cone_lower AND shadow`:
/// the chamber interior plus the port sliver outside the wall, clipped
/// to the valve cone and to what the pivot can actually see.
#[derive(Debug, Clone, PartialEq)]
pub struct LaPDXYExclusion {
    name: String,
    diameter: f64,
    pivot_radius: f64,
    port_location: PortLocation,
    port_angle_deg: f64,
    cone_full_angle: f64,
    include_cone: bool,
    insertion_point: [f64; 2],
}

impl LaPDXYExclusion {
    pub fn new(
        name: String,
        diameter: f64,
        pivot_radius: f64,
        port_location: PortLocation,
        cone_full_angle: f64,
        include_cone: bool,
    ) -> Result<Self, MotionError> {
        let diameter = diameter.abs();
        let pivot_radius = pivot_radius.abs();
        if diameter == 0.0 || !diameter.is_finite() {
            return Err(MotionError::Config(format!(
                "lapd_xy exclusion needs a nonzero chamber diameter, got {diameter}"
            )));
        }
        if include_cone && !(cone_full_angle > 0.0 && cone_full_angle < 180.0) {
            return Err(MotionError::Config(format!(
                "cone_full_angle must lie in (0, 180) degrees, got {cone_full_angle}"
            )));
        }

        let port_angle_deg = port_location.angle_deg()?;
        let theta = port_angle_deg.to_radians();
        let insertion_point = [pivot_radius * theta.cos(), pivot_radius * theta.sin()];

        Ok(Self {
            name,
            diameter,
            pivot_radius,
            port_location,
            port_angle_deg,
            cone_full_angle,
            include_cone,
            insertion_point,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// (x, y) location of the ball-valve pivot, the probe insertion
    /// point.
    pub fn insertion_point(&self) -> [f64; 2] {
        self.insertion_point
    }

    /// Computes the combined accessible region. `current` feeds the
    /// shadow sub-layer: obstructions already masked out occlude the
    /// probe's line of sight from the pivot.
    pub fn compute(&self, space: &MotionSpace, current: &Mask) -> Result<Mask, MotionError> {
        let shadow = Shadow2DExclusion::new("shadow".to_string(), self.insertion_point)?
            .compute(space, current)?;

        let chamber = CircularExclusion::new(
            "chamber".to_string(),
            0.5 * self.diameter,
            [0.0, 0.0],
            CircleSide::Outside,
        )?
        .compute(space)?;

        if !self.include_cone {
            let mut combined = chamber;
            combined.and_assign(&shadow);
            return Ok(combined);
        }

        let port = self.port_divider()?.compute(space)?;
        let [upper, lower] = self.cone_dividers()?;
        let upper = upper.compute(space)?;
        let lower = lower.compute(space)?;

        let mut combined = chamber;
        combined.or_assign(&port);
        combined.and_assign(&upper);
        combined.and_assign(&lower);
        combined.and_assign(&shadow);
        Ok(combined)
    }

    /// The two dividers bounding the ball-valve cone.
    ///
    /// In the pivot frame the cone edges run along `(-cos a, +/- sin a)`
    /// with `a` the half-cone angle; rotating into the lab frame by the
    /// port angle and fitting a slope-intercept line through the pivot
    /// gives each divider. The excluded side follows the dominant
    /// component of the rotated outward normal.
    fn cone_dividers(&self) -> Result<[DividerExclusion; 2], MotionError> {
        Ok([self.cone_divider(true)?, self.cone_divider(false)?])
    }

    fn cone_divider(&self, upper: bool) -> Result<DividerExclusion, MotionError> {
        let theta = self.port_angle_deg.to_radians();
        let alpha = 0.5 * self.cone_full_angle.to_radians();
        let pivot = self.insertion_point;
        let rotate = |v: [f64; 2]| -> [f64; 2] {
            [
                v[0] * theta.cos() - v[1] * theta.sin(),
                v[0] * theta.sin() + v[1] * theta.cos(),
            ]
        };

        let sign = if upper { 1.0 } else { -1.0 };
        let trajectory = rotate([-alpha.cos(), sign * alpha.sin()]);

        let (slope, intercept) = if trajectory[0] == 0.0 {
            (f64::INFINITY, pivot[0])
        } else {
            let slope = trajectory[1] / trajectory[0];
            (slope, pivot[1] - slope * pivot[0])
        };

        let normal = rotate([0.0, sign]);
        let horizontal = normal[0].abs() > normal[1].abs();
        let exclude = match (horizontal, if horizontal { normal[0] } else { normal[1] } > 0.0) {
            (true, true) => DividerSide::PlusE0,
            (true, false) => DividerSide::MinusE0,
            (false, true) => DividerSide::PlusE1,
            (false, false) => DividerSide::MinusE1,
        };

        let name = if upper { "divider_upper" } else { "divider_lower" };
        DividerExclusion::new(name.to_string(), slope, intercept, exclude)
    }

    /// The divider through the two chamber-wall intersections of the
    /// cone, opening up the port sliver between the wall and the pivot.
    ///
    /// The excluded side is derived geometrically: the chord must shut
    /// out the half-plane on the far side of the chamber from the
    /// pivot, so the side is the dominant pivot coordinate with its
    /// sign flipped.
    fn port_divider(&self) -> Result<DividerExclusion, MotionError> {
        let theta = self.port_angle_deg.to_radians();
        let alpha = 0.5 * self.cone_full_angle.to_radians();
        let pivot = self.insertion_point;
        let radius = 0.5 * self.diameter;

        // Law-of-sines construction of the half-angle subtended by the
        // cone's wall crossings, as seen from the chamber center.
        let mut beta = (self.pivot_radius * alpha.sin() / radius).asin();
        if beta.abs() < std::f64::consts::FRAC_PI_2 {
            beta = std::f64::consts::PI - beta;
        }
        beta = std::f64::consts::PI - beta - alpha;

        let pt1 = [
            radius * (theta + beta).cos(),
            radius * (theta + beta).sin(),
        ];
        let pt2 = [
            radius * (theta - beta).cos(),
            radius * (theta - beta).sin(),
        ];

        let (slope, intercept) = if pt1[0] == pt2[0] {
            (f64::INFINITY, pt1[0])
        } else {
            let slope = (pt1[1] - pt2[1]) / (pt1[0] - pt2[0]);
            (slope, pt1[1] - slope * pt1[0])
        };

        let (horizontal, component) = if pivot[0].abs() >= pivot[1].abs() {
            (true, pivot[0])
        } else {
            (false, pivot[1])
        };
        let exclude = match (horizontal, component > 0.0) {
            (true, true) => DividerSide::MinusE0,
            (true, false) => DividerSide::PlusE0,
            (false, true) => DividerSide::MinusE1,
            (false, false) => DividerSide::PlusE1,
        };

        DividerExclusion::new("port".to_string(), slope, intercept, exclude)
    }

    pub fn spec(&self) -> ExclusionSpec {
        ExclusionSpec::LapdXy {
            diameter: self.diameter,
            pivot_radius: self.pivot_radius,
            port_location: self.port_location.clone(),
            cone_full_angle: self.cone_full_angle,
            include_cone: self.include_cone,
        }
    }
}
