//! Exclusion layers: declarative descriptions of regions the probe may
//! not enter.
//!
//! An exclusion is either *regular* (its layer is ANDed into the global
//! mask) or *governing* (its layer replaces the global mask outright).
//! Every variant exposes a pure [`compute`](ExclusionLayer::compute) that
//! produces a stand-alone Boolean layer without touching global state;
//! composites build on `compute` and apply policy only at the top level.

pub mod circle;
pub mod divider;
pub mod lapd;
pub mod shadow;

pub use circle::CircularExclusion;
pub use divider::DividerExclusion;
pub use lapd::LaPDXYExclusion;
pub use shadow::Shadow2DExclusion;

use crate::space::{Mask, MotionSpace};
use crate::MotionError;
use serde::{Deserialize, Serialize};

/// Which side of a circle is excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CircleSide {
    Inside,
    Outside,
}

impl Default for CircleSide {
    fn default() -> Self {
        CircleSide::Outside
    }
}

/// Which side of a dividing line is excluded, named by the motion-space
/// axis pointing into the excluded half-plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DividerSide {
    #[serde(rename = "+e0")]
    PlusE0,
    #[serde(rename = "-e0")]
    MinusE0,
    #[serde(rename = "+e1")]
    PlusE1,
    #[serde(rename = "-e1")]
    MinusE1,
}

/// Which chamber port a probe is mounted on: a compass name or an
/// explicit angle in degrees (east = 0, top = 90).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortLocation {
    Angle(f64),
    Named(String),
}

impl Default for PortLocation {
    fn default() -> Self {
        PortLocation::Named("E".to_string())
    }
}

impl PortLocation {
    /// Resolves to an angle in degrees.
    pub fn angle_deg(&self) -> Result<f64, MotionError> {
        match self {
            PortLocation::Angle(angle) => {
                if *angle > -180.0 && *angle < 360.0 {
                    Ok(*angle)
                } else {
                    Err(MotionError::Config(format!(
                        "port location angle {angle} outside (-180, 360) degrees"
                    )))
                }
            }
            PortLocation::Named(name) => match name.to_ascii_lowercase().as_str() {
                "e" | "east" => Ok(0.0),
                "t" | "top" => Ok(90.0),
                "w" | "west" => Ok(180.0),
                "b" | "bot" | "bottom" => Ok(270.0),
                other => Err(MotionError::Config(format!(
                    "unknown port location {other:?}"
                ))),
            },
        }
    }
}

fn default_diameter() -> f64 {
    100.0
}

fn default_pivot_radius() -> f64 {
    58.771
}

fn default_cone_full_angle() -> f64 {
    80.0
}

fn default_include_cone() -> bool {
    true
}

/// Declarative description of an exclusion layer, as it appears in a
/// configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExclusionSpec {
    /// Radial half-space around a center point.
    #[serde(rename = "circle")]
    Circle {
        radius: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        center: Option<[f64; 2]>,
        #[serde(default)]
        exclude: CircleSide,
    },
    /// Affine half-plane; a vertical line is encoded with an infinite
    /// slope and the x-intercept in `intercept`.
    #[serde(rename = "divider")]
    Divider {
        slope: f64,
        intercept: f64,
        exclude: DividerSide,
    },
    /// Governing line-of-sight shadow cast from a source point around
    /// the currently masked regions.
    #[serde(rename = "shadow_2d")]
    Shadow2d { source_point: [f64; 2] },
    /// Governing composite for a probe on a LaPD ball valve: chamber
    /// wall, port aperture, ball-valve cone, and shadow.
    #[serde(rename = "lapd_xy")]
    LapdXy {
        #[serde(default = "default_diameter")]
        diameter: f64,
        #[serde(default = "default_pivot_radius")]
        pivot_radius: f64,
        #[serde(default)]
        port_location: PortLocation,
        #[serde(default = "default_cone_full_angle")]
        cone_full_angle: f64,
        #[serde(default = "default_include_cone")]
        include_cone: bool,
    },
}

/// An instantiated exclusion layer. Closed set of variants; the tag in
/// the configuration selects which one is built.
#[derive(Debug, Clone, PartialEq)]
pub enum ExclusionLayer {
    Circle(CircularExclusion),
    Divider(DividerExclusion),
    Shadow2d(Shadow2DExclusion),
    LapdXy(LaPDXYExclusion),
}

impl ExclusionLayer {
    /// Builds an exclusion from its spec against the given motion space.
    pub fn from_spec(
        name: String,
        spec: &ExclusionSpec,
        space: &MotionSpace,
    ) -> Result<Self, MotionError> {
        if space.ndim() != 2 {
            return Err(MotionError::Config(format!(
                "exclusion layers require a 2-D motion space, got {} dimensions",
                space.ndim()
            )));
        }

        match spec {
            ExclusionSpec::Circle {
                radius,
                center,
                exclude,
            } => Ok(ExclusionLayer::Circle(CircularExclusion::new(
                name,
                *radius,
                center.unwrap_or([0.0, 0.0]),
                *exclude,
            )?)),
            ExclusionSpec::Divider {
                slope,
                intercept,
                exclude,
            } => Ok(ExclusionLayer::Divider(DividerExclusion::new(
                name, *slope, *intercept, *exclude,
            )?)),
            ExclusionSpec::Shadow2d { source_point } => Ok(ExclusionLayer::Shadow2d(
                Shadow2DExclusion::new(name, *source_point)?,
            )),
            ExclusionSpec::LapdXy {
                diameter,
                pivot_radius,
                port_location,
                cone_full_angle,
                include_cone,
            } => Ok(ExclusionLayer::LapdXy(LaPDXYExclusion::new(
                name,
                *diameter,
                *pivot_radius,
                port_location.clone(),
                *cone_full_angle,
                *include_cone,
            )?)),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ExclusionLayer::Circle(e) => e.name(),
            ExclusionLayer::Divider(e) => e.name(),
            ExclusionLayer::Shadow2d(e) => e.name(),
            ExclusionLayer::LapdXy(e) => e.name(),
        }
    }

    /// Governing exclusions replace the global mask; regular ones AND
    /// into it.
    pub fn is_governing(&self) -> bool {
        matches!(self, ExclusionLayer::Shadow2d(_) | ExclusionLayer::LapdXy(_))
    }

    /// Computes this exclusion's stand-alone layer. Pure: the global
    /// mask is only an input (the shadow variants ray-cast against it).
    pub fn compute(&self, space: &MotionSpace, current: &Mask) -> Result<Mask, MotionError> {
        match self {
            ExclusionLayer::Circle(e) => e.compute(space),
            ExclusionLayer::Divider(e) => e.compute(space),
            ExclusionLayer::Shadow2d(e) => e.compute(space, current),
            ExclusionLayer::LapdXy(e) => e.compute(space, current),
        }
    }

    /// Merges this exclusion into `mask` according to its policy.
    pub fn apply(&self, space: &MotionSpace, mask: &mut Mask) -> Result<(), MotionError> {
        let layer = self.compute(space, mask)?;
        if self.is_governing() {
            *mask = layer;
        } else {
            mask.and_assign(&layer);
        }
        Ok(())
    }

    /// The declarative spec this exclusion was built from.
    pub fn spec(&self) -> ExclusionSpec {
        match self {
            ExclusionLayer::Circle(e) => e.spec(),
            ExclusionLayer::Divider(e) => e.spec(),
            ExclusionLayer::Shadow2d(e) => e.spec(),
            ExclusionLayer::LapdXy(e) => e.spec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_locations_resolve() {
        assert_eq!(PortLocation::Named("E".into()).angle_deg().unwrap(), 0.0);
        assert_eq!(PortLocation::Named("top".into()).angle_deg().unwrap(), 90.0);
        assert_eq!(PortLocation::Named("w".into()).angle_deg().unwrap(), 180.0);
        assert_eq!(PortLocation::Named("bot".into()).angle_deg().unwrap(), 270.0);
        assert_eq!(PortLocation::Angle(45.0).angle_deg().unwrap(), 45.0);
        assert!(PortLocation::Angle(400.0).angle_deg().is_err());
        assert!(PortLocation::Named("north".into()).angle_deg().is_err());
    }

    #[test]
    fn specs_deserialize_from_toml() {
        let spec: ExclusionSpec = toml::from_str(
            r#"
            type = "circle"
            radius = 20.0
            center = [-1.0, 2.0]
            exclude = "outside"
            "#,
        )
        .unwrap();
        assert!(matches!(spec, ExclusionSpec::Circle { .. }));

        let spec: ExclusionSpec = toml::from_str(
            r#"
            type = "lapd_xy"
            port_location = "E"
            cone_full_angle = 60.0
            "#,
        )
        .unwrap();
        match spec {
            ExclusionSpec::LapdXy {
                diameter,
                cone_full_angle,
                include_cone,
                ..
            } => {
                assert_eq!(diameter, 100.0);
                assert_eq!(cone_full_angle, 60.0);
                assert!(include_cone);
            }
            other => panic!("unexpected spec {other:?}"),
        }

        let spec: ExclusionSpec = toml::from_str(
            r#"
            type = "divider"
            slope = inf
            intercept = 4.0
            exclude = "+e0"
            "#,
        )
        .unwrap();
        match spec {
            ExclusionSpec::Divider { slope, exclude, .. } => {
                assert!(slope.is_infinite());
                assert_eq!(exclude, DividerSide::PlusE0);
            }
            other => panic!("unexpected spec {other:?}"),
        }
    }
}
