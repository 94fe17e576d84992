//! Physical units for probe-drive motion.
//!
//! The drive electronics think in motor `steps`; the mechanics think in
//! `rev`; the experimenter thinks in axis lengths. The three are related
//! through a per-axis [`Equivalence`] triangle:
//!
//! ```text
//! rev   <->  steps   : multiplier = steps_per_rev
//! rev   <->  length  : multiplier = units_per_rev
//! steps <->  length  : derived
//! ```
//!
//! The same triangle applies to first and second time derivatives
//! (speeds and accelerations). Conversions never truncate; rounding into
//! integer step counts happens at the wire-command layer where the drive
//! requires it.

use crate::MotionError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A length unit an axis can be configured in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthUnit {
    Cm,
    Mm,
    Inch,
}

impl LengthUnit {
    /// Centimeters per one of this unit.
    pub fn in_cm(self) -> f64 {
        match self {
            LengthUnit::Cm => 1.0,
            LengthUnit::Mm => 0.1,
            LengthUnit::Inch => 2.54,
        }
    }

    /// Multiplier converting a value in `self` into a value in `other`.
    pub fn factor_to(self, other: LengthUnit) -> f64 {
        self.in_cm() / other.in_cm()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LengthUnit::Cm => "cm",
            LengthUnit::Mm => "mm",
            LengthUnit::Inch => "inch",
        }
    }
}

impl fmt::Display for LengthUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LengthUnit {
    type Err = MotionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cm" => Ok(LengthUnit::Cm),
            "mm" => Ok(LengthUnit::Mm),
            "inch" | "in" => Ok(LengthUnit::Inch),
            other => Err(MotionError::Config(format!("unknown length unit {other:?}"))),
        }
    }
}

/// The base dimension of a unit, before time derivatives.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Base {
    Steps,
    Rev,
    Length(LengthUnit),
    Seconds,
    Deg,
    Rad,
}

/// The closed unit algebra of the motion system.
///
/// Base units are `steps`, `rev`, a length unit, seconds, and angles;
/// derived units are their first and second time derivatives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Unit {
    Steps,
    Rev,
    Length(LengthUnit),
    StepsPerSec,
    RevPerSec,
    LengthPerSec(LengthUnit),
    StepsPerSec2,
    RevPerSec2,
    LengthPerSec2(LengthUnit),
    Seconds,
    Deg,
    Rad,
}

impl Unit {
    /// Order of the time derivative: 0 for positions, 1 for speeds,
    /// 2 for accelerations.
    fn derivative_order(self) -> u8 {
        match self {
            Unit::Steps | Unit::Rev | Unit::Length(_) | Unit::Seconds | Unit::Deg | Unit::Rad => 0,
            Unit::StepsPerSec | Unit::RevPerSec | Unit::LengthPerSec(_) => 1,
            Unit::StepsPerSec2 | Unit::RevPerSec2 | Unit::LengthPerSec2(_) => 2,
        }
    }

    fn base(self) -> Base {
        match self {
            Unit::Steps | Unit::StepsPerSec | Unit::StepsPerSec2 => Base::Steps,
            Unit::Rev | Unit::RevPerSec | Unit::RevPerSec2 => Base::Rev,
            Unit::Length(u) | Unit::LengthPerSec(u) | Unit::LengthPerSec2(u) => Base::Length(u),
            Unit::Seconds => Base::Seconds,
            Unit::Deg => Base::Deg,
            Unit::Rad => Base::Rad,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Unit::Steps => "steps".to_string(),
            Unit::Rev => "rev".to_string(),
            Unit::Length(u) => u.to_string(),
            Unit::StepsPerSec => "steps/s".to_string(),
            Unit::RevPerSec => "rev/s".to_string(),
            Unit::LengthPerSec(u) => format!("{u}/s"),
            Unit::StepsPerSec2 => "steps/s^2".to_string(),
            Unit::RevPerSec2 => "rev/s^2".to_string(),
            Unit::LengthPerSec2(u) => format!("{u}/s^2"),
            Unit::Seconds => "s".to_string(),
            Unit::Deg => "deg".to_string(),
            Unit::Rad => "rad".to_string(),
        };
        f.write_str(&text)
    }
}

/// A real number tagged with its [`Unit`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantity {
    pub value: f64,
    pub unit: Unit,
}

impl Quantity {
    pub fn new(value: f64, unit: Unit) -> Self {
        Self { value, unit }
    }

    /// Convert into `to`, using `equiv` for steps/rev/length relations.
    ///
    /// Angles convert without an equivalence table; mixed dimensions
    /// (e.g. a speed into a position) are an error.
    pub fn to(&self, to: Unit, equiv: &Equivalence) -> Result<Quantity, MotionError> {
        if self.unit == to {
            return Ok(*self);
        }

        let incompatible = || MotionError::IncompatibleUnits {
            from: self.unit,
            to,
        };

        // Angles stand alone in the algebra.
        match (self.unit.base(), to.base()) {
            (Base::Deg, Base::Rad) => {
                return Ok(Quantity::new(self.value.to_radians(), to));
            }
            (Base::Rad, Base::Deg) => {
                return Ok(Quantity::new(self.value.to_degrees(), to));
            }
            (Base::Deg | Base::Rad | Base::Seconds, _) | (_, Base::Deg | Base::Rad | Base::Seconds) => {
                return Err(incompatible());
            }
            _ => {}
        }

        if self.unit.derivative_order() != to.derivative_order() {
            return Err(incompatible());
        }

        let factor = equiv.factor(self.unit.base(), to.base())?;
        Ok(Quantity::new(self.value * factor, to))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

/// The per-axis equivalence triangle relating steps, revolutions, and
/// the axis length unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Equivalence {
    /// Motor steps per full revolution.
    pub steps_per_rev: f64,
    /// Axis length units traversed per full revolution (the pitch).
    pub units_per_rev: f64,
    /// The length unit `units_per_rev` is expressed in.
    pub length_unit: LengthUnit,
}

impl Equivalence {
    pub fn new(
        steps_per_rev: f64,
        units_per_rev: f64,
        length_unit: LengthUnit,
    ) -> Result<Self, MotionError> {
        if !(steps_per_rev > 0.0) || !steps_per_rev.is_finite() {
            return Err(MotionError::Config(format!(
                "steps_per_rev must be positive and finite, got {steps_per_rev}"
            )));
        }
        if !(units_per_rev > 0.0) || !units_per_rev.is_finite() {
            return Err(MotionError::Config(format!(
                "units_per_rev must be positive and finite, got {units_per_rev}"
            )));
        }
        Ok(Self {
            steps_per_rev,
            units_per_rev,
            length_unit,
        })
    }

    /// Multiplier converting a value with base `from` into base `to`.
    fn factor(&self, from: Base, to: Base) -> Result<f64, MotionError> {
        let per_rev = |base: Base| -> Option<f64> {
            // Value of one revolution expressed in `base`.
            match base {
                Base::Steps => Some(self.steps_per_rev),
                Base::Rev => Some(1.0),
                Base::Length(u) => {
                    Some(self.units_per_rev * self.length_unit.factor_to(u))
                }
                _ => None,
            }
        };

        match (per_rev(from), per_rev(to)) {
            (Some(f), Some(t)) => Ok(t / f),
            _ => Err(MotionError::Config(format!(
                "no equivalence between {from:?} and {to:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn acme_equiv() -> Equivalence {
        // 0.1" pitch ACME rod in cm, 20000 steps/rev.
        Equivalence::new(20000.0, 0.1 * 2.54, LengthUnit::Cm).unwrap()
    }

    #[test]
    fn length_to_steps_round_trip() {
        let equiv = acme_equiv();
        for value in [-7.3, -0.001, 0.0, 1.234, 55.0] {
            let q = Quantity::new(value, Unit::Length(LengthUnit::Cm));
            let steps = q.to(Unit::Steps, &equiv).unwrap();
            let back = steps.to(Unit::Length(LengthUnit::Cm), &equiv).unwrap();
            assert_relative_eq!(back.value, value, max_relative = 1e-9);
        }
    }

    #[test]
    fn rev_to_steps_uses_gearing() {
        let equiv = acme_equiv();
        let q = Quantity::new(2.0, Unit::Rev);
        assert_eq!(q.to(Unit::Steps, &equiv).unwrap().value, 40000.0);
    }

    #[test]
    fn rev_to_length_uses_pitch() {
        let equiv = acme_equiv();
        let q = Quantity::new(10.0, Unit::Rev);
        let len = q.to(Unit::Length(LengthUnit::Cm), &equiv).unwrap();
        assert_relative_eq!(len.value, 2.54, max_relative = 1e-12);
    }

    #[test]
    fn derivatives_convert_with_same_triangle() {
        let equiv = acme_equiv();
        let v = Quantity::new(1.0, Unit::RevPerSec);
        let v_cm = v.to(Unit::LengthPerSec(LengthUnit::Cm), &equiv).unwrap();
        assert_relative_eq!(v_cm.value, 0.254, max_relative = 1e-12);

        let a = Quantity::new(3.0, Unit::StepsPerSec2);
        let a_rev = a.to(Unit::RevPerSec2, &equiv).unwrap();
        assert_relative_eq!(a_rev.value, 3.0 / 20000.0, max_relative = 1e-12);
    }

    #[test]
    fn cross_length_units_convert() {
        let equiv = acme_equiv();
        let q = Quantity::new(1.0, Unit::Length(LengthUnit::Inch));
        let cm = q.to(Unit::Length(LengthUnit::Cm), &equiv).unwrap();
        assert_relative_eq!(cm.value, 2.54, max_relative = 1e-12);
    }

    #[test]
    fn mixed_derivative_orders_are_rejected() {
        let equiv = acme_equiv();
        let q = Quantity::new(1.0, Unit::RevPerSec);
        assert!(q.to(Unit::Steps, &equiv).is_err());
    }

    #[test]
    fn angles_convert_without_equivalence() {
        let equiv = acme_equiv();
        let q = Quantity::new(180.0, Unit::Deg);
        let rad = q.to(Unit::Rad, &equiv).unwrap();
        assert_relative_eq!(rad.value, std::f64::consts::PI, max_relative = 1e-12);
        assert!(q.to(Unit::Steps, &equiv).is_err());
    }

    #[test]
    fn nonpositive_equivalence_is_rejected() {
        assert!(Equivalence::new(0.0, 0.254, LengthUnit::Cm).is_err());
        assert!(Equivalence::new(20000.0, -1.0, LengthUnit::Cm).is_err());
    }
}
