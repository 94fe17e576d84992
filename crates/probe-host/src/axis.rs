//! The axis actor: one physical axis of a probe drive.
//!
//! An `Axis` wraps a [`Motor`] and owns the unit system of that axis:
//! the length unit the experimenter works in and the pitch relating a
//! motor revolution to axis travel. Commands and replies convert
//! through the steps/rev/length equivalence triangle on the way in and
//! out.

use crate::config::AxisConfig;
use crate::motor::{CommandReply, Motor};
use crate::runloop::RunLoop;
use crate::ActorError;
use motion::units::{Equivalence, LengthUnit, Quantity, Unit};
use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// One physical axis: a motor plus its unit system.
#[derive(Debug)]
pub struct Axis {
    name: String,
    units: LengthUnit,
    units_per_rev: f64,
    motor: Motor,
}

impl Axis {
    /// Spawns the axis's motor on the shared run loop.
    pub fn new(run_loop: Arc<RunLoop>, config: &AxisConfig) -> Result<Self, ActorError> {
        config.validate()?;
        let motor = Motor::new(
            format!("{}-motor", config.name),
            config.parsed_ip()?,
            config.motor_settings.clone().unwrap_or_default(),
            run_loop,
        )?;
        Ok(Self {
            name: config.name.clone(),
            units: config.units,
            units_per_rev: config.units_per_rev,
            motor,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.motor.ip()
    }

    /// The length unit this axis operates in.
    pub fn units(&self) -> LengthUnit {
        self.units
    }

    /// Axis length units traversed per motor revolution.
    pub fn units_per_rev(&self) -> f64 {
        self.units_per_rev
    }

    pub fn motor(&self) -> &Motor {
        &self.motor
    }

    pub fn connected(&self) -> bool {
        self.motor.connected()
    }

    pub fn is_moving(&self) -> bool {
        self.motor.is_moving()
    }

    pub fn terminated(&self) -> bool {
        self.motor.terminated()
    }

    /// The steps/rev/length conversion triangle for this axis.
    pub fn equivalence(&self) -> Equivalence {
        Equivalence::new(
            self.motor.settings().steps_per_rev as f64,
            self.units_per_rev,
            self.units,
        )
        .unwrap_or_else(|_| unreachable!("axis parameters validated at construction"))
    }

    /// Sends a named command, converting the argument from axis units
    /// into the motor unit the command table declares, and converting a
    /// valued reply back into axis units.
    pub fn send_command(
        &self,
        name: &str,
        arg: Option<Quantity>,
    ) -> Result<CommandReply, ActorError> {
        let equivalence = self.equivalence();
        let spec = *self.motor.table().get(name)?;

        let motor_arg = match (arg, spec.arg_unit) {
            (Some(q), Some(unit)) => Some(q.to(motor_unit(unit), &equivalence)?),
            (Some(q), None) => Some(q),
            (None, _) => None,
        };

        let reply = self.motor.send_command(name, motor_arg)?;
        match reply {
            CommandReply::Value(q) => Ok(CommandReply::Value(self.into_axis_units(q)?)),
            other => Ok(other),
        }
    }

    /// Converts a motor-unit quantity into this axis's length system.
    fn into_axis_units(&self, q: Quantity) -> Result<Quantity, ActorError> {
        let target = match q.unit {
            Unit::Steps | Unit::Rev | Unit::Length(_) => Unit::Length(self.units),
            Unit::StepsPerSec | Unit::RevPerSec | Unit::LengthPerSec(_) => {
                Unit::LengthPerSec(self.units)
            }
            Unit::StepsPerSec2 | Unit::RevPerSec2 | Unit::LengthPerSec2(_) => {
                Unit::LengthPerSec2(self.units)
            }
            other => return Ok(Quantity::new(q.value, other)),
        };
        Ok(q.to(target, &self.equivalence())?)
    }

    /// Current position in axis units.
    pub fn position(&self) -> Result<Quantity, ActorError> {
        let steps = self.motor.position()?;
        self.into_axis_units(steps)
    }

    /// Current speed in axis units per second.
    pub fn velocity(&self) -> Result<Quantity, ActorError> {
        let rev_per_sec = self.motor.velocity()?;
        self.into_axis_units(rev_per_sec)
    }

    /// Moves to an absolute position given in axis units (or any unit
    /// the equivalence triangle can reach).
    pub fn move_to(&self, target: Quantity) -> Result<(), ActorError> {
        let steps = target.to(Unit::Steps, &self.equivalence())?.value;
        self.motor.move_to(Quantity::new(steps, Unit::Steps))
    }

    /// Async form for concurrent multi-axis dispatch; `target` is in
    /// axis length units.
    pub(crate) fn move_to_future(
        &self,
        target: f64,
    ) -> Result<impl Future<Output = Result<(), ActorError>> + Send + 'static, ActorError> {
        let steps = Quantity::new(target, Unit::Length(self.units))
            .to(Unit::Steps, &self.equivalence())?
            .value;
        Ok(self.motor.move_to_future(steps))
    }

    /// Stops the axis via the motor's fast path. Never raises.
    pub fn stop(&self, soft: bool) {
        self.motor.stop(soft);
    }

    /// Terminates the underlying motor.
    pub fn terminate(&self) {
        self.motor.terminate();
    }

    /// Restarts a terminated axis.
    pub fn run(&self) -> Result<(), ActorError> {
        self.motor.run()
    }

    /// The live configuration view of this axis.
    pub fn config(&self) -> AxisConfig {
        AxisConfig {
            name: self.name.clone(),
            ip: self.motor.ip().to_string(),
            units: self.units,
            units_per_rev: self.units_per_rev,
            motor_settings: Some(self.motor.settings().clone()),
            user: Default::default(),
        }
    }
}

/// Maps the drive's native units into the unit algebra.
fn motor_unit(unit: probe_proto::MotorUnit) -> Unit {
    match unit {
        probe_proto::MotorUnit::Steps => Unit::Steps,
        probe_proto::MotorUnit::Rev => Unit::Rev,
        probe_proto::MotorUnit::RevPerSec => Unit::RevPerSec,
        probe_proto::MotorUnit::RevPerSec2 => Unit::RevPerSec2,
    }
}
