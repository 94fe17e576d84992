//! Typed command table and reply decoding for the motor drive.
//!
//! The drive speaks short mnemonic commands (`RS`, `IE`, `DI4000`, ...).
//! Actors never build those strings themselves; they look up an abstract
//! command name in the [`CommandTable`], which knows the mnemonic, whether
//! the command carries an argument, and the unit of the argument and of the
//! reply. Replies come back as `MNEMONIC=value` text, a bare `%` / `*`
//! acknowledgement, or `?` on rejection.

use crate::ProtocolError;

/// Native units of the motor drive.
///
/// Everything the drive accepts or reports is expressed in one of these;
/// conversion to physical axis units happens a layer up, where the axis
/// pitch is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorUnit {
    /// Encoder/step counts. Arguments in steps are truncated to integers.
    Steps,
    /// Motor revolutions.
    Rev,
    /// Revolutions per second.
    RevPerSec,
    /// Revolutions per second, per second.
    RevPerSec2,
}

/// One entry of the command table.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    /// Abstract name used by actors, e.g. `"move_to"`.
    pub name: &'static str,
    /// Drive mnemonic the command encodes to.
    pub mnemonic: &'static str,
    /// Whether the command carries a numeric argument.
    pub takes_arg: bool,
    /// Unit the argument must be supplied in.
    pub arg_unit: Option<MotorUnit>,
    /// Unit of the reply value, if the command returns one.
    pub reply_unit: Option<MotorUnit>,
    /// Multiplier applied to the parsed reply value before it is handed
    /// back in `reply_unit` (the drive reports velocity in rev/min).
    pub reply_scale: f64,
}

impl CommandSpec {
    const fn new(name: &'static str, mnemonic: &'static str) -> Self {
        Self {
            name,
            mnemonic,
            takes_arg: false,
            arg_unit: None,
            reply_unit: None,
            reply_scale: 1.0,
        }
    }

    const fn arg(mut self, unit: MotorUnit) -> Self {
        self.takes_arg = true;
        self.arg_unit = Some(unit);
        self
    }

    const fn reply(mut self, unit: MotorUnit) -> Self {
        self.reply_unit = Some(unit);
        self
    }

    const fn scale(mut self, scale: f64) -> Self {
        self.reply_scale = scale;
        self
    }
}

/// The default command set understood by the drives.
const COMMANDS: &[CommandSpec] = &[
    CommandSpec::new("status", "RS"),
    CommandSpec::new("alarm", "AL"),
    CommandSpec::new("clear_alarm", "AR"),
    CommandSpec::new("get_position", "IE").reply(MotorUnit::Steps),
    CommandSpec::new("get_target", "IP").reply(MotorUnit::Steps),
    // The drive reports immediate velocity in rev/min.
    CommandSpec::new("velocity", "IV")
        .reply(MotorUnit::RevPerSec)
        .scale(1.0 / 60.0),
    CommandSpec::new("set_target", "DI").arg(MotorUnit::Steps),
    CommandSpec::new("feed", "FP"),
    CommandSpec::new("stop", "ST"),
    CommandSpec::new("stop_kill", "SK"),
    CommandSpec::new("stop_jog", "SJ"),
    CommandSpec::new("enable", "ME"),
    CommandSpec::new("disable", "MD"),
    CommandSpec::new("set_speed", "VE").arg(MotorUnit::RevPerSec),
    CommandSpec::new("set_accel", "AC").arg(MotorUnit::RevPerSec2),
    CommandSpec::new("set_decel", "DE").arg(MotorUnit::RevPerSec2),
    CommandSpec::new("set_gearing", "EG").arg(MotorUnit::Steps),
    CommandSpec::new("set_encoder_position", "EP").arg(MotorUnit::Steps),
    CommandSpec::new("set_position", "SP").arg(MotorUnit::Steps),
    CommandSpec::new("format_decimal", "IFD"),
];

/// A prepared command: the framed body text plus the spec it came from.
#[derive(Debug, Clone)]
pub struct Command {
    /// ASCII body handed to the codec, e.g. `"DI4000"`.
    pub body: String,
    /// Table entry the command was built from.
    pub spec: CommandSpec,
}

/// Lookup table from abstract command names to [`CommandSpec`]s.
#[derive(Debug, Clone)]
pub struct CommandTable {
    specs: &'static [CommandSpec],
}

impl Default for CommandTable {
    fn default() -> Self {
        Self { specs: COMMANDS }
    }
}

impl CommandTable {
    /// Looks up a command spec by its abstract name.
    pub fn get(&self, name: &str) -> Result<&CommandSpec, ProtocolError> {
        self.specs
            .iter()
            .find(|spec| spec.name == name)
            .ok_or_else(|| ProtocolError::UnknownCommand(name.to_string()))
    }

    /// Builds the wire body for `name`, encoding `arg` in the unit the
    /// table declares. Step-valued arguments are truncated to integers.
    pub fn encode(&self, name: &str, arg: Option<f64>) -> Result<Command, ProtocolError> {
        let spec = *self.get(name)?;
        let body = match (spec.takes_arg, arg) {
            (false, _) => spec.mnemonic.to_string(),
            (true, Some(value)) => match spec.arg_unit {
                Some(MotorUnit::Steps) => format!("{}{}", spec.mnemonic, value.trunc() as i64),
                _ => format!("{}{}", spec.mnemonic, format_number(value)),
            },
            (true, None) => {
                return Err(ProtocolError::BadValue(format!(
                    "command {name:?} requires an argument"
                )))
            }
        };
        Ok(Command { body, spec })
    }

    /// Iterates over every known command spec.
    pub fn iter(&self) -> impl Iterator<Item = &CommandSpec> {
        self.specs.iter()
    }
}

/// Formats a float argument without trailing zeros (`2.5`, not `2.5000`).
fn format_number(value: f64) -> String {
    let mut text = format!("{value:.4}");
    while text.contains('.') && (text.ends_with('0') || text.ends_with('.')) {
        text.pop();
    }
    text
}

/// A decoded reply from the drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    text: String,
}

impl Reply {
    /// Wraps the reply text produced by the codec.
    pub fn new(text: String) -> Self {
        Self { text }
    }

    /// The full reply text (echo header already stripped by the codec).
    pub fn text(&self) -> &str {
        &self.text
    }

    /// `true` for a bare acknowledgement (`%` immediate, `*` buffered).
    pub fn is_ack(&self) -> bool {
        matches!(self.text.as_str(), "%" | "*")
    }

    /// `true` if the drive rejected the command.
    pub fn is_rejected(&self) -> bool {
        self.text.starts_with('?')
    }

    /// The payload after the `MNEMONIC=` echo, or the whole text when no
    /// echo is present.
    pub fn payload(&self) -> &str {
        match self.text.split_once('=') {
            Some((_, payload)) => payload,
            None => &self.text,
        }
    }

    /// Parses the reply payload as a number, applying the spec's scale.
    pub fn value(&self, spec: &CommandSpec) -> Result<f64, ProtocolError> {
        if self.is_rejected() {
            return Err(ProtocolError::Rejected(self.text.clone()));
        }
        let raw: f64 = self
            .payload()
            .trim()
            .parse()
            .map_err(|_| ProtocolError::BadValue(self.text.clone()))?;
        Ok(raw * spec.reply_scale)
    }
}

/// Decoded status-request (`RS`) flags.
///
/// The drive reports status as a string of character flags, one per active
/// condition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusFlags {
    /// `A`: an alarm code is present.
    pub alarm: bool,
    /// `D`: the drive is disabled.
    pub disabled: bool,
    /// `E`: drive fault, must be reset before further motion.
    pub fault: bool,
    /// `F`: the motor is moving.
    pub motor_moving: bool,
    /// `H`: homing in progress.
    pub homing: bool,
    /// `J`: jogging in progress.
    pub jogging: bool,
    /// `M`: motion (feed command) in progress.
    pub in_motion: bool,
    /// `P`: in position.
    pub in_position: bool,
    /// `R`: drive enabled and ready.
    pub ready: bool,
    /// `S`: a stop command is executing.
    pub stopping: bool,
    /// `T`: wait-time command executing.
    pub wait_time: bool,
    /// `W`: wait-input command executing.
    pub wait_input: bool,
}

impl StatusFlags {
    /// Parses the payload of an `RS` reply.
    pub fn parse(payload: &str) -> Self {
        let mut flags = Self::default();
        for ch in payload.chars() {
            match ch {
                'A' => flags.alarm = true,
                'D' => flags.disabled = true,
                'E' => flags.fault = true,
                'F' => flags.motor_moving = true,
                'H' => flags.homing = true,
                'J' => flags.jogging = true,
                'M' => flags.in_motion = true,
                'P' => flags.in_position = true,
                'R' => flags.ready = true,
                'S' => flags.stopping = true,
                'T' => flags.wait_time = true,
                'W' => flags.wait_input = true,
                _ => {}
            }
        }
        flags
    }

    /// Whether any form of motion is in progress.
    pub fn is_moving(&self) -> bool {
        self.motor_moving || self.in_motion || self.jogging || self.homing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_step_argument_truncated() {
        let table = CommandTable::default();
        let cmd = table.encode("set_target", Some(4000.7)).unwrap();
        assert_eq!(cmd.body, "DI4000");
    }

    #[test]
    fn encodes_float_argument_trimmed() {
        let table = CommandTable::default();
        let cmd = table.encode("set_speed", Some(2.5)).unwrap();
        assert_eq!(cmd.body, "VE2.5");
        let cmd = table.encode("set_speed", Some(3.0)).unwrap();
        assert_eq!(cmd.body, "VE3");
    }

    #[test]
    fn bare_command_has_no_argument() {
        let table = CommandTable::default();
        let cmd = table.encode("feed", None).unwrap();
        assert_eq!(cmd.body, "FP");
    }

    #[test]
    fn missing_argument_is_an_error() {
        let table = CommandTable::default();
        assert!(table.encode("set_target", None).is_err());
    }

    #[test]
    fn unknown_command_is_an_error() {
        let table = CommandTable::default();
        assert!(matches!(
            table.encode("warp_drive", None),
            Err(ProtocolError::UnknownCommand(_))
        ));
    }

    #[test]
    fn parses_position_reply() {
        let table = CommandTable::default();
        let spec = *table.get("get_position").unwrap();
        let reply = Reply::new("IE=-12345".to_string());
        assert_eq!(reply.value(&spec).unwrap(), -12345.0);
    }

    #[test]
    fn velocity_reply_scales_to_rev_per_sec() {
        let table = CommandTable::default();
        let spec = *table.get("velocity").unwrap();
        let reply = Reply::new("IV=120".to_string());
        assert_eq!(reply.value(&spec).unwrap(), 2.0);
    }

    #[test]
    fn rejected_reply_surfaces_error() {
        let table = CommandTable::default();
        let spec = *table.get("get_position").unwrap();
        let reply = Reply::new("?".to_string());
        assert!(reply.is_rejected());
        assert!(matches!(
            reply.value(&spec),
            Err(ProtocolError::Rejected(_))
        ));
    }

    #[test]
    fn status_flags_decode() {
        let flags = StatusFlags::parse("RM");
        assert!(flags.ready);
        assert!(flags.in_motion);
        assert!(flags.is_moving());

        let flags = StatusFlags::parse("RP");
        assert!(flags.in_position);
        assert!(!flags.is_moving());

        let flags = StatusFlags::parse("AD");
        assert!(flags.alarm);
        assert!(flags.disabled);
    }
}
