//! The configuration tree accepted at the run-manager boundary.
//!
//! The on-disk format is TOML. Entries that can repeat (motion groups,
//! axes, exclusion and point layers) are written as numbered tables
//! (`axes.0`, `axes.1`, ...) or plain arrays; both parse. Unknown keys
//! at any level are collected into a side-car `user` table instead of
//! being dropped.

use crate::motor::MotorSettings;
use crate::ActorError;
use motion::builder::SpaceConfig;
use motion::exclusions::ExclusionSpec;
use motion::layers::LayerSpec;
use motion::transform::{Transform, TransformSpec};
use motion::units::LengthUnit;
use motion::MotionBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::Path;

/// Free-form user metadata captured from unknown keys.
pub type UserTable = BTreeMap<String, toml::Value>;

/// Repeatable config entries: either an array or a numbered table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum Entries<T> {
    List(Vec<T>),
    Numbered(BTreeMap<String, T>),
}

impl<T> Default for Entries<T> {
    fn default() -> Self {
        Entries::List(Vec::new())
    }
}

impl<T> Entries<T> {
    /// Flattens into a vector ordered by numeric key.
    fn into_vec(self) -> Result<Vec<T>, String> {
        match self {
            Entries::List(items) => Ok(items),
            Entries::Numbered(map) => {
                let mut keyed = Vec::with_capacity(map.len());
                for (key, value) in map {
                    let index: usize = key
                        .parse()
                        .map_err(|_| format!("entry key {key:?} is not a numeric index"))?;
                    keyed.push((index, value));
                }
                keyed.sort_by_key(|(index, _)| *index);
                Ok(keyed.into_iter().map(|(_, value)| value).collect())
            }
        }
    }

    fn from_vec(items: Vec<T>) -> Self {
        Entries::Numbered(
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| (i.to_string(), item))
                .collect(),
        )
    }
}

/// Configuration of one axis of a probe drive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisConfig {
    /// Axis name; auto-filled as `ax<i>` when omitted.
    #[serde(default)]
    pub name: String,
    /// IPv4 address of the axis motor.
    pub ip: String,
    /// Length unit the axis operates in.
    pub units: LengthUnit,
    /// Axis length traversed per motor revolution (the pitch).
    pub units_per_rev: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motor_settings: Option<MotorSettings>,
    #[serde(flatten, skip_serializing_if = "BTreeMap::is_empty")]
    pub user: UserTable,
}

impl AxisConfig {
    pub fn validate(&self) -> Result<(), ActorError> {
        if self.name.is_empty() {
            return Err(ActorError::ConfigInvalid("axis name is empty".to_string()));
        }
        self.parsed_ip()?;
        if !(self.units_per_rev > 0.0) || !self.units_per_rev.is_finite() {
            return Err(ActorError::ConfigInvalid(format!(
                "axis {:?} needs units_per_rev > 0, got {}",
                self.name, self.units_per_rev
            )));
        }
        Ok(())
    }

    pub fn parsed_ip(&self) -> Result<Ipv4Addr, ActorError> {
        self.ip.parse().map_err(|_| {
            ActorError::ConfigInvalid(format!(
                "axis {:?} has an invalid IPv4 address {:?}",
                self.name, self.ip
            ))
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DriveConfigRaw {
    #[serde(default)]
    name: String,
    axes: Entries<AxisConfig>,
    #[serde(flatten)]
    user: UserTable,
}

/// Configuration of a probe drive: its ordered axes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DriveConfigRaw", into = "DriveConfigRaw")]
pub struct DriveConfig {
    pub name: String,
    pub axes: Vec<AxisConfig>,
    pub user: UserTable,
}

impl TryFrom<DriveConfigRaw> for DriveConfig {
    type Error = String;

    fn try_from(raw: DriveConfigRaw) -> Result<Self, Self::Error> {
        let mut axes = raw.axes.into_vec()?;
        for (i, axis) in axes.iter_mut().enumerate() {
            if axis.name.is_empty() {
                axis.name = format!("ax{i}");
            }
        }
        Ok(Self {
            name: raw.name,
            axes,
            user: raw.user,
        })
    }
}

impl From<DriveConfig> for DriveConfigRaw {
    fn from(config: DriveConfig) -> Self {
        Self {
            name: config.name,
            axes: Entries::from_vec(config.axes),
            user: config.user,
        }
    }
}

impl DriveConfig {
    /// Structural validation: at least one axis, unique names, unique
    /// IPs, valid per-axis fields.
    pub fn validate(&self) -> Result<(), ActorError> {
        if self.axes.is_empty() {
            return Err(ActorError::ConfigInvalid(format!(
                "drive {:?} has no axes",
                self.name
            )));
        }

        for axis in &self.axes {
            axis.validate()?;
        }

        let mut ips: Vec<&str> = self.axes.iter().map(|ax| ax.ip.as_str()).collect();
        ips.sort_unstable();
        ips.dedup();
        if ips.len() != self.axes.len() {
            return Err(ActorError::ConfigInvalid(format!(
                "drive {:?} axes must have unique IPs",
                self.name
            )));
        }

        let mut names: Vec<&str> = self.axes.iter().map(|ax| ax.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.axes.len() {
            return Err(ActorError::ConfigInvalid(format!(
                "drive {:?} axes must have unique names",
                self.name
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BuilderConfigRaw {
    space: SpaceConfig,
    #[serde(default)]
    layers: Entries<LayerSpec>,
    #[serde(default)]
    exclusions: Entries<ExclusionSpec>,
    #[serde(flatten)]
    user: UserTable,
}

/// Configuration of a motion builder: the space plus its layer and
/// exclusion catalogs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BuilderConfigRaw", into = "BuilderConfigRaw")]
pub struct BuilderConfig {
    pub space: SpaceConfig,
    pub layers: Vec<LayerSpec>,
    pub exclusions: Vec<ExclusionSpec>,
    pub user: UserTable,
}

impl TryFrom<BuilderConfigRaw> for BuilderConfig {
    type Error = String;

    fn try_from(raw: BuilderConfigRaw) -> Result<Self, Self::Error> {
        Ok(Self {
            space: raw.space,
            layers: raw.layers.into_vec()?,
            exclusions: raw.exclusions.into_vec()?,
            user: raw.user,
        })
    }
}

impl From<BuilderConfig> for BuilderConfigRaw {
    fn from(config: BuilderConfig) -> Self {
        Self {
            space: config.space,
            layers: Entries::List(config.layers),
            exclusions: Entries::List(config.exclusions),
            user: config.user,
        }
    }
}

impl BuilderConfig {
    /// Builds the motion builder this configuration describes.
    pub fn build(&self) -> Result<MotionBuilder, ActorError> {
        Ok(MotionBuilder::new(
            &self.space,
            &self.layers,
            &self.exclusions,
        )?)
    }
}

/// Configuration of one motion group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionGroupConfig {
    pub name: String,
    pub drive: DriveConfig,
    pub motion_builder: BuilderConfig,
    pub transform: TransformSpec,
    #[serde(flatten, skip_serializing_if = "BTreeMap::is_empty")]
    pub user: UserTable,
}

impl MotionGroupConfig {
    /// Static validation without touching any motor: drive structure,
    /// motion-builder construction, transform construction, and
    /// cross-component dimensionality.
    pub fn validate(&self) -> Result<(), ActorError> {
        self.drive.validate()?;

        let builder = self.motion_builder.build()?;
        let naxes = self.drive.axes.len();
        if builder.ndim() != naxes {
            return Err(ActorError::ConfigInvalid(format!(
                "motion group {:?}: motion space is {}-D but the drive has {} axes",
                self.name,
                builder.ndim(),
                naxes
            )));
        }

        let units: Vec<LengthUnit> = self.drive.axes.iter().map(|ax| ax.units).collect();
        let transform = Transform::from_spec(&self.transform, naxes, Some(&units))?;
        if transform.dimensionality() >= 0 && transform.dimensionality() != naxes as isize {
            return Err(ActorError::ConfigInvalid(format!(
                "motion group {:?}: transform is {}-D but the drive has {} axes",
                self.name,
                transform.dimensionality(),
                naxes
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RunConfigRaw {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    date: Option<String>,
    #[serde(default)]
    motion_group: Entries<MotionGroupConfig>,
    #[serde(flatten)]
    user: UserTable,
}

/// The full run configuration: a named set of motion groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RunConfigRaw", into = "RunConfigRaw")]
pub struct RunConfig {
    /// Run name; defaulted by the run manager when omitted.
    pub name: Option<String>,
    /// Timestamp; autogenerated by the run manager when omitted.
    pub date: Option<String>,
    pub motion_groups: Vec<MotionGroupConfig>,
    pub user: UserTable,
}

impl TryFrom<RunConfigRaw> for RunConfig {
    type Error = String;

    fn try_from(raw: RunConfigRaw) -> Result<Self, Self::Error> {
        Ok(Self {
            name: raw.name,
            date: raw.date,
            motion_groups: raw.motion_group.into_vec()?,
            user: raw.user,
        })
    }
}

impl From<RunConfig> for RunConfigRaw {
    fn from(config: RunConfig) -> Self {
        Self {
            name: config.name,
            date: config.date,
            motion_group: Entries::from_vec(config.motion_groups),
            user: config.user,
        }
    }
}

impl RunConfig {
    /// Parses a TOML document, accepting either a bare run table or one
    /// nested under a `[run]` header.
    pub fn from_toml_str(text: &str) -> Result<Self, ActorError> {
        let value: toml::Value = toml::from_str(text)
            .map_err(|err| ActorError::ConfigInvalid(format!("TOML parse error: {err}")))?;

        let table = match value.get("run") {
            Some(inner) => inner.clone(),
            None => value,
        };

        table
            .try_into()
            .map_err(|err| ActorError::ConfigInvalid(format!("run configuration: {err}")))
    }

    /// Loads a run configuration from a TOML file.
    pub fn from_path(path: &Path) -> Result<Self, ActorError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Serializes back to a TOML document under a `[run]` header.
    pub fn to_toml_string(&self) -> Result<String, ActorError> {
        #[derive(Serialize)]
        struct Document<'a> {
            run: &'a RunConfig,
        }
        toml::to_string_pretty(&Document { run: self })
            .map_err(|err| ActorError::ConfigInvalid(format!("TOML serialize error: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
        [run]
        name = "test run"

        [run.motion_group.0]
        name = "P32 XY-drive"

        [run.motion_group.0.drive]
        name = "XY-drive"
        axes.0.name = "X"
        axes.0.ip = "192.168.6.103"
        axes.0.units = "cm"
        axes.0.units_per_rev = 0.254
        axes.1.name = "Y"
        axes.1.ip = "192.168.6.104"
        axes.1.units = "cm"
        axes.1.units_per_rev = 0.254

        [run.motion_group.0.motion_builder]
        space = [
            { label = "x", range = [-55.0, 55.0], num = 221 },
            { label = "y", range = [-55.0, 55.0], num = 221 },
        ]
        layers.0.type = "grid"
        layers.0.limits = [[0.0, 30.0], [-30.0, 30.0]]
        layers.0.steps = [11, 21]
        exclusions.0.type = "lapd_xy"
        exclusions.0.port_location = "E"
        exclusions.0.cone_full_angle = 60.0

        [run.motion_group.0.transform]
        type = "lapd_xy"
        pivot_to_center = 57.7
        pivot_to_drive = 125.0
        pivot_to_feedthru = 21.6
        probe_axis_offset = 6.0
    "#;

    #[test]
    fn example_document_parses() {
        let config = RunConfig::from_toml_str(EXAMPLE).unwrap();
        assert_eq!(config.name.as_deref(), Some("test run"));
        assert_eq!(config.motion_groups.len(), 1);

        let mg = &config.motion_groups[0];
        assert_eq!(mg.name, "P32 XY-drive");
        assert_eq!(mg.drive.axes.len(), 2);
        assert_eq!(mg.drive.axes[0].name, "X");
        assert_eq!(mg.drive.axes[1].ip, "192.168.6.104");
        assert_eq!(mg.motion_builder.layers.len(), 1);
        assert_eq!(mg.motion_builder.exclusions.len(), 1);
        mg.validate().unwrap();
    }

    #[test]
    fn unknown_keys_land_in_user_sidecar() {
        let text = format!(
            "{EXAMPLE}\n[run.motion_group.0.note_taker]\noperator = \"somebody\"\n"
        );
        let config = RunConfig::from_toml_str(&text).unwrap();
        let mg = &config.motion_groups[0];
        assert!(mg.user.contains_key("note_taker"));
    }

    #[test]
    fn duplicate_axis_ips_fail_validation() {
        let text = EXAMPLE.replace("192.168.6.104", "192.168.6.103");
        let config = RunConfig::from_toml_str(&text).unwrap();
        let err = config.motion_groups[0].validate().unwrap_err();
        assert!(matches!(err, ActorError::ConfigInvalid(_)));
    }

    #[test]
    fn dimension_mismatch_fails_validation() {
        // A 2-D motion space against a 1-axis drive.
        let text = EXAMPLE.replace(
            "axes.1.name = \"Y\"",
            "",
        );
        let text = text
            .replace("axes.1.ip = \"192.168.6.104\"", "")
            .replace("axes.1.units = \"cm\"", "")
            .replace("axes.1.units_per_rev = 0.254", "");
        let config = RunConfig::from_toml_str(&text).unwrap();
        assert!(config.motion_groups[0].validate().is_err());
    }

    #[test]
    fn missing_axis_names_are_autofilled() {
        let text = r#"
            name = "drive only"
            [motion_group.0]
            name = "mg"
            [motion_group.0.drive]
            name = "probe"
            axes.0.ip = "192.168.0.40"
            axes.0.units = "cm"
            axes.0.units_per_rev = 0.254
            [motion_group.0.motion_builder]
            space = [{ label = "x", range = [-10.0, 10.0], num = 21 }]
            [motion_group.0.transform]
            type = "identity"
        "#;
        let config = RunConfig::from_toml_str(text).unwrap();
        assert_eq!(config.motion_groups[0].drive.axes[0].name, "ax0");
        config.motion_groups[0].validate().unwrap();
    }

    #[test]
    fn round_trips_through_toml() {
        let config = RunConfig::from_toml_str(EXAMPLE).unwrap();
        let text = config.to_toml_string().unwrap();
        let reparsed = RunConfig::from_toml_str(&text).unwrap();
        assert_eq!(config, reparsed);
    }

    #[test]
    fn loads_from_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(&path, EXAMPLE).unwrap();

        let config = RunConfig::from_path(&path).unwrap();
        assert_eq!(config.name.as_deref(), Some("test run"));

        assert!(RunConfig::from_path(&dir.path().join("missing.toml")).is_err());
    }
}
