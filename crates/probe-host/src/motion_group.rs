//! The motion-group actor: one drive, one motion builder, one
//! coordinate transform, moved as a unit.

use crate::config::{BuilderConfig, DriveConfig, MotionGroupConfig};
use crate::drive::Drive;
use crate::runloop::RunLoop;
use crate::ActorError;
use motion::transform::{Transform, TransformSpec};
use motion::units::LengthUnit;
use motion::MotionBuilder;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Which motion-list entry to move to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MlTarget {
    /// An explicit zero-based index.
    Index(usize),
    /// One past the last visited index (or the first, when none has
    /// been visited yet).
    Next,
    First,
    Last,
}

/// Binds a [`Drive`], a [`MotionBuilder`], and a [`Transform`] and
/// exposes motion-space-level movement.
///
/// In build mode an invalid component is replaced by `None` with an
/// error log instead of failing construction, so a configuration can
/// be assembled incrementally.
#[derive(Debug)]
pub struct MotionGroup {
    name: String,
    run_loop: Arc<RunLoop>,
    drive: Option<Drive>,
    builder: Option<MotionBuilder>,
    transform: Option<Transform>,
    ml_index: Option<usize>,
    user: crate::config::UserTable,
}

impl MotionGroup {
    /// Builds the group from its configuration. With `build_mode` a
    /// failing component is logged and left unset; otherwise the first
    /// failure aborts construction.
    pub fn new(
        run_loop: Arc<RunLoop>,
        config: &MotionGroupConfig,
        build_mode: bool,
    ) -> Result<Self, ActorError> {
        let mut group = Self {
            name: config.name.clone(),
            run_loop,
            drive: None,
            builder: None,
            transform: None,
            ml_index: None,
            user: config.user.clone(),
        };

        match Drive::new(group.run_loop.clone(), &config.drive) {
            Ok(drive) => group.drive = Some(drive),
            Err(err) if build_mode => {
                error!(group = %group.name, %err, "drive unavailable, continuing in build mode");
            }
            Err(err) => return Err(err),
        }

        match config.motion_builder.build() {
            Ok(builder) => group.builder = Some(builder),
            Err(err) if build_mode => {
                error!(group = %group.name, %err, "motion builder invalid, continuing in build mode");
            }
            Err(err) => {
                group.terminate();
                return Err(err);
            }
        }

        if let Some(drive) = &group.drive {
            let units: Vec<LengthUnit> = drive.axis_units();
            match Transform::from_spec(&config.transform, drive.naxes(), Some(&units)) {
                Ok(transform) => group.transform = Some(transform),
                Err(err) if build_mode => {
                    error!(group = %group.name, %err, "transform invalid, continuing in build mode");
                }
                Err(err) => {
                    group.terminate();
                    return Err(err.into());
                }
            }
        }

        if let Err(err) = group.check_dimensionality() {
            if !build_mode {
                group.terminate();
                return Err(err);
            }
            error!(group = %group.name, %err, "dimensionality mismatch, dropping dependents");
            group.builder = None;
            group.transform = None;
        }

        info!(group = %group.name, "motion group ready");
        Ok(group)
    }

    fn check_dimensionality(&self) -> Result<(), ActorError> {
        let Some(drive) = &self.drive else {
            return Ok(());
        };
        let naxes = drive.naxes();

        if let Some(builder) = &self.builder {
            if builder.ndim() != naxes {
                return Err(ActorError::ConfigInvalid(format!(
                    "motion group {:?}: {}-D motion space against a {}-axis drive",
                    self.name,
                    builder.ndim(),
                    naxes
                )));
            }
        }
        if let Some(transform) = &self.transform {
            if transform.dimensionality() >= 0 && transform.dimensionality() != naxes as isize {
                return Err(ActorError::ConfigInvalid(format!(
                    "motion group {:?}: {}-D transform against a {}-axis drive",
                    self.name,
                    transform.dimensionality(),
                    naxes
                )));
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn drive(&self) -> Option<&Drive> {
        self.drive.as_ref()
    }

    pub fn builder(&self) -> Option<&MotionBuilder> {
        self.builder.as_ref()
    }

    pub fn builder_mut(&mut self) -> Option<&mut MotionBuilder> {
        self.builder.as_mut()
    }

    pub fn transform(&self) -> Option<&Transform> {
        self.transform.as_ref()
    }

    /// Last motion-list index the drive was sent to.
    pub fn ml_index(&self) -> Option<usize> {
        self.ml_index
    }

    pub fn is_moving(&self) -> bool {
        self.drive.as_ref().is_some_and(|d| d.is_moving())
    }

    fn require_drive(&self) -> Result<&Drive, ActorError> {
        self.drive
            .as_ref()
            .ok_or_else(|| ActorError::ConfigInvalid(format!("motion group {:?} has no drive", self.name)))
    }

    fn require_transform(&self) -> Result<&Transform, ActorError> {
        self.transform.as_ref().ok_or_else(|| {
            ActorError::ConfigInvalid(format!("motion group {:?} has no transform", self.name))
        })
    }

    /// Moves to a motion-space point.
    ///
    /// The point is validated against the exclusion mask before any
    /// motor is commanded; a masked target raises `OutOfReach` with no
    /// side effects. With `axis`, the full-arity point is still
    /// transformed but only that axis is dispatched.
    pub fn move_to(&self, pos: &[f64], axis: Option<usize>) -> Result<(), ActorError> {
        let drive = self.require_drive()?;
        let transform = self.require_transform()?;

        if pos.len() != drive.naxes() {
            return Err(ActorError::DimensionMismatch {
                expected: drive.naxes(),
                got: pos.len(),
            });
        }

        if let Some(builder) = &self.builder {
            if builder.is_excluded(pos)? {
                return Err(ActorError::OutOfReach(pos.to_vec()));
            }
        }

        let drive_pos = transform.convert_one(pos, motion::transform::Direction::ToDrive)?;
        match axis {
            None => drive.move_to(&drive_pos, None),
            Some(index) => {
                let component =
                    *drive_pos
                        .get(index)
                        .ok_or(ActorError::DimensionMismatch {
                            expected: drive.naxes(),
                            got: index,
                        })?;
                drive.move_to(&[component], Some(index))
            }
        }
    }

    /// Moves to an entry of the motion list and records the index.
    pub fn move_to_index(&mut self, target: MlTarget) -> Result<usize, ActorError> {
        let last = self.ml_index;
        let builder = self.builder.as_mut().ok_or_else(|| {
            ActorError::ConfigInvalid("motion group has no motion builder".to_string())
        })?;
        let list = builder.motion_list()?;
        if list.is_empty() {
            return Err(ActorError::ConfigInvalid(
                "motion list is empty; add a point layer first".to_string(),
            ));
        }

        let index = match target {
            MlTarget::Index(i) => i,
            MlTarget::First => 0,
            MlTarget::Last => list.len() - 1,
            MlTarget::Next => match last {
                None => 0,
                Some(i) => i + 1,
            },
        };
        if index >= list.len() {
            return Err(ActorError::ConfigInvalid(format!(
                "motion list index {index} out of range 0..{}",
                list.len()
            )));
        }

        let pos = list[index].clone();
        self.move_to(&pos, None)?;
        self.ml_index = Some(index);
        Ok(index)
    }

    /// Current drive position expressed in motion-space coordinates.
    pub fn position(&self) -> Result<Vec<f64>, ActorError> {
        let drive = self.require_drive()?;
        let transform = self.require_transform()?;
        let drive_pos = drive.position()?;
        Ok(transform.convert_one(&drive_pos, motion::transform::Direction::ToMotionSpace)?)
    }

    /// Blocks until the drive reports its move complete.
    pub fn wait_until_stopped(&self, timeout: std::time::Duration) -> Result<(), ActorError> {
        self.require_drive()?.wait_until_stopped(timeout)
    }

    /// Immediately stops the probe drive. Not a cancellation: the
    /// group stays Ready.
    pub fn stop(&self) {
        if let Some(drive) = &self.drive {
            drive.stop(false);
        }
    }

    /// Terminates the drive's actors.
    pub fn terminate(&self) {
        if let Some(drive) = &self.drive {
            drive.terminate();
        }
    }

    /// Replaces the drive. Dependents whose dimensionality no longer
    /// matches are blanked and must be re-specified explicitly.
    pub fn replace_drive(&mut self, config: &DriveConfig) -> Result<(), ActorError> {
        if let Some(old) = self.drive.take() {
            old.terminate();
        }
        self.drive = Some(Drive::new(self.run_loop.clone(), config)?);
        self.ml_index = None;

        let naxes = self.drive.as_ref().map(|d| d.naxes()).unwrap_or(0);
        if self
            .builder
            .as_ref()
            .is_some_and(|builder| builder.ndim() != naxes)
        {
            warn!(group = %self.name, "motion builder dimensionality no longer matches, clearing");
            self.builder = None;
        }
        if self.transform.as_ref().is_some_and(|tr| {
            tr.dimensionality() >= 0 && tr.dimensionality() != naxes as isize
        }) {
            warn!(group = %self.name, "transform dimensionality no longer matches, clearing");
            self.transform = None;
        }
        Ok(())
    }

    /// Replaces the motion builder.
    pub fn replace_motion_builder(&mut self, config: &BuilderConfig) -> Result<(), ActorError> {
        let drive = self.require_drive()?;
        let builder = config.build()?;
        if builder.ndim() != drive.naxes() {
            return Err(ActorError::ConfigInvalid(format!(
                "replacement motion space is {}-D but the drive has {} axes",
                builder.ndim(),
                drive.naxes()
            )));
        }
        self.builder = Some(builder);
        self.ml_index = None;
        Ok(())
    }

    /// Replaces the transform.
    pub fn replace_transform(&mut self, spec: &TransformSpec) -> Result<(), ActorError> {
        let drive = self.require_drive()?;
        let units = drive.axis_units();
        let transform = Transform::from_spec(spec, drive.naxes(), Some(&units))?;
        self.transform = Some(transform);
        Ok(())
    }

    /// The live configuration view, regenerated from the current
    /// components.
    pub fn config(&self) -> Option<MotionGroupConfig> {
        let drive = self.drive.as_ref()?;
        let builder = self.builder.as_ref()?;
        let transform = self.transform.as_ref()?;
        Some(MotionGroupConfig {
            name: self.name.clone(),
            drive: drive.config(),
            motion_builder: BuilderConfig {
                space: builder.space_config(),
                layers: builder.layer_specs(),
                exclusions: builder.exclusion_specs(),
                user: Default::default(),
            },
            transform: transform.spec(),
            user: self.user.clone(),
        })
    }
}
