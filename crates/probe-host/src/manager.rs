//! The run manager: a named fleet of motion groups under a single
//! configuration document and one shared event loop.

use crate::config::{MotionGroupConfig, RunConfig};
use crate::motion_group::MotionGroup;
use crate::runloop::RunLoop;
use crate::ActorError;
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Owns the run loop and a dictionary of motion groups.
///
/// The configuration is the single source of truth: [`config`] is a
/// view computed from the live groups on demand, never duplicated
/// state.
///
/// [`config`]: RunManager::config
#[derive(Debug)]
pub struct RunManager {
    name: String,
    date: String,
    run_loop: Arc<RunLoop>,
    groups: BTreeMap<usize, MotionGroup>,
    user: crate::config::UserTable,
}

impl RunManager {
    /// Builds the manager and every configured motion group.
    ///
    /// With `build_mode`, a group that fails construction is dropped
    /// with an error log instead of aborting the run; duplicate group
    /// names and cross-group IP collisions are always dropped.
    pub fn new(config: RunConfig, build_mode: bool) -> Result<Self, ActorError> {
        let date = config
            .date
            .clone()
            .unwrap_or_else(|| Utc::now().format("%Y-%m-%d %H:%M %Z").to_string());
        let name = config.name.clone().unwrap_or_else(|| {
            let fallback = format!("run [{date}]");
            warn!("run configuration has no name, using {fallback:?}");
            fallback
        });

        let run_loop = Arc::new(RunLoop::spawn(&name)?);
        let mut manager = Self {
            name,
            date,
            run_loop,
            groups: BTreeMap::new(),
            user: config.user.clone(),
        };

        for group_config in &config.motion_groups {
            match manager.add_motion_group(group_config, build_mode) {
                Ok(key) => info!(key, group = %group_config.name, "motion group added"),
                Err(err) if build_mode => {
                    error!(group = %group_config.name, %err, "dropping motion group");
                }
                Err(err) => {
                    manager.terminate(false);
                    return Err(err);
                }
            }
        }

        Ok(manager)
    }

    /// Loads the configuration from a TOML file and builds the manager.
    pub fn from_path(path: &Path, build_mode: bool) -> Result<Self, ActorError> {
        Self::new(RunConfig::from_path(path)?, build_mode)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn date(&self) -> &str {
        &self.date
    }

    pub fn run_loop(&self) -> &Arc<RunLoop> {
        &self.run_loop
    }

    /// Number of managed motion groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Adds a motion group, enforcing name uniqueness and cross-group
    /// IP uniqueness, and returns its key.
    pub fn add_motion_group(
        &mut self,
        config: &MotionGroupConfig,
        build_mode: bool,
    ) -> Result<usize, ActorError> {
        if self.groups.values().any(|g| g.name() == config.name) {
            return Err(ActorError::ConfigInvalid(format!(
                "a motion group named {:?} already exists",
                config.name
            )));
        }

        let existing_ips: Vec<String> = self
            .groups
            .values()
            .filter_map(|g| g.drive())
            .flat_map(|d| d.axes().iter().map(|ax| ax.ip().to_string()))
            .collect();
        for axis in &config.drive.axes {
            if existing_ips.iter().any(|ip| ip == &axis.ip) {
                return Err(ActorError::ConfigInvalid(format!(
                    "axis IP {} is already used by another motion group",
                    axis.ip
                )));
            }
        }

        let group = MotionGroup::new(self.run_loop.clone(), config, build_mode)?;
        let key = self.groups.keys().next_back().map_or(0, |k| k + 1);
        self.groups.insert(key, group);
        Ok(key)
    }

    /// Removes a motion group, terminating its actors, and hands the
    /// (now idle) group back to the caller.
    pub fn remove_motion_group(&mut self, key: usize) -> Result<MotionGroup, ActorError> {
        match self.groups.remove(&key) {
            Some(group) => {
                group.terminate();
                Ok(group)
            }
            None => Err(ActorError::ConfigInvalid(format!(
                "no motion group with key {key}"
            ))),
        }
    }

    pub fn get(&self, key: usize) -> Option<&MotionGroup> {
        self.groups.get(&key)
    }

    pub fn get_mut(&mut self, key: usize) -> Option<&mut MotionGroup> {
        self.groups.get_mut(&key)
    }

    /// Looks a group up by its configured name.
    pub fn get_by_name(&self, name: &str) -> Option<&MotionGroup> {
        self.groups.values().find(|g| g.name() == name)
    }

    pub fn get_mut_by_name(&mut self, name: &str) -> Option<&mut MotionGroup> {
        self.groups.values_mut().find(|g| g.name() == name)
    }

    pub fn keys(&self) -> impl Iterator<Item = usize> + '_ {
        self.groups.keys().copied()
    }

    pub fn groups(&self) -> impl Iterator<Item = (usize, &MotionGroup)> {
        self.groups.iter().map(|(k, g)| (*k, g))
    }

    /// Dry-runs a motion-group configuration against a deep copy,
    /// without touching any motor, and reports whether it would build.
    pub fn validate_motion_group(&self, config: &MotionGroupConfig) -> bool {
        let candidate = config.clone();
        match candidate.validate() {
            Ok(()) => true,
            Err(err) => {
                warn!(group = %config.name, %err, "motion group configuration invalid");
                false
            }
        }
    }

    /// `true` if any motion group reports motion.
    pub fn is_moving(&self) -> bool {
        self.groups.values().any(|g| g.is_moving())
    }

    /// Fleet-level stop: every group's drive gets the stop command on
    /// the fast path. Never raises.
    pub fn stop_all(&self) {
        for group in self.groups.values() {
            group.stop();
        }
    }

    /// Terminates every group and drains the loop's tasks. With
    /// `delay_loop_stop` the event loop itself keeps running and the
    /// caller takes responsibility for stopping it.
    pub fn terminate(&mut self, delay_loop_stop: bool) {
        for group in self.groups.values() {
            group.terminate();
        }
        self.run_loop.terminate(delay_loop_stop);
        info!(run = %self.name, "run manager terminated");
    }

    /// The live configuration view.
    pub fn config(&self) -> RunConfig {
        RunConfig {
            name: Some(self.name.clone()),
            date: Some(self.date.clone()),
            motion_groups: self.groups.values().filter_map(|g| g.config()).collect(),
            user: self.user.clone(),
        }
    }

    /// Serializes the live configuration back to TOML.
    pub fn to_toml_string(&self) -> Result<String, ActorError> {
        self.config().to_toml_string()
    }
}

impl Drop for RunManager {
    fn drop(&mut self) {
        self.terminate(false);
    }
}
