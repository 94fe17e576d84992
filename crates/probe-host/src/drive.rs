//! The drive actor: an ordered collection of axes moved as one probe
//! drive.
//!
//! The drive knows nothing about how its axes sit in physical space
//! (that is the transform's business), but it owns the axis ordering,
//! validates axis uniqueness, and dispatches composite moves
//! concurrently across axes.

use crate::axis::Axis;
use crate::config::DriveConfig;
use crate::motor::CommandReply;
use crate::runloop::RunLoop;
use crate::{ActorError, REPLY_TIMEOUT};
use futures::future::join_all;
use motion::units::{LengthUnit, Quantity};
use std::sync::Arc;
use tracing::info;

/// An ordered tuple of axes forming one probe drive.
#[derive(Debug)]
pub struct Drive {
    name: String,
    axes: Vec<Axis>,
    run_loop: Arc<RunLoop>,
}

impl Drive {
    /// Validates the configuration and spawns every axis on the shared
    /// run loop. If any axis fails to come up, the ones already spawned
    /// are terminated and the error propagates.
    pub fn new(run_loop: Arc<RunLoop>, config: &DriveConfig) -> Result<Self, ActorError> {
        config.validate()?;

        let mut axes = Vec::with_capacity(config.axes.len());
        for axis_config in &config.axes {
            match Axis::new(run_loop.clone(), axis_config) {
                Ok(axis) => axes.push(axis),
                Err(err) => {
                    for axis in &axes {
                        axis.terminate();
                    }
                    return Err(err);
                }
            }
        }

        info!(drive = %config.name, naxes = axes.len(), "drive ready");
        Ok(Self {
            name: config.name.clone(),
            axes,
            run_loop,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of axes in the drive.
    pub fn naxes(&self) -> usize {
        self.axes.len()
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    /// Axis names, in drive order.
    pub fn axis_names(&self) -> Vec<&str> {
        self.axes.iter().map(|ax| ax.name()).collect()
    }

    /// The length unit of each axis, in drive order.
    pub fn axis_units(&self) -> Vec<LengthUnit> {
        self.axes.iter().map(|ax| ax.units()).collect()
    }

    /// Selects an axis by name.
    pub fn sel(&self, name: &str) -> Option<&Axis> {
        self.axes.iter().find(|ax| ax.name() == name)
    }

    /// `true` if any axis is moving.
    pub fn is_moving(&self) -> bool {
        self.axes.iter().any(|ax| ax.is_moving())
    }

    pub fn connected(&self) -> bool {
        self.axes.iter().all(|ax| ax.connected())
    }

    /// Current position of every axis, in its own units.
    pub fn position(&self) -> Result<Vec<f64>, ActorError> {
        self.axes
            .iter()
            .map(|ax| ax.position().map(|q| q.value))
            .collect()
    }

    /// Moves the drive.
    ///
    /// Without `axis`, `pos` must have one component per axis and every
    /// component is dispatched to its axis concurrently; there is no
    /// cross-axis ordering guarantee. With `axis`, `pos` must hold a
    /// single component and only that axis moves.
    pub fn move_to(&self, pos: &[f64], axis: Option<usize>) -> Result<(), ActorError> {
        match axis {
            None => {
                if pos.len() != self.axes.len() {
                    return Err(ActorError::DimensionMismatch {
                        expected: self.axes.len(),
                        got: pos.len(),
                    });
                }

                let futures = self
                    .axes
                    .iter()
                    .zip(pos.iter())
                    .map(|(ax, &target)| ax.move_to_future(target))
                    .collect::<Result<Vec<_>, _>>()?;

                let results = self
                    .run_loop
                    .submit("drive move_to", join_all(futures))
                    .result(Some(3 * REPLY_TIMEOUT))?;
                for result in results {
                    result?;
                }
                Ok(())
            }
            Some(index) => {
                let ax = self.axes.get(index).ok_or(ActorError::DimensionMismatch {
                    expected: self.axes.len(),
                    got: index,
                })?;
                if pos.len() != 1 {
                    return Err(ActorError::DimensionMismatch {
                        expected: 1,
                        got: pos.len(),
                    });
                }
                ax.move_to(Quantity::new(
                    pos[0],
                    motion::units::Unit::Length(ax.units()),
                ))
            }
        }
    }

    /// Broadcasts a named command to all axes (each argument matched to
    /// its axis), or to one axis when `axis` is given.
    pub fn send_command(
        &self,
        name: &str,
        args: &[Quantity],
        axis: Option<usize>,
    ) -> Result<Vec<CommandReply>, ActorError> {
        match axis {
            Some(index) => {
                let ax = self.axes.get(index).ok_or(ActorError::DimensionMismatch {
                    expected: self.axes.len(),
                    got: index,
                })?;
                Ok(vec![ax.send_command(name, args.first().copied())?])
            }
            None => self
                .axes
                .iter()
                .enumerate()
                .map(|(i, ax)| ax.send_command(name, args.get(i).copied()))
                .collect(),
        }
    }

    /// Blocks until no axis reports motion, or the timeout elapses.
    ///
    /// Motion state comes from the per-motor heartbeat cache, so the
    /// resolution is the heartbeat period.
    pub fn wait_until_stopped(&self, timeout: std::time::Duration) -> Result<(), ActorError> {
        let deadline = std::time::Instant::now() + timeout;
        while self.is_moving() {
            if std::time::Instant::now() >= deadline {
                return Err(ActorError::Timeout(
                    timeout,
                    format!("drive {:?} to finish moving", self.name),
                ));
            }
            std::thread::sleep(std::time::Duration::from_millis(100));
        }
        Ok(())
    }

    /// Stops every axis via the fast path. Never raises.
    pub fn stop(&self, soft: bool) {
        for ax in &self.axes {
            ax.stop(soft);
        }
    }

    /// Terminates every axis.
    pub fn terminate(&self) {
        for ax in &self.axes {
            ax.terminate();
        }
    }

    /// Restarts every terminated axis.
    pub fn run(&self) -> Result<(), ActorError> {
        for ax in &self.axes {
            ax.run()?;
        }
        Ok(())
    }

    /// The live configuration view of this drive.
    pub fn config(&self) -> DriveConfig {
        DriveConfig {
            name: self.name.clone(),
            axes: self.axes.iter().map(|ax| ax.config()).collect(),
            user: Default::default(),
        }
    }
}
