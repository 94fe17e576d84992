//! # Probe Host
//!
//! The actor hierarchy and run loop for a networked probe-drive motion
//! controller.
//!
//! ## Responsibilities
//!
//! * Owning one TCP session per stepper-motor controller and keeping
//!   commands on it strictly serialized ([`motor`]).
//! * Converting between motor units and physical axis units ([`axis`]).
//! * Composite multi-axis moves, stops, and position queries ([`drive`]).
//! * Binding a drive to a motion builder and coordinate transform, and
//!   walking the motion list ([`motion_group`]).
//! * Managing a fleet of motion groups under a single configuration
//!   document ([`manager`]).
//!
//! ## Concurrency
//!
//! Each [`manager::RunManager`] owns one cooperative event loop running
//! on a dedicated OS thread ([`runloop::RunLoop`]); all motor TCP I/O
//! for the manager's groups lives on that loop. Synchronous callers
//! submit work to the loop and block on a reply handle with a timeout.

pub mod axis;
pub mod config;
pub mod drive;
pub mod manager;
pub mod motion_group;
pub mod motor;
pub mod runloop;

pub use axis::Axis;
pub use config::{AxisConfig, BuilderConfig, DriveConfig, MotionGroupConfig, RunConfig};
pub use drive::Drive;
pub use manager::RunManager;
pub use motion_group::{MlTarget, MotionGroup};
pub use motor::{CommandReply, Motor, MotorSettings};
pub use runloop::{RunLoop, WorkHandle};

use std::time::Duration;
use thiserror::Error;

/// Default timeout for establishing a motor TCP connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(6);
/// Default timeout for one command's reply.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);
/// Default period of the status heartbeat.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
/// Default wait for a commanded move to report complete.
pub const MOVE_COMPLETE_TIMEOUT: Duration = Duration::from_secs(5);
/// How long terminate waits for tasks to drain.
pub const TERMINATE_DRAIN: Duration = Duration::from_secs(6);

/// Errors raised by the actor hierarchy.
#[derive(Debug, Error)]
pub enum ActorError {
    /// The configuration was structurally invalid (missing key,
    /// duplicate IP or name, inconsistent dimensionality, ...).
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),
    /// The TCP session to a motor dropped; the actor left Ready.
    #[error("connection lost to motor at {0}")]
    ConnectionLost(String),
    /// A reply or operation did not finish in time; the actor stays
    /// Ready and only the current move is abandoned.
    #[error("timed out after {0:?} waiting for {1}")]
    Timeout(Duration, String),
    /// The drive sent something the protocol layer could not accept.
    #[error(transparent)]
    Protocol(#[from] probe_proto::ProtocolError),
    /// A point had the wrong arity for the drive or motion space.
    #[error("dimension mismatch: expected {expected} components, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    /// The target lies in an excluded region of the motion space.
    #[error("target point {0:?} lies in an excluded region")]
    OutOfReach(Vec<f64>),
    /// An error bubbled up from the motion-planning layer.
    #[error(transparent)]
    Motion(#[from] motion::MotionError),
    /// The actor (or its run loop) has been terminated.
    #[error("actor terminated")]
    Terminated,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
