//! # Sim
//!
//! Simulated probe-drive motor controllers. A [`SimMotor`] listens on a
//! local TCP port, speaks the real framed ASCII protocol, and models a
//! stepper slewing toward its target at constant velocity, enough for
//! integration tests and demos to exercise the full actor stack without
//! hardware.

mod sim_motor;

pub use sim_motor::{SimMotor, SimMotorHandle, SimMotorSettings};
