//! # Motion Crate
//!
//! Motion-space modelling and coordinate transforms for a networked
//! probe drive.
//!
//! Provides the core planning primitives:
//! - A physical-unit model for converting between motor steps,
//!   revolutions, and axis lengths ([`units`])
//! - A regular N-D motion space with a Boolean accessibility mask
//!   ([`space`])
//! - Point layers that generate target points ([`layers`]) and exclusion
//!   layers that carve forbidden regions out of the mask ([`exclusions`]),
//!   including the 2-D line-of-sight shadow engine
//! - The [`builder::MotionBuilder`] that composes layers and exclusions
//!   into an ordered motion list
//! - Coordinate transforms between motion space and drive space
//!   ([`transform`]), including the LaPD XY ball-valve geometry with
//!   optional probe-shaft droop correction

pub mod builder;
pub mod exclusions;
pub mod layers;
pub mod space;
pub mod transform;
pub mod units;

pub use builder::MotionBuilder;
pub use exclusions::{ExclusionLayer, ExclusionSpec};
pub use layers::{LayerSpec, PointLayer};
pub use space::{Mask, MotionSpace, SpaceDim};
pub use transform::{Direction, Transform, TransformSpec};
pub use units::{Equivalence, LengthUnit, Quantity, Unit};

use thiserror::Error;

/// Errors raised by motion-space construction, masking, and transforms.
#[derive(Debug, Error)]
pub enum MotionError {
    /// A layer, exclusion, space, or transform was configured with
    /// invalid parameters.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// A point had the wrong arity for the motion space or transform.
    #[error("dimension mismatch: expected {expected} components, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    /// Two quantities could not be related by the unit algebra.
    #[error("cannot convert {from} to {to}")]
    IncompatibleUnits { from: Unit, to: Unit },
    /// A transform denominator degenerated to zero.
    #[error("singular geometry: {0}")]
    Singular(String),
    /// The iterative droop inverse failed to converge.
    #[error("droop inverse did not converge within {0} iterations")]
    NoConvergence(usize),
}
