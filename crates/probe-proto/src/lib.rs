//! # Probe-Drive Motor Protocol
//!
//! Framing and typed command definitions for the ASCII protocol spoken by
//! the networked stepper-motor controllers that drive a probe axis.
//!
//! ## Key Components
//!
//! - **[`frame`]**: A [`MotorCodec`] implementing `tokio_util` framing for
//!   the wire format: a two-byte sequence header (`0x00 0x07`), an ASCII
//!   command body, and a carriage-return terminator. Replies arrive with
//!   the same terminator and an echo header which the codec strips.
//! - **[`commands`]**: The [`CommandTable`] mapping abstract command names
//!   (`move_to`, `get_position`, ...) to drive mnemonics together with the
//!   unit each command sends or returns, plus [`StatusFlags`] decoding of
//!   the status-request reply.
//!
//! The crate is transport-agnostic: it knows nothing about sockets or
//! actors, only about bytes and command semantics.

pub mod commands;
pub mod frame;

pub use commands::{Command, CommandSpec, CommandTable, MotorUnit, Reply, StatusFlags};
pub use frame::MotorCodec;

use thiserror::Error;

/// Common error type for the protocol crate.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The outbound command body contained non-ASCII bytes.
    #[error("command body is not ASCII: {0:?}")]
    NonAscii(String),
    /// A reply exceeded the bounded buffer without a terminator.
    #[error("reply exceeded {0} bytes without a terminator")]
    ReplyTooLong(usize),
    /// A reply could not be decoded as ASCII text.
    #[error("reply contained invalid bytes")]
    MalformedReply,
    /// The reply text did not parse as the value the command promised.
    #[error("could not parse value from reply {0:?}")]
    BadValue(String),
    /// The drive rejected the command (`?` response).
    #[error("drive rejected command: {0:?}")]
    Rejected(String),
    /// An unknown abstract command name was looked up in the table.
    #[error("unknown command name {0:?}")]
    UnknownCommand(String),
    /// Underlying transport error, surfaced through the codec.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
