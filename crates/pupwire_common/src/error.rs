//! Error taxonomy for the wire layer.
//!
//! Framing and decoding failures are kept apart: a [`FramingError`] means the
//! byte stream can no longer be trusted, a [`DecodeError`] only poisons the
//! single frame it was raised for.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ErrorCode, Port};

/// The declared frame length disagrees with the bytes that were delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FramingError {
    /// The length byte does not match the buffer size.
    #[error("declared frame length {declared} does not match buffer length {actual}")]
    LengthMismatch {
        /// Value of the frame's first byte
        declared: usize,
        /// Number of bytes actually handed to the decoder
        actual: usize,
    },
    /// Fewer bytes than a common header were available.
    #[error("frame truncated after {0} bytes")]
    Truncated(usize),
}

/// A well-framed buffer whose content could not be classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The message-type byte is not part of the protocol.
    #[error("unknown message type 0x{0:02x}")]
    UnknownMessageType(u8),
    /// The sub-command of a port output or virtual port frame is unknown.
    #[error("unknown sub-command 0x{sub_command:02x} for message type 0x{message_type:02x}")]
    UnknownSubCommand {
        /// Message type the sub-command was found in
        message_type: u8,
        /// The offending sub-command byte
        sub_command: u8,
    },
    /// An enumerated field carried a value outside its mapping.
    #[error("invalid value 0x{value:02x} for field `{field}`")]
    UnknownValue {
        /// Name of the field
        field: &'static str,
        /// The offending byte
        value: u8,
    },
    /// The payload size does not fit the message type.
    #[error("malformed payload of {len} bytes for message type 0x{message_type:02x}")]
    Malformed {
        /// Message type of the frame
        message_type: u8,
        /// Total frame length
        len: usize,
    },
}

/// A command that cannot be put on the wire as given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// A motion parameter is outside the range the hub accepts.
    #[error("`{field}` = {value} is outside {min}..={max}")]
    OutOfRange {
        /// Name of the parameter
        field: &'static str,
        /// Rejected value
        value: i64,
        /// Smallest accepted value
        min: i64,
        /// Largest accepted value
        max: i64,
    },
    /// The encoded frame would not fit a one byte length.
    #[error("encoded frame of {0} bytes exceeds the maximum frame length")]
    Oversized(usize),
}

/// Any failure of the wire codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WireError {
    /// See [`FramingError`]
    #[error(transparent)]
    Framing(#[from] FramingError),
    /// See [`DecodeError`]
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// See [`EncodeError`]
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

impl WireError {
    /// True if the stream this error came from is desynchronized.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WireError::Framing(_))
    }
}

/// A problem reported by the hub itself.
///
/// These are recorded on the device for inspection and never interrupt
/// control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum ProtocolError {
    /// The hub dropped the command running on `port`.
    #[error("command on {port} was discarded by the hub")]
    Discarded {
        /// Port the feedback was reported for
        port: Port,
    },
    /// A generic error notification.
    #[error("hub rejected command type 0x{command_type:02x}: {code:?}")]
    Rejected {
        /// Message type of the command that failed
        command_type: u8,
        /// Return code sent by the hub
        code: ErrorCode,
    },
}
