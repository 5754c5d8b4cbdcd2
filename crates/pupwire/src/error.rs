//! Errors raised while talking to a hub.
//!
//! The wire level taxonomy lives in [`pupwire_common::error`] and is
//! re-exported here.

pub use pupwire_common::error::*;

use thiserror::Error;

/// Transport and session level failures.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Connecting to the proxy server failed.
    #[error("could not connect to {addr}: {source}")]
    Connection {
        /// Address that was dialed
        addr: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
    /// Reading or writing the byte stream failed.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
    /// The device has no session to write to.
    #[error("device `{0}` is not connected")]
    NotConnected(String),
    /// The session ended while the operation was pending.
    #[error("session disconnected")]
    Disconnected,
    /// The server did not confirm the registration in time.
    #[error("device `{0}` was not confirmed by the server in time")]
    HandshakeTimeout(String),
    /// The handshake reply was not the expected registration confirmation.
    #[error("unexpected handshake reply for device `{0}`")]
    HandshakeRejected(String),
    /// A frame exceeds the configured maximum length.
    #[error("frame of {len} bytes exceeds the limit of {max} bytes")]
    FrameTooLarge {
        /// Length announced by the prefix byte
        len: usize,
        /// Configured limit
        max: usize,
    },
    /// Encoding or decoding a frame failed.
    #[error(transparent)]
    Wire(#[from] WireError),
}

impl NetworkError {
    /// True if the byte stream can no longer be read frame by frame.
    pub fn is_fatal(&self) -> bool {
        match self {
            NetworkError::Wire(wire) => wire.is_fatal(),
            _ => true,
        }
    }
}
