//! Error types for meshwork-protocols.

use thiserror::Error;

/// Result type for meshwork-protocols operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised at the byte boundary.
#[derive(Debug, Error)]
pub enum Error {
    /// The envelope could not be serialized.
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] bincode::Error),

    /// The frame body is not a valid envelope.
    #[error("failed to decode envelope: {0}")]
    Decode(#[source] bincode::Error),

    /// The frame was written by an incompatible protocol version.
    #[error("unsupported protocol version {found} (expected {expected})")]
    UnsupportedVersion { found: u8, expected: u8 },

    /// The frame exceeds the configured size limit.
    #[error("frame of {len} bytes exceeds limit of {max}")]
    Oversized { len: usize, max: usize },

    /// Fewer bytes than the frame header announces.
    #[error("truncated frame: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    /// Bytes left over after a complete frame.
    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),
}
