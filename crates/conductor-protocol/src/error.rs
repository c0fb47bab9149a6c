//! Errors raised while building, encoding, or decoding wire records.

use thiserror::Error;

/// Failures surfaced by the protocol codec.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Fewer bytes were available than a frame header occupies.
    #[error("frame header needs {required} bytes, got {available}")]
    ShortHeader {
        /// Bytes required for a header.
        required: usize,
        /// Bytes actually available.
        available: usize,
    },

    /// The header declared a length smaller than the header itself or
    /// larger than the frame limit.
    #[error("frame declares invalid length {declared} (limit {limit})")]
    InvalidLength {
        /// Length written in the header.
        declared: usize,
        /// Largest frame accepted.
        limit: usize,
    },

    /// The header declared more bytes than were received.
    #[error("frame declares {declared} bytes but only {available} were received")]
    Truncated {
        /// Length written in the header.
        declared: usize,
        /// Bytes actually available.
        available: usize,
    },

    /// The header carried an unknown frame kind.
    #[error("unknown frame kind {kind}")]
    UnknownFrameKind {
        /// Raw kind value from the header.
        kind: u16,
    },

    /// The header carried a protocol version this build does not speak.
    #[error("unsupported protocol version {version}")]
    UnsupportedVersion {
        /// Raw version value from the header.
        version: u16,
    },

    /// A frame of one kind was decoded as another.
    #[error("expected a {expected} frame, found {found}")]
    UnexpectedFrame {
        /// Kind the caller asked for.
        expected: &'static str,
        /// Kind found in the header.
        found: &'static str,
    },

    /// An extra payload exceeded [`crate::MAX_EXTRA_LEN`].
    #[error("extra payload of {len} bytes exceeds the {limit} byte limit")]
    ExtraTooLarge {
        /// Payload size.
        len: usize,
        /// Largest payload accepted.
        limit: usize,
    },

    /// A result announced a descriptor but none accompanied the frame.
    #[error("result announced a descriptor but none was received")]
    MissingDescriptor,

    /// The record body could not be serialised or deserialised.
    #[error("invalid record body: {0}")]
    Body(#[from] serde_json::Error),
}
