//! Error types for the reader backends and their reply writers.

use std::io;

use thiserror::Error;

use conductor_protocol::{ClientIdentifier, ProtocolError};

/// Errors surfaced while binding, starting, or stopping a reader.
#[derive(Debug, Error)]
pub enum ReaderError {
    /// The endpoint could not be turned into a socket address.
    #[error("invalid socket address for {endpoint}: {source}")]
    Address {
        /// Configured endpoint.
        endpoint: String,
        /// Underlying address error.
        #[source]
        source: io::Error,
    },
    /// Binding the listening socket failed.
    #[error("failed to bind listener at {endpoint}: {source}")]
    Bind {
        /// Configured endpoint.
        endpoint: String,
        /// Underlying bind error.
        #[source]
        source: io::Error,
    },
    /// A live daemon already serves the socket path.
    #[error("existing unix socket {path} is already in use")]
    UnixInUse {
        /// Socket path.
        path: String,
    },
    /// Something other than a socket occupies the socket path.
    #[error("unix socket path {path} is not a socket")]
    UnixNotSocket {
        /// Socket path.
        path: String,
    },
    /// Inspecting the existing socket path failed.
    #[error("failed to read metadata for unix socket {path}: {source}")]
    UnixMetadata {
        /// Socket path.
        path: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Probing the existing socket failed for an unexpected reason.
    #[error("failed to connect to existing unix socket {path}: {source}")]
    UnixConnect {
        /// Socket path.
        path: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Removing a stale socket file failed.
    #[error("failed to remove stale unix socket {path}: {source}")]
    UnixCleanup {
        /// Socket path.
        path: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The listener could not be switched to non-blocking mode.
    #[error("failed to enable non-blocking listener: {source}")]
    NonBlocking {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The wake-up socket pair could not be created.
    #[error("failed to create reader wake-up channel: {source}")]
    Wake {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A background thread could not be spawned.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        /// Thread name.
        name: &'static str,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A background thread panicked.
    #[error("{name} thread panicked")]
    ThreadPanic {
        /// Thread name.
        name: &'static str,
    },
}

/// Errors raised while answering a caller.
#[derive(Debug, Error)]
pub enum WriterError {
    /// The reply could not be framed.
    #[error("failed to encode reply: {0}")]
    Encode(#[from] ProtocolError),
    /// Writing to the client connection failed.
    #[error("failed to write reply to client {client}: {source}")]
    Io {
        /// Client being answered.
        client: ClientIdentifier,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A response was pushed to a caller that registered no listener.
    #[error("client {client} has no registered response listener")]
    NoListener {
        /// Client being answered.
        client: ClientIdentifier,
    },
    /// A synchronous call was answered twice.
    #[error("call with sequence {sequence} was already answered")]
    AlreadyAnswered {
        /// Sequence number of the duplicate result.
        sequence: u32,
    },
}
