//! Error types surfaced by handles and transports.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use conductor_protocol::ProtocolError;

/// Failures raised by handle operations.
///
/// The first three variants let callers branch on the cause: the operation
/// does not fit the handle, the remote side failed, or a user already
/// ended the operation.
#[derive(Debug, Error)]
pub enum HandleError {
    /// The handle was created for the other stream direction.
    #[error("{subject}: only {allowed} is supported")]
    UnsupportedOperation {
        /// Handle description.
        subject: String,
        /// Operation the handle supports.
        allowed: &'static str,
    },

    /// The remote side failed to start or exited abnormally.
    #[error("{subject}: {reason}")]
    Remote {
        /// Handle description.
        subject: String,
        /// Failure description.
        reason: &'static str,
    },

    /// The operation was already ended by a user.
    #[error("{subject}: {reason}")]
    InvalidOperation {
        /// Handle description.
        subject: String,
        /// Failure description.
        reason: &'static str,
    },

    /// The handle no longer owns a stream descriptor.
    #[error("{subject}: stream is closed")]
    Closed {
        /// Handle description.
        subject: String,
    },

    /// Descriptor I/O failed.
    #[error("{subject}: stream I/O failed: {source}")]
    Io {
        /// Handle description.
        subject: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

/// Failures raised while establishing or running a transport.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Resolving or connecting to the daemon endpoint failed.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        /// Endpoint description.
        endpoint: String,
        /// Underlying error.
        #[source]
        source: Arc<io::Error>,
    },

    /// No RPC service is published under the requested name.
    #[error("no RPC service is published as '{name}'")]
    ServiceUnavailable {
        /// Requested service name.
        name: String,
    },

    /// Writing a frame failed.
    #[error("failed to send command: {source}")]
    Send {
        /// Underlying error.
        #[source]
        source: Arc<io::Error>,
    },

    /// A record could not be encoded or decoded.
    #[error("protocol error: {source}")]
    Protocol {
        /// Underlying error.
        #[source]
        source: Arc<ProtocolError>,
    },

    /// The background reader thread could not be started.
    #[error("failed to spawn transport reader: {source}")]
    SpawnReader {
        /// Underlying error.
        #[source]
        source: Arc<io::Error>,
    },
}

impl From<ProtocolError> for TransportError {
    fn from(source: ProtocolError) -> Self {
        Self::Protocol {
            source: Arc::new(source),
        }
    }
}
