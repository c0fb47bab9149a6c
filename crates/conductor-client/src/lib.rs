//! Client side of the conductor broker.
//!
//! A [`Registry`] issues commands and services through a [`Transport`],
//! tracks every operation that is still outstanding under its [`Label`],
//! and routes asynchronous responses back to the matching handle.
//! Issuing calls never fail: a handle is always returned, and a failure is
//! visible through [`CommandHandle::error`] or [`ServiceHandle::error`]
//! until a later handle operation rejects it.
//!
//! Construct one registry in the application's composition root and share
//! it by `Arc`:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use conductor_client::{ClientTransport, Registry, RegistryDefaults};
//! use conductor_config::Config;
//!
//! # fn main() -> Result<(), conductor_client::TransportError> {
//! let config = Config::default();
//! let transport = ClientTransport::connect_socket(config.daemon_socket(), config.call_timeout())?;
//! let registry = Registry::new(Arc::new(transport), RegistryDefaults::default());
//! let command = registry.run_command("echo hi", None, false);
//! command.write(b"input\n").ok();
//! command.close();
//! # Ok(())
//! # }
//! ```
//!
//! [`Label`]: conductor_protocol::Label

mod error;
mod handle;
mod registry;
mod state;
mod transport;

#[cfg(test)]
mod tests;

pub use self::error::{HandleError, TransportError};
pub use self::handle::{CommandHandle, ServiceHandle, StreamDirection};
pub use self::registry::{
    CommandResponse, CompletionListener, DEFAULT_COMMAND_GID, DEFAULT_COMMAND_LABEL,
    DEFAULT_COMMAND_UID, DEFAULT_SERVICE_GID, DEFAULT_SERVICE_LABEL, DEFAULT_SERVICE_UID,
    Registry, RegistryDefaults, ResponseOutcome, ServiceResponse,
};
pub use self::state::ErrorCode;
pub use self::transport::{ClientTransport, RpcTransport, SocketTransport, Transport};
