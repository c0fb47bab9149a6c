//! Transports carrying commands to the daemon and responses back.
//!
//! Both backends implement [`Transport`]: a synchronous command call that
//! always produces a [`CommandResult`] (failures are folded into `Fail` or
//! `Timeout` results) plus a listener slot for pushed responses. The
//! backend is chosen once, at composition time, through
//! [`ClientTransport`].

mod rpc;
mod socket;

use std::sync::{RwLock, Weak};
use std::time::Duration;

use tracing::debug;

use conductor_config::SocketEndpoint;
use conductor_protocol::rpc::{ResponseListener, ServiceDirectory};
use conductor_protocol::{Command, CommandResult, Response};

use crate::error::TransportError;

pub use self::rpc::RpcTransport;
pub use self::socket::SocketTransport;

pub(crate) const TRANSPORT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");

/// Carries commands to the daemon.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Sends `command` and waits for its result.
    fn execute(&self, command: &Command) -> CommandResult;

    /// Installs the receiver of pushed responses.
    fn set_listener(&self, listener: Weak<dyn ResponseListener>);
}

/// Transport backend selected at composition time.
#[derive(Debug)]
pub enum ClientTransport {
    /// Framed stream socket to `conductord`.
    Socket(SocketTransport),
    /// In-process RPC service.
    Rpc(RpcTransport),
}

impl ClientTransport {
    /// Connects to the daemon's stream socket.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the connection or the reader thread
    /// cannot be established.
    pub fn connect_socket(
        endpoint: &SocketEndpoint,
        call_timeout: Duration,
    ) -> Result<Self, TransportError> {
        SocketTransport::connect(endpoint, call_timeout).map(Self::Socket)
    }

    /// Looks up the RPC service published as `name`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ServiceUnavailable`] when nothing is
    /// published under that name.
    pub fn connect_rpc(directory: &ServiceDirectory, name: &str) -> Result<Self, TransportError> {
        RpcTransport::connect(directory, name).map(Self::Rpc)
    }
}

impl Transport for ClientTransport {
    fn execute(&self, command: &Command) -> CommandResult {
        match self {
            Self::Socket(transport) => transport.execute(command),
            Self::Rpc(transport) => transport.execute(command),
        }
    }

    fn set_listener(&self, listener: Weak<dyn ResponseListener>) {
        match self {
            Self::Socket(transport) => transport.set_listener(listener),
            Self::Rpc(transport) => transport.set_listener(listener),
        }
    }
}

/// Holds the current response listener and forwards pushed responses to it.
#[derive(Default)]
pub(crate) struct ListenerSlot {
    listener: RwLock<Option<Weak<dyn ResponseListener>>>,
}

impl ListenerSlot {
    pub(crate) fn set(&self, listener: Weak<dyn ResponseListener>) {
        let mut slot = self
            .listener
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *slot = Some(listener);
    }

    fn current(&self) -> Option<std::sync::Arc<dyn ResponseListener>> {
        self.listener
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }
}

impl ResponseListener for ListenerSlot {
    fn on_response(&self, response: Response) {
        match self.current() {
            Some(listener) => listener.on_response(response),
            None => debug!(
                target: TRANSPORT_TARGET,
                label = %response.label,
                "no listener installed; dropping response"
            ),
        }
    }
}

impl std::fmt::Debug for ListenerSlot {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ListenerSlot")
            .field("installed", &self.current().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests;
