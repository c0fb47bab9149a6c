use std::sync::{Arc, Mutex, PoisonError, Weak};

use nix::unistd::{getpid, geteuid};
use tracing::debug;

use conductor_protocol::rpc::{DeathNotifier, ResponseListener, RpcService, ServiceDirectory};
use conductor_protocol::{ClientIdentifier, Command, CommandResult};

use super::{ListenerSlot, TRANSPORT_TARGET, Transport};
use crate::error::TransportError;

/// Transport backed by an in-process [`RpcService`].
///
/// Registering a listener hands the daemon a bridge to the installed
/// listener and keeps the returned [`DeathNotifier`] for as long as the
/// transport lives. Dropping the transport therefore reports the caller as
/// gone, which triggers the same cleanup as a socket disconnect.
pub struct RpcTransport {
    service: Arc<dyn RpcService>,
    caller: ClientIdentifier,
    bridge: Arc<ListenerSlot>,
    notifier: Mutex<Option<DeathNotifier>>,
}

impl RpcTransport {
    /// Looks up `name` in `directory` and binds it to the current process.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ServiceUnavailable`] when no service is
    /// published under `name`.
    pub fn connect(directory: &ServiceDirectory, name: &str) -> Result<Self, TransportError> {
        let service = directory
            .lookup(name)
            .ok_or_else(|| TransportError::ServiceUnavailable {
                name: name.to_owned(),
            })?;
        let caller = ClientIdentifier::new(geteuid().as_raw(), getpid().as_raw());
        Ok(Self::with_identity(service, caller))
    }

    /// Binds `service` to an explicit caller identity.
    #[must_use]
    pub fn with_identity(service: Arc<dyn RpcService>, caller: ClientIdentifier) -> Self {
        Self {
            service,
            caller,
            bridge: Arc::new(ListenerSlot::default()),
            notifier: Mutex::new(None),
        }
    }

    /// Identity attached to every call.
    #[must_use]
    pub const fn caller(&self) -> ClientIdentifier {
        self.caller
    }

    /// Withdraws the listener registration without reporting a death.
    pub fn unregister(&self) {
        let notifier = self
            .notifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if notifier.is_some() {
            self.service.unregister_listener(self.caller);
            debug!(target: TRANSPORT_TARGET, caller = %self.caller, "listener unregistered");
        }
    }
}

impl Transport for RpcTransport {
    fn execute(&self, command: &Command) -> CommandResult {
        self.service.send_command(self.caller, command.clone())
    }

    fn set_listener(&self, listener: Weak<dyn ResponseListener>) {
        self.bridge.set(listener);
        let mut notifier = self.notifier.lock().unwrap_or_else(PoisonError::into_inner);
        if notifier.is_none() {
            let bridge: Arc<dyn ResponseListener> = Arc::clone(&self.bridge) as Arc<dyn ResponseListener>;
            *notifier = Some(self.service.register_listener(self.caller, bridge));
        }
    }
}

impl std::fmt::Debug for RpcTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RpcTransport")
            .field("caller", &self.caller)
            .field("listener", &self.bridge)
            .finish_non_exhaustive()
    }
}
