//! In-process transactional RPC seam shared by clients and the daemon.
//!
//! The daemon publishes an [`RpcService`] in a [`ServiceDirectory`] under a
//! well-known name. Clients look it up, issue synchronous calls tagged with
//! their identity, and may register a [`ResponseListener`] for pushed
//! responses. Registration hands back a [`DeathNotifier`]: the client keeps
//! it for as long as it lives, and dropping it tells the daemon that the
//! client has gone away.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};

use crate::{ClientIdentifier, Command, CommandResult, Response};

/// Receives responses pushed by the peer.
pub trait ResponseListener: Send + Sync {
    /// Handles one terminal response.
    fn on_response(&self, response: Response);
}

/// Synchronous command service published by the daemon.
pub trait RpcService: Send + Sync {
    /// Executes a command on behalf of `caller` and waits for its result.
    fn send_command(&self, caller: ClientIdentifier, command: Command) -> CommandResult;

    /// Registers `listener` for responses addressed to `caller`.
    ///
    /// The returned notifier must be kept alive by the caller; dropping it
    /// reports the caller's death.
    fn register_listener(
        &self,
        caller: ClientIdentifier,
        listener: Arc<dyn ResponseListener>,
    ) -> DeathNotifier;

    /// Removes the listener registered for `caller` and disarms its death
    /// notifier.
    fn unregister_listener(&self, caller: ClientIdentifier);
}

/// Event observed by the daemon's death watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEvent {
    /// The identified client went away without unregistering.
    Died(ClientIdentifier),
    /// The watcher should exit.
    Shutdown,
}

/// Token whose drop reports the death of the client holding it.
#[derive(Debug)]
pub struct DeathNotifier {
    client: ClientIdentifier,
    armed: Arc<AtomicBool>,
    events: Sender<PeerEvent>,
}

impl DeathNotifier {
    /// Creates a notifier reporting to `events`, together with the watch
    /// the daemon keeps to disarm it.
    #[must_use]
    pub fn new(client: ClientIdentifier, events: Sender<PeerEvent>) -> (Self, DeathWatch) {
        let armed = Arc::new(AtomicBool::new(true));
        let watch = DeathWatch {
            armed: Arc::clone(&armed),
        };
        (
            Self {
                client,
                armed,
                events,
            },
            watch,
        )
    }

    /// Identity the notifier reports on.
    #[must_use]
    pub const fn client(&self) -> ClientIdentifier {
        self.client
    }
}

impl Drop for DeathNotifier {
    fn drop(&mut self) {
        if self.armed.swap(false, Ordering::AcqRel) {
            // The watcher may already be gone during daemon shutdown.
            drop(self.events.send(PeerEvent::Died(self.client)));
        }
    }
}

/// Daemon-side handle able to disarm a [`DeathNotifier`].
#[derive(Debug)]
pub struct DeathWatch {
    armed: Arc<AtomicBool>,
}

impl DeathWatch {
    /// Stops the notifier from reporting on drop.
    pub fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
    }

    /// Returns `true` while the notifier will still report.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }
}

/// Name-indexed directory of published RPC services.
#[derive(Default)]
pub struct ServiceDirectory {
    services: Mutex<HashMap<String, Arc<dyn RpcService>>>,
}

impl ServiceDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `service` under `name`, replacing any previous entry.
    pub fn publish(&self, name: impl Into<String>, service: Arc<dyn RpcService>) {
        self.lock().insert(name.into(), service);
    }

    /// Looks up the service published under `name`.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn RpcService>> {
        self.lock().get(name).cloned()
    }

    /// Removes the service published under `name`.
    pub fn withdraw(&self, name: &str) -> Option<Arc<dyn RpcService>> {
        self.lock().remove(name)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<dyn RpcService>>> {
        self.services.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ServiceDirectory {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.lock().keys().cloned().collect();
        formatter
            .debug_struct("ServiceDirectory")
            .field("services", &names)
            .finish()
    }
}
