//! Transactional RPC reader backend.
//!
//! Instead of running its own socket loop, this backend publishes an
//! [`RpcService`] in a [`ServiceDirectory`]. Each call blocks the caller
//! until the dispatcher answers or the call timeout elapses. Callers that
//! register a response listener are watched for death: dropping their
//! [`DeathNotifier`] triggers the same cleanup command as a socket client
//! hanging up.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use conductor_config::Config;
use conductor_protocol::rpc::{
    DeathNotifier, DeathWatch, PeerEvent, ResponseListener, RpcService, ServiceDirectory,
};
use conductor_protocol::{ClientIdentifier, Command, CommandResult, ResultStatus};

use super::{AccessPolicy, READER_TARGET, Reader, ReaderError, RpcReplyChannel, admit};
use crate::dispatch::{Dispatcher, ReaderMessage};

/// Name the daemon publishes its RPC service under.
pub const RPC_SERVICE_NAME: &str = "conductor";

const WATCHER_THREAD: &str = "conductord-death-watch";

/// Configured but not yet published RPC reader.
pub struct RpcReader {
    name: String,
    policy: AccessPolicy,
    dispatcher: Arc<dyn Dispatcher>,
    call_timeout: Duration,
}

impl RpcReader {
    /// Creates a reader published under [`RPC_SERVICE_NAME`].
    #[must_use]
    pub fn new(policy: AccessPolicy, dispatcher: Arc<dyn Dispatcher>, call_timeout: Duration) -> Self {
        Self {
            name: String::from(RPC_SERVICE_NAME),
            policy,
            dispatcher,
            call_timeout,
        }
    }

    /// Builds a reader from the configured policy and call timeout.
    #[must_use]
    pub fn from_config(config: &Config, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self::new(AccessPolicy::from_config(config), dispatcher, config.call_timeout())
    }

    /// Publishes under `name` instead of the default.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Publishes the service in `directory` and starts the death watcher.
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError::Spawn`] when the watcher thread cannot start;
    /// nothing is published in that case.
    pub fn start_read(self, directory: Arc<ServiceDirectory>) -> Result<RpcReaderHandle, ReaderError> {
        let (events, deaths) = mpsc::channel();
        let service = Arc::new(CommandService {
            policy: self.policy,
            dispatcher: self.dispatcher,
            call_timeout: self.call_timeout,
            accepting: AtomicBool::new(true),
            events: events.clone(),
            peers: Mutex::new(HashMap::new()),
        });
        let watched = Arc::clone(&service);
        let watcher = thread::Builder::new()
            .name(String::from(WATCHER_THREAD))
            .spawn(move || watch_deaths(&watched, &deaths))
            .map_err(|source| ReaderError::Spawn {
                name: WATCHER_THREAD,
                source,
            })?;

        directory.publish(self.name.clone(), Arc::clone(&service) as Arc<dyn RpcService>);
        info!(
            target: READER_TARGET,
            service = %self.name,
            "rpc reader published"
        );
        Ok(RpcReaderHandle {
            name: self.name,
            directory,
            service,
            events,
            watcher: Some(watcher),
        })
    }
}

impl fmt::Debug for RpcReader {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RpcReader")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

/// Handle to a published RPC reader.
pub struct RpcReaderHandle {
    name: String,
    directory: Arc<ServiceDirectory>,
    service: Arc<CommandService>,
    events: Sender<PeerEvent>,
    watcher: Option<JoinHandle<()>>,
}

impl RpcReaderHandle {
    /// Name the service is published under.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.name
    }

    /// Number of callers with a registered response listener.
    #[must_use]
    pub fn registered_clients(&self) -> usize {
        self.service.lock_peers().len()
    }

    fn signal_shutdown(&self) {
        self.service.accepting.store(false, Ordering::SeqCst);
        if self.directory.withdraw(&self.name).is_none() {
            debug!(
                target: READER_TARGET,
                service = %self.name,
                "rpc service was already withdrawn"
            );
        }
        if self.events.send(PeerEvent::Shutdown).is_err() {
            debug!(
                target: READER_TARGET,
                "death watcher already gone"
            );
        }
    }
}

impl Reader for RpcReaderHandle {
    fn name(&self) -> &'static str {
        "rpc"
    }

    fn stop_read(&mut self) -> Result<(), ReaderError> {
        let Some(watcher) = self.watcher.take() else {
            return Ok(());
        };
        self.signal_shutdown();
        watcher
            .join()
            .map_err(|_| ReaderError::ThreadPanic { name: WATCHER_THREAD })?;
        info!(
            target: READER_TARGET,
            service = %self.name,
            "rpc reader stopped"
        );
        Ok(())
    }
}

impl Drop for RpcReaderHandle {
    fn drop(&mut self) {
        if self.watcher.is_some() {
            self.signal_shutdown();
        }
    }
}

impl fmt::Debug for RpcReaderHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RpcReaderHandle")
            .field("name", &self.name)
            .field("accepting", &self.service.accepting.load(Ordering::SeqCst))
            .field("running", &self.watcher.is_some())
            .finish_non_exhaustive()
    }
}

struct PeerRegistration {
    listener: Arc<dyn ResponseListener>,
    watch: DeathWatch,
}

/// Service object published in the directory.
struct CommandService {
    policy: AccessPolicy,
    dispatcher: Arc<dyn Dispatcher>,
    call_timeout: Duration,
    accepting: AtomicBool,
    events: Sender<PeerEvent>,
    peers: Mutex<HashMap<ClientIdentifier, PeerRegistration>>,
}

impl CommandService {
    fn lock_peers(&self) -> MutexGuard<'_, HashMap<ClientIdentifier, PeerRegistration>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_accepting(&self, caller: ClientIdentifier, operation: &'static str) -> bool {
        if self.accepting.load(Ordering::SeqCst) {
            return true;
        }
        info!(
            target: READER_TARGET,
            uid = caller.uid,
            pid = caller.pid,
            operation,
            "rpc reader stopped; ignoring call"
        );
        false
    }

    fn listener_for(&self, caller: ClientIdentifier) -> Option<Arc<dyn ResponseListener>> {
        self.lock_peers()
            .get(&caller)
            .map(|registration| Arc::clone(&registration.listener))
    }

    /// Drops the caller's registration and posts its cleanup command.
    fn release(&self, caller: ClientIdentifier) {
        let removed = self.lock_peers().remove(&caller);
        if let Some(registration) = removed {
            registration.watch.disarm();
        }
        self.dispatcher.post(ReaderMessage::disconnect(caller));
    }
}

impl RpcService for CommandService {
    fn send_command(&self, caller: ClientIdentifier, command: Command) -> CommandResult {
        let sequence = command.sequence;
        if !self.is_accepting(caller, "send_command") {
            return CommandResult::new(ResultStatus::Fail, sequence).with_label(command.label);
        }
        let channel = Arc::new(RpcReplyChannel::new(caller, self.listener_for(caller)));
        admit(
            &self.policy,
            self.dispatcher.as_ref(),
            caller,
            command,
            Arc::<RpcReplyChannel>::clone(&channel),
        );
        channel.wait(sequence, self.call_timeout)
    }

    fn register_listener(
        &self,
        caller: ClientIdentifier,
        listener: Arc<dyn ResponseListener>,
    ) -> DeathNotifier {
        let (notifier, watch) = DeathNotifier::new(caller, self.events.clone());
        if !self.is_accepting(caller, "register_listener") {
            watch.disarm();
            return notifier;
        }
        let previous = self
            .lock_peers()
            .insert(caller, PeerRegistration { listener, watch });
        if let Some(replaced) = previous {
            replaced.watch.disarm();
        }
        debug!(
            target: READER_TARGET,
            uid = caller.uid,
            pid = caller.pid,
            "response listener registered"
        );
        notifier
    }

    fn unregister_listener(&self, caller: ClientIdentifier) {
        if !self.is_accepting(caller, "unregister_listener") {
            return;
        }
        let removed = self.lock_peers().remove(&caller);
        match removed {
            Some(registration) => {
                registration.watch.disarm();
                debug!(
                    target: READER_TARGET,
                    uid = caller.uid,
                    pid = caller.pid,
                    "response listener unregistered"
                );
            }
            None => debug!(
                target: READER_TARGET,
                uid = caller.uid,
                pid = caller.pid,
                "no response listener to unregister"
            ),
        }
    }
}

fn watch_deaths(service: &CommandService, events: &Receiver<PeerEvent>) {
    while let Ok(PeerEvent::Died(caller)) = events.recv() {
        warn!(
            target: READER_TARGET,
            uid = caller.uid,
            pid = caller.pid,
            "rpc client died"
        );
        service.release(caller);
    }
}
