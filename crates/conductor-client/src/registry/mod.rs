//! Registry of outstanding commands and services.
//!
//! The registry issues operations through a [`Transport`], keeps every live
//! operation in one of two label-keyed tables and routes pushed responses
//! back to the handle that owns the label. A label leaves its table exactly
//! once: either through a response or through a local `close`/`stop`,
//! whichever reaches the table lock first.

mod defaults;
mod listener;

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tracing::{debug, error, info, warn};

use conductor_protocol::rpc::ResponseListener;
use conductor_protocol::{
    Command, CommandFlags, CommandType, InfoQuery, Label, Response, ResponseKind, ResultStatus,
    SecurityContext, SequenceGenerator, ServiceInfo, ServiceState, SubCommand,
};

use crate::handle::{CommandHandle, EraseRequest, HandleLink, ServiceHandle, StreamDirection};
use crate::state::ErrorCode;
use crate::transport::Transport;

pub use self::defaults::{
    DEFAULT_COMMAND_GID, DEFAULT_COMMAND_LABEL, DEFAULT_COMMAND_UID, DEFAULT_SERVICE_GID,
    DEFAULT_SERVICE_LABEL, DEFAULT_SERVICE_UID, RegistryDefaults,
};
pub use self::listener::{CommandResponse, CompletionListener, ServiceResponse};

#[cfg(test)]
pub(crate) use self::listener::MockCompletionListener;

const REGISTRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::registry");

/// What happened to a pushed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// The label was tracked; its handle was updated and released.
    Delivered,
    /// No tracked operation owns the label.
    Untracked,
}

struct Tables {
    commands: HashMap<Label, Arc<CommandHandle>>,
    services: HashMap<Label, Arc<ServiceHandle>>,
    erased: Receiver<EraseRequest>,
}

impl Tables {
    fn apply_erasures(&mut self) {
        let requests: Vec<EraseRequest> = self.erased.try_iter().collect();
        for request in requests {
            let removed = match request.kind {
                CommandType::Normal => self.commands.remove(&request.label).is_some(),
                CommandType::Service | CommandType::Event | CommandType::Unknown => {
                    self.services.remove(&request.label).is_some()
                }
            };
            if !removed {
                debug!(
                    target: REGISTRY_TARGET,
                    label = %request.label,
                    "label already released"
                );
            }
        }
    }
}

/// Client-side table of outstanding operations.
///
/// Build one per process with [`Registry::new`] and share the returned
/// `Arc`. Issuing calls never fail; failures are carried by the returned
/// handle's [`error`](CommandHandle::error).
pub struct Registry {
    transport: Arc<dyn Transport>,
    defaults: RegistryDefaults,
    sequences: SequenceGenerator,
    eraser: Sender<EraseRequest>,
    tables: Mutex<Tables>,
    completion: RwLock<Option<Arc<dyn CompletionListener>>>,
}

impl Registry {
    /// Creates a registry and installs it as the transport's response
    /// listener.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, defaults: RegistryDefaults) -> Arc<Self> {
        let (eraser, erased) = mpsc::channel();
        let registry = Arc::new(Self {
            transport: Arc::clone(&transport),
            defaults,
            sequences: SequenceGenerator::new(),
            eraser,
            tables: Mutex::new(Tables {
                commands: HashMap::new(),
                services: HashMap::new(),
                erased,
            }),
            completion: RwLock::new(None),
        });
        let weak = Arc::downgrade(&registry);
        let listener: std::sync::Weak<dyn ResponseListener> = weak;
        transport.set_listener(listener);
        registry
    }

    /// Installs the receiver of completion notifications.
    pub fn set_completion_listener(&self, listener: Arc<dyn CompletionListener>) {
        let mut slot = self
            .completion
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *slot = Some(listener);
    }

    /// Starts `command_line` and returns a handle to its stream.
    ///
    /// With `input` set the caller reads the command's output; otherwise
    /// the caller writes its input. `params` overrides the default
    /// security context.
    pub fn run_command(
        &self,
        command_line: &str,
        params: Option<SecurityContext>,
        input: bool,
    ) -> Arc<CommandHandle> {
        let sequence = self.sequences.next_sequence();
        let direction = StreamDirection::from_input(input);
        let command = Command::new(CommandType::Normal, SubCommand::Start)
            .with_command_line(command_line)
            .with_flags(CommandFlags::for_direction(input))
            .with_params(params.unwrap_or_else(|| self.defaults.command.clone()))
            .with_sequence(sequence);

        info!(
            target: REGISTRY_TARGET,
            cmd = command_line,
            sequence,
            input,
            "running command"
        );
        let mut result = self.transport.execute(&command);
        let code = match (result.status, result.take_descriptor()) {
            (ResultStatus::Ok, Some(stream)) => {
                let handle = Arc::new(CommandHandle::live(
                    self.link(),
                    result.label,
                    command_line.to_owned(),
                    stream,
                    direction,
                ));
                self.track_command(&handle);
                return handle;
            }
            (ResultStatus::Ok, None) => {
                warn!(
                    target: REGISTRY_TARGET,
                    cmd = command_line,
                    sequence,
                    "command started without a stream"
                );
                ErrorCode::Unknown
            }
            (status, _) => {
                error!(
                    target: REGISTRY_TARGET,
                    cmd = command_line,
                    sequence,
                    ?status,
                    "running command failed"
                );
                ErrorCode::from_result(status)
            }
        };
        Arc::new(CommandHandle::failed(
            self.link(),
            code,
            Label::new(sequence, 0),
            command_line.to_owned(),
            direction,
        ))
    }

    /// Looks up a running service by name in the service namespace.
    ///
    /// The returned handle is not tracked; use
    /// [`Registry::check_service`] to receive its completion.
    pub fn query_service(&self, name: &str) -> Arc<ServiceHandle> {
        self.query(CommandType::Service, name)
    }

    /// Looks up a running service by name in the event namespace.
    pub fn query_event_service(&self, name: &str) -> Arc<ServiceHandle> {
        self.query(CommandType::Event, name)
    }

    /// Returns a tracked handle to the service `name`, starting it with
    /// `command_line` when it is not running.
    ///
    /// Without a command line a missing service yields a
    /// [`ErrorCode::NotExists`] handle that is not tracked.
    pub fn check_service(
        &self,
        name: &str,
        command_line: Option<&str>,
        params: Option<SecurityContext>,
    ) -> Arc<ServiceHandle> {
        for namespace in [CommandType::Service, CommandType::Event] {
            let found = self.query(namespace, name);
            if found.error() == ErrorCode::Ok {
                self.track_service(&found);
                return found;
            }
        }

        let Some(command_line) = command_line else {
            info!(
                target: REGISTRY_TARGET,
                name,
                "service is not running and no command was given"
            );
            return Arc::new(ServiceHandle::failed(
                self.link(),
                ErrorCode::NotExists,
                Label::ZERO,
                name.to_owned(),
                String::new(),
            ));
        };

        let sequence = self.sequences.next_sequence();
        let command = Command::new(CommandType::Service, SubCommand::Start)
            .with_name(name)
            .with_command_line(command_line)
            .with_params(params.unwrap_or_else(|| self.defaults.service.clone()))
            .with_sequence(sequence);
        info!(
            target: REGISTRY_TARGET,
            name,
            cmd = command_line,
            sequence,
            "starting service"
        );
        let result = self.transport.execute(&command);
        if result.is_ok() {
            let handle = Arc::new(ServiceHandle::live(
                self.link(),
                result.label,
                name.to_owned(),
                command_line.to_owned(),
            ));
            self.track_service(&handle);
            return handle;
        }

        error!(
            target: REGISTRY_TARGET,
            name,
            cmd = command_line,
            sequence,
            status = ?result.status,
            "starting service failed"
        );
        Arc::new(ServiceHandle::failed(
            self.link(),
            ErrorCode::from_result(result.status),
            Label::new(sequence, 0),
            name.to_owned(),
            command_line.to_owned(),
        ))
    }

    /// Registers an event service. Returns `true` when the peer accepted it.
    pub fn add_event(
        &self,
        name: &str,
        command_line: &str,
        params: Option<SecurityContext>,
    ) -> bool {
        let command = Command::new(CommandType::Event, SubCommand::Add)
            .with_name(name)
            .with_command_line(command_line)
            .with_params(params.unwrap_or_else(|| self.defaults.event.clone()))
            .with_sequence(self.sequences.next_sequence());
        info!(target: REGISTRY_TARGET, name, cmd = command_line, "adding event");
        self.transport.execute(&command).is_ok()
    }

    /// Removes an event service, stopping it first when `stop` is set.
    /// Returns `true` when the peer accepted the request.
    pub fn delete_event(&self, name: &str, stop: bool) -> bool {
        let command = match Command::new(CommandType::Event, SubCommand::Delete)
            .with_name(name)
            .with_sequence(self.sequences.next_sequence())
            .with_extra(vec![u8::from(stop)])
        {
            Ok(command) => command,
            Err(error) => {
                error!(target: REGISTRY_TARGET, name, %error, "cannot build delete request");
                return false;
            }
        };
        info!(target: REGISTRY_TARGET, name, stop, "deleting event");
        self.transport.execute(&command).is_ok()
    }

    /// Applies a pushed response to the handle tracked under its label.
    ///
    /// The entry is removed before the completion listener runs, so the
    /// listener never observes it. Responses for labels nobody tracks are
    /// logged and ignored.
    pub fn dispatch_response(&self, response: &Response) -> ResponseOutcome {
        let code = ErrorCode::from_response(response.status);
        match response.kind {
            ResponseKind::Service => {
                let removed = self.lock_tables().services.remove(&response.label);
                let Some(handle) = removed else {
                    warn!(
                        target: REGISTRY_TARGET,
                        name = %response.name,
                        label = %response.label,
                        status = ?response.status,
                        "received status for an operation we do not track"
                    );
                    return ResponseOutcome::Untracked;
                };
                handle.record_response(code);
                let summary = ServiceResponse {
                    name: handle.name().to_owned(),
                    label: response.label,
                    command_line: handle.command_line().to_owned(),
                    state: ServiceState::Finished,
                };
                match self.completion_listener() {
                    Some(listener) => listener.service_finished(&handle, &summary),
                    None => info!(
                        target: REGISTRY_TARGET,
                        service = %handle,
                        status = ?response.status,
                        "service finished"
                    ),
                }
            }
            ResponseKind::Normal => {
                let removed = self.lock_tables().commands.remove(&response.label);
                let Some(handle) = removed else {
                    warn!(
                        target: REGISTRY_TARGET,
                        label = %response.label,
                        status = ?response.status,
                        "received status for an operation we do not track"
                    );
                    return ResponseOutcome::Untracked;
                };
                handle.record_response(code);
                let summary = CommandResponse {
                    command_line: handle.command_line().to_owned(),
                    label: response.label,
                };
                match self.completion_listener() {
                    Some(listener) => listener.command_finished(&handle, &summary),
                    None => info!(
                        target: REGISTRY_TARGET,
                        command = %handle,
                        status = ?response.status,
                        "command finished"
                    ),
                }
            }
            ResponseKind::Unknown => {
                warn!(
                    target: REGISTRY_TARGET,
                    label = %response.label,
                    "ignoring response of unknown kind"
                );
                return ResponseOutcome::Untracked;
            }
        }
        ResponseOutcome::Delivered
    }

    /// Labels of tracked commands in ascending order.
    #[must_use]
    pub fn tracked_commands(&self) -> Vec<Label> {
        let mut labels: Vec<Label> = self.lock_tables().commands.keys().copied().collect();
        labels.sort_unstable();
        labels
    }

    /// Labels of tracked services in ascending order.
    #[must_use]
    pub fn tracked_services(&self) -> Vec<Label> {
        let mut labels: Vec<Label> = self.lock_tables().services.keys().copied().collect();
        labels.sort_unstable();
        labels
    }

    /// Returns `true` while a command is tracked under `label`.
    #[must_use]
    pub fn is_tracking_command(&self, label: Label) -> bool {
        self.lock_tables().commands.contains_key(&label)
    }

    /// Returns `true` while a service is tracked under `label`.
    #[must_use]
    pub fn is_tracking_service(&self, label: Label) -> bool {
        self.lock_tables().services.contains_key(&label)
    }

    fn query(&self, namespace: CommandType, name: &str) -> Arc<ServiceHandle> {
        let sequence = self.sequences.next_sequence();
        let command = Command::new(namespace, SubCommand::Info)
            .with_name(name)
            .with_command_line(InfoQuery::ByName.as_str())
            .with_sequence(sequence);
        info!(target: REGISTRY_TARGET, name, sequence, ?namespace, "querying service");

        let result = self.transport.execute(&command);
        let code = if result.is_ok() {
            match result.extra().map(ServiceInfo::from_extra) {
                Some(Ok(info)) => {
                    return Arc::new(ServiceHandle::live(
                        self.link(),
                        info.label,
                        info.name,
                        info.command_line,
                    ));
                }
                Some(Err(error)) => {
                    warn!(target: REGISTRY_TARGET, name, %error, "malformed service record");
                    ErrorCode::Unknown
                }
                None => {
                    warn!(target: REGISTRY_TARGET, name, "query returned no service record");
                    ErrorCode::Unknown
                }
            }
        } else {
            debug!(
                target: REGISTRY_TARGET,
                name,
                status = ?result.status,
                "service query failed"
            );
            ErrorCode::from_result(result.status)
        };
        Arc::new(ServiceHandle::failed(
            self.link(),
            code,
            Label::new(sequence, 0),
            name.to_owned(),
            name.to_owned(),
        ))
    }

    fn track_command(&self, handle: &Arc<CommandHandle>) {
        let replaced = self
            .lock_tables()
            .commands
            .insert(handle.label(), Arc::clone(handle));
        if replaced.is_some() {
            warn!(target: REGISTRY_TARGET, label = %handle.label(), "label reused by the peer");
        }
    }

    fn track_service(&self, handle: &Arc<ServiceHandle>) {
        let replaced = self
            .lock_tables()
            .services
            .insert(handle.label(), Arc::clone(handle));
        if replaced.is_some() {
            warn!(target: REGISTRY_TARGET, label = %handle.label(), "label reused by the peer");
        }
    }

    fn link(&self) -> HandleLink {
        HandleLink::new(Arc::clone(&self.transport), self.eraser.clone())
    }

    fn completion_listener(&self) -> Option<Arc<dyn CompletionListener>> {
        self.completion
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn lock_tables(&self) -> MutexGuard<'_, Tables> {
        let mut tables = self.tables.lock().unwrap_or_else(|poisoned| {
            warn!(target: REGISTRY_TARGET, "registry lock poisoned; continuing");
            poisoned.into_inner()
        });
        tables.apply_erasures();
        tables
    }
}

impl ResponseListener for Registry {
    fn on_response(&self, response: Response) {
        info!(
            target: REGISTRY_TARGET,
            label = %response.label,
            kind = ?response.kind,
            status = ?response.status,
            "response received"
        );
        self.dispatch_response(&response);
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Registry")
            .field("defaults", &self.defaults)
            .field("commands", &self.tracked_commands())
            .field("services", &self.tracked_services())
            .finish_non_exhaustive()
    }
}
