//! Scripted peer and world state shared by the behaviour steps.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::pipe;
use std::os::fd::OwnedFd;
use std::sync::{Arc, Mutex, Weak};

use rstest::fixture;

use conductor_protocol::rpc::ResponseListener;
use conductor_protocol::{
    Command, CommandFlags, CommandResult, CommandType, Label, Response, ResponseKind, ResponseStatus,
    ResultPayload, ResultStatus, ServiceInfo, ServiceState, SubCommand,
};

use crate::{
    CommandHandle, CommandResponse, CompletionListener, Registry, RegistryDefaults, ServiceHandle,
    ServiceResponse, Transport,
};

/// Peer that answers commands from a table of running services.
#[derive(Default)]
pub(super) struct ScriptedPeer {
    services: Mutex<HashMap<String, ServiceInfo>>,
    sent: Mutex<Vec<Command>>,
    streams: Mutex<Vec<OwnedFd>>,
    listener: Mutex<Option<Weak<dyn ResponseListener>>>,
}

impl ScriptedPeer {
    pub(super) fn run_service(&self, name: &str, label: Label) {
        let info = ServiceInfo {
            label,
            name: name.to_owned(),
            command_line: format!("/usr/bin/{name}"),
            state: ServiceState::Running,
        };
        self.services
            .lock()
            .expect("services lock")
            .insert(name.to_owned(), info);
    }

    pub(super) fn push(&self, response: Response) {
        let listener = self
            .listener
            .lock()
            .expect("listener lock")
            .as_ref()
            .and_then(Weak::upgrade)
            .expect("registry listening");
        listener.on_response(response);
    }

    pub(super) fn sent(&self) -> Vec<Command> {
        self.sent.lock().expect("sent lock").clone()
    }

    fn start_command(&self, command: &Command) -> CommandResult {
        let (reader, writer) = pipe().expect("create pipe");
        let (ours, theirs) = if command.flags.contains(CommandFlags::IN) {
            (OwnedFd::from(writer), OwnedFd::from(reader))
        } else {
            (OwnedFd::from(reader), OwnedFd::from(writer))
        };
        self.streams.lock().expect("streams lock").push(ours);
        CommandResult::new(ResultStatus::Ok, command.sequence)
            .with_label(Label::new(command.sequence, 7))
            .with_payload(ResultPayload::Fd(theirs))
    }

    fn describe(&self, command: &Command) -> CommandResult {
        let services = self.services.lock().expect("services lock");
        match services.get(&command.name) {
            Some(info) if command.command_type == CommandType::Service => {
                CommandResult::new(ResultStatus::Ok, command.sequence).with_payload(
                    ResultPayload::Extra(info.to_extra().expect("encode service info")),
                )
            }
            _ => CommandResult::new(ResultStatus::Fail, command.sequence),
        }
    }
}

impl Transport for ScriptedPeer {
    fn execute(&self, command: &Command) -> CommandResult {
        self.sent.lock().expect("sent lock").push(command.clone());
        match (command.command_type, command.sub_command) {
            (CommandType::Normal, SubCommand::Start) => self.start_command(command),
            (_, SubCommand::Info) => self.describe(command),
            _ => CommandResult::new(ResultStatus::Ok, command.sequence).with_label(command.label),
        }
    }

    fn set_listener(&self, listener: Weak<dyn ResponseListener>) {
        *self.listener.lock().expect("listener lock") = Some(listener);
    }
}

/// Records completion notifications.
#[derive(Default)]
pub(super) struct RecordedCompletions {
    pub(super) services: Mutex<Vec<ServiceResponse>>,
    pub(super) commands: Mutex<Vec<CommandResponse>>,
}

impl CompletionListener for RecordedCompletions {
    fn service_finished(&self, _handle: &Arc<ServiceHandle>, response: &ServiceResponse) {
        self.services
            .lock()
            .expect("services lock")
            .push(response.clone());
    }

    fn command_finished(&self, _handle: &Arc<CommandHandle>, response: &CommandResponse) {
        self.commands
            .lock()
            .expect("commands lock")
            .push(response.clone());
    }
}

pub(super) struct TestWorld {
    pub(super) peer: Arc<ScriptedPeer>,
    pub(super) registry: Arc<Registry>,
    pub(super) completions: Arc<RecordedCompletions>,
    pub(super) command: Option<Arc<CommandHandle>>,
    pub(super) service: Option<Arc<ServiceHandle>>,
}

impl TestWorld {
    fn new() -> Self {
        let peer = Arc::new(ScriptedPeer::default());
        let registry = Registry::new(
            Arc::clone(&peer) as Arc<dyn Transport>,
            RegistryDefaults::default(),
        );
        let completions = Arc::new(RecordedCompletions::default());
        registry.set_completion_listener(Arc::clone(&completions) as Arc<dyn CompletionListener>);
        Self {
            peer,
            registry,
            completions,
            command: None,
            service: None,
        }
    }

    pub(super) fn command(&self) -> &Arc<CommandHandle> {
        self.command.as_ref().expect("command issued")
    }

    pub(super) fn service(&self) -> &Arc<ServiceHandle> {
        self.service.as_ref().expect("service checked")
    }

    pub(super) fn report_service_exit(&self) {
        let service = self.service();
        self.peer.push(Response::new(
            ResponseKind::Service,
            service.label(),
            ResponseStatus::Exit,
            service.name(),
        ));
    }
}

#[fixture]
pub(super) fn world() -> RefCell<TestWorld> {
    RefCell::new(TestWorld::new())
}
