//! Hand-off point between the readers and the command executor.
//!
//! Readers never execute commands themselves. Every admitted command is
//! wrapped in a [`ReaderMessage`] and posted to a [`Dispatcher`], which owns
//! it from then on and answers through the attached [`ReplyChannel`].

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use conductor_protocol::{ClientIdentifier, Command, CommandResult, CommandType, ResultStatus, SubCommand};

use crate::reader::ReplyChannel;

pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

/// Handler queue a command is posted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    /// One-shot commands and client cleanup.
    Normal,
    /// Long-running services.
    Service,
    /// Event-triggered services.
    Event,
    /// Commands whose type was not recognised.
    Unknown,
}

impl From<CommandType> for HandlerKind {
    fn from(command_type: CommandType) -> Self {
        match command_type {
            CommandType::Normal => Self::Normal,
            CommandType::Service => Self::Service,
            CommandType::Event => Self::Event,
            CommandType::Unknown => Self::Unknown,
        }
    }
}

/// Command posted to the dispatcher together with its reply path.
pub struct ReaderMessage {
    /// Queue selected from the command type.
    pub handler: HandlerKind,
    /// Decoded command.
    pub command: Command,
    /// Channel for the result and later responses. Absent for cleanup
    /// commands, which nobody waits on.
    pub reply: Option<Arc<dyn ReplyChannel>>,
    /// Identity of the caller.
    pub client: ClientIdentifier,
}

impl ReaderMessage {
    /// Wraps a command received from `client`.
    #[must_use]
    pub fn new(client: ClientIdentifier, command: Command, reply: Arc<dyn ReplyChannel>) -> Self {
        Self {
            handler: HandlerKind::from(command.command_type),
            command,
            reply: Some(reply),
            client,
        }
    }

    /// Builds the cleanup message for a client that disconnected or died.
    ///
    /// Both reader backends report lost clients through this constructor.
    #[must_use]
    pub fn disconnect(client: ClientIdentifier) -> Self {
        Self {
            handler: HandlerKind::Normal,
            command: Command::destroy_client(&client),
            reply: None,
            client,
        }
    }

    /// Returns true for the cleanup command built by [`Self::disconnect`].
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        self.command.sub_command == SubCommand::Destroy && self.reply.is_none()
    }

    /// Sends `result` to the caller, logging delivery failures.
    pub fn reply_result(&self, result: CommandResult) {
        let Some(reply) = &self.reply else {
            debug!(
                target: DISPATCH_TARGET,
                uid = self.client.uid,
                pid = self.client.pid,
                sequence = result.sequence,
                "no reply channel; dropping result"
            );
            return;
        };
        if let Err(error) = reply.send_result(result) {
            warn!(
                target: DISPATCH_TARGET,
                uid = self.client.uid,
                pid = self.client.pid,
                %error,
                "failed to deliver result"
            );
        }
    }
}

impl fmt::Debug for ReaderMessage {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ReaderMessage")
            .field("handler", &self.handler)
            .field("command", &self.command)
            .field("has_reply", &self.reply.is_some())
            .field("client", &self.client)
            .finish()
    }
}

/// Accepts ownership of admitted commands.
///
/// Implementations must be callable from any reader thread and must not
/// block for long: the socket reader posts from its only thread.
pub trait Dispatcher: Send + Sync {
    /// Takes ownership of `message`.
    fn post(&self, message: ReaderMessage);
}

/// Dispatcher used when no executor is attached.
///
/// Every command fails immediately; cleanup commands are acknowledged in
/// the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableDispatcher;

impl Dispatcher for UnavailableDispatcher {
    fn post(&self, message: ReaderMessage) {
        if message.is_disconnect() {
            debug!(
                target: DISPATCH_TARGET,
                uid = message.client.uid,
                pid = message.client.pid,
                "client released"
            );
            return;
        }
        warn!(
            target: DISPATCH_TARGET,
            handler = ?message.handler,
            sub_command = ?message.command.sub_command,
            sequence = message.command.sequence,
            uid = message.client.uid,
            pid = message.client.pid,
            "no executor attached; failing command"
        );
        let result = CommandResult::new(ResultStatus::Fail, message.command.sequence)
            .with_label(message.command.label);
        message.reply_result(result);
    }
}
