//! Client-side handles for outstanding commands and services.
//!
//! Handles are shared as `Arc` between the application and the registry.
//! When an operation ends locally (`close` or `stop`), the handle sends an
//! [`EraseRequest`] back to its registry over a channel rather than holding
//! a reference to the registry itself.

mod command;
mod service;

use std::sync::Arc;
use std::sync::mpsc::Sender;

use tracing::debug;

use conductor_protocol::{Command, CommandResult, CommandType, Label};

use crate::transport::Transport;

pub use self::command::CommandHandle;
pub use self::service::ServiceHandle;

pub(crate) const HANDLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::handle");

/// Stream direction of a normal command, seen from the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    /// The caller reads the command's output.
    In,
    /// The caller writes the command's input.
    Out,
}

impl StreamDirection {
    /// Direction for the `in` flag used by `run_command`.
    #[must_use]
    pub const fn from_input(input: bool) -> Self {
        if input { Self::In } else { Self::Out }
    }
}

/// Asks the registry to forget a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EraseRequest {
    pub(crate) kind: CommandType,
    pub(crate) label: Label,
}

/// Connection from a handle back to the transport and its registry.
#[derive(Clone)]
pub(crate) struct HandleLink {
    transport: Arc<dyn Transport>,
    eraser: Sender<EraseRequest>,
}

impl HandleLink {
    pub(crate) const fn new(transport: Arc<dyn Transport>, eraser: Sender<EraseRequest>) -> Self {
        Self { transport, eraser }
    }

    fn execute(&self, command: &Command) -> CommandResult {
        self.transport.execute(command)
    }

    fn erase(&self, kind: CommandType, label: Label) {
        if self.eraser.send(EraseRequest { kind, label }).is_err() {
            debug!(
                target: HANDLE_TARGET,
                label = %label,
                "registry dropped before the handle finished"
            );
        }
    }
}
