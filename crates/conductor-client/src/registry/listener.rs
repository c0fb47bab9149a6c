//! Completion notifications raised when a tracked operation ends.

use std::sync::Arc;

use conductor_protocol::{Label, ServiceState};

use crate::handle::{CommandHandle, ServiceHandle};

/// Summary of a finished service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceResponse {
    /// Service name.
    pub name: String,
    /// Label the service was tracked under.
    pub label: Label,
    /// Command line the service ran.
    pub command_line: String,
    /// Final state, always [`ServiceState::Finished`] for pushed responses.
    pub state: ServiceState,
}

/// Summary of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    /// Command line the command ran.
    pub command_line: String,
    /// Label the command was tracked under.
    pub label: Label,
}

/// Receives completion notifications from a
/// [`Registry`](super::Registry).
///
/// Callbacks run on the transport's delivery thread after the registry has
/// released its lock, so they may call back into the registry.
#[cfg_attr(test, mockall::automock)]
pub trait CompletionListener: Send + Sync {
    /// Called once when a tracked service terminates.
    fn service_finished(&self, handle: &Arc<ServiceHandle>, response: &ServiceResponse);

    /// Called once when a tracked command terminates.
    fn command_finished(&self, handle: &Arc<CommandHandle>, response: &CommandResponse);
}
