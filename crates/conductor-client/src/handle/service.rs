use std::fmt;

use tracing::{error, warn};

use conductor_protocol::{
    Command, CommandType, InfoQuery, Label, ServiceInfo, ServiceState, SubCommand,
};

use super::{HANDLE_TARGET, HandleLink};
use crate::error::HandleError;
use crate::state::{ErrorCode, StateCell};

/// Handle for one long-running service.
pub struct ServiceHandle {
    label: Label,
    name: String,
    command_line: String,
    state: StateCell,
    link: HandleLink,
}

impl ServiceHandle {
    pub(crate) const fn live(link: HandleLink, label: Label, name: String, command_line: String) -> Self {
        Self {
            label,
            name,
            command_line,
            state: StateCell::new(ErrorCode::Ok),
            link,
        }
    }

    pub(crate) const fn failed(
        link: HandleLink,
        code: ErrorCode,
        label: Label,
        name: String,
        command_line: String,
    ) -> Self {
        Self {
            label,
            name,
            command_line,
            state: StateCell::new(code),
            link,
        }
    }

    /// Label the peer tracks the service under, zero when it never started.
    #[must_use]
    pub const fn label(&self) -> Label {
        self.label
    }

    /// Sequence number of the command that started the service.
    #[must_use]
    pub fn sequence(&self) -> u32 {
        self.label.sequence()
    }

    /// Registered service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Command line the service runs.
    #[must_use]
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Current error state.
    #[must_use]
    pub fn error(&self) -> ErrorCode {
        self.state.get()
    }

    /// Stops the service and stops tracking it.
    ///
    /// Returns `Ok(true)` when the peer accepted the request and `Ok(false)`
    /// when it refused or the service never started.
    ///
    /// # Errors
    ///
    /// Fails with [`HandleError::Remote`] when the service does not exist
    /// or exited abnormally, and with [`HandleError::InvalidOperation`]
    /// when a user already stopped it.
    pub fn stop(&self) -> Result<bool, HandleError> {
        self.control(SubCommand::Stop)
    }

    /// Pauses the service.
    ///
    /// # Errors
    ///
    /// As for [`ServiceHandle::stop`].
    pub fn pause(&self) -> Result<bool, HandleError> {
        self.control(SubCommand::Pause)
    }

    /// Restarts the service.
    ///
    /// # Errors
    ///
    /// As for [`ServiceHandle::stop`].
    pub fn restart(&self) -> Result<bool, HandleError> {
        self.control(SubCommand::Restart)
    }

    /// Queries the service's current state from the peer.
    ///
    /// Any failed query yields [`ServiceState::DiedUnknown`].
    ///
    /// # Errors
    ///
    /// Fails with [`HandleError::Remote`] when the service exited abnormally
    /// and with [`HandleError::InvalidOperation`] when a user stopped it.
    pub fn state(&self) -> Result<ServiceState, HandleError> {
        self.ensure_not_exited()?;

        let command = Command::new(CommandType::Service, SubCommand::Info)
            .with_label(self.label)
            .with_sequence(self.sequence())
            .with_command_line(InfoQuery::ByLabel.as_str());
        let result = self.link.execute(&command);
        self.state.advance(ErrorCode::from_result(result.status));

        if !result.is_ok() {
            return Ok(ServiceState::DiedUnknown);
        }
        let decoded = result
            .extra()
            .map(ServiceInfo::from_extra)
            .transpose();
        match decoded {
            Ok(Some(info)) => Ok(info.state),
            Ok(None) => {
                warn!(target: HANDLE_TARGET, service = %self, "state query returned no record");
                Ok(ServiceState::DiedUnknown)
            }
            Err(error) => {
                warn!(target: HANDLE_TARGET, service = %self, %error, "state query returned a malformed record");
                Ok(ServiceState::DiedUnknown)
            }
        }
    }

    pub(crate) fn record_response(&self, code: ErrorCode) {
        self.state.advance(code);
    }

    fn control(&self, sub_command: SubCommand) -> Result<bool, HandleError> {
        if matches!(self.state.get(), ErrorCode::Unknown | ErrorCode::NotExists) {
            return Err(HandleError::Remote {
                subject: self.to_string(),
                reason: "does not exist or was never initialised",
            });
        }
        self.ensure_not_exited()?;

        if self.label.is_zero() {
            error!(target: HANDLE_TARGET, service = %self, "service does not exist");
            return Ok(false);
        }

        let command = Command::new(CommandType::Service, sub_command)
            .with_label(self.label)
            .with_sequence(self.sequence());
        let result = self.link.execute(&command);
        self.state.advance(ErrorCode::from_result(result.status));

        if sub_command == SubCommand::Stop {
            self.link.erase(CommandType::Service, self.label);
        }
        Ok(result.is_ok())
    }

    fn ensure_not_exited(&self) -> Result<(), HandleError> {
        match self.state.get() {
            ErrorCode::Exit => Err(HandleError::Remote {
                subject: self.to_string(),
                reason: "exited abnormally",
            }),
            ErrorCode::ExitUser => Err(HandleError::InvalidOperation {
                subject: self.to_string(),
                reason: "exited by user",
            }),
            ErrorCode::Ok | ErrorCode::Timeout | ErrorCode::NotExists | ErrorCode::Unknown => {
                Ok(())
            }
        }
    }
}

impl fmt::Display for ServiceHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "service [name={}, command={}, sequence={}]",
            self.name,
            self.command_line,
            self.sequence()
        )
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ServiceHandle")
            .field("label", &self.label)
            .field("name", &self.name)
            .field("command_line", &self.command_line)
            .field("error", &self.state.get())
            .finish_non_exhaustive()
    }
}
