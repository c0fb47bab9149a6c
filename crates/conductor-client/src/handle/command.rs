use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::OwnedFd;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info};

use conductor_protocol::{Command, CommandType, Label, SubCommand};

use super::{HANDLE_TARGET, HandleLink, StreamDirection};
use crate::error::HandleError;
use crate::state::{ErrorCode, StateCell};

/// Handle for one normal command and the stream connected to it.
///
/// Dropping the last reference closes the command.
pub struct CommandHandle {
    label: Label,
    command_line: String,
    direction: StreamDirection,
    stream: Mutex<Option<File>>,
    state: StateCell,
    link: HandleLink,
}

impl CommandHandle {
    pub(crate) fn live(
        link: HandleLink,
        label: Label,
        command_line: String,
        stream: OwnedFd,
        direction: StreamDirection,
    ) -> Self {
        Self {
            label,
            command_line,
            direction,
            stream: Mutex::new(Some(File::from(stream))),
            state: StateCell::new(ErrorCode::Ok),
            link,
        }
    }

    pub(crate) const fn failed(
        link: HandleLink,
        code: ErrorCode,
        label: Label,
        command_line: String,
        direction: StreamDirection,
    ) -> Self {
        Self {
            label,
            command_line,
            direction,
            stream: Mutex::new(None),
            state: StateCell::new(code),
            link,
        }
    }

    /// Label of the command, or a zero-sub-id placeholder when it never
    /// started.
    #[must_use]
    pub const fn label(&self) -> Label {
        self.label
    }

    /// Sequence number of the command that started this operation.
    #[must_use]
    pub fn sequence(&self) -> u32 {
        self.label.sequence()
    }

    /// Command line being executed.
    #[must_use]
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Direction the stream was opened in.
    #[must_use]
    pub const fn direction(&self) -> StreamDirection {
        self.direction
    }

    /// Current error state.
    #[must_use]
    pub fn error(&self) -> ErrorCode {
        self.state.get()
    }

    /// Returns `true` while the handle owns its stream descriptor.
    #[must_use]
    pub fn has_stream(&self) -> bool {
        self.lock_stream().is_some()
    }

    /// Reads the command's output.
    ///
    /// # Errors
    ///
    /// Fails with [`HandleError::UnsupportedOperation`] on an output-only
    /// handle, with [`HandleError::Remote`] or
    /// [`HandleError::InvalidOperation`] when the error state forbids I/O,
    /// and with [`HandleError::Closed`] or [`HandleError::Io`] otherwise.
    pub fn read(&self, buffer: &mut [u8]) -> Result<usize, HandleError> {
        if self.direction != StreamDirection::In {
            return Err(HandleError::UnsupportedOperation {
                subject: self.to_string(),
                allowed: "write",
            });
        }
        self.with_stream(|mut stream| stream.read(buffer))
    }

    /// Writes to the command's input.
    ///
    /// # Errors
    ///
    /// Mirrors [`CommandHandle::read`] for input-only handles.
    pub fn write(&self, buffer: &[u8]) -> Result<usize, HandleError> {
        if self.direction != StreamDirection::Out {
            return Err(HandleError::UnsupportedOperation {
                subject: self.to_string(),
                allowed: "read",
            });
        }
        self.with_stream(|mut stream| stream.write(buffer))
    }

    /// Closes the stream and tells the peer to finish the command.
    ///
    /// Safe to call repeatedly: only the first call on a live handle does
    /// any work.
    pub fn close(&self) {
        let code = self.state.get();
        if matches!(
            code,
            ErrorCode::Exit | ErrorCode::ExitUser | ErrorCode::Unknown
        ) {
            info!(
                target: HANDLE_TARGET,
                sequence = self.sequence(),
                cmd = %self.command_line,
                error = ?code,
                "command already closed"
            );
            return;
        }

        let Some(stream) = self.lock_stream().take() else {
            return;
        };
        if let Err(error) = stream.sync_all() {
            debug!(target: HANDLE_TARGET, %error, "stream does not support sync");
        }
        drop(stream);

        let command = Command::new(CommandType::Normal, SubCommand::Close)
            .with_label(self.label)
            .with_sequence(self.sequence())
            .with_command_line(self.command_line.as_str());
        let result = self.link.execute(&command);
        self.state.advance(ErrorCode::from_result(result.status));
        if self.state.get() != ErrorCode::Ok {
            error!(
                target: HANDLE_TARGET,
                cmd = %self.command_line,
                status = ?result.status,
                "closing command failed"
            );
        }

        self.link.erase(CommandType::Normal, self.label);
    }

    pub(crate) fn record_response(&self, code: ErrorCode) {
        self.state.advance(code);
    }

    /// Runs `operation` on the stream while holding its lock, so `close`
    /// waits for an in-flight read or write.
    fn with_stream<T>(
        &self,
        operation: impl FnOnce(&File) -> io::Result<T>,
    ) -> Result<T, HandleError> {
        match self.state.get() {
            ErrorCode::Unknown => {
                return Err(HandleError::Remote {
                    subject: self.to_string(),
                    reason: "remote side may have failed to initialise",
                });
            }
            ErrorCode::Exit => {
                return Err(HandleError::Remote {
                    subject: self.to_string(),
                    reason: "exited abnormally",
                });
            }
            ErrorCode::ExitUser => {
                return Err(HandleError::InvalidOperation {
                    subject: self.to_string(),
                    reason: "exited by user",
                });
            }
            ErrorCode::Ok | ErrorCode::Timeout | ErrorCode::NotExists => {}
        }

        let guard = self.lock_stream();
        let stream = guard.as_ref().ok_or_else(|| HandleError::Closed {
            subject: self.to_string(),
        })?;
        operation(stream).map_err(|source| HandleError::Io {
            subject: self.to_string(),
            source,
        })
    }

    fn lock_stream(&self) -> MutexGuard<'_, Option<File>> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for CommandHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Display for CommandHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "command [cmd={}, sequence={}]",
            self.command_line,
            self.sequence()
        )
    }
}

impl fmt::Debug for CommandHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("CommandHandle")
            .field("label", &self.label)
            .field("command_line", &self.command_line)
            .field("direction", &self.direction)
            .field("error", &self.state.get())
            .finish_non_exhaustive()
    }
}
