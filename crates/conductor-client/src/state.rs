//! Error codes tracked by handles and the rules for changing them.

use std::sync::{Mutex, PoisonError};

use conductor_protocol::{ResponseStatus, ResultStatus};

/// Client-visible state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The operation is live.
    Ok,
    /// The last call timed out. The operation may still be live.
    Timeout,
    /// The process or service terminated, possibly by a signal.
    Exit,
    /// A user ended the operation.
    ExitUser,
    /// The service does not exist.
    NotExists,
    /// The operation never started or failed for an unclassified reason.
    Unknown,
}

impl ErrorCode {
    /// Maps a synchronous result status.
    ///
    /// `Fail` and `Secure` map to [`ErrorCode::ExitUser`], which is how
    /// existing peers and callers interpret them.
    #[must_use]
    pub const fn from_result(status: ResultStatus) -> Self {
        match status {
            ResultStatus::Ok => Self::Ok,
            ResultStatus::Timeout => Self::Timeout,
            ResultStatus::Fail | ResultStatus::Secure => Self::ExitUser,
            ResultStatus::Exists => Self::Unknown,
        }
    }

    /// Maps an asynchronous response status.
    #[must_use]
    pub const fn from_response(status: ResponseStatus) -> Self {
        match status {
            ResponseStatus::Exit | ResponseStatus::Signal => Self::Exit,
            ResponseStatus::User => Self::ExitUser,
            ResponseStatus::Unknown => Self::Unknown,
        }
    }

    /// Returns `true` once no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Exit | Self::ExitUser | Self::NotExists | Self::Unknown
        )
    }
}

/// Append-only error state shared between a handle and its registry.
#[derive(Debug)]
pub(crate) struct StateCell(Mutex<ErrorCode>);

impl StateCell {
    pub(crate) const fn new(initial: ErrorCode) -> Self {
        Self(Mutex::new(initial))
    }

    pub(crate) fn get(&self) -> ErrorCode {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves to `next` unless the current state is terminal.
    pub(crate) fn advance(&self, next: ErrorCode) -> bool {
        let mut current = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if current.is_terminal() {
            return false;
        }
        *current = next;
        true
    }
}
