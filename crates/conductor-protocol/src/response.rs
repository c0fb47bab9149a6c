//! Asynchronous terminal notifications pushed by the peer.

use serde::{Deserialize, Serialize};

use crate::code::WireCode;
use crate::Label;

/// Which client table a response refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "WireCode", into = "u8")]
pub enum ResponseKind {
    /// A service started through the service or event namespace.
    Service,
    /// A normal command.
    Normal,
    /// Unrecognised wire value.
    Unknown,
}

impl From<u8> for ResponseKind {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::Service,
            1 => Self::Normal,
            _ => Self::Unknown,
        }
    }
}

impl From<WireCode> for ResponseKind {
    fn from(code: WireCode) -> Self {
        code.narrow().map_or(Self::Unknown, Self::from)
    }
}

impl From<ResponseKind> for u8 {
    fn from(value: ResponseKind) -> Self {
        match value {
            ResponseKind::Service => 0,
            ResponseKind::Normal => 1,
            ResponseKind::Unknown => Self::MAX,
        }
    }
}

/// How the tracked operation terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "WireCode", into = "u8")]
pub enum ResponseStatus {
    /// The process exited.
    Exit,
    /// The process was killed by a signal.
    Signal,
    /// A user terminated the operation.
    User,
    /// Unrecognised wire value.
    Unknown,
}

impl From<u8> for ResponseStatus {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::Exit,
            1 => Self::Signal,
            2 => Self::User,
            _ => Self::Unknown,
        }
    }
}

impl From<WireCode> for ResponseStatus {
    fn from(code: WireCode) -> Self {
        code.narrow().map_or(Self::Unknown, Self::from)
    }
}

impl From<ResponseStatus> for u8 {
    fn from(value: ResponseStatus) -> Self {
        match value {
            ResponseStatus::Exit => 0,
            ResponseStatus::Signal => 1,
            ResponseStatus::User => 2,
            ResponseStatus::Unknown => Self::MAX,
        }
    }
}

/// Terminal notification for one label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Table the label belongs to.
    #[serde(rename = "type")]
    pub kind: ResponseKind,
    /// Label of the finished operation.
    pub label: Label,
    /// Termination cause.
    pub status: ResponseStatus,
    /// Service name, empty for normal commands.
    #[serde(default)]
    pub name: String,
}

impl Response {
    /// Builds a response.
    #[must_use]
    pub fn new(
        kind: ResponseKind,
        label: Label,
        status: ResponseStatus,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            label,
            status,
            name: name.into(),
        }
    }
}
