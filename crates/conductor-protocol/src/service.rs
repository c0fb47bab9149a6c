//! Service states and the info record returned by `Info` queries.

use serde::{Deserialize, Serialize};

use crate::code::WireCode;
use crate::{Label, ProtocolError};

/// Lifecycle state of a service as reported by the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "WireCode", into = "u8")]
pub enum ServiceState {
    /// Suspended by a pause request.
    Paused,
    /// Stopped on request.
    Stopped,
    /// Running normally.
    Running,
    /// Exited with a non-zero status.
    Died,
    /// Terminated by a signal.
    DiedSignal,
    /// Terminated for an unknown reason, or the state could not be read.
    DiedUnknown,
    /// Exited on its own.
    Finished,
    /// Being stopped by a user.
    FinishingUser,
    /// Stopped by a user.
    FinishedUser,
    /// Unrecognised wire value.
    Unknown,
}

impl From<u8> for ServiceState {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::Paused,
            1 => Self::Stopped,
            2 => Self::Running,
            3 => Self::Died,
            4 => Self::DiedSignal,
            5 => Self::DiedUnknown,
            6 => Self::Finished,
            7 => Self::FinishingUser,
            8 => Self::FinishedUser,
            _ => Self::Unknown,
        }
    }
}

impl From<WireCode> for ServiceState {
    fn from(code: WireCode) -> Self {
        code.narrow().map_or(Self::Unknown, Self::from)
    }
}

impl From<ServiceState> for u8 {
    fn from(value: ServiceState) -> Self {
        match value {
            ServiceState::Paused => 0,
            ServiceState::Stopped => 1,
            ServiceState::Running => 2,
            ServiceState::Died => 3,
            ServiceState::DiedSignal => 4,
            ServiceState::DiedUnknown => 5,
            ServiceState::Finished => 6,
            ServiceState::FinishingUser => 7,
            ServiceState::FinishedUser => 8,
            ServiceState::Unknown => 9,
        }
    }
}

/// Descriptor of a service carried as the `Extra` payload of a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Label the peer tracks the service under.
    pub label: Label,
    /// Registered service name.
    pub name: String,
    /// Command line the service runs.
    pub command_line: String,
    /// Current state.
    pub state: ServiceState,
}

impl ServiceInfo {
    /// Encodes the record for an extra payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Body`] if serialisation fails.
    pub fn to_extra(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes the record from an extra payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Body`] when the payload is not a service
    /// record.
    pub fn from_extra(extra: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(extra)?)
    }
}
