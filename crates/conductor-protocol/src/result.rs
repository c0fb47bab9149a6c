//! Synchronous replies to commands.

use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use serde::{Deserialize, Serialize};

use crate::code::WireCode;
use crate::{Label, MAX_EXTRA_LEN, ProtocolError};

/// Outcome reported by the peer for one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "WireCode", into = "u8")]
pub enum ResultStatus {
    /// The command was accepted.
    Ok,
    /// The peer did not answer in time.
    Timeout,
    /// The peer rejected the command. Also used for unrecognised codes.
    Fail,
    /// The caller failed the identity check.
    Secure,
    /// The target already exists.
    Exists,
}

impl From<u8> for ResultStatus {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::Timeout,
            3 => Self::Secure,
            4 => Self::Exists,
            _ => Self::Fail,
        }
    }
}

impl From<WireCode> for ResultStatus {
    fn from(code: WireCode) -> Self {
        code.narrow().map_or(Self::Fail, Self::from)
    }
}

impl From<ResultStatus> for u8 {
    fn from(value: ResultStatus) -> Self {
        match value {
            ResultStatus::Ok => 0,
            ResultStatus::Timeout => 1,
            ResultStatus::Fail => 2,
            ResultStatus::Secure => 3,
            ResultStatus::Exists => 4,
        }
    }
}

/// Shape of the payload attached to a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "WireCode", into = "u8")]
pub enum ResultKind {
    /// No payload. Also used for unrecognised codes.
    None,
    /// A stream descriptor passed alongside the frame.
    Fd,
    /// An opaque byte payload.
    Extra,
}

impl From<u8> for ResultKind {
    fn from(code: u8) -> Self {
        match code {
            1 => Self::Fd,
            2 => Self::Extra,
            _ => Self::None,
        }
    }
}

impl From<WireCode> for ResultKind {
    fn from(code: WireCode) -> Self {
        code.narrow().map_or(Self::None, Self::from)
    }
}

impl From<ResultKind> for u8 {
    fn from(value: ResultKind) -> Self {
        match value {
            ResultKind::None => 0,
            ResultKind::Fd => 1,
            ResultKind::Extra => 2,
        }
    }
}

/// Payload carried by a [`CommandResult`].
#[derive(Debug, Default)]
pub enum ResultPayload {
    /// Nothing attached.
    #[default]
    None,
    /// An owned stream descriptor.
    Fd(OwnedFd),
    /// An opaque byte payload, such as an encoded `ServiceInfo`.
    Extra(Vec<u8>),
}

/// Reply to one command.
#[derive(Debug)]
pub struct CommandResult {
    /// Outcome.
    pub status: ResultStatus,
    /// Sequence number of the command being answered.
    pub sequence: u32,
    /// Label the peer assigned to the operation, zero when none.
    pub label: Label,
    /// Attached payload.
    pub payload: ResultPayload,
}

impl CommandResult {
    /// Builds a payload-less result.
    #[must_use]
    pub const fn new(status: ResultStatus, sequence: u32) -> Self {
        Self {
            status,
            sequence,
            label: Label::ZERO,
            payload: ResultPayload::None,
        }
    }

    /// Sets the label.
    #[must_use]
    pub const fn with_label(mut self, label: Label) -> Self {
        self.label = label;
        self
    }

    /// Attaches a payload.
    #[must_use]
    pub fn with_payload(mut self, payload: ResultPayload) -> Self {
        self.payload = payload;
        self
    }

    /// Returns `true` when the status is [`ResultStatus::Ok`].
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self.status, ResultStatus::Ok)
    }

    /// Shape of the attached payload.
    #[must_use]
    pub const fn kind(&self) -> ResultKind {
        match self.payload {
            ResultPayload::None => ResultKind::None,
            ResultPayload::Fd(_) => ResultKind::Fd,
            ResultPayload::Extra(_) => ResultKind::Extra,
        }
    }

    /// Borrows the attached descriptor, if any.
    #[must_use]
    pub fn descriptor(&self) -> Option<BorrowedFd<'_>> {
        match &self.payload {
            ResultPayload::Fd(fd) => Some(fd.as_fd()),
            ResultPayload::None | ResultPayload::Extra(_) => None,
        }
    }

    /// Borrows the attached extra payload, if any.
    #[must_use]
    pub fn extra(&self) -> Option<&[u8]> {
        match &self.payload {
            ResultPayload::Extra(extra) => Some(extra),
            ResultPayload::None | ResultPayload::Fd(_) => None,
        }
    }

    /// Takes ownership of the attached descriptor, leaving no payload.
    pub fn take_descriptor(&mut self) -> Option<OwnedFd> {
        match std::mem::take(&mut self.payload) {
            ResultPayload::Fd(fd) => Some(fd),
            other => {
                self.payload = other;
                None
            }
        }
    }

    pub(crate) fn to_record(&self) -> ResultRecord {
        ResultRecord {
            status: self.status,
            kind: self.kind(),
            sequence: self.sequence,
            label: self.label,
            extra: self.extra().map(<[u8]>::to_vec).unwrap_or_default(),
        }
    }

    pub(crate) fn from_record(
        record: ResultRecord,
        descriptor: Option<OwnedFd>,
    ) -> Result<Self, ProtocolError> {
        let payload = match record.kind {
            ResultKind::None => ResultPayload::None,
            ResultKind::Fd => ResultPayload::Fd(descriptor.ok_or(ProtocolError::MissingDescriptor)?),
            ResultKind::Extra => {
                if record.extra.len() > MAX_EXTRA_LEN {
                    return Err(ProtocolError::ExtraTooLarge {
                        len: record.extra.len(),
                        limit: MAX_EXTRA_LEN,
                    });
                }
                ResultPayload::Extra(record.extra)
            }
        };
        Ok(Self {
            status: record.status,
            sequence: record.sequence,
            label: record.label,
            payload,
        })
    }
}

/// Body of a result frame. The descriptor itself travels out of band.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ResultRecord {
    pub(crate) status: ResultStatus,
    pub(crate) kind: ResultKind,
    #[serde(default)]
    pub(crate) sequence: u32,
    #[serde(default)]
    pub(crate) label: Label,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) extra: Vec<u8>,
}
