//! Wire model shared by the conductor daemon and its clients.
//!
//! Clients ask a privileged peer to start, stop, pause, or restart commands
//! and long-running services. Every request travels as a [`Command`] record,
//! is answered synchronously with a [`CommandResult`], and may later be
//! followed by an asynchronous [`Response`] announcing that the operation
//! finished. The three records are correlated through a [`Label`]: a 64-bit
//! key packing the issuing sequence number with a sub-identifier chosen by
//! the peer.
//!
//! Records travel inside length-prefixed frames (see [`frame`]). The frame
//! header is fixed-size; the body is a JSON document, so individual fields
//! can evolve without breaking the framing. Every enumeration decodes
//! unrecognised wire values into a safe fallback instead of failing the
//! whole record.

mod code;
mod command;
mod error;
pub mod frame;
mod identity;
mod label;
mod response;
mod result;
pub mod rpc;
mod service;

pub use self::command::{Command, CommandFlags, CommandType, InfoQuery, SecurityContext, SubCommand};
pub use self::error::ProtocolError;
pub use self::frame::{Frame, FrameDecoder, FrameHeader, FrameKind};
pub use self::identity::ClientIdentifier;
pub use self::label::{Label, SequenceGenerator};
pub use self::response::{Response, ResponseKind, ResponseStatus};
pub use self::result::{CommandResult, ResultKind, ResultPayload, ResultStatus};
pub use self::service::{ServiceInfo, ServiceState};

/// Upper bound on the opaque extra payload carried by commands and results.
pub const MAX_EXTRA_LEN: usize = 1024;
