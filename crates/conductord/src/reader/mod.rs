//! Connection multiplexers feeding client commands to the dispatcher.
//!
//! Two backends share one contract: authenticate the caller, decode its
//! command, post it to the [`Dispatcher`], and report lost clients with a
//! cleanup command. The stream-socket backend ([`socket`]) runs its own
//! readiness loop; the RPC backend ([`rpc`]) answers calls made through a
//! [`conductor_protocol::rpc::ServiceDirectory`].

mod errors;
mod policy;
mod reply;
pub mod rpc;
pub mod socket;

use std::sync::Arc;

use tracing::warn;

use conductor_protocol::{ClientIdentifier, Command, CommandResult, ResultStatus};

use crate::dispatch::{Dispatcher, ReaderMessage};

pub use self::errors::{ReaderError, WriterError};
pub use self::policy::{AccessPolicy, ROOT_UID};
pub use self::reply::{ReplyChannel, RpcReplyChannel, SocketWriter};

pub(crate) const READER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::reader");

/// A running reader backend.
pub trait Reader: Send {
    /// Short backend name used in logs and health events.
    fn name(&self) -> &'static str;

    /// Stops accepting work and waits for the backend to wind down.
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError::ThreadPanic`] when a background thread
    /// panicked.
    fn stop_read(&mut self) -> Result<(), ReaderError>;
}

/// Outcome of routing one command through the access policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The command was posted to the dispatcher.
    Forwarded,
    /// The caller is not trusted; it was answered with `Secure`.
    Denied,
}

/// Applies the access policy to `command` and forwards it when allowed.
///
/// Denied callers get a `Secure` result on `reply` and the dispatcher never
/// sees the command.
pub(crate) fn admit(
    policy: &AccessPolicy,
    dispatcher: &dyn Dispatcher,
    client: ClientIdentifier,
    command: Command,
    reply: Arc<dyn ReplyChannel>,
) -> Admission {
    if policy.allows(client) {
        dispatcher.post(ReaderMessage::new(client, command, reply));
        return Admission::Forwarded;
    }

    warn!(
        target: READER_TARGET,
        uid = client.uid,
        pid = client.pid,
        sequence = command.sequence,
        sub_command = ?command.sub_command,
        "rejecting command from untrusted caller"
    );
    let denied = CommandResult::new(ResultStatus::Secure, command.sequence).with_label(command.label);
    if let Err(error) = reply.send_result(denied) {
        warn!(
            target: READER_TARGET,
            uid = client.uid,
            pid = client.pid,
            %error,
            "failed to deliver permission denial"
        );
    }
    Admission::Denied
}
