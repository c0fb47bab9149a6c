//! Reply paths from the dispatcher back to a caller.

use std::fmt;
use std::io::{IoSlice, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use nix::sys::socket::{ControlMessage, MsgFlags, sendmsg};
use tracing::{debug, warn};

use conductor_protocol::rpc::ResponseListener;
use conductor_protocol::{ClientIdentifier, CommandResult, Frame, Response, ResultStatus};

use super::{READER_TARGET, WriterError};

/// Sink for the synchronous result and later responses of one caller.
pub trait ReplyChannel: Send + Sync {
    /// Delivers the synchronous result of a command.
    ///
    /// # Errors
    ///
    /// Returns [`WriterError`] when the caller cannot be reached.
    fn send_result(&self, result: CommandResult) -> Result<(), WriterError>;

    /// Pushes an asynchronous response.
    ///
    /// # Errors
    ///
    /// Returns [`WriterError`] when the caller cannot be reached.
    fn send_response(&self, response: &Response) -> Result<(), WriterError>;
}

/// Writes frames to one socket client.
///
/// `Fd` results travel with their descriptor attached as an `SCM_RIGHTS`
/// control message; the daemon's copy is closed once sent.
#[derive(Debug)]
pub struct SocketWriter {
    client: ClientIdentifier,
    stream: Mutex<UnixStream>,
}

impl SocketWriter {
    /// Wraps a connection to `client`.
    #[must_use]
    pub const fn new(client: ClientIdentifier, stream: UnixStream) -> Self {
        Self {
            client,
            stream: Mutex::new(stream),
        }
    }

    /// Client this writer answers.
    #[must_use]
    pub const fn client(&self) -> ClientIdentifier {
        self.client
    }

    fn write_frame(&self, frame: &Frame, descriptor: Option<RawFd>) -> Result<(), WriterError> {
        let bytes = frame.encode()?;
        let io_error = |source| WriterError::Io {
            client: self.client,
            source,
        };
        let mut stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(fd) = descriptor else {
            return stream.write_all(&bytes).map_err(io_error);
        };

        let descriptors = [fd];
        let sent = sendmsg::<()>(
            stream.as_raw_fd(),
            &[IoSlice::new(&bytes)],
            &[ControlMessage::ScmRights(&descriptors)],
            MsgFlags::MSG_NOSIGNAL,
            None,
        )
        .map_err(|errno| io_error(errno.into()))?;
        match bytes.get(sent..) {
            Some(rest) if !rest.is_empty() => stream.write_all(rest).map_err(io_error),
            _ => Ok(()),
        }
    }
}

impl ReplyChannel for SocketWriter {
    fn send_result(&self, result: CommandResult) -> Result<(), WriterError> {
        let frame = Frame::result(&result)?;
        let descriptor = result.descriptor().map(|fd| fd.as_raw_fd());
        self.write_frame(&frame, descriptor)?;
        debug!(
            target: READER_TARGET,
            uid = self.client.uid,
            pid = self.client.pid,
            sequence = result.sequence,
            status = ?result.status,
            "result sent"
        );
        Ok(())
    }

    fn send_response(&self, response: &Response) -> Result<(), WriterError> {
        let frame = Frame::response(response)?;
        self.write_frame(&frame, None)
    }
}

/// Rendezvous between an RPC call blocked in the reader and the dispatcher.
pub struct RpcReplyChannel {
    client: ClientIdentifier,
    slot: Mutex<Option<CommandResult>>,
    ready: Condvar,
    listener: Option<Arc<dyn ResponseListener>>,
}

impl RpcReplyChannel {
    /// Creates an empty channel for `client`, pushing responses to
    /// `listener` when one is registered.
    #[must_use]
    pub fn new(client: ClientIdentifier, listener: Option<Arc<dyn ResponseListener>>) -> Self {
        Self {
            client,
            slot: Mutex::new(None),
            ready: Condvar::new(),
            listener,
        }
    }

    /// Blocks until a result arrives or `timeout` elapses.
    ///
    /// On timeout a `Timeout` result for `sequence` is returned instead.
    #[must_use]
    pub fn wait(&self, sequence: u32, timeout: Duration) -> CommandResult {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut slot, _) = self
            .ready
            .wait_timeout_while(slot, timeout, |pending| pending.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        slot.take().unwrap_or_else(|| {
            warn!(
                target: READER_TARGET,
                uid = self.client.uid,
                pid = self.client.pid,
                sequence,
                timeout_ms = timeout.as_millis(),
                "call timed out waiting for a result"
            );
            CommandResult::new(ResultStatus::Timeout, sequence)
        })
    }
}

impl ReplyChannel for RpcReplyChannel {
    fn send_result(&self, result: CommandResult) -> Result<(), WriterError> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(WriterError::AlreadyAnswered {
                sequence: result.sequence,
            });
        }
        *slot = Some(result);
        self.ready.notify_all();
        Ok(())
    }

    fn send_response(&self, response: &Response) -> Result<(), WriterError> {
        let listener = self.listener.as_ref().ok_or(WriterError::NoListener {
            client: self.client,
        })?;
        listener.on_response(response.clone());
        Ok(())
    }
}

impl fmt::Debug for RpcReplyChannel {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RpcReplyChannel")
            .field("client", &self.client)
            .field("has_listener", &self.listener.is_some())
            .finish_non_exhaustive()
    }
}
