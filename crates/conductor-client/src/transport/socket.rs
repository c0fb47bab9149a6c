use std::collections::VecDeque;
use std::io::{self, IoSliceMut, Write};
use std::net::Shutdown;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::socket::{ControlMessageOwned, MsgFlags, recvmsg};
use tracing::{debug, error, warn};

use conductor_config::SocketEndpoint;
use conductor_protocol::rpc::ResponseListener;
use conductor_protocol::{
    Command, CommandResult, Frame, FrameDecoder, FrameKind, ProtocolError, Response, ResultStatus,
};

use super::{ListenerSlot, TRANSPORT_TARGET, Transport};
use crate::error::TransportError;

const READ_CHUNK: usize = 4096;
const MAX_DESCRIPTORS_PER_READ: usize = 4;
const READER_THREAD: &str = "conductor-client-reader";
const DELIVERY_THREAD: &str = "conductor-client-delivery";

/// Framed stream-socket connection to `conductord`.
///
/// Calls are serialised: one command is in flight at a time. A background
/// thread reads frames from the daemon and routes results to the waiting
/// caller. Pushed responses are queued to a second thread that calls the
/// installed listener, so a listener may issue further commands while the
/// reader keeps collecting their results. Descriptors attached to `Fd`
/// results arrive as `SCM_RIGHTS` control messages.
#[derive(Debug)]
pub struct SocketTransport {
    endpoint: String,
    writer: Mutex<UnixStream>,
    results: Mutex<Receiver<CommandResult>>,
    listener: Arc<ListenerSlot>,
    call_timeout: Duration,
    reader: Mutex<Option<JoinHandle<()>>>,
    delivery: Mutex<Option<JoinHandle<()>>>,
}

impl SocketTransport {
    /// Connects to `endpoint` and starts the reader thread.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] when the daemon is unreachable
    /// and [`TransportError::SpawnReader`] when the reader cannot start.
    pub fn connect(endpoint: &SocketEndpoint, call_timeout: Duration) -> Result<Self, TransportError> {
        let connect_error = |source: io::Error| TransportError::Connect {
            endpoint: endpoint.to_string(),
            source: Arc::new(source),
        };
        let address = endpoint.socket_addr().map_err(connect_error)?;
        let stream = UnixStream::connect_addr(&address).map_err(connect_error)?;
        Self::from_stream(stream, endpoint.to_string(), call_timeout)
    }

    /// Wraps an already connected stream.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the stream cannot be cloned for the
    /// reader or either background thread cannot start.
    pub fn from_stream(
        stream: UnixStream,
        endpoint: String,
        call_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let reader_stream = stream.try_clone().map_err(|source| TransportError::Connect {
            endpoint: endpoint.clone(),
            source: Arc::new(source),
        })?;
        let (results_tx, results_rx) = mpsc::channel();
        let (responses_tx, responses_rx) = mpsc::channel();
        let listener = Arc::new(ListenerSlot::default());
        let delivery_listener = Arc::clone(&listener);
        let delivery = thread::Builder::new()
            .name(String::from(DELIVERY_THREAD))
            .spawn(move || deliver_responses(&responses_rx, &delivery_listener))
            .map_err(|source| TransportError::SpawnReader {
                source: Arc::new(source),
            })?;
        let reader = thread::Builder::new()
            .name(String::from(READER_THREAD))
            .spawn(move || read_loop(&reader_stream, &results_tx, &responses_tx))
            .map_err(|source| TransportError::SpawnReader {
                source: Arc::new(source),
            })?;

        Ok(Self {
            endpoint,
            writer: Mutex::new(stream),
            results: Mutex::new(results_rx),
            listener,
            call_timeout,
            reader: Mutex::new(Some(reader)),
            delivery: Mutex::new(Some(delivery)),
        })
    }

    /// Endpoint this transport is connected to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn send(&self, command: &Command) -> Result<(), TransportError> {
        let bytes = Frame::command(command)?.encode()?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer
            .write_all(&bytes)
            .map_err(|source| TransportError::Send {
                source: Arc::new(source),
            })
    }

    fn wait_for(&self, results: &MutexGuard<'_, Receiver<CommandResult>>, sequence: u32) -> CommandResult {
        let deadline = Instant::now() + self.call_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match results.recv_timeout(remaining) {
                Ok(result) if result.sequence == sequence => return result,
                Ok(stale) => debug!(
                    target: TRANSPORT_TARGET,
                    expected = sequence,
                    sequence = stale.sequence,
                    "discarding stale result"
                ),
                Err(RecvTimeoutError::Timeout) => {
                    warn!(target: TRANSPORT_TARGET, sequence, "command timed out");
                    return CommandResult::new(ResultStatus::Timeout, sequence);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    error!(target: TRANSPORT_TARGET, sequence, "daemon connection closed");
                    return CommandResult::new(ResultStatus::Fail, sequence);
                }
            }
        }
    }
}

impl Transport for SocketTransport {
    fn execute(&self, command: &Command) -> CommandResult {
        let results = self.results.lock().unwrap_or_else(PoisonError::into_inner);
        for stale in results.try_iter() {
            debug!(
                target: TRANSPORT_TARGET,
                sequence = stale.sequence,
                "discarding late result"
            );
        }
        if let Err(error) = self.send(command) {
            error!(
                target: TRANSPORT_TARGET,
                sequence = command.sequence,
                %error,
                "failed to send command"
            );
            return CommandResult::new(ResultStatus::Fail, command.sequence);
        }
        self.wait_for(&results, command.sequence)
    }

    fn set_listener(&self, listener: Weak<dyn ResponseListener>) {
        self.listener.set(listener);
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        let writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(error) = writer.shutdown(Shutdown::Both) {
            debug!(target: TRANSPORT_TARGET, %error, "socket already shut down");
        }
        drop(writer);

        // The reader exits on the shutdown above and drops the response
        // queue, which ends the delivery thread.
        join_worker(&self.reader, READER_THREAD);
        join_worker(&self.delivery, DELIVERY_THREAD);
    }
}

/// Joins a background thread unless the transport is dropped on it.
fn join_worker(slot: &Mutex<Option<JoinHandle<()>>>, name: &'static str) {
    let worker = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(worker) = worker
        && worker.thread().id() != thread::current().id()
        && worker.join().is_err()
    {
        warn!(target: TRANSPORT_TARGET, thread = name, "transport thread panicked");
    }
}

fn deliver_responses(responses: &Receiver<Response>, listener: &ListenerSlot) {
    for response in responses {
        listener.on_response(response);
    }
    debug!(target: TRANSPORT_TARGET, "response delivery stopped");
}

fn read_loop(
    stream: &UnixStream,
    results: &Sender<CommandResult>,
    responses: &Sender<Response>,
) {
    let mut decoder = FrameDecoder::new();
    let mut descriptors = VecDeque::new();
    let mut buffer = vec![0_u8; READ_CHUNK];

    loop {
        let received = match receive(stream, &mut buffer, &mut descriptors) {
            Ok(0) => break,
            Ok(received) => received,
            Err(Errno::EINTR) => continue,
            Err(error) => {
                warn!(target: TRANSPORT_TARGET, %error, "reading from daemon failed");
                break;
            }
        };
        decoder.extend(buffer.get(..received).unwrap_or_default());

        loop {
            match decoder.next_frame() {
                Ok(Some(frame)) => route_frame(&frame, &mut descriptors, results, responses),
                Ok(None) => break,
                Err(error @ ProtocolError::InvalidLength { .. }) => {
                    error!(target: TRANSPORT_TARGET, %error, "daemon stream is corrupt");
                    return;
                }
                Err(error) => {
                    warn!(target: TRANSPORT_TARGET, %error, "dropping unreadable frame");
                }
            }
        }
    }
    debug!(target: TRANSPORT_TARGET, "daemon connection closed");
}

fn route_frame(
    frame: &Frame,
    descriptors: &mut VecDeque<OwnedFd>,
    results: &Sender<CommandResult>,
    responses: &Sender<Response>,
) {
    match frame.kind() {
        FrameKind::Result => {
            let decoded = match frame.to_result(None) {
                Err(ProtocolError::MissingDescriptor) => frame.to_result(descriptors.pop_front()),
                other => other,
            };
            match decoded {
                Ok(result) => {
                    if results.send(result).is_err() {
                        debug!(target: TRANSPORT_TARGET, "transport dropped; discarding result");
                    }
                }
                Err(error) => warn!(target: TRANSPORT_TARGET, %error, "dropping malformed result"),
            }
        }
        FrameKind::Response => match frame.to_response() {
            Ok(response) => {
                if responses.send(response).is_err() {
                    debug!(target: TRANSPORT_TARGET, "delivery stopped; discarding response");
                }
            }
            Err(error) => warn!(target: TRANSPORT_TARGET, %error, "dropping malformed response"),
        },
        FrameKind::Command => {
            warn!(target: TRANSPORT_TARGET, "daemon sent a command frame; ignoring");
        }
    }
}

fn receive(
    stream: &UnixStream,
    buffer: &mut [u8],
    descriptors: &mut VecDeque<OwnedFd>,
) -> nix::Result<usize> {
    let mut space = nix::cmsg_space!([RawFd; MAX_DESCRIPTORS_PER_READ]);
    let mut iov = [IoSliceMut::new(buffer)];
    let message = recvmsg::<()>(
        stream.as_raw_fd(),
        &mut iov,
        Some(&mut space),
        MsgFlags::MSG_CMSG_CLOEXEC,
    )?;
    for control in message.cmsgs()? {
        if let ControlMessageOwned::ScmRights(received) = control {
            for fd in received {
                // SAFETY: SCM_RIGHTS installs a fresh descriptor owned by us.
                descriptors.push_back(unsafe { OwnedFd::from_raw_fd(fd) });
            }
        }
    }
    Ok(message.bytes)
}
