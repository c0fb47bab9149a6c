use std::io::{self, Read};
use std::net::Shutdown;
use std::os::fd::AsFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::socket::{getsockopt, sockopt};
use tracing::{debug, error, info, warn};

use conductor_config::SocketEndpoint;
use conductor_protocol::ClientIdentifier;
use conductor_protocol::frame::{MAX_FRAME_LEN, split_frames};

use super::slots::{ClientConnection, ClientSlots};
use super::{SocketReader, bind_listener, cleanup_unix_socket};
use crate::dispatch::{Dispatcher, ReaderMessage};
use crate::reader::{AccessPolicy, READER_TARGET, SocketWriter, admit};

/// Descriptors found ready by one wait.
#[derive(Debug, Default)]
struct Readiness {
    wake: bool,
    listener: bool,
    clients: Vec<usize>,
}

/// State owned by the socket reader thread.
pub(super) struct Monitor {
    endpoint: SocketEndpoint,
    listener: Option<UnixListener>,
    wake: UnixStream,
    slots: ClientSlots,
    policy: AccessPolicy,
    dispatcher: Arc<dyn Dispatcher>,
    timeout: PollTimeout,
    shutdown: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
    buffer: Box<[u8]>,
}

impl Monitor {
    pub(super) fn new(
        reader: SocketReader,
        wake: UnixStream,
        dispatcher: Arc<dyn Dispatcher>,
        shutdown: Arc<AtomicBool>,
        active: Arc<AtomicUsize>,
    ) -> Self {
        let SocketReader {
            endpoint,
            listener,
            policy,
            options,
        } = reader;
        Self {
            endpoint,
            listener: Some(listener),
            wake,
            slots: ClientSlots::with_capacity(options.max_clients),
            policy,
            dispatcher,
            timeout: poll_timeout(options.monitor_timeout),
            shutdown,
            active,
            buffer: vec![0_u8; MAX_FRAME_LEN].into_boxed_slice(),
        }
    }

    pub(super) fn run(mut self) {
        info!(
            target: READER_TARGET,
            endpoint = %self.endpoint,
            capacity = self.slots.capacity(),
            "socket reader active"
        );
        while !self.shutdown.load(Ordering::SeqCst) {
            self.tick();
        }
        self.close();
    }

    fn tick(&mut self) {
        if self.listener.is_none() {
            self.rebind();
        }
        let readiness = match self.wait() {
            Ok(readiness) => readiness,
            Err(Errno::EINTR) => return,
            Err(errno) => {
                warn!(
                    target: READER_TARGET,
                    error = %errno,
                    "readiness wait failed; checking descriptors"
                );
                self.recover_descriptors();
                return;
            }
        };
        if readiness.wake {
            self.drain_wake();
        }
        if readiness.listener {
            self.accept();
        }
        for index in readiness.clients {
            self.service(index);
        }
    }

    fn wait(&self) -> Result<Readiness, Errno> {
        let mut fds = vec![PollFd::new(self.wake.as_fd(), PollFlags::POLLIN)];
        if let Some(listener) = &self.listener {
            fds.push(PollFd::new(listener.as_fd(), PollFlags::POLLIN));
        }
        let mut indices = Vec::with_capacity(self.slots.capacity());
        for (index, connection) in self.slots.iter() {
            indices.push(index);
            fds.push(PollFd::new(connection.stream.as_fd(), PollFlags::POLLIN));
        }

        if poll(&mut fds, self.timeout)? == 0 {
            return Ok(Readiness::default());
        }

        let mut states = fds.iter().map(is_readable);
        let wake = states.next().unwrap_or(false);
        let listener = self.listener.is_some() && states.next().unwrap_or(false);
        let clients = indices
            .into_iter()
            .zip(states)
            .filter_map(|(index, ready)| ready.then_some(index))
            .collect();
        Ok(Readiness {
            wake,
            listener,
            clients,
        })
    }

    fn drain_wake(&mut self) {
        let mut scratch = [0_u8; 16];
        loop {
            match self.wake.read(&mut scratch) {
                Ok(0) => return,
                Ok(_) => {}
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(_) => return,
            }
        }
    }

    fn accept(&mut self) {
        loop {
            let Some(listener) = &self.listener else {
                return;
            };
            match listener.accept() {
                Ok((stream, _)) => self.register(stream),
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => return,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => {
                    warn!(
                        target: READER_TARGET,
                        %error,
                        "socket accept error"
                    );
                    return;
                }
            }
        }
    }

    fn register(&mut self, stream: UnixStream) {
        let client = match peer_identity(&stream) {
            Ok(client) => client,
            Err(errno) => {
                warn!(
                    target: READER_TARGET,
                    error = %errno,
                    "failed to read peer credentials; closing connection"
                );
                return;
            }
        };
        if self.slots.is_full() {
            warn!(
                target: READER_TARGET,
                uid = client.uid,
                pid = client.pid,
                capacity = self.slots.capacity(),
                "client table full; closing connection"
            );
            return;
        }
        let writer = match stream.set_nonblocking(false).and_then(|()| stream.try_clone()) {
            Ok(clone) => Arc::new(SocketWriter::new(client, clone)),
            Err(error) => {
                warn!(
                    target: READER_TARGET,
                    uid = client.uid,
                    pid = client.pid,
                    %error,
                    "failed to prepare client connection"
                );
                return;
            }
        };
        let connection = ClientConnection {
            stream,
            client,
            writer,
        };
        match self.slots.insert(connection) {
            Ok(slot) => {
                self.publish_active();
                debug!(
                    target: READER_TARGET,
                    slot,
                    uid = client.uid,
                    pid = client.pid,
                    "client connected"
                );
            }
            Err(_) => warn!(
                target: READER_TARGET,
                uid = client.uid,
                pid = client.pid,
                "client table full; closing connection"
            ),
        }
    }

    fn service(&mut self, index: usize) {
        let Some(connection) = self.slots.get_mut(index) else {
            return;
        };
        let read = match connection.stream.read(&mut self.buffer) {
            Ok(read) => read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => return,
            Err(error) => {
                debug!(
                    target: READER_TARGET,
                    slot = index,
                    %error,
                    "client read failed"
                );
                0
            }
        };
        let client = connection.client;
        let writer = Arc::clone(&connection.writer);
        if read == 0 {
            self.disconnect(index);
            return;
        }

        let received = self.buffer.get(..read).unwrap_or_default();
        for decoded in split_frames(received) {
            match decoded.and_then(|frame| frame.to_command()) {
                Ok(command) => {
                    admit(
                        &self.policy,
                        self.dispatcher.as_ref(),
                        client,
                        command,
                        Arc::<SocketWriter>::clone(&writer),
                    );
                }
                Err(error) => warn!(
                    target: READER_TARGET,
                    slot = index,
                    uid = client.uid,
                    pid = client.pid,
                    %error,
                    "dropping malformed frame"
                ),
            }
        }
    }

    fn disconnect(&mut self, index: usize) {
        let Some(connection) = self.slots.release(index) else {
            return;
        };
        self.publish_active();
        if let Err(error) = connection.stream.shutdown(Shutdown::Both) {
            debug!(
                target: READER_TARGET,
                slot = index,
                %error,
                "client socket already closed"
            );
        }
        info!(
            target: READER_TARGET,
            slot = index,
            uid = connection.client.uid,
            pid = connection.client.pid,
            "client disconnected"
        );
        self.dispatcher.post(ReaderMessage::disconnect(connection.client));
    }

    fn recover_descriptors(&mut self) {
        let failed: Vec<usize> = self
            .slots
            .iter()
            .filter(|(_, connection)| !is_alive(&connection.stream))
            .map(|(index, _)| index)
            .collect();
        for index in failed {
            self.disconnect(index);
        }
        let listener_failed = self
            .listener
            .as_ref()
            .is_none_or(|listener| !matches!(listener.take_error(), Ok(None)));
        if listener_failed {
            self.rebind();
        }
    }

    fn rebind(&mut self) {
        drop(self.listener.take());
        match bind_listener(&self.endpoint) {
            Ok(listener) => {
                info!(
                    target: READER_TARGET,
                    endpoint = %self.endpoint,
                    "listening socket recreated"
                );
                self.listener = Some(listener);
            }
            Err(error) => error!(
                target: READER_TARGET,
                endpoint = %self.endpoint,
                %error,
                "failed to recreate listening socket"
            ),
        }
    }

    fn publish_active(&self) {
        self.active.store(self.slots.len(), Ordering::SeqCst);
    }

    fn close(mut self) {
        drop(self.listener.take());
        for (index, connection) in self.slots.iter() {
            if let Err(error) = connection.stream.shutdown(Shutdown::Write) {
                debug!(
                    target: READER_TARGET,
                    slot = index,
                    %error,
                    "client socket already closed"
                );
            }
        }
        cleanup_unix_socket(&self.endpoint);
        info!(
            target: READER_TARGET,
            endpoint = %self.endpoint,
            clients = self.slots.len(),
            "socket reader stopped"
        );
    }
}

fn poll_timeout(timeout: Duration) -> PollTimeout {
    u32::try_from(timeout.as_millis())
        .ok()
        .and_then(|millis| PollTimeout::try_from(millis).ok())
        .unwrap_or(PollTimeout::MAX)
}

fn is_readable(fd: &PollFd<'_>) -> bool {
    fd.revents().is_some_and(|events| {
        events.intersects(
            PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL,
        )
    })
}

/// A stream is dead once it carries a socket error or its peer hung up.
fn is_alive(stream: &UnixStream) -> bool {
    if !matches!(stream.take_error(), Ok(None)) {
        return false;
    }
    let mut fds = [PollFd::new(stream.as_fd(), PollFlags::POLLIN)];
    match poll(&mut fds, PollTimeout::ZERO) {
        Ok(_) => !fds.iter().any(|fd| {
            fd.revents().is_some_and(|events| {
                events.intersects(PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL)
            })
        }),
        Err(Errno::EINTR) => true,
        Err(_) => false,
    }
}

fn peer_identity(stream: &UnixStream) -> Result<ClientIdentifier, Errno> {
    let credentials = getsockopt(stream, sockopt::PeerCredentials)?;
    Ok(ClientIdentifier::new(credentials.uid(), credentials.pid()))
}
