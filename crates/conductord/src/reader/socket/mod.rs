//! Stream-socket reader backend.
//!
//! One background thread owns the listening socket and a fixed table of
//! client slots. It waits for readiness on all of them at once, accepts new
//! clients while slots remain, decodes command frames, and reports clients
//! whose connection drops.

mod monitor;
mod slots;

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use conductor_config::{Config, SocketEndpoint};

use self::monitor::Monitor;
use super::{AccessPolicy, READER_TARGET, Reader, ReaderError};
use crate::dispatch::Dispatcher;

const THREAD_NAME: &str = "conductord-socket-reader";

/// Limits applied by the socket reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketReaderOptions {
    /// Number of client slots.
    pub max_clients: usize,
    /// Longest wait for readiness before the loop ticks.
    pub monitor_timeout: Duration,
}

impl SocketReaderOptions {
    /// Reads the limits from configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_clients: config.max_clients(),
            monitor_timeout: config.monitor_timeout(),
        }
    }
}

/// Bound but not yet running socket reader.
#[derive(Debug)]
pub struct SocketReader {
    endpoint: SocketEndpoint,
    listener: UnixListener,
    policy: AccessPolicy,
    options: SocketReaderOptions,
}

impl SocketReader {
    /// Binds the listening socket at `endpoint`.
    ///
    /// A stale socket file left behind by a dead daemon is removed first; a
    /// socket that still accepts connections is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError`] when the endpoint is unusable or already
    /// served by another process.
    pub fn bind(
        endpoint: &SocketEndpoint,
        policy: AccessPolicy,
        options: SocketReaderOptions,
    ) -> Result<Self, ReaderError> {
        let listener = bind_listener(endpoint)?;
        Ok(Self {
            endpoint: endpoint.clone(),
            listener,
            policy,
            options,
        })
    }

    /// Endpoint the reader listens on.
    #[must_use]
    pub const fn endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    /// Starts the monitor thread, posting admitted commands to `dispatcher`.
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError`] when the wake-up channel or the thread cannot
    /// be created. The socket file is removed in that case.
    pub fn start_read(self, dispatcher: Arc<dyn Dispatcher>) -> Result<ReaderHandle, ReaderError> {
        let endpoint = self.endpoint.clone();
        match self.spawn(dispatcher) {
            Ok(handle) => Ok(handle),
            Err(error) => {
                cleanup_unix_socket(&endpoint);
                Err(error)
            }
        }
    }

    fn spawn(self, dispatcher: Arc<dyn Dispatcher>) -> Result<ReaderHandle, ReaderError> {
        let (waker, wake) = UnixStream::pair().map_err(|source| ReaderError::Wake { source })?;
        wake.set_nonblocking(true)
            .map_err(|source| ReaderError::Wake { source })?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let active = Arc::new(AtomicUsize::new(0));
        let endpoint = self.endpoint.clone();
        let monitor = Monitor::new(
            self,
            wake,
            dispatcher,
            Arc::clone(&shutdown),
            Arc::clone(&active),
        );
        let thread = thread::Builder::new()
            .name(String::from(THREAD_NAME))
            .spawn(move || monitor.run())
            .map_err(|source| ReaderError::Spawn {
                name: THREAD_NAME,
                source,
            })?;

        Ok(ReaderHandle {
            endpoint,
            shutdown,
            waker,
            active,
            thread: Some(thread),
        })
    }
}

/// Handle to a running socket reader.
#[derive(Debug)]
pub struct ReaderHandle {
    endpoint: SocketEndpoint,
    shutdown: Arc<AtomicBool>,
    waker: UnixStream,
    active: Arc<AtomicUsize>,
    thread: Option<JoinHandle<()>>,
}

impl ReaderHandle {
    /// Endpoint the reader listens on.
    #[must_use]
    pub const fn endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    /// Number of occupied client slots.
    #[must_use]
    pub fn active_clients(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn signal_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Err(error) = (&self.waker).write_all(&[1]) {
            debug!(
                target: READER_TARGET,
                %error,
                "socket reader already gone"
            );
        }
    }
}

impl Reader for ReaderHandle {
    fn name(&self) -> &'static str {
        "socket"
    }

    fn stop_read(&mut self) -> Result<(), ReaderError> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        self.signal_shutdown();
        thread
            .join()
            .map_err(|_| ReaderError::ThreadPanic { name: THREAD_NAME })
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.signal_shutdown();
        }
    }
}

fn bind_listener(endpoint: &SocketEndpoint) -> Result<UnixListener, ReaderError> {
    if let Some(path) = endpoint.unix_path() {
        remove_stale_socket(path.as_std_path())?;
    }
    let address = endpoint.socket_addr().map_err(|source| ReaderError::Address {
        endpoint: endpoint.to_string(),
        source,
    })?;
    let listener = UnixListener::bind_addr(&address).map_err(|source| ReaderError::Bind {
        endpoint: endpoint.to_string(),
        source,
    })?;
    if let Err(source) = listener.set_nonblocking(true) {
        drop(listener);
        cleanup_unix_socket(endpoint);
        return Err(ReaderError::NonBlocking { source });
    }
    Ok(listener)
}

fn remove_stale_socket(path: &Path) -> Result<(), ReaderError> {
    if !path.exists() {
        return Ok(());
    }
    let metadata = fs::symlink_metadata(path).map_err(|source| ReaderError::UnixMetadata {
        path: path.display().to_string(),
        source,
    })?;
    if !metadata.file_type().is_socket() {
        return Err(ReaderError::UnixNotSocket {
            path: path.display().to_string(),
        });
    }
    match UnixStream::connect(path) {
        Ok(_stream) => Err(ReaderError::UnixInUse {
            path: path.display().to_string(),
        }),
        Err(error)
            if error.kind() == io::ErrorKind::ConnectionRefused
                || error.kind() == io::ErrorKind::NotFound =>
        {
            fs::remove_file(path).map_err(|source| ReaderError::UnixCleanup {
                path: path.display().to_string(),
                source,
            })
        }
        Err(source) => Err(ReaderError::UnixConnect {
            path: path.display().to_string(),
            source,
        }),
    }
}

fn cleanup_unix_socket(endpoint: &SocketEndpoint) {
    let Some(path) = endpoint.unix_path() else {
        return;
    };
    if let Err(error) = fs::remove_file(path.as_std_path())
        && error.kind() != io::ErrorKind::NotFound
    {
        warn!(
            target: READER_TARGET,
            %error,
            %path,
            "failed to remove unix socket file"
        );
    }
}
