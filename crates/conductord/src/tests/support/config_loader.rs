//! Test configuration loaders for scenarios covering success and failure paths.

use std::ffi::OsString;
use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use tempfile::TempDir;

use conductor_config::{Config, ReaderBackend, SocketEndpoint};

use crate::bootstrap::ConfigLoader;

/// Loader that provisions a Unix socket path under a temporary directory
/// and trusts the user running the tests.
pub struct TestConfigLoader {
    socket_dir: TempDir,
    backend: ReaderBackend,
}

impl TestConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::with_backend(ReaderBackend::Socket)
    }

    #[must_use]
    pub fn with_backend(backend: ReaderBackend) -> Self {
        let socket_dir = TempDir::new().expect("failed to create temporary directory for socket");
        Self {
            socket_dir,
            backend,
        }
    }

    /// Endpoint the loaded configuration points at.
    #[must_use]
    pub fn socket_endpoint(&self) -> SocketEndpoint {
        let path = self.socket_dir.path().join("sock").join("conductord.sock");
        SocketEndpoint::unix(
            path.to_str()
                .expect("temporary socket path was not valid UTF-8")
                .to_owned(),
        )
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(Config {
            daemon_socket: self.socket_endpoint(),
            system_uid: nix::unistd::geteuid().as_raw(),
            reader_backend: self.backend,
            max_clients: 4,
            monitor_timeout_secs: 1,
            call_timeout_secs: 2,
            ..Config::default()
        })
    }
}

/// Loader that intentionally fails by passing invalid CLI arguments.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("conductord"),
            OsString::from("--daemon-socket"),
            OsString::from("invalid://socket"),
        ];
        Config::load_from_iter(args)
    }
}
