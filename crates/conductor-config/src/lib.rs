//! Shared configuration for the conductor daemon and its clients.
//!
//! Values are layered by `ortho_config`: built-in defaults, then a
//! configuration file (`--config-path` or `CONDUCTOR_CONFIG_PATH`), then
//! `CONDUCTOR_*` environment variables, then command-line flags. Loading
//! failures from several layers are reported together.

mod defaults;
mod logging;
mod reader;
mod socket;

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use self::defaults::{
    DEFAULT_CALL_TIMEOUT_SECS, DEFAULT_LOG_FILTER, DEFAULT_MAX_CLIENTS,
    DEFAULT_MONITOR_TIMEOUT_SECS, DEFAULT_SYSTEM_UID, default_log_filter,
    default_log_filter_string, default_log_format, default_socket_endpoint,
};
pub use self::logging::{LogFormat, LogFormatParseError};
pub use self::reader::{ReaderBackend, ReaderBackendParseError};
pub use self::socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

/// Runtime configuration shared by `conductord` and client tooling.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "CONDUCTOR")]
pub struct Config {
    /// Endpoint the daemon listens on and clients connect to.
    #[ortho_config(default = default_socket_endpoint())]
    pub daemon_socket: SocketEndpoint,
    /// `tracing` filter expression.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Log output format.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Number of client slots in the socket reader.
    #[ortho_config(default = DEFAULT_MAX_CLIENTS)]
    pub max_clients: usize,
    /// Seconds the socket reader waits for activity before ticking.
    #[ortho_config(default = DEFAULT_MONITOR_TIMEOUT_SECS)]
    pub monitor_timeout_secs: u64,
    /// Seconds a synchronous call waits for its result.
    #[ortho_config(default = DEFAULT_CALL_TIMEOUT_SECS)]
    pub call_timeout_secs: u64,
    /// Administrative user trusted alongside root.
    #[ortho_config(default = DEFAULT_SYSTEM_UID)]
    pub system_uid: u32,
    /// Which reader backends the daemon starts.
    #[ortho_config(default = ReaderBackend::Socket)]
    pub reader_backend: ReaderBackend,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon_socket: default_socket_endpoint(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            max_clients: DEFAULT_MAX_CLIENTS,
            monitor_timeout_secs: DEFAULT_MONITOR_TIMEOUT_SECS,
            call_timeout_secs: DEFAULT_CALL_TIMEOUT_SECS,
            system_uid: DEFAULT_SYSTEM_UID,
            reader_backend: ReaderBackend::Socket,
        }
    }
}

impl Config {
    /// Endpoint the daemon listens on.
    #[must_use]
    pub const fn daemon_socket(&self) -> &SocketEndpoint {
        &self.daemon_socket
    }

    /// `tracing` filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Number of client slots, never below one.
    #[must_use]
    pub fn max_clients(&self) -> usize {
        self.max_clients.max(1)
    }

    /// Readiness wait used by the socket reader.
    #[must_use]
    pub const fn monitor_timeout(&self) -> Duration {
        Duration::from_secs(self.monitor_timeout_secs)
    }

    /// Deadline for synchronous calls.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Administrative user trusted alongside root.
    #[must_use]
    pub const fn system_uid(&self) -> u32 {
        self.system_uid
    }

    /// Which reader backends the daemon starts.
    #[must_use]
    pub const fn reader_backend(&self) -> ReaderBackend {
        self.reader_backend
    }
}
