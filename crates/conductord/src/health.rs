//! Structured health reporting for daemon lifecycle events.

use std::sync::Arc;

use conductor_config::Config;

use crate::bootstrap::BootstrapError;
use crate::process::ShutdownCause;
use crate::reader::ReaderError;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked once a reader backend accepts work.
    fn reader_started(&self, reader: &'static str, endpoint: &str);

    /// Invoked after a reader backend has wound down.
    fn reader_stopped(&self, reader: &'static str);

    /// Invoked when a reader backend fails to start or stop.
    fn reader_failed(&self, reader: &'static str, error: &ReaderError);

    /// Invoked once shutdown begins, before the readers stop.
    fn shutdown_requested(&self, cause: ShutdownCause);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn reader_started(&self, reader: &'static str, endpoint: &str) {
        (**self).reader_started(reader, endpoint);
    }

    fn reader_stopped(&self, reader: &'static str) {
        (**self).reader_stopped(reader);
    }

    fn reader_failed(&self, reader: &'static str, error: &ReaderError) {
        (**self).reader_failed(reader, error);
    }

    fn shutdown_requested(&self, cause: ShutdownCause) {
        (**self).shutdown_requested(cause);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting daemon bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            socket = %config.daemon_socket(),
            reader_backend = ?config.reader_backend(),
            max_clients = config.max_clients(),
            system_uid = config.system_uid(),
            log_filter = %config.log_filter(),
            log_format = ?config.log_format(),
            "daemon bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "daemon bootstrap failed"
        );
    }

    fn reader_started(&self, reader: &'static str, endpoint: &str) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "reader_started",
            reader,
            endpoint,
            "reader accepting commands"
        );
    }

    fn reader_stopped(&self, reader: &'static str) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "reader_stopped",
            reader,
            "reader stopped"
        );
    }

    fn reader_failed(&self, reader: &'static str, error: &ReaderError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "reader_failed",
            reader,
            error = %error,
            "reader failed"
        );
    }

    fn shutdown_requested(&self, cause: ShutdownCause) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "shutdown_requested",
            %cause,
            "daemon shutting down"
        );
    }
}
