//! Health reporter double that keeps the daemon's lifecycle as a list.

use std::sync::{Mutex, PoisonError};

use conductor_config::{Config, ReaderBackend};

use crate::bootstrap::BootstrapError;
use crate::health::HealthReporter;
use crate::process::ShutdownCause;
use crate::reader::ReaderError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HealthEvent {
    BootstrapStarting,
    BootstrapSucceeded,
    BootstrapFailed(String),
    ReaderStarted { reader: &'static str, endpoint: String },
    ReaderStopped(&'static str),
    ReaderFailed { reader: &'static str, message: String },
    ShutdownRequested(ShutdownCause),
}

/// Records every lifecycle callback in arrival order.
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
    backend: Mutex<Option<ReaderBackend>>,
}

impl RecordingHealthReporter {
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reader names in the order they started.
    pub fn started_readers(&self) -> Vec<&'static str> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                HealthEvent::ReaderStarted { reader, .. } => Some(reader),
                _ => None,
            })
            .collect()
    }

    /// Reader names in the order they stopped.
    pub fn stopped_readers(&self) -> Vec<&'static str> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                HealthEvent::ReaderStopped(reader) => Some(reader),
                _ => None,
            })
            .collect()
    }

    /// Backend named by the configuration that bootstrapped successfully.
    pub fn configured_backend(&self) -> Option<ReaderBackend> {
        *self.backend.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        *self.backend.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(config.reader_backend());
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn reader_started(&self, reader: &'static str, endpoint: &str) {
        self.record(HealthEvent::ReaderStarted {
            reader,
            endpoint: endpoint.to_owned(),
        });
    }

    fn reader_stopped(&self, reader: &'static str) {
        self.record(HealthEvent::ReaderStopped(reader));
    }

    fn reader_failed(&self, reader: &'static str, error: &ReaderError) {
        self.record(HealthEvent::ReaderFailed {
            reader,
            message: error.to_string(),
        });
    }

    fn shutdown_requested(&self, cause: ShutdownCause) {
        self.record(HealthEvent::ShutdownRequested(cause));
    }
}
