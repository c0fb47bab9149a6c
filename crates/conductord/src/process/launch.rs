//! Supervises daemon launch sequencing and runtime orchestration.

use std::sync::Arc;

use tracing::info;

use conductor_config::Config;
use conductor_protocol::rpc::ServiceDirectory;

use crate::bootstrap::{ConfigLoader, SystemConfigLoader, bootstrap_with};
use crate::dispatch::{Dispatcher, UnavailableDispatcher};
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::reader::rpc::RpcReader;
use crate::reader::socket::{SocketReader, SocketReaderOptions};
use crate::reader::{AccessPolicy, Reader, ReaderError};

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};

/// Collaborators required to launch the daemon runtime.
pub(crate) struct LaunchPlan<L, S> {
    pub(crate) loader: L,
    pub(crate) shutdown: S,
    pub(crate) reporter: Arc<dyn HealthReporter>,
    pub(crate) dispatcher: Arc<dyn Dispatcher>,
    pub(crate) directory: Arc<ServiceDirectory>,
}

/// Runs the daemon using the production collaborators.
///
/// The daemon stays in the foreground until `SIGTERM`, `SIGINT`, `SIGQUIT`,
/// or `SIGHUP` arrives. Signal handlers are registered before bootstrap.
///
/// # Errors
///
/// Returns [`LaunchError`] when bootstrap fails, a reader cannot start or
/// stop, or the signal handlers cannot be installed.
pub fn run_daemon() -> Result<(), LaunchError> {
    run_daemon_with(LaunchPlan {
        loader: SystemConfigLoader,
        shutdown: SystemShutdownSignal::install()?,
        reporter: Arc::new(StructuredHealthReporter::new()),
        dispatcher: Arc::new(UnavailableDispatcher),
        directory: Arc::new(ServiceDirectory::new()),
    })
}

/// Runs the daemon with injected collaborators.
pub(crate) fn run_daemon_with<L, S>(plan: LaunchPlan<L, S>) -> Result<(), LaunchError>
where
    L: ConfigLoader,
    S: ShutdownSignal,
{
    let LaunchPlan {
        loader,
        shutdown,
        reporter,
        dispatcher,
        directory,
    } = plan;

    let daemon = bootstrap_with(&loader, reporter.as_ref())?;
    let config = daemon.config();
    info!(
        target: PROCESS_TARGET,
        backend = ?config.reader_backend(),
        "starting readers"
    );
    let readers = start_readers(config, reporter.as_ref(), &dispatcher, &directory)?;

    let waited = shutdown.wait();
    if let Ok(cause) = &waited {
        reporter.shutdown_requested(*cause);
    }
    let stopped = stop_readers(readers, reporter.as_ref());
    let cause = waited?;
    stopped?;
    info!(
        target: PROCESS_TARGET,
        %cause,
        "shutdown sequence completed"
    );
    Ok(())
}

fn start_readers(
    config: &Config,
    reporter: &dyn HealthReporter,
    dispatcher: &Arc<dyn Dispatcher>,
    directory: &Arc<ServiceDirectory>,
) -> Result<Vec<Box<dyn Reader>>, LaunchError> {
    let backend = config.reader_backend();
    let mut readers: Vec<Box<dyn Reader>> = Vec::new();

    if backend.uses_socket() {
        let started = SocketReader::bind(
            config.daemon_socket(),
            AccessPolicy::from_config(config),
            SocketReaderOptions::from_config(config),
        )
        .and_then(|reader| reader.start_read(Arc::clone(dispatcher)));
        match started {
            Ok(handle) => {
                reporter.reader_started(handle.name(), &handle.endpoint().to_string());
                readers.push(Box::new(handle));
            }
            Err(error) => return Err(abort_start("socket", error, readers, reporter)),
        }
    }

    if backend.uses_rpc() {
        match RpcReader::from_config(config, Arc::clone(dispatcher)).start_read(Arc::clone(directory)) {
            Ok(handle) => {
                reporter.reader_started(handle.name(), handle.service_name());
                readers.push(Box::new(handle));
            }
            Err(error) => return Err(abort_start("rpc", error, readers, reporter)),
        }
    }

    Ok(readers)
}

fn abort_start(
    reader: &'static str,
    error: ReaderError,
    started: Vec<Box<dyn Reader>>,
    reporter: &dyn HealthReporter,
) -> LaunchError {
    reporter.reader_failed(reader, &error);
    if let Err(stop_error) = stop_readers(started, reporter) {
        info!(
            target: PROCESS_TARGET,
            error = %stop_error,
            "failed to stop readers after startup failure"
        );
    }
    LaunchError::from(error)
}

/// Stops readers in reverse start order, returning the first failure.
fn stop_readers(readers: Vec<Box<dyn Reader>>, reporter: &dyn HealthReporter) -> Result<(), ReaderError> {
    let mut outcome = Ok(());
    for mut reader in readers.into_iter().rev() {
        let name = reader.name();
        match reader.stop_read() {
            Ok(()) => reporter.reader_stopped(name),
            Err(error) => {
                reporter.reader_failed(name, &error);
                if outcome.is_ok() {
                    outcome = Err(error);
                }
            }
        }
    }
    outcome
}
