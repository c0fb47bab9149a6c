//! Privileged side of the conductor: accepts client commands and hands them
//! to an executor.
//!
//! The daemon runs one or two reader backends selected by
//! [`conductor_config::ReaderBackend`]. The stream-socket reader listens on
//! the configured [`conductor_config::SocketEndpoint`] and multiplexes a
//! fixed table of client slots on one thread. The RPC reader publishes a
//! [`conductor_protocol::rpc::RpcService`] for in-process clients. Both
//! authenticate every caller against an [`AccessPolicy`], post admitted
//! commands to a [`Dispatcher`], and turn a lost client into a cleanup
//! command so the executor can release whatever that client owned.
//!
//! Bootstrap loads configuration, installs structured telemetry, and
//! prepares the socket directory, reporting each stage through a
//! [`HealthReporter`].

mod bootstrap;
pub mod dispatch;
mod health;
mod process;
pub mod reader;
mod telemetry;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use dispatch::{Dispatcher, HandlerKind, ReaderMessage, UnavailableDispatcher};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{
    LaunchError, ShutdownCause, ShutdownError, ShutdownSignal, SystemShutdownSignal, run_daemon,
};
pub use reader::{AccessPolicy, Reader, ReaderError, ReplyChannel, WriterError};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
