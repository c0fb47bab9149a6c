//! Test doubles and harnesses shared by the daemon suites.

mod client;
mod config_loader;
mod dispatcher;
mod reply;
mod reporter;

pub use client::{TestClient, wait_until};
pub use config_loader::{FailingConfigLoader, TestConfigLoader};
pub use dispatcher::{PostedMessage, RecordingDispatcher};
pub use reply::{RecordedResult, RecordingListener, RecordingReply};
pub use reporter::{HealthEvent, RecordingHealthReporter};
