//! Log output settings for the daemon.
//!
//! `conductord` normally runs under a service manager that collects stderr,
//! so one JSON object per event is the default. Compact text suits an
//! operator running the daemon in the foreground.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

/// How the daemon renders log events on stderr.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LogFormat {
    /// JSON lines with span fields flattened into each event.
    #[default]
    Json,
    /// Single-line text.
    Compact,
}

impl LogFormat {
    /// Every accepted format.
    pub const ALL: [Self; 2] = [Self::Json, Self::Compact];

    /// Returns `true` when events are emitted as machine-readable records.
    #[must_use]
    pub const fn is_structured(self) -> bool {
        matches!(self, Self::Json)
    }
}

/// Text that names no [`LogFormat`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown log format '{value}' (expected json or compact)")]
pub struct LogFormatParseError {
    value: String,
}

impl LogFormatParseError {
    /// The rejected input.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl FromStr for LogFormat {
    type Err = LogFormatParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let wanted = text.trim();
        Self::ALL
            .into_iter()
            .find(|format| format.to_string().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| LogFormatParseError {
                value: text.to_owned(),
            })
    }
}
