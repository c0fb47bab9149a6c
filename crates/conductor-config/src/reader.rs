use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Reader backends the daemon can serve clients through.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ReaderBackend {
    /// The stream-socket multiplexer only.
    #[default]
    Socket,
    /// The in-process RPC service only.
    Rpc,
    /// Both backends side by side.
    Both,
}

impl ReaderBackend {
    /// Returns `true` when the socket reader should run.
    #[must_use]
    pub const fn uses_socket(self) -> bool {
        matches!(self, Self::Socket | Self::Both)
    }

    /// Returns `true` when the RPC reader should run.
    #[must_use]
    pub const fn uses_rpc(self) -> bool {
        matches!(self, Self::Rpc | Self::Both)
    }
}

/// Errors encountered while parsing a [`ReaderBackend`] from text.
pub type ReaderBackendParseError = strum::ParseError;
