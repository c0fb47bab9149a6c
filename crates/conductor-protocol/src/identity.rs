//! Caller identity established from local peer credentials.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a connected caller, as reported by the kernel.
///
/// Ordering compares `uid` first and `pid` second, so identities can key
/// ordered maps of per-caller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientIdentifier {
    /// Effective user id of the caller.
    pub uid: u32,
    /// Process id of the caller.
    pub pid: i32,
}

impl ClientIdentifier {
    /// Builds an identity from its parts.
    #[must_use]
    pub const fn new(uid: u32, pid: i32) -> Self {
        Self { uid, pid }
    }
}

impl fmt::Display for ClientIdentifier {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.uid, self.pid)
    }
}
