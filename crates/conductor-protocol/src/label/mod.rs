//! Correlation labels and the sequence numbers they are built from.
//!
//! A [`Label`] packs the sequence number of the command that created an
//! operation into its high 32 bits and a peer-chosen sub-identifier into the
//! low 32 bits. The sequence can always be recovered from the label, which
//! lets follow-up commands (close, stop) reuse the original sequence.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

const SUB_ID_BITS: u32 = 32;
const SUB_ID_MASK: u64 = 0xFFFF_FFFF;

/// 64-bit key correlating a command with its result and later response.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Label(u64);

impl Label {
    /// Label of an operation that was never started.
    pub const ZERO: Self = Self(0);

    /// Packs a sequence number and sub-identifier into a label.
    #[must_use]
    pub fn new(sequence: u32, sub_id: u32) -> Self {
        Self((u64::from(sequence) << SUB_ID_BITS) | u64::from(sub_id))
    }

    /// Wraps a raw label read from elsewhere.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw 64-bit value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Sequence number of the command that produced this label.
    #[must_use]
    pub fn sequence(self) -> u32 {
        u32::try_from(self.0 >> SUB_ID_BITS).unwrap_or(u32::MAX)
    }

    /// Sub-identifier chosen by the peer (0 when unused).
    #[must_use]
    pub fn sub_id(self) -> u32 {
        u32::try_from(self.0 & SUB_ID_MASK).unwrap_or(u32::MAX)
    }

    /// Returns `true` for the never-started placeholder label.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}/{}", self.sequence(), self.sub_id())
    }
}

/// Issues monotonically increasing sequence numbers.
///
/// Numbers are unique for the lifetime of one generator, never zero, and
/// only need to be unique among operations that are still outstanding. The
/// counter wraps after `u32::MAX` issues and skips zero when it does.
#[derive(Debug)]
pub struct SequenceGenerator {
    next: AtomicU32,
}

impl SequenceGenerator {
    /// Creates a generator whose first number is 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    /// Returns the next sequence number.
    pub fn next_sequence(&self) -> u32 {
        loop {
            let sequence = self.next.fetch_add(1, Ordering::Relaxed);
            if sequence != 0 {
                return sequence;
            }
        }
    }
}

impl Default for SequenceGenerator {
    fn default() -> Self {
        Self::new()
    }
}
