//! Test suites for the conductor daemon.

mod process_behaviour;
pub(crate) mod support;
