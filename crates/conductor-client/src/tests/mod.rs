//! Behavioural coverage for the registry driven by a scripted peer.

mod support;
