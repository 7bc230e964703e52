//! Snapshot metadata, lifecycle and load handshake.

pub mod codec;
mod handshake;
mod manager;

pub use handshake::{DirectiveOutcome, HandshakeState, LoadHandshake, PollOutcome};
pub use manager::SnapshotManager;
