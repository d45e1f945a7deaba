//! Replica-side pull replication
//!
//! A replica repeatedly fetches the smallest pending outbox entry from its
//! primary, applies it locally and acknowledges it back. All durable state
//! lives in the primary's outbox, so the worker can restart at any time.

pub mod client;
pub mod protocol;
pub mod worker;

pub use client::{HttpReplicationSource, build_peer_client};
pub use protocol::NextKeyValue;
pub use worker::{ReplicationSettings, ReplicationSource, ReplicationWorker, StepOutcome};
