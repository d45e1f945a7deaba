use crate::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrateOutcome {
    NotImplemented(ScaleDirection),
}

/// Placeholder for rebalancing data when the shard count changes.
///
/// Only the entry point exists; no keys are moved.
#[derive(Debug, Clone, Default)]
pub struct MigrateOperation;

impl MigrateOperation {
    pub fn new() -> Self {
        Self
    }

    // TODO: define the rebalancing protocol (e.g. two-phase key copy with a dual-write window)
    pub fn run(&self, direction: ScaleDirection) -> Result<MigrateOutcome> {
        tracing::info!("Migration started (scale {:?})", direction);
        tracing::warn!("Migration is not implemented; no data was moved");
        Ok(MigrateOutcome::NotImplemented(direction))
    }
}
