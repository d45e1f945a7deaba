pub mod migrate;
pub mod purge_extra_keys;

pub use migrate::{MigrateOperation, MigrateOutcome, ScaleDirection};
pub use purge_extra_keys::{PurgeExtraKeysOperation, PurgeExtraKeysResult};
