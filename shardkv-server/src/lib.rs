//! ShardKV server - HTTP data plane for a statically sharded key-value store

pub mod config;
pub mod forward;
pub mod server;

pub use config::Config;
pub use forward::{FORWARDED_HEADER, Forwarder};
pub use server::{ServerState, build_router, serve};
