//! concordd - Concord DTU Substrate Daemon
//!
//! This daemon provides:
//! - event ingest through the bridge into the knowledge/system stores
//! - container export/import with file-hash deduplication
//! - the CRI heartbeat sweep
//! - the news compaction tick
//! - the nightly compliance audit
//! - the subscription rate-window purger

pub mod config;
pub mod server;

pub use config::Config;
pub use server::Server;
