//! Concord substrate: the DTU store and the pipelines around it
//!
//! This crate provides:
//! - sled-backed storage with disjoint knowledge and system stores
//! - the canonical content registry (content-addressed dedup)
//! - the rights ledger
//! - the event bridge (classify → format → dedup → CRETI → cross-ref →
//!   dispatch)
//! - the pull-only scope router and subscription model
//! - the news hub compression/decompression cycle
//! - the container file export/import registry

pub mod bridge;
pub mod canonical;
pub mod classify;
pub mod files;
pub mod news;
pub mod rights;
pub mod storage;
pub mod subscription;

pub use bridge::{BridgeEvent, BridgeOutcome, BridgeRejection, EventBridge};
pub use canonical::CanonicalRegistry;
pub use files::FileRegistry;
pub use news::{NewsHub, NewsHubConfig};
pub use rights::RightsLedger;
pub use storage::Storage;
pub use subscription::SubscriptionModel;
