//! Concord compliance: lens adapters, the 12-phase runner, and protection
//!
//! Lens adapters are capability records validated by twelve orthogonal
//! phase checks at registration and again by the nightly audit. The
//! threat lattice guards content hashes.

pub mod adapter;
pub mod phases;
pub mod protection;
pub mod runner;

pub use adapter::{LensAdapter, LensClassification, LensStatus};
pub use phases::{CheckResult, CheckStatus, Phase};
pub use protection::{ScanOutcome, ThreatLattice};
pub use runner::{ComplianceRunner, EMERGENT_LENS_LIMIT, USER_LENS_LIMIT};
