//! Concord federation: registry, quality gates, promotion, and resolution
//!
//! Federation flow is UP_ONLY. DTUs are promoted upward through
//! local → regional → national → global, gated by quality predicates;
//! queries escalate upward and results never sync downward.

pub mod gates;
pub mod promotion;
pub mod registry;
pub mod resolver;

pub use gates::{GateInputs, GateOutcome};
pub use promotion::{promote, PromotionError, PromotionReceipt};
pub use registry::{FederationError, FederationRegistry};
pub use resolver::{resolve_query, Resolution, ResolverError, TierSearch};
