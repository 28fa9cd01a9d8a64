//! Core data model for the Concord substrate
//!
//! A DTU (Distillation Transfer Unit) is the atomic knowledge object. All
//! types here are serde-derived; field order matters for the postcard
//! storage encoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// TIERS
// =============================================================================

/// Internal lifecycle tier of a DTU (orthogonal to federation tier).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DtuTier {
    /// Unconfirmed or speculative knowledge
    Shadow,
    /// Normal standalone DTU
    Regular,
    /// Aggregation of multiple regular DTUs
    Mega,
    /// Aggregation of multiple Mega DTUs
    Hyper,
}

/// Geographic/authority level at which a DTU is visible.
///
/// Strictly ordered; promotion may only increase the rank.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FederationTier {
    Local,
    Regional,
    National,
    Global,
}

impl FederationTier {
    /// Monotonic rank used by the promotion check.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Local => 0,
            Self::Regional => 1,
            Self::National => 2,
            Self::Global => 3,
        }
    }

    /// The next tier up, if any.
    pub fn next(&self) -> Option<FederationTier> {
        match self {
            Self::Local => Some(Self::Regional),
            Self::Regional => Some(Self::National),
            Self::National => Some(Self::Global),
            Self::Global => None,
        }
    }

    /// Tier name as used in registry rows and history entries.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Regional => "regional",
            Self::National => "national",
            Self::Global => "global",
        }
    }
}

impl std::fmt::Display for FederationTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// SCOPE FLAGS
// =============================================================================

/// The five booleans governing where and how a DTU may be observed.
///
/// Fields are private: the only constructors are [`ScopeFlags::knowledge`]
/// and [`ScopeFlags::system`], so `local_push == true` or `global == true`
/// cannot be constructed. Distribution is pull-only.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScopeFlags {
    lenses: BTreeSet<String>,
    global: bool,
    local_push: bool,
    local_pull: bool,
    news_visible: bool,
    system_only: Option<bool>,
}

impl ScopeFlags {
    /// Scope for a user-visible knowledge DTU.
    pub fn knowledge(lenses: impl IntoIterator<Item = String>) -> Self {
        Self {
            lenses: lenses.into_iter().collect(),
            global: false,
            local_push: false,
            local_pull: true,
            news_visible: true,
            system_only: None,
        }
    }

    /// Scope for an operational system DTU. Invisible to user queries.
    pub fn system(lenses: impl IntoIterator<Item = String>) -> Self {
        Self {
            lenses: lenses.into_iter().collect(),
            global: false,
            local_push: false,
            local_pull: false,
            news_visible: false,
            system_only: Some(true),
        }
    }

    pub fn lenses(&self) -> &BTreeSet<String> {
        &self.lenses
    }

    pub fn is_global(&self) -> bool {
        self.global
    }

    pub fn local_push(&self) -> bool {
        self.local_push
    }

    pub fn local_pull(&self) -> bool {
        self.local_pull
    }

    pub fn news_visible(&self) -> bool {
        self.news_visible
    }

    /// True only for system DTUs.
    pub fn is_system_only(&self) -> bool {
        self.system_only.unwrap_or(false)
    }
}

// =============================================================================
// PAYLOAD LAYERS
// =============================================================================

/// Prose layer: what a human reads.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct HumanLayer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub summary: String,
}

/// Structured claims, definitions, and invariants.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CoreLayer {
    #[serde(default)]
    pub claims: Vec<String>,
    #[serde(default)]
    pub definitions: BTreeMap<String, String>,
    #[serde(default)]
    pub invariants: Vec<String>,
}

impl CoreLayer {
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty() && self.definitions.is_empty() && self.invariants.is_empty()
    }
}

/// Typed machine metadata.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct MachineLayer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

/// Opaque artifact bytes plus their type.
///
/// `kind` drives the primary-type byte in the container header ("beat",
/// "novel", "paper", ...); `mime` drives compression selection.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ArtifactLayer {
    pub kind: String,
    pub mime: String,
    pub data: Vec<u8>,
}

// =============================================================================
// META & LINEAGE
// =============================================================================

/// Epistemological stance of a DTU's content.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum EpistemicStance {
    /// Produced by an internal event the substrate itself observed
    #[serde(rename = "observed")]
    Observed,
    /// Reported by a registered external source
    #[serde(rename = "reported")]
    Reported,
    /// Two independent sources agree
    #[serde(rename = "corroborated-pending")]
    CorroboratedPending,
    /// Three or more independent sources agree
    #[serde(rename = "corroborated")]
    Corroborated,
}

/// Bridge-maintained metadata attached to every DTU.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DtuMeta {
    /// Marker that this DTU was created by the event bridge. Events whose
    /// source DTU carries this marker must not be bridged again.
    pub event_origin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_event_type: Option<String>,
    /// Topical domain assigned by the classifier; drives news clustering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub confidence: f64,
    pub stance: EpistemicStance,
    /// Composite credibility/relevance/evidence/timeliness/impact score, 0-100.
    pub creti_score: u8,
    /// First 16 hex chars of the digest over (type, data, id) of the raw event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_event_hash: Option<String>,
    /// Set when this DTU has been folded into a Mega/Hyper aggregate.
    #[serde(default)]
    pub compressed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compressed_into: Option<String>,
}

impl Default for DtuMeta {
    fn default() -> Self {
        Self {
            event_origin: false,
            source_event_type: None,
            domain: None,
            confidence: 0.5,
            stance: EpistemicStance::Observed,
            creti_score: 0,
            raw_event_hash: None,
            compressed: false,
            compressed_into: None,
        }
    }
}

/// Parent DTU ids and derivative relationship.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Lineage {
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derivative_type: Option<String>,
}

// =============================================================================
// DTU
// =============================================================================

/// Distillation Transfer Unit: the substrate's atomic content object.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Dtu {
    /// Stable, unique textual id (`evtdtu_...`, `mega_...`, ...)
    pub id: String,
    pub title: String,
    pub creator_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tier: DtuTier,
    pub scope: ScopeFlags,
    /// Monotonic; may only increase, via the federation promotion path.
    pub federation_tier: FederationTier,
    /// Immutable once set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_regional: Option<String>,
    /// Immutable once set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_national: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human: Option<HumanLayer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core: Option<CoreLayer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine: Option<MachineLayer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactLayer>,
    pub meta: DtuMeta,
    #[serde(default)]
    pub lineage: Lineage,
}

impl Dtu {
    /// Create a regular knowledge DTU with defaults for everything not given.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        creator_id: impl Into<String>,
        scope: ScopeFlags,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            creator_id: creator_id.into(),
            created_at: now,
            updated_at: now,
            tier: DtuTier::Regular,
            scope,
            federation_tier: FederationTier::Local,
            location_regional: None,
            location_national: None,
            human: None,
            core: None,
            machine: None,
            artifact: None,
            meta: DtuMeta::default(),
            lineage: Lineage::default(),
        }
    }

    /// Age in whole hours relative to `now`.
    pub fn age_hours(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_hours()
    }
}

// =============================================================================
// SUBSCRIPTION MODEL
// =============================================================================

/// Per-user news delivery filters.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NewsFilters {
    /// Minimum CRETI score, 0-100
    pub min_creti: u8,
    /// Minimum confidence, 0.0-1.0
    pub min_confidence: f64,
    /// Notification budget per sliding hour
    pub max_per_hour: u32,
    /// Event types the user never wants surfaced
    #[serde(default)]
    pub muted_types: BTreeSet<String>,
}

impl Default for NewsFilters {
    fn default() -> Self {
        Self {
            min_creti: 0,
            min_confidence: 0.0,
            max_per_hour: 20,
            muted_types: BTreeSet::new(),
        }
    }
}

/// Local substrate placement preferences.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LocalSubstrate {
    /// Restrict the local substrate to subscribed lenses only
    pub scope_to_subscribed: bool,
    /// Admit event-bridge DTUs into the local substrate
    pub allow_event_dtus: bool,
}

impl Default for LocalSubstrate {
    fn default() -> Self {
        Self {
            scope_to_subscribed: true,
            allow_event_dtus: true,
        }
    }
}

/// One subscription per user. Drives the pull-only scope router.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Subscription {
    pub user_id: String,
    pub subscribed_lenses: BTreeSet<String>,
    #[serde(default)]
    pub news_filters: NewsFilters,
    #[serde(default)]
    pub local_substrate: LocalSubstrate,
}

impl Subscription {
    pub fn new(user_id: impl Into<String>, lenses: impl IntoIterator<Item = String>) -> Self {
        Self {
            user_id: user_id.into(),
            subscribed_lenses: lenses.into_iter().collect(),
            news_filters: NewsFilters::default(),
            local_substrate: LocalSubstrate::default(),
        }
    }
}
