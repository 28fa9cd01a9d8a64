//! Lens adapter records
//!
//! A lens is an external adapter describing how content of a domain maps
//! to DTUs. Adapters are capability records — flags and sub-records per
//! concern — not trait objects; the compliance phases are pure predicates
//! over this record.

use serde::{Deserialize, Serialize};

/// Lens classification, fixed at registration.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum LensClassification {
    Knowledge,
    Creative,
    Social,
    Culture,
    Utility,
    Hybrid,
}

impl LensClassification {
    pub const ALL: [LensClassification; 6] = [
        Self::Knowledge,
        Self::Creative,
        Self::Social,
        Self::Culture,
        Self::Utility,
        Self::Hybrid,
    ];
}

/// Content protection mode.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProtectionMode {
    Open,
    Moderated,
    Isolated,
}

/// Lifecycle status of a registered lens.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LensStatus {
    /// Registered but failed a compliance check; held until fixed.
    PendingCompliance,
    Active,
    /// Failed a nightly audit.
    Disabled,
}

/// DTU bridge capabilities.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DtuBridgeCaps {
    pub can_create: bool,
    pub can_validate: bool,
    /// Event types this lens may emit into the bridge.
    #[serde(default)]
    pub event_types: Vec<String>,
}

/// Container file encode/decode capabilities.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct FileFormatCaps {
    pub encode: bool,
    pub decode: bool,
}

/// Marketplace surface.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct MarketplaceCaps {
    pub enabled: bool,
    #[serde(default)]
    pub listing_types: Vec<String>,
}

/// Isolation rules (mandatory for CULTURE lenses).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct IsolationConfig {
    pub cross_lens_visibility: bool,
    pub chronological_feed_only: bool,
}

/// One quest reward. Coin and XP are mutually exclusive.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct QuestReward {
    pub xp: u32,
    pub coin: u32,
}

/// Quest surface.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct QuestConfig {
    pub enabled: bool,
    #[serde(default)]
    pub rewards: Vec<QuestReward>,
}

/// Search surface.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchCaps {
    pub enabled: bool,
    pub citation_enabled: bool,
}

/// API surface.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ApiCaps {
    pub render: bool,
    pub create: bool,
}

/// Export surface.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ExportCaps {
    pub enabled: bool,
    #[serde(default)]
    pub formats: Vec<String>,
}

/// The full lens adapter registration record.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LensAdapter {
    pub id: String,
    pub name: String,
    pub classification: LensClassification,
    pub creator_id: String,
    /// True when the creator is an emergent (non-human) entity.
    pub creator_is_emergent: bool,
    pub protection: ProtectionMode,
    /// A lens config may ask for a different protection mode; an ISOLATED
    /// assignment can never be overridden this way.
    #[serde(default)]
    pub protection_override: Option<ProtectionMode>,
    pub dtu_bridge: DtuBridgeCaps,
    pub file_format: FileFormatCaps,
    pub federation_enabled: bool,
    #[serde(default)]
    pub marketplace: Option<MarketplaceCaps>,
    #[serde(default)]
    pub isolation: Option<IsolationConfig>,
    #[serde(default)]
    pub quests: Option<QuestConfig>,
    pub search: SearchCaps,
    pub api: ApiCaps,
    #[serde(default)]
    pub export: Option<ExportCaps>,
}

impl LensAdapter {
    /// A minimal well-formed knowledge lens, for registration defaults and
    /// tests.
    pub fn knowledge(id: impl Into<String>, creator_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            classification: LensClassification::Knowledge,
            creator_id: creator_id.into(),
            creator_is_emergent: false,
            protection: ProtectionMode::Open,
            protection_override: None,
            dtu_bridge: DtuBridgeCaps {
                can_create: true,
                can_validate: true,
                event_types: Vec::new(),
            },
            file_format: FileFormatCaps {
                encode: true,
                decode: true,
            },
            federation_enabled: true,
            marketplace: None,
            isolation: None,
            quests: None,
            search: SearchCaps {
                enabled: true,
                citation_enabled: true,
            },
            api: ApiCaps {
                render: true,
                create: true,
            },
            export: Some(ExportCaps {
                enabled: true,
                formats: vec!["dtu".to_string()],
            }),
        }
    }

    /// A well-formed culture lens honoring the isolation constitution.
    pub fn culture(id: impl Into<String>, creator_id: impl Into<String>) -> Self {
        let mut adapter = Self::knowledge(id, creator_id);
        adapter.classification = LensClassification::Culture;
        adapter.protection = ProtectionMode::Isolated;
        adapter.federation_enabled = false;
        adapter.isolation = Some(IsolationConfig {
            cross_lens_visibility: false,
            chronological_feed_only: true,
        });
        adapter.marketplace = None;
        adapter.search = SearchCaps {
            enabled: true,
            citation_enabled: false,
        };
        adapter.export = None;
        adapter
    }
}
