//! The twelve compliance phases
//!
//! Each phase is an orthogonal, deterministic predicate over the adapter
//! record. Phases that do not apply to a lens's classification are marked
//! skipped, never passed.

use crate::adapter::{LensAdapter, LensClassification, ProtectionMode};
use serde::{Deserialize, Serialize};

/// The twelve phases, in execution order.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Structure,
    DtuBridge,
    DtuFileFormat,
    Federation,
    Marketplace,
    Protection,
    CultureIsolation,
    Quests,
    Creative,
    Search,
    Api,
    Export,
}

impl Phase {
    pub const ALL: [Phase; 12] = [
        Self::Structure,
        Self::DtuBridge,
        Self::DtuFileFormat,
        Self::Federation,
        Self::Marketplace,
        Self::Protection,
        Self::CultureIsolation,
        Self::Quests,
        Self::Creative,
        Self::Search,
        Self::Api,
        Self::Export,
    ];

    /// Which classifications a phase applies to.
    pub fn applies_to(&self, classification: LensClassification) -> bool {
        use LensClassification::*;
        match self {
            Self::Structure | Self::DtuBridge | Self::DtuFileFormat | Self::Protection | Self::Api => {
                true
            }
            Self::Federation | Self::Marketplace => {
                matches!(classification, Knowledge | Creative | Utility | Hybrid)
            }
            Self::CultureIsolation => matches!(classification, Culture),
            Self::Quests => matches!(classification, Social | Creative | Hybrid),
            Self::Creative => matches!(classification, Creative | Hybrid),
            Self::Search => !matches!(classification, Culture),
            Self::Export => !matches!(classification, Culture),
        }
    }
}

/// Outcome of one check.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Passed,
    Failed,
    Skipped,
}

/// One phase result with the required/actual pair on failure.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CheckResult {
    pub phase: Phase,
    pub status: CheckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
}

impl CheckResult {
    fn passed(phase: Phase) -> Self {
        Self {
            phase,
            status: CheckStatus::Passed,
            required: None,
            actual: None,
        }
    }

    fn skipped(phase: Phase) -> Self {
        Self {
            phase,
            status: CheckStatus::Skipped,
            required: None,
            actual: None,
        }
    }

    fn failed(phase: Phase, required: impl Into<String>, actual: impl Into<String>) -> Self {
        Self {
            phase,
            status: CheckStatus::Failed,
            required: Some(required.into()),
            actual: Some(actual.into()),
        }
    }
}

/// Run all twelve phases against an adapter.
pub fn run_all(adapter: &LensAdapter) -> Vec<CheckResult> {
    Phase::ALL
        .iter()
        .map(|phase| {
            if phase.applies_to(adapter.classification) {
                check(*phase, adapter)
            } else {
                CheckResult::skipped(*phase)
            }
        })
        .collect()
}

/// Run one phase check. The caller has already verified applicability.
pub fn check(phase: Phase, adapter: &LensAdapter) -> CheckResult {
    match phase {
        Phase::Structure => {
            if adapter.id.is_empty() {
                CheckResult::failed(phase, "non-empty lens id", "empty")
            } else {
                CheckResult::passed(phase)
            }
        }
        Phase::DtuBridge => {
            if adapter.dtu_bridge.can_create || adapter.dtu_bridge.can_validate {
                CheckResult::passed(phase)
            } else {
                CheckResult::failed(phase, "create or validate capability", "neither")
            }
        }
        Phase::DtuFileFormat => {
            if adapter.file_format.encode && adapter.file_format.decode {
                CheckResult::passed(phase)
            } else {
                CheckResult::failed(
                    phase,
                    "encode and decode",
                    format!(
                        "encode={} decode={}",
                        adapter.file_format.encode, adapter.file_format.decode
                    ),
                )
            }
        }
        Phase::Federation => {
            // A federating lens must be able to mint DTUs to send upward.
            if adapter.federation_enabled && !adapter.dtu_bridge.can_create {
                CheckResult::failed(phase, "dtu_bridge.can_create for federation", "cannot create")
            } else {
                CheckResult::passed(phase)
            }
        }
        Phase::Marketplace => match &adapter.marketplace {
            Some(marketplace) if marketplace.enabled && marketplace.listing_types.is_empty() => {
                CheckResult::failed(phase, "at least one listing type", "none")
            }
            _ => CheckResult::passed(phase),
        },
        Phase::Protection => {
            // Constitutional: ISOLATED cannot be overridden by lens config.
            if adapter.protection == ProtectionMode::Isolated
                && adapter
                    .protection_override
                    .is_some_and(|o| o != ProtectionMode::Isolated)
            {
                CheckResult::failed(phase, "isolated protection not overridable", "override present")
            } else {
                CheckResult::passed(phase)
            }
        }
        Phase::CultureIsolation => {
            let Some(isolation) = &adapter.isolation else {
                return CheckResult::failed(phase, "isolation config", "absent");
            };
            if isolation.cross_lens_visibility {
                return CheckResult::failed(
                    phase,
                    "cross_lens_visibility=false",
                    "cross_lens_visibility=true",
                );
            }
            if !isolation.chronological_feed_only {
                return CheckResult::failed(phase, "chronological feed only", "ranked feed");
            }
            if adapter.marketplace.as_ref().is_some_and(|m| m.enabled) {
                return CheckResult::failed(phase, "no marketplace", "marketplace enabled");
            }
            if adapter.search.citation_enabled {
                return CheckResult::failed(phase, "no citation", "citation enabled");
            }
            if adapter.export.as_ref().is_some_and(|e| e.enabled) {
                return CheckResult::failed(phase, "no export", "export enabled");
            }
            CheckResult::passed(phase)
        }
        Phase::Quests => {
            let Some(quests) = &adapter.quests else {
                return CheckResult::passed(phase);
            };
            // Constitutional: no quest rewards coin alongside XP.
            match quests.rewards.iter().find(|r| r.xp > 0 && r.coin > 0) {
                Some(reward) => CheckResult::failed(
                    phase,
                    "xp or coin, not both",
                    format!("xp={} coin={}", reward.xp, reward.coin),
                ),
                None => CheckResult::passed(phase),
            }
        }
        Phase::Creative => {
            if adapter.dtu_bridge.can_create {
                CheckResult::passed(phase)
            } else {
                CheckResult::failed(phase, "creative lens mints DTUs", "cannot create")
            }
        }
        Phase::Search => {
            if adapter.search.citation_enabled && !adapter.search.enabled {
                CheckResult::failed(phase, "search enabled when citation is", "search disabled")
            } else {
                CheckResult::passed(phase)
            }
        }
        Phase::Api => {
            if adapter.api.render {
                CheckResult::passed(phase)
            } else {
                CheckResult::failed(phase, "render capability", "absent")
            }
        }
        Phase::Export => match &adapter.export {
            Some(export) if export.enabled && export.formats.is_empty() => {
                CheckResult::failed(phase, "at least one export format", "none")
            }
            _ => CheckResult::passed(phase),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{QuestConfig, QuestReward};

    #[test]
    fn test_well_formed_knowledge_lens_passes() {
        let adapter = LensAdapter::knowledge("lens_k", "alice");
        let results = run_all(&adapter);
        assert_eq!(results.len(), 12);
        assert!(results.iter().all(|r| r.status != CheckStatus::Failed));
        // Culture isolation does not apply to a knowledge lens.
        let culture = results
            .iter()
            .find(|r| r.phase == Phase::CultureIsolation)
            .unwrap();
        assert_eq!(culture.status, CheckStatus::Skipped);
    }

    #[test]
    fn test_well_formed_culture_lens_passes() {
        let adapter = LensAdapter::culture("lens_c", "alice");
        let results = run_all(&adapter);
        assert!(results.iter().all(|r| r.status != CheckStatus::Failed));
        let culture = results
            .iter()
            .find(|r| r.phase == Phase::CultureIsolation)
            .unwrap();
        assert_eq!(culture.status, CheckStatus::Passed);
    }

    #[test]
    fn test_culture_lens_cannot_be_visible_across_lenses() {
        let mut adapter = LensAdapter::culture("lens_c", "alice");
        adapter.isolation.as_mut().unwrap().cross_lens_visibility = true;
        let results = run_all(&adapter);
        let culture = results
            .iter()
            .find(|r| r.phase == Phase::CultureIsolation)
            .unwrap();
        assert_eq!(culture.status, CheckStatus::Failed);
    }

    #[test]
    fn test_isolated_protection_not_overridable() {
        let mut adapter = LensAdapter::knowledge("lens_k", "alice");
        adapter.protection = ProtectionMode::Isolated;
        adapter.protection_override = Some(ProtectionMode::Open);
        let result = check(Phase::Protection, &adapter);
        assert_eq!(result.status, CheckStatus::Failed);

        // Overriding isolated with isolated is a no-op, not a violation.
        adapter.protection_override = Some(ProtectionMode::Isolated);
        assert_eq!(check(Phase::Protection, &adapter).status, CheckStatus::Passed);
    }

    #[test]
    fn test_no_coin_plus_xp_rewards() {
        let mut adapter = LensAdapter::knowledge("lens_q", "alice");
        adapter.classification = LensClassification::Social;
        adapter.quests = Some(QuestConfig {
            enabled: true,
            rewards: vec![QuestReward { xp: 10, coin: 5 }],
        });
        let result = check(Phase::Quests, &adapter);
        assert_eq!(result.status, CheckStatus::Failed);
        assert_eq!(result.required.as_deref(), Some("xp or coin, not both"));

        adapter.quests = Some(QuestConfig {
            enabled: true,
            rewards: vec![QuestReward { xp: 10, coin: 0 }, QuestReward { xp: 0, coin: 5 }],
        });
        assert_eq!(check(Phase::Quests, &adapter).status, CheckStatus::Passed);
    }

    #[test]
    fn test_file_format_requires_both_directions() {
        let mut adapter = LensAdapter::knowledge("lens_f", "alice");
        adapter.file_format.decode = false;
        let result = check(Phase::DtuFileFormat, &adapter);
        assert_eq!(result.status, CheckStatus::Failed);
        assert!(result.actual.as_deref().unwrap().contains("decode=false"));
    }
}
