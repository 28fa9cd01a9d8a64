//! Monotonic tier promotion
//!
//! Federation flow is UP_ONLY: a DTU's federation tier may only increase,
//! locations are write-once, and every accepted promotion appends one
//! history row. There is no API that lowers a tier.

use crate::gates::{self, GateFailure, GateInputs};
use crate::registry::{FederationError, FederationRegistry};
use chrono::{DateTime, Utc};
use concord_core::types::{Dtu, FederationTier};
use thiserror::Error;
use tracing::info;

/// Promotion errors
#[derive(Debug, Error)]
pub enum PromotionError {
    #[error("cannot_demote")]
    CannotDemote,
    #[error("location_already_set")]
    LocationAlreadySet,
    #[error("quality_gates_failed: {}", failed_gate_names(.failures))]
    GatesFailed { failures: Vec<GateFailure> },
    #[error(transparent)]
    Registry(#[from] FederationError),
}

fn failed_gate_names(failures: &[GateFailure]) -> String {
    failures
        .iter()
        .map(|f| f.gate)
        .collect::<Vec<_>>()
        .join(",")
}

/// Receipt for an accepted promotion.
#[derive(Clone, Debug)]
pub struct PromotionReceipt {
    pub dtu_id: String,
    pub from_tier: FederationTier,
    pub to_tier: FederationTier,
    pub promoted_at: DateTime<Utc>,
}

/// Assign a DTU's regional location. Write-once: a second assignment with
/// a different value is refused.
pub fn assign_regional_location(dtu: &mut Dtu, region: &str) -> Result<(), PromotionError> {
    match &dtu.location_regional {
        Some(existing) if existing != region => Err(PromotionError::LocationAlreadySet),
        Some(_) => Ok(()),
        None => {
            dtu.location_regional = Some(region.to_string());
            Ok(())
        }
    }
}

/// Assign a DTU's national location. Write-once.
pub fn assign_national_location(dtu: &mut Dtu, national: &str) -> Result<(), PromotionError> {
    match &dtu.location_national {
        Some(existing) if existing != national => Err(PromotionError::LocationAlreadySet),
        Some(_) => Ok(()),
        None => {
            dtu.location_national = Some(national.to_string());
            Ok(())
        }
    }
}

/// Promote a DTU to `target`.
///
/// Rank must strictly increase, all target-tier quality gates must pass,
/// and the history row is appended before the in-memory tier changes. The
/// caller persists the mutated DTU.
pub fn promote(
    registry: &FederationRegistry,
    dtu: &mut Dtu,
    target: FederationTier,
    inputs: &GateInputs,
    now: DateTime<Utc>,
) -> Result<PromotionReceipt, PromotionError> {
    let current = dtu.federation_tier;
    if target.rank() <= current.rank() {
        return Err(PromotionError::CannotDemote);
    }

    let outcome = gates::evaluate(target, inputs);
    if !outcome.ok {
        return Err(PromotionError::GatesFailed {
            failures: outcome.failures,
        });
    }

    registry.append_promotion(&dtu.id, current, target, now)?;
    dtu.federation_tier = target;
    dtu.updated_at = now;

    info!(dtu = %dtu.id, from = %current, to = %target, "dtu promoted");
    Ok(PromotionReceipt {
        dtu_id: dtu.id.clone(),
        from_tier: current,
        to_tier: target,
        promoted_at: now,
    })
}

/// Tag a freshly ingested DTU at an initial tier above local, subject to
/// the same gates as promotion.
pub fn tag_initial_tier(
    registry: &FederationRegistry,
    dtu: &mut Dtu,
    target: FederationTier,
    inputs: &GateInputs,
    now: DateTime<Utc>,
) -> Result<Option<PromotionReceipt>, PromotionError> {
    if target == FederationTier::Local {
        return Ok(None);
    }
    promote(registry, dtu, target, inputs, now).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::types::{DtuTier, ScopeFlags};

    fn test_registry() -> (FederationRegistry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        (FederationRegistry::open(&db).unwrap(), dir)
    }

    fn test_dtu() -> Dtu {
        let mut dtu = Dtu::new(
            "dtu_promo",
            "Promotable",
            "u1",
            ScopeFlags::knowledge(vec!["science".to_string()]),
            Utc::now(),
        );
        dtu.tier = DtuTier::Regular;
        dtu
    }

    fn passing_inputs() -> GateInputs {
        GateInputs {
            authority_score: 0.9,
            citation_count: 20,
            age_hours: 2000,
            internal_tier: DtuTier::Regular,
            cross_regional_presence: 4,
            council_votes: 9,
        }
    }

    #[test]
    fn test_promote_then_demote_refused() {
        let (registry, _dir) = test_registry();
        let mut dtu = test_dtu();
        assign_regional_location(&mut dtu, "detroit").unwrap();

        let receipt = promote(
            &registry,
            &mut dtu,
            FederationTier::Regional,
            &passing_inputs(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(receipt.from_tier, FederationTier::Local);
        assert_eq!(dtu.federation_tier, FederationTier::Regional);

        let demotion = promote(
            &registry,
            &mut dtu,
            FederationTier::Local,
            &passing_inputs(),
            Utc::now(),
        );
        assert!(matches!(demotion, Err(PromotionError::CannotDemote)));
        assert_eq!(demotion.unwrap_err().to_string(), "cannot_demote");
    }

    #[test]
    fn test_same_tier_refused() {
        let (registry, _dir) = test_registry();
        let mut dtu = test_dtu();
        promote(
            &registry,
            &mut dtu,
            FederationTier::Regional,
            &passing_inputs(),
            Utc::now(),
        )
        .unwrap();
        assert!(matches!(
            promote(
                &registry,
                &mut dtu,
                FederationTier::Regional,
                &passing_inputs(),
                Utc::now()
            ),
            Err(PromotionError::CannotDemote)
        ));
    }

    #[test]
    fn test_each_step_appends_history() {
        let (registry, _dir) = test_registry();
        let mut dtu = test_dtu();
        dtu.tier = DtuTier::Mega;

        let mut inputs = passing_inputs();
        inputs.internal_tier = DtuTier::Mega;

        for target in [
            FederationTier::Regional,
            FederationTier::National,
            FederationTier::Global,
        ] {
            promote(&registry, &mut dtu, target, &inputs, Utc::now()).unwrap();
        }

        let history = registry.promotion_history("dtu_promo").unwrap();
        assert_eq!(history.len(), 3);
        for pair in history.windows(2) {
            assert!(pair[1].to_tier.rank() > pair[0].to_tier.rank());
        }
    }

    #[test]
    fn test_gate_failure_blocks_promotion() {
        let (registry, _dir) = test_registry();
        let mut dtu = test_dtu();
        let weak = GateInputs {
            authority_score: 0.05,
            ..passing_inputs()
        };
        let result = promote(&registry, &mut dtu, FederationTier::Regional, &weak, Utc::now());
        assert!(matches!(result, Err(PromotionError::GatesFailed { .. })));
        assert_eq!(dtu.federation_tier, FederationTier::Local);
        assert!(registry.promotion_history("dtu_promo").unwrap().is_empty());
    }

    #[test]
    fn test_locations_write_once() {
        let mut dtu = test_dtu();
        assign_regional_location(&mut dtu, "detroit").unwrap();
        // Re-assigning the same value is a no-op.
        assign_regional_location(&mut dtu, "detroit").unwrap();
        assert!(matches!(
            assign_regional_location(&mut dtu, "chicago"),
            Err(PromotionError::LocationAlreadySet)
        ));

        assign_national_location(&mut dtu, "us").unwrap();
        assert!(matches!(
            assign_national_location(&mut dtu, "ca"),
            Err(PromotionError::LocationAlreadySet)
        ));
        assert_eq!(dtu.location_regional.as_deref(), Some("detroit"));
        assert_eq!(dtu.location_national.as_deref(), Some("us"));
    }
}
