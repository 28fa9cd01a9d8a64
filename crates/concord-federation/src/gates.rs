//! Quality gates for federation tier promotion
//!
//! Promotion into a tier is accepted only when every predicate for that
//! tier holds. A failing evaluation reports each failed gate with the
//! required and actual values, for operator debugging.

use concord_core::types::{DtuTier, FederationTier};

/// Inputs the gate predicates judge.
#[derive(Clone, Copy, Debug)]
pub struct GateInputs {
    pub authority_score: f64,
    pub citation_count: u32,
    pub age_hours: i64,
    pub internal_tier: DtuTier,
    /// Distinct regions where the DTU has been referenced.
    pub cross_regional_presence: u32,
    pub council_votes: u32,
}

/// Thresholds for entering one target tier.
#[derive(Clone, Copy, Debug)]
pub struct GateThresholds {
    pub min_authority: f64,
    pub min_citations: u32,
    pub min_age_hours: i64,
    pub required_votes: u32,
    pub min_cross_regional: u32,
    pub allowed_tiers: &'static [DtuTier],
}

/// One failed predicate.
#[derive(Clone, Debug, PartialEq)]
pub struct GateFailure {
    pub gate: &'static str,
    pub required: String,
    pub actual: String,
}

/// Evaluation result: `ok` iff `failures` is empty.
#[derive(Clone, Debug)]
pub struct GateOutcome {
    pub ok: bool,
    pub failures: Vec<GateFailure>,
}

/// Thresholds per target tier. Local has no entry gates: it is where DTUs
/// are born.
pub fn thresholds_for(target: FederationTier) -> Option<GateThresholds> {
    match target {
        FederationTier::Local => None,
        FederationTier::Regional => Some(GateThresholds {
            min_authority: 0.15,
            min_citations: 0,
            min_age_hours: 0,
            required_votes: 0,
            min_cross_regional: 0,
            allowed_tiers: &[DtuTier::Regular, DtuTier::Mega, DtuTier::Hyper],
        }),
        FederationTier::National => Some(GateThresholds {
            min_authority: 0.40,
            min_citations: 3,
            min_age_hours: 48,
            required_votes: 5,
            min_cross_regional: 0,
            allowed_tiers: &[DtuTier::Regular, DtuTier::Mega, DtuTier::Hyper],
        }),
        FederationTier::Global => Some(GateThresholds {
            min_authority: 0.70,
            min_citations: 10,
            min_age_hours: 720,
            required_votes: 7,
            min_cross_regional: 3,
            allowed_tiers: &[DtuTier::Mega, DtuTier::Hyper],
        }),
    }
}

/// Evaluate all predicates for entering `target`.
pub fn evaluate(target: FederationTier, inputs: &GateInputs) -> GateOutcome {
    let Some(thresholds) = thresholds_for(target) else {
        return GateOutcome { ok: true, failures: Vec::new() };
    };

    let mut failures = Vec::new();

    if inputs.authority_score < thresholds.min_authority {
        failures.push(GateFailure {
            gate: "authority_score",
            required: format!(">= {}", thresholds.min_authority),
            actual: format!("{}", inputs.authority_score),
        });
    }
    if inputs.citation_count < thresholds.min_citations {
        failures.push(GateFailure {
            gate: "citation_count",
            required: format!(">= {}", thresholds.min_citations),
            actual: format!("{}", inputs.citation_count),
        });
    }
    if inputs.age_hours < thresholds.min_age_hours {
        failures.push(GateFailure {
            gate: "age_hours",
            required: format!(">= {}", thresholds.min_age_hours),
            actual: format!("{}", inputs.age_hours),
        });
    }
    if !thresholds.allowed_tiers.contains(&inputs.internal_tier) {
        failures.push(GateFailure {
            gate: "internal_tier",
            required: format!("{:?}", thresholds.allowed_tiers),
            actual: format!("{:?}", inputs.internal_tier),
        });
    }
    if inputs.cross_regional_presence < thresholds.min_cross_regional {
        failures.push(GateFailure {
            gate: "cross_regional_presence",
            required: format!(">= {}", thresholds.min_cross_regional),
            actual: format!("{}", inputs.cross_regional_presence),
        });
    }
    if inputs.council_votes < thresholds.required_votes {
        failures.push(GateFailure {
            gate: "council_votes",
            required: format!(">= {}", thresholds.required_votes),
            actual: format!("{}", inputs.council_votes),
        });
    }

    GateOutcome { ok: failures.is_empty(), failures }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strong_inputs() -> GateInputs {
        GateInputs {
            authority_score: 0.9,
            citation_count: 20,
            age_hours: 2000,
            internal_tier: DtuTier::Mega,
            cross_regional_presence: 5,
            council_votes: 9,
        }
    }

    #[test]
    fn test_regional_gates_are_permissive() {
        let inputs = GateInputs {
            authority_score: 0.2,
            citation_count: 0,
            age_hours: 0,
            internal_tier: DtuTier::Regular,
            cross_regional_presence: 0,
            council_votes: 0,
        };
        assert!(evaluate(FederationTier::Regional, &inputs).ok);
    }

    #[test]
    fn test_shadow_tier_never_promotes() {
        let inputs = GateInputs {
            internal_tier: DtuTier::Shadow,
            ..strong_inputs()
        };
        let outcome = evaluate(FederationTier::Regional, &inputs);
        assert!(!outcome.ok);
        assert_eq!(outcome.failures[0].gate, "internal_tier");
    }

    #[test]
    fn test_national_needs_votes_and_age() {
        let inputs = GateInputs {
            authority_score: 0.5,
            citation_count: 3,
            age_hours: 10,
            internal_tier: DtuTier::Regular,
            cross_regional_presence: 0,
            council_votes: 2,
        };
        let outcome = evaluate(FederationTier::National, &inputs);
        assert!(!outcome.ok);
        let gates: Vec<&str> = outcome.failures.iter().map(|f| f.gate).collect();
        assert!(gates.contains(&"age_hours"));
        assert!(gates.contains(&"council_votes"));
    }

    #[test]
    fn test_global_requires_cross_regional_and_aggregate_tier() {
        let inputs = GateInputs {
            internal_tier: DtuTier::Regular,
            cross_regional_presence: 1,
            ..strong_inputs()
        };
        let outcome = evaluate(FederationTier::Global, &inputs);
        assert!(!outcome.ok);
        let gates: Vec<&str> = outcome.failures.iter().map(|f| f.gate).collect();
        assert!(gates.contains(&"internal_tier"));
        assert!(gates.contains(&"cross_regional_presence"));

        assert!(evaluate(FederationTier::Global, &strong_inputs()).ok);
    }

    #[test]
    fn test_failure_reports_required_and_actual() {
        let inputs = GateInputs {
            authority_score: 0.1,
            ..strong_inputs()
        };
        let outcome = evaluate(FederationTier::Global, &inputs);
        let failure = &outcome.failures[0];
        assert_eq!(failure.gate, "authority_score");
        assert_eq!(failure.required, ">= 0.7");
        assert_eq!(failure.actual, "0.1");
    }
}
