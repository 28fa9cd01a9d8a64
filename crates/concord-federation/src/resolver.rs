//! Federated query resolver
//!
//! Walks the tier ladder upward from the query's origin, stopping at the
//! first tier whose search is sufficient. Results found above the origin
//! are session-ephemeral and never persisted downward; downward assistance
//! is pull-only-on-query. A query resolved above its origin appends one
//! escalation row (origin → resolved tier, with the hop count).

use crate::registry::{FederationError, FederationRegistry};
use concord_core::types::FederationTier;
use thiserror::Error;
use tracing::debug;

/// Resolver errors
#[derive(Debug, Error)]
pub enum ResolverError {
    /// No tier, up to and including global, answered the query.
    #[error("exhausted")]
    Exhausted,
    #[error(transparent)]
    Registry(#[from] FederationError),
}

/// One search hit.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryHit {
    pub dtu_id: String,
    pub title: String,
}

/// What a tier's search reported.
#[derive(Clone, Debug, Default)]
pub struct TierSearch {
    /// True when this tier's results answer the query.
    pub sufficient: bool,
    pub hits: Vec<QueryHit>,
}

/// A resolved query.
#[derive(Clone, Debug)]
pub struct Resolution {
    pub resolved_at: FederationTier,
    pub hits: Vec<QueryHit>,
    /// True when resolved above the origin tier.
    pub ephemeral: bool,
    /// `Some("session")` for ephemeral results.
    pub expires_after: Option<&'static str>,
    /// True only for at-origin results, which land in the user's local
    /// substrate.
    pub persisted: bool,
    /// Number of tier transitions taken.
    pub escalations: u32,
}

/// Resolve a query starting at `origin`, calling `search_fn` per tier.
pub fn resolve_query<F>(
    registry: &FederationRegistry,
    query: &str,
    origin: FederationTier,
    mut search_fn: F,
) -> Result<Resolution, ResolverError>
where
    F: FnMut(&str, FederationTier) -> TierSearch,
{
    let mut tier = origin;
    let mut escalations = 0u32;

    loop {
        let search = search_fn(query, tier);
        if search.sufficient {
            let ephemeral = tier != origin;
            if ephemeral {
                registry.append_escalation(query, origin, tier, escalations)?;
            }
            debug!(%query, resolved_at = %tier, ephemeral, "query resolved");
            return Ok(Resolution {
                resolved_at: tier,
                hits: search.hits,
                ephemeral,
                expires_after: ephemeral.then_some("session"),
                persisted: !ephemeral,
                escalations,
            });
        }

        match tier.next() {
            Some(next) => {
                escalations += 1;
                tier = next;
            }
            None => return Err(ResolverError::Exhausted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry() -> (FederationRegistry, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        (FederationRegistry::open(&db).unwrap(), dir)
    }

    fn hit(id: &str) -> QueryHit {
        QueryHit {
            dtu_id: id.to_string(),
            title: id.to_string(),
        }
    }

    #[test]
    fn test_resolved_at_origin_persists() {
        let (registry, _dir) = test_registry();
        let resolution = resolve_query(&registry, "q", FederationTier::Local, |_, tier| TierSearch {
            sufficient: tier == FederationTier::Local,
            hits: vec![hit("dtu_local")],
        })
        .unwrap();

        assert_eq!(resolution.resolved_at, FederationTier::Local);
        assert!(!resolution.ephemeral);
        assert!(resolution.persisted);
        assert_eq!(resolution.expires_after, None);
        assert_eq!(resolution.escalations, 0);
        assert_eq!(registry.escalation_count(), 0);
    }

    #[test]
    fn test_escalation_to_national_is_ephemeral() {
        let (registry, _dir) = test_registry();
        let resolution = resolve_query(&registry, "q", FederationTier::Local, |_, tier| TierSearch {
            sufficient: tier == FederationTier::National,
            hits: if tier == FederationTier::National {
                vec![hit("dtu_nat")]
            } else {
                vec![]
            },
        })
        .unwrap();

        assert_eq!(resolution.resolved_at, FederationTier::National);
        assert!(resolution.ephemeral);
        assert!(!resolution.persisted);
        assert_eq!(resolution.expires_after, Some("session"));
        assert_eq!(resolution.escalations, 2);

        // Exactly one escalation row: origin to resolved tier.
        let rows = registry.all_escalations().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].from_tier, FederationTier::Local);
        assert_eq!(rows[0].to_tier, FederationTier::National);
        assert_eq!(rows[0].hops, 2);
    }

    #[test]
    fn test_origin_above_local_starts_there() {
        let (registry, _dir) = test_registry();
        let mut tiers_searched = Vec::new();
        let resolution = resolve_query(&registry, "q", FederationTier::National, |_, tier| {
            tiers_searched.push(tier);
            TierSearch {
                sufficient: true,
                hits: vec![hit("dtu_nat")],
            }
        })
        .unwrap();
        assert_eq!(tiers_searched, vec![FederationTier::National]);
        assert!(!resolution.ephemeral);
    }

    #[test]
    fn test_exhausted_when_no_tier_answers() {
        let (registry, _dir) = test_registry();
        let result = resolve_query(&registry, "q", FederationTier::Local, |_, _| TierSearch {
            sufficient: false,
            hits: vec![],
        });
        assert!(matches!(result, Err(ResolverError::Exhausted)));
        assert_eq!(result.unwrap_err().to_string(), "exhausted");
        // No resolution, no escalation row.
        assert_eq!(registry.escalation_count(), 0);
    }
}
