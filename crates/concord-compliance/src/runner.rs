//! Compliance runner
//!
//! Registration runs all twelve phases and holds failing lenses in
//! `pending_compliance`; the nightly audit re-runs them and disables any
//! lens that regressed. Per-creator quotas are enforced at registration.

use crate::adapter::{LensAdapter, LensStatus};
use crate::phases::{self, CheckResult, CheckStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Maximum lenses a human user may register.
pub const USER_LENS_LIMIT: usize = 10;
/// Maximum lenses an emergent entity may register.
pub const EMERGENT_LENS_LIMIT: usize = 5;

/// Compliance runner errors
#[derive(Debug, Error)]
pub enum ComplianceError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("row encoding error: {0}")]
    Row(#[from] serde_json::Error),
    #[error("lens_not_found: {0}")]
    LensNotFound(String),
    #[error("lens_limit_exceeded")]
    LensLimitExceeded,
}

/// Stored lens row: the adapter plus its lifecycle status.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LensRow {
    pub adapter: LensAdapter,
    pub status: LensStatus,
    pub registered_at: DateTime<Utc>,
    pub last_audited_at: Option<DateTime<Utc>>,
}

/// Result of one registration.
#[derive(Clone, Debug)]
pub struct RegistrationOutcome {
    pub lens_id: String,
    pub status: LensStatus,
    pub results: Vec<CheckResult>,
}

/// Summary of one nightly audit.
#[derive(Clone, Copy, Debug, Default)]
pub struct AuditReport {
    pub lenses_checked: usize,
    pub lenses_failed: usize,
    pub lenses_disabled: usize,
}

/// Upgrade propagation state for a lens.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UpgradeStatus {
    pub lens_id: String,
    pub target_version: String,
    pub completed: bool,
    pub updated_at: DateTime<Utc>,
}

/// The compliance runner over its registry trees.
pub struct ComplianceRunner {
    lenses: sled::Tree,
    results: sled::Tree,
    audits: sled::Tree,
    upgrades: sled::Tree,
}

impl ComplianceRunner {
    /// Open the runner's trees on a shared database.
    pub fn open(db: &sled::Db) -> Result<Self, ComplianceError> {
        Ok(Self {
            lenses: db.open_tree("lens_registry")?,
            results: db.open_tree("lens_compliance_results")?,
            audits: db.open_tree("lens_audits")?,
            upgrades: db.open_tree("lens_upgrade_status")?,
        })
    }

    /// Register a lens: enforce the creator quota, run all phases, and
    /// hold the lens in `pending_compliance` if anything failed.
    pub fn register_lens(
        &self,
        adapter: LensAdapter,
    ) -> Result<RegistrationOutcome, ComplianceError> {
        let limit = if adapter.creator_is_emergent {
            EMERGENT_LENS_LIMIT
        } else {
            USER_LENS_LIMIT
        };
        if self.creator_lens_count(&adapter.creator_id)? >= limit {
            return Err(ComplianceError::LensLimitExceeded);
        }

        let results = phases::run_all(&adapter);
        let failed = results.iter().any(|r| r.status == CheckStatus::Failed);
        let status = if failed {
            LensStatus::PendingCompliance
        } else {
            LensStatus::Active
        };

        let row = LensRow {
            adapter,
            status,
            registered_at: Utc::now(),
            last_audited_at: None,
        };
        self.put_lens(&row)?;
        self.put_results(&row.adapter.id, &results)?;

        info!(lens = %row.adapter.id, ?status, "lens registered");
        Ok(RegistrationOutcome {
            lens_id: row.adapter.id,
            status,
            results,
        })
    }

    /// Re-run phases on every lens; disable regressions. One bad lens
    /// never stops the audit.
    pub fn nightly_audit(&self, now: DateTime<Utc>) -> Result<AuditReport, ComplianceError> {
        let mut report = AuditReport::default();
        for item in self.lenses.iter() {
            let (key, bytes) = item?;
            let mut row: LensRow = match serde_json::from_slice(&bytes) {
                Ok(row) => row,
                Err(e) => {
                    warn!(error = %e, "skipping undecodable lens row during audit");
                    continue;
                }
            };
            report.lenses_checked += 1;

            let results = phases::run_all(&row.adapter);
            let failed = results.iter().any(|r| r.status == CheckStatus::Failed);
            if failed {
                report.lenses_failed += 1;
                if row.status == LensStatus::Active {
                    row.status = LensStatus::Disabled;
                    report.lenses_disabled += 1;
                    warn!(lens = %row.adapter.id, "lens disabled by nightly audit");
                }
            } else if row.status == LensStatus::PendingCompliance {
                // A fixed lens graduates on the next audit.
                row.status = LensStatus::Active;
            }
            row.last_audited_at = Some(now);

            self.lenses.insert(&key, serde_json::to_vec(&row)?)?;
            self.put_results(&row.adapter.id, &results)?;
            self.audits.insert(
                format!("{}/{}", row.adapter.id, now.timestamp()).as_bytes(),
                serde_json::to_vec(&results)?,
            )?;
        }
        Ok(report)
    }

    /// Get a lens row.
    pub fn get_lens(&self, lens_id: &str) -> Result<Option<LensRow>, ComplianceError> {
        Ok(self
            .lenses
            .get(lens_id.as_bytes())?
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()?)
    }

    /// Latest compliance results for a lens.
    pub fn latest_results(&self, lens_id: &str) -> Result<Option<Vec<CheckResult>>, ComplianceError> {
        Ok(self
            .results
            .get(lens_id.as_bytes())?
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()?)
    }

    /// Mark a lens as needing an upgrade to `target_version`.
    pub fn mark_upgrade(
        &self,
        lens_id: &str,
        target_version: &str,
    ) -> Result<UpgradeStatus, ComplianceError> {
        if self.get_lens(lens_id)?.is_none() {
            return Err(ComplianceError::LensNotFound(lens_id.to_string()));
        }
        let status = UpgradeStatus {
            lens_id: lens_id.to_string(),
            target_version: target_version.to_string(),
            completed: false,
            updated_at: Utc::now(),
        };
        self.upgrades
            .insert(lens_id.as_bytes(), serde_json::to_vec(&status)?)?;
        Ok(status)
    }

    /// Record that a lens completed its pending upgrade.
    pub fn complete_upgrade(&self, lens_id: &str) -> Result<UpgradeStatus, ComplianceError> {
        let mut status: UpgradeStatus = self
            .upgrades
            .get(lens_id.as_bytes())?
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()?
            .ok_or_else(|| ComplianceError::LensNotFound(lens_id.to_string()))?;
        status.completed = true;
        status.updated_at = Utc::now();
        self.upgrades
            .insert(lens_id.as_bytes(), serde_json::to_vec(&status)?)?;
        Ok(status)
    }

    /// Lenses still pending their upgrade.
    pub fn pending_upgrades(&self) -> Result<Vec<UpgradeStatus>, ComplianceError> {
        let mut pending = Vec::new();
        for item in self.upgrades.iter() {
            let (_, bytes) = item?;
            let status: UpgradeStatus = serde_json::from_slice(&bytes)?;
            if !status.completed {
                pending.push(status);
            }
        }
        Ok(pending)
    }

    /// How many lenses a creator has registered (any status).
    pub fn creator_lens_count(&self, creator_id: &str) -> Result<usize, ComplianceError> {
        let mut count = 0;
        for item in self.lenses.iter() {
            let (_, bytes) = item?;
            let row: LensRow = serde_json::from_slice(&bytes)?;
            if row.adapter.creator_id == creator_id {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn lens_count(&self) -> usize {
        self.lenses.len()
    }

    fn put_lens(&self, row: &LensRow) -> Result<(), ComplianceError> {
        self.lenses
            .insert(row.adapter.id.as_bytes(), serde_json::to_vec(row)?)?;
        Ok(())
    }

    fn put_results(&self, lens_id: &str, results: &[CheckResult]) -> Result<(), ComplianceError> {
        self.results
            .insert(lens_id.as_bytes(), serde_json::to_vec(results)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{LensClassification, QuestConfig, QuestReward};

    fn test_runner() -> (ComplianceRunner, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        (ComplianceRunner::open(&db).unwrap(), dir)
    }

    #[test]
    fn test_clean_lens_activates() {
        let (runner, _dir) = test_runner();
        let outcome = runner
            .register_lens(LensAdapter::knowledge("lens_1", "alice"))
            .unwrap();
        assert_eq!(outcome.status, LensStatus::Active);
        assert_eq!(outcome.results.len(), 12);
    }

    #[test]
    fn test_failing_lens_held_pending() {
        let (runner, _dir) = test_runner();
        let mut adapter = LensAdapter::knowledge("lens_2", "alice");
        adapter.file_format.decode = false;
        let outcome = runner.register_lens(adapter).unwrap();
        assert_eq!(outcome.status, LensStatus::PendingCompliance);

        let row = runner.get_lens("lens_2").unwrap().unwrap();
        assert_eq!(row.status, LensStatus::PendingCompliance);
    }

    #[test]
    fn test_user_quota() {
        let (runner, _dir) = test_runner();
        for i in 0..USER_LENS_LIMIT {
            runner
                .register_lens(LensAdapter::knowledge(format!("lens_{}", i), "alice"))
                .unwrap();
        }
        assert!(matches!(
            runner.register_lens(LensAdapter::knowledge("lens_over", "alice")),
            Err(ComplianceError::LensLimitExceeded)
        ));
        // A different creator is unaffected.
        assert!(runner
            .register_lens(LensAdapter::knowledge("lens_bob", "bob"))
            .is_ok());
    }

    #[test]
    fn test_emergent_quota_is_lower() {
        let (runner, _dir) = test_runner();
        for i in 0..EMERGENT_LENS_LIMIT {
            let mut adapter = LensAdapter::knowledge(format!("elens_{}", i), "emergent_7");
            adapter.creator_is_emergent = true;
            runner.register_lens(adapter).unwrap();
        }
        let mut adapter = LensAdapter::knowledge("elens_over", "emergent_7");
        adapter.creator_is_emergent = true;
        assert!(matches!(
            runner.register_lens(adapter),
            Err(ComplianceError::LensLimitExceeded)
        ));
    }

    #[test]
    fn test_audit_disables_regressed_lens() {
        let (runner, _dir) = test_runner();
        runner
            .register_lens(LensAdapter::knowledge("lens_a", "alice"))
            .unwrap();

        // Regress the stored adapter: a social lens that starts paying
        // coin alongside XP.
        let mut row = runner.get_lens("lens_a").unwrap().unwrap();
        row.adapter.classification = LensClassification::Social;
        row.adapter.quests = Some(QuestConfig {
            enabled: true,
            rewards: vec![QuestReward { xp: 5, coin: 5 }],
        });
        runner.put_lens(&row).unwrap();

        let report = runner.nightly_audit(Utc::now()).unwrap();
        assert_eq!(report.lenses_checked, 1);
        assert_eq!(report.lenses_failed, 1);
        assert_eq!(report.lenses_disabled, 1);
        assert_eq!(
            runner.get_lens("lens_a").unwrap().unwrap().status,
            LensStatus::Disabled
        );
    }

    #[test]
    fn test_audit_promotes_fixed_lens() {
        let (runner, _dir) = test_runner();
        let mut adapter = LensAdapter::knowledge("lens_fix", "alice");
        adapter.file_format.decode = false;
        runner.register_lens(adapter).unwrap();

        let mut row = runner.get_lens("lens_fix").unwrap().unwrap();
        row.adapter.file_format.decode = true;
        runner.put_lens(&row).unwrap();

        runner.nightly_audit(Utc::now()).unwrap();
        assert_eq!(
            runner.get_lens("lens_fix").unwrap().unwrap().status,
            LensStatus::Active
        );
    }

    #[test]
    fn test_upgrade_propagation() {
        let (runner, _dir) = test_runner();
        runner
            .register_lens(LensAdapter::knowledge("lens_u", "alice"))
            .unwrap();

        runner.mark_upgrade("lens_u", "2.0.0").unwrap();
        assert_eq!(runner.pending_upgrades().unwrap().len(), 1);

        let status = runner.complete_upgrade("lens_u").unwrap();
        assert!(status.completed);
        assert!(runner.pending_upgrades().unwrap().is_empty());

        assert!(matches!(
            runner.mark_upgrade("lens_missing", "2.0.0"),
            Err(ComplianceError::LensNotFound(_))
        ));
    }
}
