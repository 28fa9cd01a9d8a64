//! Threat lattice
//!
//! A hash-lookup registry of known-bad content. Scanning is pure lookup:
//! a known hash increments its detection counter, an unknown hash is
//! clean. External scanners are optional capability providers that feed
//! rows in; the lattice itself never shells out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Threat lattice errors
#[derive(Debug, Error)]
pub enum ProtectionError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("row encoding error: {0}")]
    Row(#[from] postcard::Error),
}

/// One known threat.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ThreatRow {
    pub hash: String,
    pub classification: String,
    /// 0-10
    pub severity: u8,
    pub times_detected: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Scan verdict.
#[derive(Clone, Debug, PartialEq)]
pub enum ScanOutcome {
    Clean,
    Match(ThreatRow),
}

/// The threat lattice over its sled tree.
pub struct ThreatLattice {
    threats: sled::Tree,
}

impl ThreatLattice {
    pub fn open(db: &sled::Db) -> Result<Self, ProtectionError> {
        Ok(Self {
            threats: db.open_tree("threat_lattice")?,
        })
    }

    /// Seed or update a threat row.
    pub fn register_threat(
        &self,
        hash: &str,
        classification: &str,
        severity: u8,
    ) -> Result<ThreatRow, ProtectionError> {
        let now = Utc::now();
        let row = match self.get(hash)? {
            Some(mut existing) => {
                existing.classification = classification.to_string();
                existing.severity = severity;
                existing.last_seen = now;
                existing
            }
            None => ThreatRow {
                hash: hash.to_string(),
                classification: classification.to_string(),
                severity,
                times_detected: 0,
                first_seen: now,
                last_seen: now,
            },
        };
        self.threats
            .insert(hash.as_bytes(), postcard::to_allocvec(&row)?)?;
        Ok(row)
    }

    /// Scan a hash against the lattice. A match bumps `times_detected`.
    pub fn scan_hash(&self, hash: &str) -> Result<ScanOutcome, ProtectionError> {
        let Some(mut row) = self.get(hash)? else {
            return Ok(ScanOutcome::Clean);
        };
        row.times_detected += 1;
        row.last_seen = Utc::now();
        self.threats
            .insert(hash.as_bytes(), postcard::to_allocvec(&row)?)?;
        Ok(ScanOutcome::Match(row))
    }

    pub fn get(&self, hash: &str) -> Result<Option<ThreatRow>, ProtectionError> {
        Ok(self
            .threats
            .get(hash.as_bytes())?
            .map(|bytes| postcard::from_bytes(&bytes))
            .transpose()?)
    }

    pub fn threat_count(&self) -> usize {
        self.threats.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_lattice() -> (ThreatLattice, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        (ThreatLattice::open(&db).unwrap(), dir)
    }

    #[test]
    fn test_unknown_hash_is_clean() {
        let (lattice, _dir) = test_lattice();
        assert_eq!(lattice.scan_hash("deadbeef").unwrap(), ScanOutcome::Clean);
        assert_eq!(lattice.threat_count(), 0);
    }

    #[test]
    fn test_repeated_scans_count_detections() {
        let (lattice, _dir) = test_lattice();
        lattice.register_threat("known_bad_hash", "malware", 9).unwrap();

        for _ in 0..3 {
            match lattice.scan_hash("known_bad_hash").unwrap() {
                ScanOutcome::Match(_) => {}
                ScanOutcome::Clean => panic!("seeded threat must match"),
            }
        }
        let row = lattice.get("known_bad_hash").unwrap().unwrap();
        assert_eq!(row.times_detected, 3);
    }

    #[test]
    fn test_reregistration_keeps_counter() {
        let (lattice, _dir) = test_lattice();
        lattice.register_threat("h1", "phishing", 4).unwrap();
        lattice.scan_hash("h1").unwrap();
        let row = lattice.register_threat("h1", "phishing", 6).unwrap();
        assert_eq!(row.times_detected, 1);
        assert_eq!(row.severity, 6);
    }
}
