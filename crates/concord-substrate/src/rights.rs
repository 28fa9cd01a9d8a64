//! Rights ledger
//!
//! Ownership, license, and usage permissions per content hash. Transfers
//! require the current owner; revocations are per-user.

use crate::storage::{Storage, StorageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

/// Rights ledger errors
#[derive(Debug, Error)]
pub enum RightsError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("row encoding error: {0}")]
    Row(#[from] postcard::Error),
    #[error("rights_not_found: {0}")]
    NotFound(String),
    #[error("not_authorized")]
    NotAuthorized,
}

/// License under which content is held.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LicenseKind {
    AllRightsReserved,
    CreativeCommons,
    PublicDomain,
    PlatformLicense,
}

/// How many derivatives may be made from the content.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum DerivativePolicy {
    Unrestricted,
    Max(u32),
}

/// Action a user wants to perform against content.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RightsAction {
    View,
    Derive,
    Commercialize,
}

/// One row per content hash.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RightsRecord {
    pub content_hash: String,
    pub creator_id: String,
    pub owner_id: String,
    pub license: LicenseKind,
    pub commercial_allowed: bool,
    pub derivative_policy: DerivativePolicy,
    /// Users whose access has been revoked.
    pub revoked: BTreeSet<String>,
    pub updated_at: DateTime<Utc>,
}

/// Ledger of per-content-hash rights.
pub struct RightsLedger {
    storage: Arc<Storage>,
}

impl RightsLedger {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Record rights for newly ingested content. The creator starts as owner.
    pub fn register(
        &self,
        content_hash: &str,
        creator_id: &str,
        license: LicenseKind,
        commercial_allowed: bool,
        derivative_policy: DerivativePolicy,
    ) -> Result<RightsRecord, RightsError> {
        let record = RightsRecord {
            content_hash: content_hash.to_string(),
            creator_id: creator_id.to_string(),
            owner_id: creator_id.to_string(),
            license,
            commercial_allowed,
            derivative_policy,
            revoked: BTreeSet::new(),
            updated_at: Utc::now(),
        };
        self.put(&record)?;
        Ok(record)
    }

    /// Get the rights record for a content hash.
    pub fn get(&self, content_hash: &str) -> Result<Option<RightsRecord>, RightsError> {
        match self
            .storage
            .rights_tree()
            .get(content_hash.as_bytes())
            .map_err(StorageError::from)?
        {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Is `user_id` allowed to perform `action` on this content?
    ///
    /// Unknown content is deny-by-default.
    pub fn check(
        &self,
        content_hash: &str,
        user_id: &str,
        action: RightsAction,
    ) -> Result<bool, RightsError> {
        let Some(record) = self.get(content_hash)? else {
            return Ok(false);
        };
        if record.revoked.contains(user_id) {
            return Ok(false);
        }
        if record.owner_id == user_id {
            return Ok(true);
        }
        Ok(match action {
            RightsAction::View => true,
            RightsAction::Derive => record.derivative_policy != DerivativePolicy::Max(0),
            RightsAction::Commercialize => record.commercial_allowed,
        })
    }

    /// Transfer ownership. `from_user_id` must be the current owner.
    pub fn transfer(
        &self,
        content_hash: &str,
        from_user_id: &str,
        to_user_id: &str,
    ) -> Result<RightsRecord, RightsError> {
        let mut record = self
            .get(content_hash)?
            .ok_or_else(|| RightsError::NotFound(content_hash.to_string()))?;
        if record.owner_id != from_user_id {
            return Err(RightsError::NotAuthorized);
        }
        record.owner_id = to_user_id.to_string();
        record.updated_at = Utc::now();
        self.put(&record)?;
        Ok(record)
    }

    /// Revoke a user's access to this content.
    pub fn revoke(&self, content_hash: &str, user_id: &str) -> Result<(), RightsError> {
        let mut record = self
            .get(content_hash)?
            .ok_or_else(|| RightsError::NotFound(content_hash.to_string()))?;
        record.revoked.insert(user_id.to_string());
        record.updated_at = Utc::now();
        self.put(&record)
    }

    fn put(&self, record: &RightsRecord) -> Result<(), RightsError> {
        let value = postcard::to_allocvec(record)?;
        self.storage
            .rights_tree()
            .insert(record.content_hash.as_bytes(), value)
            .map_err(StorageError::from)?;
        Ok(())
    }
}
