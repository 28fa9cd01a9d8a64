//! Persistent storage using sled
//!
//! One `Db` per substrate instance; every subsystem gets its own named
//! tree. The knowledge store and the system store are separate trees so a
//! system DTU can never surface through the knowledge API. DTUs carry
//! free-form machine fields and persist as JSON; fixed-shape registry rows
//! persist as postcard.

use concord_core::types::{Dtu, Subscription};
use sled::Db;
use std::path::Path;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("row encoding error: {0}")]
    Row(#[from] postcard::Error),
    #[error("dtu encoding error: {0}")]
    Dtu(#[from] serde_json::Error),
    #[error("dtu not found: {0}")]
    DtuNotFound(String),
}

/// Storage backend for the substrate
pub struct Storage {
    db: Db,
    /// Knowledge store: dtu_id -> Dtu
    dtus: sled::Tree,
    /// System store: dtu_id -> Dtu (operational events only)
    system_dtus: sled::Tree,
    /// Idempotence index: raw_event_hash -> dtu_id
    raw_events: sled::Tree,
    /// Canonical content: content_hash -> CanonicalRecord
    canonical: sled::Tree,
    /// Dedup reviews: review_id -> DedupReview
    dedup_reviews: sled::Tree,
    /// Rights ledger: content_hash -> RightsRecord
    rights: sled::Tree,
    /// Subscriptions: user_id -> Subscription
    subscriptions: sled::Tree,
    /// Exported container files: file_hash -> FileRecord
    files: sled::Tree,
    /// Reimport log: reimport_id -> ReimportRecord
    reimports: sled::Tree,
    /// Metadata tree: key -> value
    metadata: sled::Tree,
}

impl Storage {
    /// Open storage at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Self::with_db(db)
    }

    /// Build on an already-open database (shared with other subsystems).
    pub fn with_db(db: Db) -> Result<Self, StorageError> {
        let dtus = db.open_tree("dtu_registry")?;
        let system_dtus = db.open_tree("system_dtus")?;
        let raw_events = db.open_tree("raw_event_index")?;
        let canonical = db.open_tree("canonical_content")?;
        let dedup_reviews = db.open_tree("dedup_reviews")?;
        let rights = db.open_tree("rights_ledger")?;
        let subscriptions = db.open_tree("subscriptions")?;
        let files = db.open_tree("dtu_file_registry")?;
        let reimports = db.open_tree("dtu_reimports")?;
        let metadata = db.open_tree("metadata")?;

        Ok(Self {
            db,
            dtus,
            system_dtus,
            raw_events,
            canonical,
            dedup_reviews,
            rights,
            subscriptions,
            files,
            reimports,
            metadata,
        })
    }

    /// Handle to the underlying database, for subsystems that keep their
    /// own trees (federation registry, compliance runner).
    pub fn db(&self) -> &Db {
        &self.db
    }

    // -------------------------------------------------------------------------
    // Knowledge store
    // -------------------------------------------------------------------------

    /// Store a knowledge DTU
    pub fn put_dtu(&self, dtu: &Dtu) -> Result<(), StorageError> {
        let value = serde_json::to_vec(dtu)?;
        self.dtus.insert(dtu.id.as_bytes(), value)?;
        Ok(())
    }

    /// Get a knowledge DTU by id
    pub fn get_dtu(&self, id: &str) -> Result<Option<Dtu>, StorageError> {
        match self.dtus.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Check if a knowledge DTU exists
    pub fn has_dtu(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.dtus.contains_key(id.as_bytes())?)
    }

    /// Remove a knowledge DTU (archival path only; DTUs are never silently
    /// deleted by the pipelines)
    pub fn remove_dtu(&self, id: &str) -> Result<(), StorageError> {
        self.dtus.remove(id.as_bytes())?;
        Ok(())
    }

    /// Iterate all knowledge DTUs
    pub fn all_dtus(&self) -> impl Iterator<Item = Result<Dtu, StorageError>> + '_ {
        self.dtus.iter().map(|result| {
            let (_, bytes) = result?;
            let dtu: Dtu = serde_json::from_slice(&bytes)?;
            Ok(dtu)
        })
    }

    /// Count knowledge DTUs
    pub fn dtu_count(&self) -> usize {
        self.dtus.len()
    }

    // -------------------------------------------------------------------------
    // System store (disjoint from the knowledge store)
    // -------------------------------------------------------------------------

    /// Store a system DTU
    pub fn put_system_dtu(&self, dtu: &Dtu) -> Result<(), StorageError> {
        let value = serde_json::to_vec(dtu)?;
        self.system_dtus.insert(dtu.id.as_bytes(), value)?;
        Ok(())
    }

    /// Get a system DTU by id
    pub fn get_system_dtu(&self, id: &str) -> Result<Option<Dtu>, StorageError> {
        match self.system_dtus.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Count system DTUs
    pub fn system_dtu_count(&self) -> usize {
        self.system_dtus.len()
    }

    // -------------------------------------------------------------------------
    // Raw event idempotence index
    // -------------------------------------------------------------------------

    /// Atomically claim a raw event hash for a DTU id.
    ///
    /// Returns `false` if another DTU already holds the hash. This is the
    /// compare-and-set that makes dedup-check-then-commit atomic.
    pub fn claim_raw_event(&self, raw_hash: &str, dtu_id: &str) -> Result<bool, StorageError> {
        let outcome = self.raw_events.compare_and_swap(
            raw_hash.as_bytes(),
            None as Option<&[u8]>,
            Some(dtu_id.as_bytes()),
        )?;
        Ok(outcome.is_ok())
    }

    /// Release a claim made by [`Storage::claim_raw_event`] when a commit
    /// fails partway; leaves no partial state behind.
    pub fn release_raw_event(&self, raw_hash: &str) -> Result<(), StorageError> {
        self.raw_events.remove(raw_hash.as_bytes())?;
        Ok(())
    }

    /// Look up which DTU holds a raw event hash
    pub fn raw_event_owner(&self, raw_hash: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .raw_events
            .get(raw_hash.as_bytes())?
            .map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    // -------------------------------------------------------------------------
    // Generic row access for the registries that live in this crate
    // -------------------------------------------------------------------------

    pub(crate) fn canonical_tree(&self) -> &sled::Tree {
        &self.canonical
    }

    pub(crate) fn dedup_reviews_tree(&self) -> &sled::Tree {
        &self.dedup_reviews
    }

    pub(crate) fn rights_tree(&self) -> &sled::Tree {
        &self.rights
    }

    pub(crate) fn files_tree(&self) -> &sled::Tree {
        &self.files
    }

    pub(crate) fn reimports_tree(&self) -> &sled::Tree {
        &self.reimports
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Store a subscription (one per user)
    pub fn put_subscription(&self, sub: &Subscription) -> Result<(), StorageError> {
        let value = postcard::to_allocvec(sub)?;
        self.subscriptions.insert(sub.user_id.as_bytes(), value)?;
        Ok(())
    }

    /// Get a user's subscription
    pub fn get_subscription(&self, user_id: &str) -> Result<Option<Subscription>, StorageError> {
        match self.subscriptions.get(user_id.as_bytes())? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Remove a user's subscription
    pub fn remove_subscription(&self, user_id: &str) -> Result<(), StorageError> {
        self.subscriptions.remove(user_id.as_bytes())?;
        Ok(())
    }

    /// Iterate all subscriptions
    pub fn all_subscriptions(&self) -> impl Iterator<Item = Result<Subscription, StorageError>> + '_ {
        self.subscriptions.iter().map(|result| {
            let (_, bytes) = result?;
            let sub: Subscription = postcard::from_bytes(&bytes)?;
            Ok(sub)
        })
    }

    // -------------------------------------------------------------------------
    // Metadata
    // -------------------------------------------------------------------------

    /// Store metadata
    pub fn put_metadata(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.metadata.insert(key, value)?;
        Ok(())
    }

    /// Get metadata
    pub fn get_metadata(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.metadata.get(key)?.map(|v| v.to_vec()))
    }

    /// Flush all pending writes
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}
