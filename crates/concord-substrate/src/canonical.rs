//! Canonical content registry
//!
//! Content-addressed deduplication: the first DTU registered for a content
//! hash owns it; later identical content increments the reference count and
//! points back at the owner. Every ingest path consults this registry
//! before committing. Find-or-create and refcount bumps go through sled
//! compare-and-swap so concurrent registrations of the same content agree
//! on one owner.

use crate::storage::{Storage, StorageError};
use chrono::{DateTime, Utc};
use concord_core::hash;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Canonical registry errors
#[derive(Debug, Error)]
pub enum CanonicalError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("row encoding error: {0}")]
    Row(#[from] postcard::Error),
    #[error("review_not_found: {0}")]
    ReviewNotFound(String),
    #[error("review_already_processed")]
    ReviewAlreadyProcessed,
}

/// One row per distinct content hash.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CanonicalRecord {
    pub content_hash: String,
    /// The owning DTU: first one registered for this hash.
    pub canonical_dtu_id: String,
    pub reference_count: u64,
    pub first_registered_at: DateTime<Utc>,
}

/// Outcome of a registration.
#[derive(Clone, Debug, PartialEq)]
pub struct RegisterOutcome {
    pub canonical_dtu_id: String,
    pub reference_count: u64,
    pub is_new: bool,
}

/// A duplicate flagged for human review.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DedupReview {
    pub id: String,
    pub content_hash: String,
    pub canonical_dtu_id: String,
    pub duplicate_dtu_id: String,
    pub opened_at: DateTime<Utc>,
    /// Set exactly once by `process_review`.
    pub resolution: Option<String>,
}

/// The authority for content deduplication.
pub struct CanonicalRegistry {
    storage: Arc<Storage>,
}

impl CanonicalRegistry {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Register content for a DTU.
    ///
    /// First registration creates the row with this DTU as owner; identical
    /// content later increments `reference_count` and returns the original
    /// owner.
    pub fn register(&self, content: &[u8], dtu_id: &str) -> Result<RegisterOutcome, CanonicalError> {
        let hash_hex = hash::canonical_hash(content).to_hex();
        self.register_hash(&hash_hex, dtu_id)
    }

    /// Register a precomputed content hash.
    pub fn register_hash(
        &self,
        hash_hex: &str,
        dtu_id: &str,
    ) -> Result<RegisterOutcome, CanonicalError> {
        let tree = self.storage.canonical_tree();
        loop {
            match tree.get(hash_hex.as_bytes()).map_err(StorageError::from)? {
                None => {
                    let record = CanonicalRecord {
                        content_hash: hash_hex.to_string(),
                        canonical_dtu_id: dtu_id.to_string(),
                        reference_count: 1,
                        first_registered_at: Utc::now(),
                    };
                    let value = postcard::to_allocvec(&record)?;
                    let swapped = tree
                        .compare_and_swap(
                            hash_hex.as_bytes(),
                            None as Option<&[u8]>,
                            Some(value.as_slice()),
                        )
                        .map_err(StorageError::from)?;
                    if swapped.is_ok() {
                        return Ok(RegisterOutcome {
                            canonical_dtu_id: dtu_id.to_string(),
                            reference_count: 1,
                            is_new: true,
                        });
                    }
                    // Lost the race; retry against the winner's row.
                }
                Some(existing_bytes) => {
                    let mut record: CanonicalRecord = postcard::from_bytes(&existing_bytes)?;
                    record.reference_count += 1;
                    let value = postcard::to_allocvec(&record)?;
                    let swapped = tree
                        .compare_and_swap(
                            hash_hex.as_bytes(),
                            Some(existing_bytes.as_ref()),
                            Some(value.as_slice()),
                        )
                        .map_err(StorageError::from)?;
                    if swapped.is_ok() {
                        return Ok(RegisterOutcome {
                            canonical_dtu_id: record.canonical_dtu_id,
                            reference_count: record.reference_count,
                            is_new: false,
                        });
                    }
                }
            }
        }
    }

    /// Look up the canonical record for a content hash.
    pub fn lookup(&self, hash_hex: &str) -> Result<Option<CanonicalRecord>, CanonicalError> {
        match self
            .storage
            .canonical_tree()
            .get(hash_hex.as_bytes())
            .map_err(StorageError::from)?
        {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Open a dedup review for a duplicate registration.
    pub fn open_review(
        &self,
        hash_hex: &str,
        canonical_dtu_id: &str,
        duplicate_dtu_id: &str,
    ) -> Result<DedupReview, CanonicalError> {
        let review = DedupReview {
            id: hash::generate_id("review"),
            content_hash: hash_hex.to_string(),
            canonical_dtu_id: canonical_dtu_id.to_string(),
            duplicate_dtu_id: duplicate_dtu_id.to_string(),
            opened_at: Utc::now(),
            resolution: None,
        };
        let value = postcard::to_allocvec(&review)?;
        self.storage
            .dedup_reviews_tree()
            .insert(review.id.as_bytes(), value)
            .map_err(StorageError::from)?;
        Ok(review)
    }

    /// Resolve a review. A review can be processed exactly once.
    pub fn process_review(
        &self,
        review_id: &str,
        decision: &str,
    ) -> Result<DedupReview, CanonicalError> {
        let tree = self.storage.dedup_reviews_tree();
        let bytes = tree
            .get(review_id.as_bytes())
            .map_err(StorageError::from)?
            .ok_or_else(|| CanonicalError::ReviewNotFound(review_id.to_string()))?;
        let mut review: DedupReview = postcard::from_bytes(&bytes)?;
        if review.resolution.is_some() {
            return Err(CanonicalError::ReviewAlreadyProcessed);
        }
        review.resolution = Some(decision.to_string());
        let value = postcard::to_allocvec(&review)?;
        tree.insert(review_id.as_bytes(), value)
            .map_err(StorageError::from)?;
        Ok(review)
    }

    /// Number of distinct content hashes.
    pub fn entry_count(&self) -> usize {
        self.storage.canonical_tree().len()
    }
}
