//! Container file registry
//!
//! Every exported `.dtu` buffer is recorded under its unique file hash.
//! Re-importing a buffer whose hash is already registered appends a
//! reimport row and resolves to the existing DTU instead of minting a
//! duplicate.

use crate::storage::{Storage, StorageError};
use chrono::{DateTime, Utc};
use concord_core::codec::{DecodeResult, DtuCodec, EncodeResult};
use concord_core::error::CodecError;
use concord_core::hash;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// File registry errors
#[derive(Debug, Error)]
pub enum FileError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("row encoding error: {0}")]
    Row(#[from] postcard::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// One row per exported container file (file hash unique).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FileRecord {
    pub file_hash: String,
    pub dtu_id: String,
    pub extension: String,
    pub total_size: u64,
    pub exported_at: DateTime<Utc>,
}

/// One row per observed reimport of a known file.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ReimportRecord {
    pub id: String,
    pub file_hash: String,
    pub dtu_id: String,
    pub reimported_at: DateTime<Utc>,
}

/// What an import resolved to.
#[derive(Debug)]
pub enum ImportOutcome {
    /// The buffer matches a registered file; no new DTU is minted.
    Existing { dtu_id: String },
    /// First sighting: decoded payload for the caller to ingest.
    New { file_hash: String, decoded: DecodeResult },
}

/// Registry of exported container files.
pub struct FileRegistry {
    storage: Arc<Storage>,
}

impl FileRegistry {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Record an export. Idempotent per file hash: a repeat export returns
    /// the original row.
    pub fn record_export(
        &self,
        dtu_id: &str,
        encoded: &EncodeResult,
    ) -> Result<FileRecord, FileError> {
        let file_hash = encoded.content_hash.to_hex();
        if let Some(existing) = self.lookup(&file_hash)? {
            return Ok(existing);
        }
        let header = DtuCodec::decode_header(&encoded.buffer)?;
        let record = FileRecord {
            file_hash: file_hash.clone(),
            dtu_id: dtu_id.to_string(),
            extension: header.format.extension().to_string(),
            total_size: encoded.total_size,
            exported_at: Utc::now(),
        };
        let value = postcard::to_allocvec(&record)?;
        self.storage
            .files_tree()
            .insert(file_hash.as_bytes(), value)
            .map_err(StorageError::from)?;
        Ok(record)
    }

    /// Look up a file record by hash.
    pub fn lookup(&self, file_hash: &str) -> Result<Option<FileRecord>, FileError> {
        match self
            .storage
            .files_tree()
            .get(file_hash.as_bytes())
            .map_err(StorageError::from)?
        {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Import a container buffer. Known files append a reimport row and
    /// resolve to the registered DTU; unknown files are decoded for ingest.
    pub fn import(&self, buffer: &[u8]) -> Result<ImportOutcome, FileError> {
        let file_hash = hash::content_hash(buffer).to_hex();
        if let Some(record) = self.lookup(&file_hash)? {
            let reimport = ReimportRecord {
                id: hash::generate_id("reimport"),
                file_hash: file_hash.clone(),
                dtu_id: record.dtu_id.clone(),
                reimported_at: Utc::now(),
            };
            let value = postcard::to_allocvec(&reimport)?;
            self.storage
                .reimports_tree()
                .insert(reimport.id.as_bytes(), value)
                .map_err(StorageError::from)?;
            return Ok(ImportOutcome::Existing {
                dtu_id: record.dtu_id,
            });
        }

        let decoded = DtuCodec::decode(buffer)?;
        Ok(ImportOutcome::New { file_hash, decoded })
    }

    /// Number of recorded reimports.
    pub fn reimport_count(&self) -> usize {
        self.storage.reimports_tree().len()
    }
}
