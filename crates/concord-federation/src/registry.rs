//! Federation registry
//!
//! Rows for nationals, regions, and CRIs (compute/regional instances),
//! plus the append-only logs: user locations, entity home bases and
//! transfers, DTU promotion history, and query escalations. Trees are
//! opened on the shared substrate database.

use chrono::{DateTime, Duration, Utc};
use concord_core::hash;
use concord_core::types::FederationTier;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Federation registry errors
#[derive(Debug, Error)]
pub enum FederationError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("row encoding error: {0}")]
    Row(#[from] postcard::Error),
    #[error("country_code_exists: {0}")]
    CountryCodeExists(String),
    #[error("national_not_found: {0}")]
    NationalNotFound(String),
    #[error("region_not_found: {0}")]
    RegionNotFound(String),
    #[error("cri_not_found: {0}")]
    CriNotFound(String),
}

// =============================================================================
// ROWS
// =============================================================================

/// A national: the top non-global registry unit.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct National {
    pub id: String,
    pub name: String,
    /// Unique across the registry.
    pub country_code: String,
    pub created_at: DateTime<Utc>,
}

/// A region inside a national.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Region {
    pub id: String,
    pub name: String,
    pub national_id: String,
    pub created_at: DateTime<Utc>,
}

/// Liveness status of a CRI.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CriStatus {
    Online,
    Offline,
}

/// A compute/regional instance. Emits heartbeats; silent instances are
/// swept offline.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CriInstance {
    pub id: String,
    pub name: String,
    pub region_id: String,
    pub national_id: String,
    pub status: CriStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

/// One appended row per user location change.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UserLocationRow {
    pub user_id: String,
    pub region_id: String,
    pub national_id: String,
    pub declared_at: DateTime<Utc>,
}

/// Current home CRI of an emergent entity.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EntityHome {
    pub entity_id: String,
    pub cri_id: String,
    pub since: DateTime<Utc>,
}

/// One appended row per entity transfer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EntityTransferRow {
    pub id: String,
    pub entity_id: String,
    pub from_cri: String,
    pub to_cri: String,
    pub transferred_at: DateTime<Utc>,
}

/// One appended row per accepted promotion.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PromotionRow {
    pub dtu_id: String,
    pub from_tier: FederationTier,
    pub to_tier: FederationTier,
    pub promoted_at: DateTime<Utc>,
}

/// One appended row per query that escalated above its origin tier.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EscalationRow {
    pub id: String,
    pub query: String,
    pub from_tier: FederationTier,
    pub to_tier: FederationTier,
    /// Tier transitions taken between origin and resolution.
    pub hops: u32,
    pub escalated_at: DateTime<Utc>,
}

/// A known federation peer (another substrate instance).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FederationPeer {
    pub id: String,
    pub endpoint: String,
    pub tier: FederationTier,
    pub registered_at: DateTime<Utc>,
}

// =============================================================================
// REGISTRY
// =============================================================================

/// The federation registry over sled trees.
pub struct FederationRegistry {
    nationals: sled::Tree,
    /// country_code -> national id, for the uniqueness check
    national_codes: sled::Tree,
    regions: sled::Tree,
    cris: sled::Tree,
    user_locations: sled::Tree,
    entity_homes: sled::Tree,
    entity_transfers: sled::Tree,
    promotion_history: sled::Tree,
    escalations: sled::Tree,
    peers: sled::Tree,
    /// (tier, dtu_id) visibility rows
    tier_content: sled::Tree,
}

impl FederationRegistry {
    /// Open the registry trees on a shared database.
    pub fn open(db: &sled::Db) -> Result<Self, FederationError> {
        Ok(Self {
            nationals: db.open_tree("nationals")?,
            national_codes: db.open_tree("national_codes")?,
            regions: db.open_tree("regions")?,
            cris: db.open_tree("cri_instances")?,
            user_locations: db.open_tree("user_location_history")?,
            entity_homes: db.open_tree("entity_home_base")?,
            entity_transfers: db.open_tree("entity_transfer_history")?,
            promotion_history: db.open_tree("dtu_federation_history")?,
            escalations: db.open_tree("federation_escalations")?,
            peers: db.open_tree("federation_peers")?,
            tier_content: db.open_tree("tier_content")?,
        })
    }

    // -------------------------------------------------------------------------
    // Nationals / regions / CRIs
    // -------------------------------------------------------------------------

    /// Register a national. Country codes are unique; the code row is
    /// claimed with a compare-and-set so concurrent registration of the
    /// same code yields exactly one winner.
    pub fn register_national(
        &self,
        name: &str,
        country_code: &str,
    ) -> Result<National, FederationError> {
        let national = National {
            id: hash::generate_id("national"),
            name: name.to_string(),
            country_code: country_code.to_string(),
            created_at: Utc::now(),
        };
        let claimed = self.national_codes.compare_and_swap(
            country_code.as_bytes(),
            None as Option<&[u8]>,
            Some(national.id.as_bytes()),
        )?;
        if claimed.is_err() {
            return Err(FederationError::CountryCodeExists(country_code.to_string()));
        }
        self.nationals
            .insert(national.id.as_bytes(), postcard::to_allocvec(&national)?)?;
        Ok(national)
    }

    pub fn get_national(&self, id: &str) -> Result<Option<National>, FederationError> {
        Ok(self
            .nationals
            .get(id.as_bytes())?
            .map(|bytes| postcard::from_bytes(&bytes))
            .transpose()?)
    }

    /// Register a region under an existing national.
    pub fn register_region(
        &self,
        name: &str,
        national_id: &str,
    ) -> Result<Region, FederationError> {
        if self.get_national(national_id)?.is_none() {
            return Err(FederationError::NationalNotFound(national_id.to_string()));
        }
        let region = Region {
            id: hash::generate_id("region"),
            name: name.to_string(),
            national_id: national_id.to_string(),
            created_at: Utc::now(),
        };
        self.regions
            .insert(region.id.as_bytes(), postcard::to_allocvec(&region)?)?;
        Ok(region)
    }

    pub fn get_region(&self, id: &str) -> Result<Option<Region>, FederationError> {
        Ok(self
            .regions
            .get(id.as_bytes())?
            .map(|bytes| postcard::from_bytes(&bytes))
            .transpose()?)
    }

    /// Register a CRI under an existing region; the national key is
    /// derived from the region row.
    pub fn register_cri(&self, name: &str, region_id: &str) -> Result<CriInstance, FederationError> {
        let region = self
            .get_region(region_id)?
            .ok_or_else(|| FederationError::RegionNotFound(region_id.to_string()))?;
        let now = Utc::now();
        let cri = CriInstance {
            id: hash::generate_id("cri"),
            name: name.to_string(),
            region_id: region.id,
            national_id: region.national_id,
            status: CriStatus::Online,
            last_heartbeat: now,
            registered_at: now,
        };
        self.cris
            .insert(cri.id.as_bytes(), postcard::to_allocvec(&cri)?)?;
        Ok(cri)
    }

    pub fn get_cri(&self, id: &str) -> Result<Option<CriInstance>, FederationError> {
        Ok(self
            .cris
            .get(id.as_bytes())?
            .map(|bytes| postcard::from_bytes(&bytes))
            .transpose()?)
    }

    /// Record a CRI heartbeat, reviving it if it was swept offline.
    pub fn record_heartbeat(&self, cri_id: &str, now: DateTime<Utc>) -> Result<(), FederationError> {
        let mut cri = self
            .get_cri(cri_id)?
            .ok_or_else(|| FederationError::CriNotFound(cri_id.to_string()))?;
        cri.last_heartbeat = now;
        cri.status = CriStatus::Online;
        self.cris
            .insert(cri.id.as_bytes(), postcard::to_allocvec(&cri)?)?;
        Ok(())
    }

    /// Mark CRIs without a heartbeat within `threshold` as offline.
    /// Failure on one instance does not stop the sweep.
    pub fn sweep_stale_cris(
        &self,
        threshold: Duration,
        now: DateTime<Utc>,
    ) -> Result<usize, FederationError> {
        let cutoff = now - threshold;
        let mut demoted = 0;
        for item in self.cris.iter() {
            let (key, bytes) = item?;
            let mut cri: CriInstance = match postcard::from_bytes(&bytes) {
                Ok(cri) => cri,
                Err(e) => {
                    warn!(error = %e, "skipping undecodable CRI row");
                    continue;
                }
            };
            if cri.status == CriStatus::Online && cri.last_heartbeat < cutoff {
                cri.status = CriStatus::Offline;
                if let Err(e) = self
                    .cris
                    .insert(&key, postcard::to_allocvec(&cri)?)
                    .map_err(FederationError::from)
                {
                    warn!(cri = %cri.id, error = %e, "failed to mark CRI offline");
                    continue;
                }
                demoted += 1;
            }
        }
        Ok(demoted)
    }

    /// Active CRI count for a region.
    pub fn active_cri_count(&self, region_id: &str) -> Result<usize, FederationError> {
        let mut count = 0;
        for item in self.cris.iter() {
            let (_, bytes) = item?;
            let cri: CriInstance = postcard::from_bytes(&bytes)?;
            if cri.region_id == region_id && cri.status == CriStatus::Online {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Active CRIs plus resident users and entities for a region. Users
    /// are counted by their latest declared location; entities by the
    /// region of their home CRI.
    pub fn region_stats(&self, region_id: &str) -> Result<RegionStats, FederationError> {
        let active_cris = self.active_cri_count(region_id)?;

        // Latest location per user wins; rows iterate in seq order.
        let mut latest_by_user: std::collections::HashMap<String, String> =
            std::collections::HashMap::new();
        for item in self.user_locations.iter() {
            let (_, bytes) = item?;
            let row: UserLocationRow = postcard::from_bytes(&bytes)?;
            latest_by_user.insert(row.user_id, row.region_id);
        }
        let resident_users = latest_by_user
            .values()
            .filter(|region| region.as_str() == region_id)
            .count();

        let mut resident_entities = 0;
        for item in self.entity_homes.iter() {
            let (_, bytes) = item?;
            let home: EntityHome = postcard::from_bytes(&bytes)?;
            if let Some(cri) = self.get_cri(&home.cri_id)? {
                if cri.region_id == region_id {
                    resident_entities += 1;
                }
            }
        }

        Ok(RegionStats {
            active_cris,
            resident_users,
            resident_entities,
        })
    }

    // -------------------------------------------------------------------------
    // Location and entity logs (append-only)
    // -------------------------------------------------------------------------

    /// Declare a user's location. Appends a history row only when the
    /// location actually changed.
    pub fn declare_user_location(
        &self,
        user_id: &str,
        region_id: &str,
        national_id: &str,
    ) -> Result<bool, FederationError> {
        if let Some(latest) = self.latest_user_location(user_id)? {
            if latest.region_id == region_id && latest.national_id == national_id {
                return Ok(false);
            }
        }
        let row = UserLocationRow {
            user_id: user_id.to_string(),
            region_id: region_id.to_string(),
            national_id: national_id.to_string(),
            declared_at: Utc::now(),
        };
        let seq = self.user_locations.scan_prefix(prefix(user_id)).count();
        self.user_locations.insert(
            seq_key(user_id, seq).as_bytes(),
            postcard::to_allocvec(&row)?,
        )?;
        Ok(true)
    }

    /// Latest declared location for a user, if any.
    pub fn latest_user_location(
        &self,
        user_id: &str,
    ) -> Result<Option<UserLocationRow>, FederationError> {
        let mut latest = None;
        for item in self.user_locations.scan_prefix(prefix(user_id)) {
            let (_, bytes) = item?;
            latest = Some(postcard::from_bytes(&bytes)?);
        }
        Ok(latest)
    }

    /// Set an entity's home CRI. A change of home is a transfer and
    /// appends exactly one transfer row.
    pub fn set_entity_home_base(
        &self,
        entity_id: &str,
        cri_id: &str,
    ) -> Result<Option<EntityTransferRow>, FederationError> {
        if self.get_cri(cri_id)?.is_none() {
            return Err(FederationError::CriNotFound(cri_id.to_string()));
        }
        let now = Utc::now();
        let previous: Option<EntityHome> = self
            .entity_homes
            .get(entity_id.as_bytes())?
            .map(|bytes| postcard::from_bytes(&bytes))
            .transpose()?;

        if let Some(prev) = &previous {
            if prev.cri_id == cri_id {
                return Ok(None);
            }
        }

        let home = EntityHome {
            entity_id: entity_id.to_string(),
            cri_id: cri_id.to_string(),
            since: now,
        };
        self.entity_homes
            .insert(entity_id.as_bytes(), postcard::to_allocvec(&home)?)?;

        match previous {
            Some(prev) => {
                let transfer = EntityTransferRow {
                    id: hash::generate_id("transfer"),
                    entity_id: entity_id.to_string(),
                    from_cri: prev.cri_id,
                    to_cri: cri_id.to_string(),
                    transferred_at: now,
                };
                self.entity_transfers
                    .insert(transfer.id.as_bytes(), postcard::to_allocvec(&transfer)?)?;
                Ok(Some(transfer))
            }
            None => Ok(None),
        }
    }

    pub fn entity_home(&self, entity_id: &str) -> Result<Option<EntityHome>, FederationError> {
        Ok(self
            .entity_homes
            .get(entity_id.as_bytes())?
            .map(|bytes| postcard::from_bytes(&bytes))
            .transpose()?)
    }

    pub fn transfer_count(&self) -> usize {
        self.entity_transfers.len()
    }

    // -------------------------------------------------------------------------
    // Promotion history and tier content
    // -------------------------------------------------------------------------

    /// Append one promotion history row.
    pub fn append_promotion(
        &self,
        dtu_id: &str,
        from_tier: FederationTier,
        to_tier: FederationTier,
        now: DateTime<Utc>,
    ) -> Result<(), FederationError> {
        let row = PromotionRow {
            dtu_id: dtu_id.to_string(),
            from_tier,
            to_tier,
            promoted_at: now,
        };
        let seq = self.promotion_history.scan_prefix(prefix(dtu_id)).count();
        self.promotion_history.insert(
            seq_key(dtu_id, seq).as_bytes(),
            postcard::to_allocvec(&row)?,
        )?;
        self.tier_content.insert(
            format!("{}/{}", to_tier.as_str(), dtu_id).as_bytes(),
            postcard::to_allocvec(&row)?,
        )?;
        Ok(())
    }

    /// Promotion history for a DTU, oldest first.
    pub fn promotion_history(&self, dtu_id: &str) -> Result<Vec<PromotionRow>, FederationError> {
        let mut rows = Vec::new();
        for item in self.promotion_history.scan_prefix(prefix(dtu_id)) {
            let (_, bytes) = item?;
            rows.push(postcard::from_bytes(&bytes)?);
        }
        Ok(rows)
    }

    /// DTU ids visible at a federation tier.
    pub fn tier_content_ids(&self, tier: FederationTier) -> Result<Vec<String>, FederationError> {
        let mut ids = Vec::new();
        for item in self.tier_content.scan_prefix(prefix(tier.as_str())) {
            let (key, _) = item?;
            let key = String::from_utf8_lossy(&key);
            if let Some((_, dtu_id)) = key.split_once('/') {
                ids.push(dtu_id.to_string());
            }
        }
        Ok(ids)
    }

    // -------------------------------------------------------------------------
    // Escalations and peers
    // -------------------------------------------------------------------------

    /// Append one escalation row for a query resolved above its origin.
    pub fn append_escalation(
        &self,
        query: &str,
        from_tier: FederationTier,
        to_tier: FederationTier,
        hops: u32,
    ) -> Result<EscalationRow, FederationError> {
        let row = EscalationRow {
            id: hash::generate_id("esc"),
            query: query.to_string(),
            from_tier,
            to_tier,
            hops,
            escalated_at: Utc::now(),
        };
        self.escalations
            .insert(row.id.as_bytes(), postcard::to_allocvec(&row)?)?;
        Ok(row)
    }

    pub fn escalation_count(&self) -> usize {
        self.escalations.len()
    }

    pub fn all_escalations(&self) -> Result<Vec<EscalationRow>, FederationError> {
        let mut rows = Vec::new();
        for item in self.escalations.iter() {
            let (_, bytes) = item?;
            rows.push(postcard::from_bytes(&bytes)?);
        }
        Ok(rows)
    }

    /// Register a federation peer.
    pub fn register_peer(
        &self,
        endpoint: &str,
        tier: FederationTier,
    ) -> Result<FederationPeer, FederationError> {
        let peer = FederationPeer {
            id: hash::generate_id("peer"),
            endpoint: endpoint.to_string(),
            tier,
            registered_at: Utc::now(),
        };
        self.peers
            .insert(peer.id.as_bytes(), postcard::to_allocvec(&peer)?)?;
        Ok(peer)
    }

    /// Registry row counts for the stats snapshot.
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            nationals: self.nationals.len(),
            regions: self.regions.len(),
            cris: self.cris.len(),
            peers: self.peers.len(),
            escalations: self.escalations.len(),
        }
    }
}

/// Registry statistics
#[derive(Clone, Copy, Debug)]
pub struct RegistryStats {
    pub nationals: usize,
    pub regions: usize,
    pub cris: usize,
    pub peers: usize,
    pub escalations: usize,
}

/// Per-region occupancy counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionStats {
    pub active_cris: usize,
    pub resident_users: usize,
    pub resident_entities: usize,
}

fn prefix(id: &str) -> Vec<u8> {
    format!("{}/", id).into_bytes()
}

fn seq_key(id: &str, seq: usize) -> String {
    format!("{}/{:010}", id, seq)
}
