//! concordd server - subsystem wiring and background loops
//!
//! Four long-lived loops run alongside request handling: the CRI
//! heartbeat sweep, the news compaction tick, the nightly compliance
//! audit, and the subscription rate-window purger. Each loop finishes its
//! current tick on shutdown, isolates per-item failures, and skips a tick
//! outright if the previous one is still running.

use crate::config::Config;
use chrono::{Duration as ChronoDuration, NaiveDate, Timelike, Utc};
use concord_compliance::protection::ProtectionError;
use concord_compliance::runner::ComplianceError;
use concord_compliance::{ComplianceRunner, ThreatLattice};
use concord_core::codec::DtuCodec;
use concord_core::error::CodecError;
use concord_federation::registry::FederationError;
use concord_federation::resolver::{self, QueryHit, Resolution, ResolverError, TierSearch};
use concord_federation::FederationRegistry;
use concord_core::types::{Dtu, FederationTier};
use concord_substrate::rights::{DerivativePolicy, LicenseKind, RightsError};
use concord_substrate::subscription::DtuNotification;
use concord_substrate::bridge::{BridgeError, BridgeOutcome};
use concord_substrate::canonical::CanonicalRegistry;
use concord_substrate::files::{FileError, FileRecord, ImportOutcome};
use concord_substrate::news::NewsHubConfig;
use concord_substrate::rights::RightsLedger;
use concord_substrate::storage::StorageError;
use concord_substrate::subscription::RouterMetricsSnapshot;
use concord_substrate::{
    BridgeEvent, EventBridge, FileRegistry, NewsHub, Storage, SubscriptionModel,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    File(#[from] FileError),
    #[error(transparent)]
    Federation(#[from] FederationError),
    #[error(transparent)]
    Compliance(#[from] ComplianceError),
    #[error(transparent)]
    Protection(#[from] ProtectionError),
    #[error(transparent)]
    Rights(#[from] RightsError),
    #[error(transparent)]
    Resolver(#[from] ResolverError),
    #[error("dtu_not_found: {0}")]
    DtuNotFound(String),
    /// The system store is reserved for the bridge's operational events.
    #[error("system_scope_reserved")]
    SystemScopeReserved,
}

/// Receipt for a lens-created DTU.
#[derive(Clone, Debug)]
pub struct CreatedDtu {
    pub dtu_id: String,
    pub canonical_dtu_id: String,
    pub is_canonical: bool,
    pub notifications: Vec<DtuNotification>,
}

/// The wired substrate.
pub struct Server {
    config: Config,
    storage: Arc<Storage>,
    codec: Arc<DtuCodec>,
    bridge: Arc<EventBridge>,
    subscriptions: Arc<SubscriptionModel>,
    canonical: Arc<CanonicalRegistry>,
    rights: Arc<RightsLedger>,
    files: Arc<FileRegistry>,
    news: Arc<NewsHub>,
    federation: Arc<FederationRegistry>,
    compliance: Arc<ComplianceRunner>,
    lattice: Arc<ThreatLattice>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Wire all subsystems over one database.
    pub fn new(config: Config) -> Result<Self, ServerError> {
        let storage = Arc::new(Storage::open(&config.data_dir)?);
        let codec = Arc::new(DtuCodec::new(config.signing_key()));
        let canonical = Arc::new(CanonicalRegistry::new(storage.clone()));
        let subscriptions = Arc::new(SubscriptionModel::new(storage.clone()));
        let rights = Arc::new(RightsLedger::new(storage.clone()));
        let files = Arc::new(FileRegistry::new(storage.clone()));
        let bridge = Arc::new(EventBridge::new(
            storage.clone(),
            canonical.clone(),
            subscriptions.clone(),
        ));
        let news = Arc::new(NewsHub::new(
            storage.clone(),
            NewsHubConfig {
                daily_age_hours: config.daily_age_hours,
                weekly_age_days: config.weekly_age_days,
                monthly_age_days: config.weekly_age_days.max(30),
                min_cluster_size: config.min_cluster_size,
            },
        ));
        let federation = Arc::new(FederationRegistry::open(storage.db())?);
        let compliance = Arc::new(ComplianceRunner::open(storage.db())?);
        let lattice = Arc::new(ThreatLattice::open(storage.db())?);

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            storage,
            codec,
            bridge,
            subscriptions,
            canonical,
            rights,
            files,
            news,
            federation,
            compliance,
            lattice,
            shutdown_tx,
        })
    }

    /// Run the background loops until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        info!(data_dir = %self.config.data_dir.display(), "starting concordd");

        let sweep_handle = self.spawn_heartbeat_sweep();
        let compaction_handle = self.spawn_compaction_tick();
        let audit_handle = self.spawn_nightly_audit();
        let purge_handle = self.spawn_window_purger();

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let _ = shutdown_rx.recv().await;
        info!("shutting down");

        for handle in [sweep_handle, compaction_handle, audit_handle, purge_handle] {
            handle.abort();
        }

        self.storage.flush()?;
        Ok(())
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    // -------------------------------------------------------------------------
    // Request-path operations
    // -------------------------------------------------------------------------

    /// Ingest one event through the bridge.
    pub fn ingest_event(&self, event: &BridgeEvent) -> Result<BridgeOutcome, ServerError> {
        Ok(self.bridge.ingest(event)?)
    }

    /// Encode a stored DTU to its container form and register the export.
    pub fn export_dtu(&self, dtu_id: &str) -> Result<(FileRecord, Vec<u8>), ServerError> {
        let dtu = self
            .storage
            .get_dtu(dtu_id)?
            .ok_or_else(|| ServerError::DtuNotFound(dtu_id.to_string()))?;
        let encoded = self.codec.encode(&dtu)?;
        let record = self.files.record_export(dtu_id, &encoded)?;
        Ok((record, encoded.buffer))
    }

    /// Import a container buffer; known files dedup to the registered DTU.
    pub fn import_dtu(&self, buffer: &[u8]) -> Result<ImportOutcome, ServerError> {
        Ok(self.files.import(buffer)?)
    }

    /// Create a DTU directly (the lens `create` path). Registers canonical
    /// content and rights, commits to the knowledge store, and routes
    /// availability notifications.
    pub fn create_dtu(&self, dtu: Dtu) -> Result<CreatedDtu, ServerError> {
        if dtu.scope.is_system_only() {
            return Err(ServerError::SystemScopeReserved);
        }

        let content = serde_json::to_vec(&(
            &dtu.human,
            &dtu.core,
            &dtu.machine,
            dtu.artifact.as_ref().map(|a| &a.data),
        ))
        .map_err(StorageError::from)?;
        let content_hash = concord_core::hash::canonical_hash(&content).to_hex();
        let registration = self.canonical.register(&content, &dtu.id).map_err(BridgeError::from)?;

        if registration.is_new {
            self.rights.register(
                &content_hash,
                &dtu.creator_id,
                LicenseKind::PlatformLicense,
                false,
                DerivativePolicy::Unrestricted,
            )?;
        }

        self.storage.put_dtu(&dtu)?;
        let notifications = self
            .subscriptions
            .route(&dtu, Utc::now())
            .map_err(BridgeError::from)?;

        Ok(CreatedDtu {
            dtu_id: dtu.id,
            canonical_dtu_id: registration.canonical_dtu_id,
            is_canonical: registration.is_new,
            notifications,
        })
    }

    /// Resolve a query against the store, escalating upward from `origin`.
    ///
    /// Local search scans the knowledge store; higher tiers search only
    /// content promoted to that tier.
    pub fn resolve(&self, query: &str, origin: FederationTier) -> Result<Resolution, ServerError> {
        let resolution = resolver::resolve_query(&self.federation, query, origin, |q, tier| {
            self.search_tier(q, tier)
        })?;
        Ok(resolution)
    }

    fn search_tier(&self, query: &str, tier: FederationTier) -> TierSearch {
        let needle = query.to_lowercase();
        let matches = |dtu: &Dtu| {
            !dtu.scope.is_system_only()
                && dtu.scope.local_pull()
                && (dtu.title.to_lowercase().contains(&needle)
                    || dtu.scope.lenses().contains(&needle))
        };

        let mut hits = Vec::new();
        if tier == FederationTier::Local {
            for dtu in self.storage.all_dtus() {
                match dtu {
                    Ok(dtu) if dtu.federation_tier == tier && matches(&dtu) => {
                        hits.push(QueryHit {
                            dtu_id: dtu.id,
                            title: dtu.title,
                        })
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "skipping undecodable DTU during search"),
                }
            }
        } else {
            let ids = match self.federation.tier_content_ids(tier) {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(error = %e, %tier, "tier content lookup failed");
                    return TierSearch::default();
                }
            };
            for id in ids {
                match self.storage.get_dtu(&id) {
                    Ok(Some(dtu)) if dtu.federation_tier == tier && matches(&dtu) => {
                        hits.push(QueryHit {
                            dtu_id: dtu.id,
                            title: dtu.title,
                        })
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, %id, "tier content fetch failed"),
                }
            }
        }

        TierSearch {
            sufficient: !hits.is_empty(),
            hits,
        }
    }

    // -------------------------------------------------------------------------
    // Background loops
    // -------------------------------------------------------------------------

    fn spawn_heartbeat_sweep(&self) -> tokio::task::JoinHandle<()> {
        let federation = self.federation.clone();
        let threshold = ChronoDuration::seconds(self.config.heartbeat_threshold_secs as i64);
        let sweep_secs = self.config.heartbeat_sweep_secs;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(sweep_secs));
            let busy = Arc::new(AtomicBool::new(false));

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if busy.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed).is_err() {
                            debug!("heartbeat sweep still running; tick skipped");
                            continue;
                        }
                        let federation = federation.clone();
                        let busy = busy.clone();
                        tokio::task::spawn_blocking(move || {
                            match federation.sweep_stale_cris(threshold, Utc::now()) {
                                Ok(0) => {}
                                Ok(swept) => info!(swept, "marked stale CRIs offline"),
                                Err(e) => warn!(error = %e, "heartbeat sweep failed"),
                            }
                            busy.store(false, Ordering::Release);
                        });
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        })
    }

    fn spawn_compaction_tick(&self) -> tokio::task::JoinHandle<()> {
        let news = self.news.clone();
        let bridge = self.bridge.clone();
        let interval_secs = self.config.compaction_interval_secs;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(interval_secs));
            let busy = Arc::new(AtomicBool::new(false));

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if busy.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed).is_err() {
                            debug!("compaction still running; tick skipped");
                            continue;
                        }
                        let news = news.clone();
                        let bridge = bridge.clone();
                        let busy = busy.clone();
                        tokio::task::spawn_blocking(move || {
                            match news.run_compaction(Utc::now()) {
                                Ok(report) if report.megas_created + report.hypers_created > 0 => {
                                    info!(
                                        megas = report.megas_created,
                                        hypers = report.hypers_created,
                                        "news compaction"
                                    );
                                }
                                Ok(_) => {}
                                Err(e) => warn!(error = %e, "compaction tick failed"),
                            }
                            // A compaction tick bounds the bridge's dedup cycle.
                            bridge.begin_cycle();
                            busy.store(false, Ordering::Release);
                        });
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        })
    }

    fn spawn_nightly_audit(&self) -> tokio::task::JoinHandle<()> {
        let compliance = self.compliance.clone();
        let audit_hour = self.config.audit_hour;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(60));
            let busy = Arc::new(AtomicBool::new(false));
            let mut last_run: Option<NaiveDate> = None;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = Utc::now();
                        if now.hour() != audit_hour || last_run == Some(now.date_naive()) {
                            continue;
                        }
                        if busy.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed).is_err() {
                            continue;
                        }
                        last_run = Some(now.date_naive());
                        let compliance = compliance.clone();
                        let busy = busy.clone();
                        tokio::task::spawn_blocking(move || {
                            match compliance.nightly_audit(now) {
                                Ok(report) => info!(
                                    checked = report.lenses_checked,
                                    failed = report.lenses_failed,
                                    disabled = report.lenses_disabled,
                                    "nightly compliance audit"
                                ),
                                Err(e) => warn!(error = %e, "nightly audit failed"),
                            }
                            busy.store(false, Ordering::Release);
                        });
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        })
    }

    fn spawn_window_purger(&self) -> tokio::task::JoinHandle<()> {
        let subscriptions = self.subscriptions.clone();
        let interval_secs = self.config.purge_interval_secs;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(interval_secs));

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let purged = subscriptions.purge_windows(Utc::now());
                        if purged > 0 {
                            debug!(purged, "purged idle rate windows");
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        })
    }

    // -------------------------------------------------------------------------
    // Accessors and stats
    // -------------------------------------------------------------------------

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn bridge(&self) -> &Arc<EventBridge> {
        &self.bridge
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionModel> {
        &self.subscriptions
    }

    pub fn canonical(&self) -> &Arc<CanonicalRegistry> {
        &self.canonical
    }

    pub fn rights(&self) -> &Arc<RightsLedger> {
        &self.rights
    }

    pub fn news(&self) -> &Arc<NewsHub> {
        &self.news
    }

    pub fn federation(&self) -> &Arc<FederationRegistry> {
        &self.federation
    }

    pub fn compliance(&self) -> &Arc<ComplianceRunner> {
        &self.compliance
    }

    pub fn lattice(&self) -> &Arc<ThreatLattice> {
        &self.lattice
    }

    /// Aggregated metrics snapshot.
    pub fn stats(&self) -> ServerStats {
        ServerStats {
            knowledge_dtus: self.storage.dtu_count(),
            system_dtus: self.storage.system_dtu_count(),
            canonical_entries: self.canonical.entry_count(),
            bridge: self.bridge.metrics(),
            router: self.subscriptions.metrics(),
            registry: self.federation.stats(),
            lens_count: self.compliance.lens_count(),
            threat_count: self.lattice.threat_count(),
        }
    }
}

/// Server statistics
#[derive(Clone, Debug)]
pub struct ServerStats {
    pub knowledge_dtus: usize,
    pub system_dtus: usize,
    pub canonical_entries: usize,
    pub bridge: concord_substrate::bridge::BridgeMetricsSnapshot,
    pub router: RouterMetricsSnapshot,
    pub registry: concord_federation::registry::RegistryStats,
    pub lens_count: usize,
    pub threat_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_server() -> (Server, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            signing_seed: Some("22".repeat(32)),
            heartbeat_threshold_secs: 300,
            heartbeat_sweep_secs: 60,
            compaction_interval_secs: 3600,
            daily_age_hours: 24,
            weekly_age_days: 7,
            min_cluster_size: 3,
            audit_hour: 3,
            purge_interval_secs: 600,
            verbose: false,
            log_format: "pretty".to_string(),
        };
        (Server::new(config).unwrap(), dir)
    }

    #[test]
    fn test_server_creation() {
        let (server, _dir) = test_server();
        let stats = server.stats();
        assert_eq!(stats.knowledge_dtus, 0);
        assert_eq!(stats.system_dtus, 0);
        assert_eq!(stats.lens_count, 0);
    }

    #[test]
    fn test_ingest_updates_stats() {
        let (server, _dir) = test_server();
        server
            .ingest_event(&BridgeEvent::new("council:vote", json!({"decision": "approved"})))
            .unwrap();
        server
            .ingest_event(&BridgeEvent::new("system:heartbeat", json!({"uptime": 12})))
            .unwrap();

        let stats = server.stats();
        assert_eq!(stats.knowledge_dtus, 1);
        assert_eq!(stats.system_dtus, 1);
        assert_eq!(stats.bridge.events_received, 2);
        assert_eq!(stats.bridge.system_dtus_routed, 1);
    }

    #[test]
    fn test_export_import_roundtrip() {
        let (server, _dir) = test_server();
        let outcome = server
            .ingest_event(&BridgeEvent::new("news:science", json!({"title": "Export me"})))
            .unwrap();
        let dtu_id = match outcome {
            BridgeOutcome::Committed(receipt) => receipt.dtu_id,
            BridgeOutcome::Rejected(r) => panic!("rejected: {}", r.kind()),
        };

        let (record, buffer) = server.export_dtu(&dtu_id).unwrap();
        assert_eq!(record.dtu_id, dtu_id);
        assert_eq!(record.extension, ".dtu");

        match server.import_dtu(&buffer).unwrap() {
            ImportOutcome::Existing { dtu_id: imported } => assert_eq!(imported, dtu_id),
            ImportOutcome::New { .. } => panic!("export should be registered"),
        }
    }

    #[test]
    fn test_export_missing_dtu() {
        let (server, _dir) = test_server();
        assert!(matches!(
            server.export_dtu("dtu_missing"),
            Err(ServerError::DtuNotFound(_))
        ));
    }

    #[test]
    fn test_lens_create_path() {
        use concord_core::types::{HumanLayer, ScopeFlags, Subscription};

        let (server, _dir) = test_server();
        server
            .subscriptions()
            .upsert(&Subscription::new("alice", vec!["science".to_string()]))
            .unwrap();

        let mut dtu = Dtu::new(
            "dtu_lens_1",
            "Hand-written note",
            "lens_science",
            ScopeFlags::knowledge(vec!["science".to_string()]),
            Utc::now(),
        );
        dtu.human = Some(HumanLayer {
            title: None,
            summary: "written via a lens".to_string(),
        });

        let created = server.create_dtu(dtu.clone()).unwrap();
        assert!(created.is_canonical);
        assert_eq!(created.notifications.len(), 1);
        assert!(server.storage().has_dtu("dtu_lens_1").unwrap());

        // Identical content from another lens references the canonical DTU.
        let mut duplicate = dtu;
        duplicate.id = "dtu_lens_2".to_string();
        let second = server.create_dtu(duplicate).unwrap();
        assert!(!second.is_canonical);
        assert_eq!(second.canonical_dtu_id, "dtu_lens_1");
    }

    #[test]
    fn test_lens_create_rejects_system_scope() {
        use concord_core::types::ScopeFlags;

        let (server, _dir) = test_server();
        let dtu = Dtu::new(
            "dtu_sys",
            "Sneaky",
            "lens_x",
            ScopeFlags::system(vec!["system".to_string()]),
            Utc::now(),
        );
        assert!(matches!(
            server.create_dtu(dtu),
            Err(ServerError::SystemScopeReserved)
        ));
        assert_eq!(server.storage().system_dtu_count(), 0);
    }

    #[test]
    fn test_resolve_local_and_escalated() {
        let (server, _dir) = test_server();
        let outcome = server
            .ingest_event(&BridgeEvent::new("news:science", json!({"title": "Fusion milestone"})))
            .unwrap();
        let dtu_id = match outcome {
            BridgeOutcome::Committed(receipt) => receipt.dtu_id,
            BridgeOutcome::Rejected(r) => panic!("rejected: {}", r.kind()),
        };

        // Local-tier content resolves at the origin and persists.
        let resolution = server.resolve("fusion", FederationTier::Local).unwrap();
        assert_eq!(resolution.resolved_at, FederationTier::Local);
        assert!(resolution.persisted);
        assert_eq!(resolution.hits[0].dtu_id, dtu_id);

        // Promote the DTU to national; now only escalation finds it.
        let mut dtu = server.storage().get_dtu(&dtu_id).unwrap().unwrap();
        dtu.federation_tier = FederationTier::National;
        server.storage().put_dtu(&dtu).unwrap();
        server
            .federation()
            .append_promotion(&dtu_id, FederationTier::Local, FederationTier::National, Utc::now())
            .unwrap();

        let escalated = server.resolve("fusion", FederationTier::Local).unwrap();
        assert_eq!(escalated.resolved_at, FederationTier::National);
        assert!(escalated.ephemeral);
        assert!(!escalated.persisted);
        assert_eq!(escalated.expires_after, Some("session"));
        assert_eq!(server.federation().escalation_count(), 1);

        // Nothing matches nonsense anywhere.
        assert!(matches!(
            server.resolve("xyzzy", FederationTier::Local),
            Err(ServerError::Resolver(ResolverError::Exhausted))
        ));
    }
}
