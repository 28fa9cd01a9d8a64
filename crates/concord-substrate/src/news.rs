//! News hub: age-based compression into Mega/Hyper aggregates
//!
//! Every compaction cycle folds old event DTUs into Mega DTUs per
//! (day, domain) bucket, and old Megas into Hyper DTUs at weekly and
//! monthly cadence. Compression is lossless: children are marked
//! `compressed` and retained, and `decompress_news_dtu` walks back down.
//! A failing bucket is logged and skipped; the cycle continues.

use crate::storage::{Storage, StorageError};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use concord_core::hash;
use concord_core::types::{Dtu, DtuTier, HumanLayer, MachineLayer, ScopeFlags};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Derivative tag on aggregates created by this hub.
const NEWS_DERIVATIVE: &str = "news_compression";

/// News hub errors
#[derive(Debug, Error)]
pub enum NewsError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("dtu_not_found: {0}")]
    NotFound(String),
    #[error("not_a_news_aggregate: {0}")]
    NotAggregate(String),
}

/// Compaction thresholds.
#[derive(Clone, Copy, Debug)]
pub struct NewsHubConfig {
    /// Event DTUs older than this fold into a daily Mega.
    pub daily_age_hours: i64,
    /// Megas older than this fold into a weekly Hyper.
    pub weekly_age_days: i64,
    /// Stragglers older than this fold into a monthly Hyper.
    pub monthly_age_days: i64,
    /// Minimum bucket population worth aggregating.
    pub min_cluster_size: usize,
}

impl Default for NewsHubConfig {
    fn default() -> Self {
        Self {
            daily_age_hours: 24,
            weekly_age_days: 7,
            monthly_age_days: 30,
            min_cluster_size: 3,
        }
    }
}

/// What one compaction tick did.
#[derive(Clone, Copy, Debug, Default)]
pub struct CompactionReport {
    pub megas_created: usize,
    pub hypers_created: usize,
    pub children_compressed: usize,
    pub buckets_failed: usize,
}

/// One child entry in a decomposition.
#[derive(Clone, Debug, PartialEq)]
pub struct ChildRecord {
    pub id: String,
    pub summary: String,
    /// True when the child is itself a Mega/Hyper that can be decomposed.
    pub can_decompress: bool,
}

/// Result of decompressing an aggregate.
#[derive(Clone, Debug)]
pub struct NewsDecomposition {
    pub parent: Dtu,
    pub children: Vec<ChildRecord>,
}

/// The news compression hub.
pub struct NewsHub {
    storage: Arc<Storage>,
    config: NewsHubConfig,
    /// One compaction at a time; buckets are collapsed under this lock so
    /// ingest into a bucket either lands before the collapse or after it.
    compaction_lock: Mutex<()>,
}

impl NewsHub {
    pub fn new(storage: Arc<Storage>, config: NewsHubConfig) -> Self {
        Self {
            storage,
            config,
            compaction_lock: Mutex::new(()),
        }
    }

    /// Run one compaction cycle at time `now`.
    pub fn run_compaction(&self, now: DateTime<Utc>) -> Result<CompactionReport, NewsError> {
        let _guard = self.compaction_lock.lock();
        let mut report = CompactionReport::default();

        self.collapse_events_daily(now, &mut report)?;
        self.collapse_megas(
            now,
            Duration::days(self.config.weekly_age_days),
            WeekOrMonth::Week,
            &mut report,
        )?;
        self.collapse_megas(
            now,
            Duration::days(self.config.monthly_age_days),
            WeekOrMonth::Month,
            &mut report,
        )?;

        debug!(
            megas = report.megas_created,
            hypers = report.hypers_created,
            children = report.children_compressed,
            failed = report.buckets_failed,
            "compaction cycle complete"
        );
        Ok(report)
    }

    /// Daily pass: event DTUs older than `daily_age_hours`, bucketed by
    /// (day, domain).
    fn collapse_events_daily(
        &self,
        now: DateTime<Utc>,
        report: &mut CompactionReport,
    ) -> Result<(), NewsError> {
        let cutoff = now - Duration::hours(self.config.daily_age_hours);
        let mut buckets: BTreeMap<(NaiveDate, String), Vec<Dtu>> = BTreeMap::new();

        for dtu in self.storage.all_dtus() {
            let dtu = dtu?;
            let eligible = dtu.meta.event_origin
                && !dtu.meta.compressed
                && matches!(dtu.tier, DtuTier::Shadow | DtuTier::Regular)
                && dtu.created_at <= cutoff
                && dtu.scope.news_visible();
            if !eligible {
                continue;
            }
            let domain = dtu.meta.domain.clone().unwrap_or_else(|| "general".to_string());
            buckets
                .entry((dtu.created_at.date_naive(), domain))
                .or_default()
                .push(dtu);
        }

        for ((day, domain), children) in buckets {
            if children.len() < self.config.min_cluster_size {
                continue;
            }
            let title = format!("Daily digest — {} ({})", domain, day);
            match self.collapse_bucket(children, DtuTier::Mega, "mega", &domain, &title, now) {
                Ok(count) => {
                    report.megas_created += 1;
                    report.children_compressed += count;
                }
                Err(e) => {
                    warn!(%domain, %day, error = %e, "daily bucket collapse failed");
                    report.buckets_failed += 1;
                }
            }
        }
        Ok(())
    }

    /// Weekly/monthly pass: uncompressed Megas older than the window,
    /// bucketed by (period, domain), collapse into Hypers.
    fn collapse_megas(
        &self,
        now: DateTime<Utc>,
        min_age: Duration,
        period: WeekOrMonth,
        report: &mut CompactionReport,
    ) -> Result<(), NewsError> {
        let cutoff = now - min_age;
        let mut buckets: BTreeMap<(String, String), Vec<Dtu>> = BTreeMap::new();

        for dtu in self.storage.all_dtus() {
            let dtu = dtu?;
            let eligible = dtu.tier == DtuTier::Mega
                && !dtu.meta.compressed
                && dtu.lineage.derivative_type.as_deref() == Some(NEWS_DERIVATIVE)
                && dtu.created_at <= cutoff;
            if !eligible {
                continue;
            }
            let domain = dtu.meta.domain.clone().unwrap_or_else(|| "general".to_string());
            buckets
                .entry((period.bucket_key(dtu.created_at), domain))
                .or_default()
                .push(dtu);
        }

        for ((period_key, domain), children) in buckets {
            if children.len() < self.config.min_cluster_size {
                continue;
            }
            let title = format!("{} digest — {} ({})", period.label(), domain, period_key);
            match self.collapse_bucket(children, DtuTier::Hyper, "hyper", &domain, &title, now) {
                Ok(count) => {
                    report.hypers_created += 1;
                    report.children_compressed += count;
                }
                Err(e) => {
                    warn!(%domain, %period_key, error = %e, "mega bucket collapse failed");
                    report.buckets_failed += 1;
                }
            }
        }
        Ok(())
    }

    /// Collapse one bucket into an aggregate. The parent is written first;
    /// children are then marked compressed. Children are never deleted.
    fn collapse_bucket(
        &self,
        children: Vec<Dtu>,
        tier: DtuTier,
        id_prefix: &str,
        domain: &str,
        title: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, NewsError> {
        let child_ids: Vec<String> = children.iter().map(|c| c.id.clone()).collect();
        let lens_union: Vec<String> = children
            .iter()
            .flat_map(|c| c.scope.lenses().iter().cloned())
            .collect();

        let mut parent = Dtu::new(
            hash::generate_id(id_prefix),
            title,
            "news_hub",
            ScopeFlags::knowledge(lens_union),
            now,
        );
        parent.tier = tier;
        parent.human = Some(HumanLayer {
            title: Some(title.to_string()),
            summary: format!("{} items aggregated in {}", children.len(), domain),
        });
        parent.machine = Some(MachineLayer {
            schema: Some(NEWS_DERIVATIVE.to_string()),
            fields: [
                (
                    "child_count".to_string(),
                    serde_json::json!(children.len()),
                ),
                ("domain".to_string(), serde_json::json!(domain)),
            ]
            .into_iter()
            .collect(),
        });
        parent.meta.domain = Some(domain.to_string());
        parent.lineage.parents = child_ids;
        parent.lineage.derivative_type = Some(NEWS_DERIVATIVE.to_string());

        self.storage.put_dtu(&parent)?;

        let mut marked = 0;
        for mut child in children {
            child.meta.compressed = true;
            child.meta.compressed_into = Some(parent.id.clone());
            child.updated_at = now;
            self.storage.put_dtu(&child)?;
            marked += 1;
        }
        Ok(marked)
    }

    /// Decompose an aggregate back into its children. Children missing
    /// from the hot store still yield a stub record.
    pub fn decompress_news_dtu(&self, id: &str) -> Result<NewsDecomposition, NewsError> {
        let parent = self
            .storage
            .get_dtu(id)?
            .ok_or_else(|| NewsError::NotFound(id.to_string()))?;
        if !matches!(parent.tier, DtuTier::Mega | DtuTier::Hyper)
            || parent.lineage.parents.is_empty()
        {
            return Err(NewsError::NotAggregate(id.to_string()));
        }

        let mut children = Vec::with_capacity(parent.lineage.parents.len());
        for child_id in &parent.lineage.parents {
            match self.storage.get_dtu(child_id)? {
                Some(child) => children.push(ChildRecord {
                    id: child.id.clone(),
                    summary: child
                        .human
                        .as_ref()
                        .map(|h| h.summary.clone())
                        .unwrap_or_else(|| child.title.clone()),
                    can_decompress: matches!(child.tier, DtuTier::Mega | DtuTier::Hyper),
                }),
                None => children.push(ChildRecord {
                    id: child_id.clone(),
                    summary: "(archived)".to_string(),
                    can_decompress: false,
                }),
            }
        }

        Ok(NewsDecomposition { parent, children })
    }
}

#[derive(Clone, Copy, Debug)]
enum WeekOrMonth {
    Week,
    Month,
}

impl WeekOrMonth {
    fn bucket_key(&self, at: DateTime<Utc>) -> String {
        match self {
            Self::Week => {
                let week = at.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            Self::Month => format!("{}-{:02}", at.year(), at.month()),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Week => "Weekly",
            Self::Month => "Monthly",
        }
    }
}
