//! Scope router and subscription model
//!
//! Distribution is pull-only: the router never writes into a user's local
//! substrate. After a knowledge commit it emits lightweight availability
//! notifications to users whose subscription matches; the user pulls the
//! DTU on demand. Notifications carry no payload.

use crate::storage::{Storage, StorageError};
use chrono::{DateTime, Duration, Utc};
use concord_core::types::{Dtu, Subscription};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Subscription model errors
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Payload-free availability notification. The event type marker carries
/// `no_bridge` so the bridge never re-ingests its own notifications.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DtuNotification {
    pub event_type: String,
    pub user_id: String,
    pub dtu_id: String,
    pub no_bridge: bool,
}

impl DtuNotification {
    fn available(user_id: &str, dtu_id: &str) -> Self {
        Self {
            event_type: "event:dtu_available".to_string(),
            user_id: user_id.to_string(),
            dtu_id: dtu_id.to_string(),
            no_bridge: true,
        }
    }
}

/// Router metrics snapshot.
#[derive(Clone, Copy, Debug, Default)]
pub struct RouterMetricsSnapshot {
    pub route_count: u64,
    pub multi_lens_routes: u64,
    pub rate_limited: u64,
}

#[derive(Default)]
struct RouterMetrics {
    route_count: AtomicU64,
    multi_lens_routes: AtomicU64,
    rate_limited: AtomicU64,
}

/// Sliding one-hour window of notification timestamps per user.
#[derive(Debug, Default)]
struct RateWindow {
    sent: VecDeque<DateTime<Utc>>,
}

impl RateWindow {
    /// Drop entries older than one hour, then try to consume budget.
    fn try_consume(&mut self, now: DateTime<Utc>, max_per_hour: u32) -> bool {
        let cutoff = now - Duration::hours(1);
        while self.sent.front().is_some_and(|t| *t < cutoff) {
            self.sent.pop_front();
        }
        if self.sent.len() >= max_per_hour as usize {
            return false;
        }
        self.sent.push_back(now);
        true
    }
}

/// Per-user subscriptions plus the authoritative rate limiter.
pub struct SubscriptionModel {
    storage: Arc<Storage>,
    windows: RwLock<HashMap<String, RateWindow>>,
    metrics: RouterMetrics,
}

impl SubscriptionModel {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            windows: RwLock::new(HashMap::new()),
            metrics: RouterMetrics::default(),
        }
    }

    /// Create or replace a user's subscription.
    pub fn upsert(&self, subscription: &Subscription) -> Result<(), SubscriptionError> {
        self.storage.put_subscription(subscription)?;
        Ok(())
    }

    pub fn get(&self, user_id: &str) -> Result<Option<Subscription>, SubscriptionError> {
        Ok(self.storage.get_subscription(user_id)?)
    }

    pub fn remove(&self, user_id: &str) -> Result<(), SubscriptionError> {
        self.storage.remove_subscription(user_id)?;
        self.windows.write().remove(user_id);
        Ok(())
    }

    /// Route a committed knowledge DTU: emit one availability notification
    /// per matching subscriber with rate budget left.
    ///
    /// The DTU itself is already committed; a rate-limited user just misses
    /// the notification and can still pull by query.
    pub fn route(&self, dtu: &Dtu, now: DateTime<Utc>) -> Result<Vec<DtuNotification>, SubscriptionError> {
        self.metrics.route_count.fetch_add(1, Ordering::Relaxed);
        if dtu.scope.lenses().len() > 1 {
            self.metrics.multi_lens_routes.fetch_add(1, Ordering::Relaxed);
        }

        let mut notifications = Vec::new();
        for subscription in self.storage.all_subscriptions() {
            let subscription = subscription?;
            if !self.matches(&subscription, dtu) {
                continue;
            }
            let mut windows = self.windows.write();
            let window = windows.entry(subscription.user_id.clone()).or_default();
            if !window.try_consume(now, subscription.news_filters.max_per_hour) {
                self.metrics.rate_limited.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            notifications.push(DtuNotification::available(&subscription.user_id, &dtu.id));
        }
        Ok(notifications)
    }

    /// Subscription filter: lens overlap, CRETI floor, confidence floor,
    /// muted types, and the event-DTU opt-out.
    fn matches(&self, subscription: &Subscription, dtu: &Dtu) -> bool {
        if !dtu.scope.news_visible() || !dtu.scope.local_pull() {
            return false;
        }
        if dtu.meta.event_origin && !subscription.local_substrate.allow_event_dtus {
            return false;
        }
        let filters = &subscription.news_filters;
        if dtu.meta.creti_score < filters.min_creti {
            return false;
        }
        if dtu.meta.confidence < filters.min_confidence {
            return false;
        }
        if let Some(source_type) = &dtu.meta.source_event_type {
            if filters.muted_types.contains(source_type) {
                return false;
            }
        }
        subscription
            .subscribed_lenses
            .intersection(dtu.scope.lenses())
            .next()
            .is_some()
    }

    /// Drop rate windows with no activity inside the last hour. Called by
    /// the daemon's window purger.
    pub fn purge_windows(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::hours(1);
        let mut windows = self.windows.write();
        let before = windows.len();
        windows.retain(|_, window| window.sent.back().is_some_and(|t| *t >= cutoff));
        before - windows.len()
    }

    pub fn metrics(&self) -> RouterMetricsSnapshot {
        RouterMetricsSnapshot {
            route_count: self.metrics.route_count.load(Ordering::Relaxed),
            multi_lens_routes: self.metrics.multi_lens_routes.load(Ordering::Relaxed),
            rate_limited: self.metrics.rate_limited.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::types::{DtuMeta, EpistemicStance, ScopeFlags};

    fn test_model() -> (SubscriptionModel, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        (SubscriptionModel::new(storage), dir)
    }

    fn science_dtu(id: &str, creti: u8) -> Dtu {
        let mut dtu = Dtu::new(
            id,
            "Science news",
            "event_bridge",
            ScopeFlags::knowledge(vec!["science".to_string(), "news".to_string()]),
            Utc::now(),
        );
        dtu.meta = DtuMeta {
            event_origin: true,
            source_event_type: Some("news:science".to_string()),
            domain: Some("science".to_string()),
            confidence: 0.8,
            stance: EpistemicStance::Observed,
            creti_score: creti,
            raw_event_hash: None,
            compressed: false,
            compressed_into: None,
        };
        dtu
    }

    #[test]
    fn test_lens_intersection_routes() {
        let (model, _dir) = test_model();
        model
            .upsert(&Subscription::new("alice", vec!["science".to_string()]))
            .unwrap();
        model
            .upsert(&Subscription::new("bob", vec!["marketplace".to_string()]))
            .unwrap();

        let notes = model.route(&science_dtu("dtu_1", 60), Utc::now()).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].user_id, "alice");
        assert_eq!(notes[0].event_type, "event:dtu_available");
        assert!(notes[0].no_bridge);
    }

    #[test]
    fn test_min_creti_filter() {
        let (model, _dir) = test_model();
        let mut sub = Subscription::new("alice", vec!["science".to_string()]);
        sub.news_filters.min_creti = 70;
        model.upsert(&sub).unwrap();

        assert!(model.route(&science_dtu("dtu_1", 60), Utc::now()).unwrap().is_empty());
        assert_eq!(model.route(&science_dtu("dtu_2", 80), Utc::now()).unwrap().len(), 1);
    }

    #[test]
    fn test_muted_types() {
        let (model, _dir) = test_model();
        let mut sub = Subscription::new("alice", vec!["science".to_string()]);
        sub.news_filters
            .muted_types
            .insert("news:science".to_string());
        model.upsert(&sub).unwrap();

        assert!(model.route(&science_dtu("dtu_1", 60), Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn test_rate_limit_sliding_window() {
        let (model, _dir) = test_model();
        let mut sub = Subscription::new("alice", vec!["science".to_string()]);
        sub.news_filters.max_per_hour = 2;
        model.upsert(&sub).unwrap();

        let start = Utc::now();
        assert_eq!(model.route(&science_dtu("d1", 50), start).unwrap().len(), 1);
        assert_eq!(model.route(&science_dtu("d2", 50), start).unwrap().len(), 1);
        // Budget exhausted inside the hour.
        assert!(model.route(&science_dtu("d3", 50), start).unwrap().is_empty());
        assert_eq!(model.metrics().rate_limited, 1);

        // Window slides: an hour later the budget is back.
        let later = start + Duration::minutes(61);
        assert_eq!(model.route(&science_dtu("d4", 50), later).unwrap().len(), 1);
    }

    #[test]
    fn test_event_dtu_opt_out() {
        let (model, _dir) = test_model();
        let mut sub = Subscription::new("alice", vec!["science".to_string()]);
        sub.local_substrate.allow_event_dtus = false;
        model.upsert(&sub).unwrap();

        assert!(model.route(&science_dtu("dtu_1", 60), Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn test_purge_windows() {
        let (model, _dir) = test_model();
        model
            .upsert(&Subscription::new("alice", vec!["science".to_string()]))
            .unwrap();
        let start = Utc::now();
        model.route(&science_dtu("d1", 50), start).unwrap();
        assert_eq!(model.purge_windows(start), 0);
        assert_eq!(model.purge_windows(start + Duration::hours(2)), 1);
    }
}
