//! Event classification tables
//!
//! Two frozen tables drive the bridge: `DTU_WORTHY_EVENTS` decides whether
//! an event type produces a DTU at all (and with which domain and base
//! confidence), and `EVENT_SCOPE_MAP` decides which lenses see the result.
//! Unknown event types resolve to no lenses and are dropped. Events from a
//! registered external source are classified by that source's own map.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Classification entry: topical domain plus base confidence.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EventClass {
    pub domain: &'static str,
    pub confidence: f64,
}

/// Event types worth turning into DTUs.
pub static DTU_WORTHY_EVENTS: Lazy<HashMap<&'static str, EventClass>> = Lazy::new(|| {
    HashMap::from([
        ("news:politics", EventClass { domain: "politics", confidence: 0.75 }),
        ("news:science", EventClass { domain: "science", confidence: 0.80 }),
        ("news:economy", EventClass { domain: "economy", confidence: 0.75 }),
        ("news:world", EventClass { domain: "world", confidence: 0.70 }),
        ("council:vote", EventClass { domain: "governance", confidence: 0.90 }),
        ("council:proposal", EventClass { domain: "governance", confidence: 0.85 }),
        ("research:published", EventClass { domain: "science", confidence: 0.85 }),
        ("entity:emerged", EventClass { domain: "emergence", confidence: 0.80 }),
        ("entity:transferred", EventClass { domain: "emergence", confidence: 0.70 }),
        ("dream:captured", EventClass { domain: "cognition", confidence: 0.60 }),
        ("insight:recorded", EventClass { domain: "cognition", confidence: 0.75 }),
        ("market:listing_created", EventClass { domain: "marketplace", confidence: 0.60 }),
        ("market:sale_completed", EventClass { domain: "marketplace", confidence: 0.70 }),
        ("lens:registered", EventClass { domain: "platform", confidence: 0.70 }),
        ("federation:promotion", EventClass { domain: "federation", confidence: 0.80 }),
        // Operational events: DTU-worthy but routed to the system store.
        ("repair:cycle_complete", EventClass { domain: "system", confidence: 0.95 }),
        ("repair:anomaly_detected", EventClass { domain: "system", confidence: 0.95 }),
        ("system:heartbeat", EventClass { domain: "system", confidence: 0.90 }),
        ("system:migration", EventClass { domain: "system", confidence: 0.95 }),
    ])
});

/// Frozen event-type → lens routing.
pub static EVENT_SCOPE_MAP: Lazy<HashMap<&'static str, &'static [&'static str]>> =
    Lazy::new(|| {
        HashMap::from([
            ("news:politics", &["news", "governance", "law"][..]),
            ("news:science", &["news", "science", "research"][..]),
            ("news:economy", &["news", "economy"][..]),
            ("news:world", &["news"][..]),
            ("council:vote", &["governance"][..]),
            ("council:proposal", &["governance"][..]),
            ("research:published", &["science", "research"][..]),
            ("entity:emerged", &["emergence"][..]),
            ("entity:transferred", &["emergence"][..]),
            ("dream:captured", &["cognition"][..]),
            ("insight:recorded", &["cognition"][..]),
            ("market:listing_created", &["marketplace"][..]),
            ("market:sale_completed", &["marketplace"][..]),
            ("lens:registered", &["platform"][..]),
            ("federation:promotion", &["federation"][..]),
            ("repair:cycle_complete", &["system"][..]),
            ("repair:anomaly_detected", &["system"][..]),
            ("system:heartbeat", &["system"][..]),
            ("system:migration", &["system"][..]),
        ])
    });

/// Is this an operational event that must never reach the knowledge store?
pub fn is_system_event(event_type: &str) -> bool {
    event_type.starts_with("repair:") || event_type.starts_with("system:")
}

/// Lenses an event type routes to; empty for unknown types.
pub fn scope_lenses(event_type: &str) -> Vec<String> {
    EVENT_SCOPE_MAP
        .get(event_type)
        .map(|lenses| lenses.iter().map(|l| l.to_string()).collect())
        .unwrap_or_default()
}

/// Classifier output for one event.
#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    pub event_type: String,
    pub domain: String,
    pub confidence: f64,
    pub is_external: bool,
}

/// Registered external sources with their own classifier tables.
#[derive(Default)]
pub struct ExternalSourceRegistry {
    sources: RwLock<HashMap<String, HashMap<String, EventClass>>>,
}

impl ExternalSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a source's classifier map.
    pub fn register(&self, source_id: &str, table: HashMap<String, EventClass>) {
        self.sources.write().insert(source_id.to_string(), table);
    }

    pub fn is_registered(&self, source_id: &str) -> bool {
        self.sources.read().contains_key(source_id)
    }

    /// Classify an event, routing through the source's table when the event
    /// came from a registered external source. `None` means not DTU-worthy.
    pub fn classify(&self, event_type: &str, source: Option<&str>) -> Option<Classification> {
        if let Some(source_id) = source {
            let sources = self.sources.read();
            if let Some(table) = sources.get(source_id) {
                let class = table.get(event_type)?;
                return Some(Classification {
                    event_type: event_type.to_string(),
                    domain: class.domain.to_string(),
                    confidence: class.confidence,
                    is_external: true,
                });
            }
        }
        let class = DTU_WORTHY_EVENTS.get(event_type)?;
        Some(Classification {
            event_type: event_type.to_string(),
            domain: class.domain.to_string(),
            confidence: class.confidence,
            is_external: false,
        })
    }
}
