use crate::cache::Tier;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counters, exposed at `/metrics` and `/stats/cache`.
pub struct Metrics {
    pub seed_hits: AtomicU64,
    pub memory_hits: AtomicU64,
    pub persistent_hits: AtomicU64,
    pub misses: AtomicU64,
    pub generations: AtomicU64,
    pub generation_failures: AtomicU64,
    pub inflight_joins: AtomicU64,
    pub store_errors: AtomicU64,
    pub blobs_stored: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            seed_hits: AtomicU64::new(0),
            memory_hits: AtomicU64::new(0),
            persistent_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            generations: AtomicU64::new(0),
            generation_failures: AtomicU64::new(0),
            inflight_joins: AtomicU64::new(0),
            store_errors: AtomicU64::new(0),
            blobs_stored: AtomicU64::new(0),
        }
    }

    pub fn record_lookup(&self, tier: Tier) {
        let counter = match tier {
            Tier::Seed => &self.seed_hits,
            Tier::Memory => &self.memory_hits,
            Tier::Persistent => &self.persistent_hits,
            Tier::Miss => &self.misses,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.seed_hits.load(Ordering::Relaxed)
            + self.memory_hits.load(Ordering::Relaxed)
            + self.persistent_hits.load(Ordering::Relaxed)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static::lazy_static! {
    pub static ref METRICS: Metrics = Metrics::new();
}

/// Prometheus text exposition of [`METRICS`].
pub fn render_prometheus() -> String {
    let m = &*METRICS;
    let counters: [(&str, &str, &AtomicU64); 9] = [
        ("scentkit_seed_hits_total", "Lookups answered by the seed tier", &m.seed_hits),
        ("scentkit_memory_hits_total", "Lookups answered by the memory tier", &m.memory_hits),
        ("scentkit_persistent_hits_total", "Lookups answered by the persistent tier", &m.persistent_hits),
        ("scentkit_misses_total", "Lookups that missed every tier", &m.misses),
        ("scentkit_generations_total", "Provider generation jobs started", &m.generations),
        ("scentkit_generation_failures_total", "Provider generation jobs that failed", &m.generation_failures),
        ("scentkit_inflight_joins_total", "Callers that joined an in-flight job", &m.inflight_joins),
        ("scentkit_store_errors_total", "Persistent store calls that failed or timed out", &m.store_errors),
        ("scentkit_blobs_stored_total", "Image blobs written", &m.blobs_stored),
    ];

    let mut out = String::new();
    for (name, help, counter) in counters {
        out.push_str(&format!(
            "# HELP {name} {help}\n# TYPE {name} counter\n{name} {}\n",
            counter.load(Ordering::Relaxed)
        ));
    }
    out
}
