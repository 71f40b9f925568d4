//! TTL-bounded artifact cache with single-flight admission.
//!
//! Keys are fingerprints of the normalized request text. A cache hit
//! returns the full stored response; a miss hands the caller a per-key
//! flight lock so that concurrent identical requests resolve to one
//! pipeline run.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use moka::sync::Cache;
use tracing::debug;

use sibyl_core::config::CacheConfig;
use sibyl_core::types::Response;

pub struct ArtifactCache {
    entries: Cache<String, Arc<Response>>,
    flights: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl ArtifactCache {
    pub fn new(config: &CacheConfig) -> Self {
        let entries = Cache::builder()
            .max_capacity(config.capacity)
            .time_to_live(Duration::from_secs(config.ttl_secs))
            .build();
        Self {
            entries,
            flights: DashMap::new(),
        }
    }

    pub fn get(&self, fingerprint: &str) -> Option<Arc<Response>> {
        let hit = self.entries.get(fingerprint);
        if hit.is_some() {
            debug!(fingerprint, "cache hit");
        }
        hit
    }

    /// Only successful responses are stored; failures must re-run.
    pub fn insert(&self, fingerprint: &str, response: Arc<Response>) {
        if response.success {
            self.entries.insert(fingerprint.to_string(), response);
        }
    }

    /// Lock guarding the pipeline run for one fingerprint. Callers must
    /// re-check `get` after acquiring it: the first flight through may
    /// have already populated the entry.
    pub fn flight_lock(&self, fingerprint: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.flights
            .entry(fingerprint.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drop the flight lock once the run settled, so the map does not
    /// accumulate one entry per distinct request ever seen.
    pub fn release_flight(&self, fingerprint: &str) {
        self.flights.remove(fingerprint);
    }

    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
