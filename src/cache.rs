//! TTL-keyed optimization stores: deduplication markers and the
//! device→talhão resolution cache.
//!
//! Both stores are hints, not correctness dependencies: callers must treat
//! a miss (including an expired or lost entry) as "not seen" / "not found"
//! and fall through. A networked implementation behind these traits must
//! swallow its own connectivity errors the same way — never block the
//! ingestion path on an optimization store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

// ---

/// Answers "has this event been durably handled already?" and records that
/// it has. Entries expire after the retention window.
#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn is_duplicate(&self, event_id: &str) -> bool;
    async fn mark(&self, event_id: &str);
}

/// Last known device→talhão mapping, refreshed by any successful directory
/// resolution. The device directory remains the source of truth.
#[async_trait]
pub trait DeviceCache: Send + Sync {
    async fn get_talhao_id(&self, device_id: &str) -> Option<String>;
    async fn set_talhao_id(&self, device_id: &str, talhao_id: &str);
}

// ---

/// In-process TTL map with lazy eviction.
///
/// Reads take the read lock; an expired hit is removed under the write
/// lock and reported as a miss. Inserts sweep expired entries opportunistically
/// so the map does not grow without bound between reads.
struct TtlMap<V: Clone> {
    entries: RwLock<HashMap<String, (V, DateTime<Utc>)>>,
    ttl: Duration,
}

impl<V: Clone> TtlMap<V> {
    fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    async fn get(&self, key: &str) -> Option<V> {
        // ---
        let now = Utc::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((value, expires_at)) if *expires_at > now => return Some(value.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        // Expired: evict under the write lock, re-checking in case a
        // concurrent insert refreshed the entry meanwhile.
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > now => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn insert(&self, key: &str, value: V) {
        // ---
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        entries.insert(key.to_string(), (value, now + self.ttl));
    }
}

// ---

/// In-process dedup store. Default retention: 7 days.
pub struct InMemoryDedupStore {
    markers: TtlMap<DateTime<Utc>>,
}

impl InMemoryDedupStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            markers: TtlMap::new(retention),
        }
    }
}

#[async_trait]
impl DedupStore for InMemoryDedupStore {
    async fn is_duplicate(&self, event_id: &str) -> bool {
        self.markers.get(event_id).await.is_some()
    }

    async fn mark(&self, event_id: &str) {
        self.markers.insert(event_id, Utc::now()).await;
    }
}

/// In-process device→talhão cache. Default TTL: 24 hours.
pub struct InMemoryDeviceCache {
    mappings: TtlMap<String>,
}

impl InMemoryDeviceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            mappings: TtlMap::new(ttl),
        }
    }
}

#[async_trait]
impl DeviceCache for InMemoryDeviceCache {
    async fn get_talhao_id(&self, device_id: &str) -> Option<String> {
        self.mappings.get(device_id).await
    }

    async fn set_talhao_id(&self, device_id: &str, talhao_id: &str) {
        self.mappings.insert(device_id, talhao_id.to_string()).await;
    }
}
