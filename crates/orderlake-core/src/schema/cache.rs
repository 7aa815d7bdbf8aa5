//! Schema cache with TTL-based invalidation.
//!
//! Avoids a registry round-trip per message. Two indexes are kept: the
//! latest version per subject, for unframed payloads, and every version seen
//! by id, for framed ones. Entries expire after the configured TTL; the
//! latest entry is also dropped early when a payload reports an id the cache
//! has not seen.

use super::{RegisteredSchema, SchemaId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default schema TTL: 5 minutes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// A cached value with expiration tracking.
#[derive(Debug, Clone)]
pub struct CachedValue<T> {
    /// The cached value
    pub value: T,
    /// When the value was cached
    pub cached_at: Instant,
    /// Time-to-live for this value
    pub ttl: Duration,
}

impl<T> CachedValue<T> {
    /// Create a new cached value.
    pub fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            cached_at: Instant::now(),
            ttl,
        }
    }

    /// Check if the cached value has expired.
    pub fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// Cache statistics for monitoring.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Total cache hits
    pub hits: AtomicU64,
    /// Total cache misses
    pub misses: AtomicU64,
    /// Total invalidations
    pub invalidations: AtomicU64,
    /// Total refreshes
    pub refreshes: AtomicU64,
}

impl CacheStats {
    /// Get the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    fn record_refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }
}

type Entry = CachedValue<Arc<RegisteredSchema>>;

/// Process-wide cache of resolved schemas.
pub struct SchemaCache {
    ttl: Duration,
    latest: RwLock<HashMap<String, Entry>>,
    versions: RwLock<HashMap<SchemaId, Entry>>,
    stats: CacheStats,
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl SchemaCache {
    /// Create a cache whose entries live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            latest: RwLock::new(HashMap::new()),
            versions: RwLock::new(HashMap::new()),
            stats: CacheStats::default(),
        }
    }

    fn lookup<K, Q>(
        &self,
        map: &RwLock<HashMap<K, Entry>>,
        key: &Q,
    ) -> Option<Arc<RegisteredSchema>>
    where
        K: std::borrow::Borrow<Q> + std::hash::Hash + Eq,
        Q: std::hash::Hash + Eq + ?Sized,
    {
        let guard = map.read();
        if let Some(cached) = guard.get(key) {
            if !cached.is_expired() {
                self.stats.record_hit();
                return Some(Arc::clone(&cached.value));
            }
        }
        self.stats.record_miss();
        None
    }

    /// Get the cached latest schema for `subject` if still valid.
    pub fn get(&self, subject: &str) -> Option<Arc<RegisteredSchema>> {
        self.lookup(&self.latest, subject)
    }

    /// Get a cached schema version by id if still valid.
    pub fn get_version(&self, id: &SchemaId) -> Option<Arc<RegisteredSchema>> {
        self.lookup(&self.versions, id)
    }

    /// Store the latest version of a subject. It is indexed by id as well.
    pub fn insert(&self, schema: Arc<RegisteredSchema>) {
        self.insert_version(Arc::clone(&schema));
        self.latest
            .write()
            .insert(schema.subject.clone(), CachedValue::new(schema, self.ttl));
        self.stats.record_refresh();
    }

    /// Store a version resolved by id.
    pub fn insert_version(&self, schema: Arc<RegisteredSchema>) {
        self.versions
            .write()
            .insert(schema.id, CachedValue::new(schema, self.ttl));
    }

    /// Drop the latest entry for `subject`. Versions cached by id are kept.
    pub fn invalidate(&self, subject: &str) {
        if self.latest.write().remove(subject).is_some() {
            self.stats.record_invalidation();
            tracing::debug!(subject = subject, "Schema cache entry invalidated");
        }
    }

    /// Drop every entry.
    pub fn invalidate_all(&self) {
        let count = {
            let mut guard = self.latest.write();
            let count = guard.len();
            guard.clear();
            count
        };
        self.versions.write().clear();
        if count > 0 {
            self.stats
                .invalidations
                .fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    /// Number of subjects with a latest entry, expired ones included.
    pub fn len(&self) -> usize {
        self.latest.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.read().is_empty()
    }

    /// Number of versions cached by id, expired ones included.
    pub fn version_count(&self) -> usize {
        self.versions.read().len()
    }

    /// Cache statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SchemaFormat, ORDER_SCHEMA_JSON};

    fn schema(id: u32) -> Arc<RegisteredSchema> {
        Arc::new(
            RegisteredSchema::parse(
                "OlistOrderSchema",
                id as i32,
                id,
                SchemaFormat::Json,
                ORDER_SCHEMA_JSON,
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_hit_and_miss() {
        let cache = SchemaCache::default();
        assert!(cache.get("OlistOrderSchema").is_none());

        cache.insert(schema(1));
        assert_eq!(cache.get("OlistOrderSchema").unwrap().id, SchemaId::Numeric(1));

        assert_eq!(cache.stats().hits.load(Ordering::Relaxed), 1);
        assert_eq!(cache.stats().misses.load(Ordering::Relaxed), 1);
        assert!((cache.stats().hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_invalidate() {
        let cache = SchemaCache::default();
        cache.insert(schema(1));
        cache.invalidate("OlistOrderSchema");
        assert!(cache.get("OlistOrderSchema").is_none());
        assert_eq!(cache.stats().invalidations.load(Ordering::Relaxed), 1);

        // The version stays reachable by id
        assert_eq!(cache.get_version(&SchemaId::Numeric(1)).unwrap().version, 1);

        // Unknown subjects are not counted
        cache.invalidate("missing");
        assert_eq!(cache.stats().invalidations.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = SchemaCache::new(Duration::from_secs(300));
        cache.insert(schema(1));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(cache.get("OlistOrderSchema").is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("OlistOrderSchema").is_none());
    }

    #[test]
    fn test_insert_replaces_version() {
        let cache = SchemaCache::default();
        cache.insert(schema(1));
        cache.insert(schema(2));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("OlistOrderSchema").unwrap().version, 2);
        assert_eq!(cache.version_count(), 2);
        cache.invalidate_all();
        assert!(cache.is_empty());
        assert_eq!(cache.version_count(), 0);
    }

    #[test]
    fn test_versions_by_id_do_not_touch_latest() {
        let cache = SchemaCache::default();
        cache.insert(schema(2));
        cache.insert_version(schema(1));

        assert_eq!(cache.get("OlistOrderSchema").unwrap().version, 2);
        assert_eq!(cache.get_version(&SchemaId::Numeric(1)).unwrap().version, 1);
        assert!(cache.get_version(&SchemaId::Numeric(3)).is_none());
    }
}
