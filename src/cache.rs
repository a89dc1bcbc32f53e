//! Result cache keyed by query fingerprint.
//!
//! ## Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use hybrid_query_router::{AnalysisResult, CacheLookup, CacheStore, Query, QueryContext, RoutePath};
//! # fn main() -> Result<(), hybrid_query_router::RouterError> {
//! let cache = CacheStore::new(1_000);
//! let query = Query::new("show population", QueryContext::new("state:27", "choropleth"))?;
//!
//! if let CacheLookup::Hit(hit) = cache.get(query.fingerprint()) {
//!     println!("{}", hit.result.payload);
//! }
//!
//! let result = AnalysisResult::new(serde_json::json!({"population": 5_706_494}));
//! cache.put(query.fingerprint().clone(), &result, RoutePath::RuleBased, Duration::from_secs(300));
//! # Ok(()) }
//! ```
//!
//! ## Guarantees
//! - Payload reads go straight to the `DashMap` shard and take no lock.
//! - Inserts, removals and recency updates are serialised behind one
//!   `parking_lot::Mutex`, so the entry count never exceeds the capacity,
//!   however many writers race at capacity.
//! - Same-key writes are last-writer-wins; a reader sees either the old or
//!   the new entry, never a mix.
//! - Expired entries are reported as misses, both on read and by
//!   [`CacheStore::evict_expired`].
//! - A payload that fails to deserialize is a miss and is evicted.
//!
//! ## Eviction
//! Two ordered indexes sit beside the map: one by last access, one by
//! expiry deadline. At capacity an expired entry is evicted if there is
//! one. Otherwise the [`LRU_CANDIDATES`] least-recently-accessed entries are
//! considered and the one with the lowest hit count goes, oldest creation
//! first on ties. A recently created entry that is already being reused
//! therefore outlives a colder one. Both paths cost `O(log n)`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::analysis::AnalysisResult;
use crate::metrics;
use crate::query::Fingerprint;
use crate::routing::RoutePath;

/// Number of least-recently-used entries considered per eviction.
pub const LRU_CANDIDATES: usize = 4;

/// Stored entry. Immutable apart from its access counters.
#[derive(Debug)]
struct CacheEntry {
    payload: Vec<u8>,
    produced_by: RoutePath,
    created_at: Instant,
    ttl: Duration,
    /// `None` when `created_at + ttl` does not fit in an `Instant`.
    deadline: Option<Instant>,
    /// Insertion sequence number; identifies this exact version of the key.
    seq: u64,
    hit_count: AtomicU64,
    /// Only written with the recency lock held.
    last_access: AtomicU64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.ttl
    }
}

/// Ordered views over the live entries. Holds exactly one access record
/// and at most one deadline record per key in the map.
#[derive(Debug, Default)]
struct Recency {
    by_access: BTreeMap<u64, Fingerprint>,
    by_deadline: BTreeMap<(Instant, u64), Fingerprint>,
}

impl Recency {
    fn link(&mut self, key: &Fingerprint, entry: &CacheEntry) {
        self.by_access
            .insert(entry.last_access.load(Ordering::Relaxed), key.clone());
        if let Some(deadline) = entry.deadline {
            self.by_deadline.insert((deadline, entry.seq), key.clone());
        }
    }

    fn unlink(&mut self, entry: &CacheEntry) {
        self.by_access
            .remove(&entry.last_access.load(Ordering::Relaxed));
        if let Some(deadline) = entry.deadline {
            self.by_deadline.remove(&(deadline, entry.seq));
        }
    }

    fn clear(&mut self) {
        self.by_access.clear();
        self.by_deadline.clear();
    }

    /// The earliest deadline, if it has passed.
    fn first_expired(&self, now: Instant) -> Option<((Instant, u64), Fingerprint)> {
        self.by_deadline
            .first_key_value()
            .filter(|((deadline, _), _)| *deadline <= now)
            .map(|(at, key)| (*at, key.clone()))
    }
}

/// A successful cache read.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResult {
    /// The cached result.
    pub result: AnalysisResult,
    /// Which path originally produced it.
    pub produced_by: RoutePath,
    /// Hits on this entry, including this one.
    pub hit_count: u64,
    /// Time since the entry was written.
    pub age: Duration,
    /// TTL the entry was written with.
    pub ttl: Duration,
}

/// Outcome of [`CacheStore::get`].
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// A live, well-formed entry.
    Hit(CachedResult),
    /// Absent, expired, or corrupted.
    Miss,
}

impl CacheLookup {
    /// Return `true` for [`CacheLookup::Hit`].
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Entries currently held, including not-yet-swept expired ones.
    pub entries: usize,
    /// Configured capacity.
    pub capacity: usize,
    /// Successful reads.
    pub hits: u64,
    /// Reads that found nothing usable.
    pub misses: u64,
    /// Entries removed to make room.
    pub evictions: u64,
    /// Entries removed because their TTL elapsed.
    pub expirations: u64,
    /// Entries removed because their payload failed to deserialize.
    pub corruptions: u64,
}

impl CacheStats {
    /// Hits over lookups, or `0.0` if nothing was looked up.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            return 0.0;
        }
        self.hits as f64 / lookups as f64
    }
}

#[derive(Debug)]
struct Inner {
    store: DashMap<Fingerprint, Arc<CacheEntry>>,
    recency: Mutex<Recency>,
    capacity: usize,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    corruptions: AtomicU64,
}

/// Concurrent fingerprint → result cache with TTL and LRU eviction.
///
/// Cheap to clone; clones share storage.
#[derive(Debug, Clone)]
pub struct CacheStore {
    inner: Arc<Inner>,
}

impl CacheStore {
    /// Create a cache holding at most `capacity` entries.
    ///
    /// A capacity of `0` disables caching: every `put` is dropped.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                store: DashMap::new(),
                recency: Mutex::new(Recency::default()),
                capacity,
                clock: AtomicU64::new(0),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
                expirations: AtomicU64::new(0),
                corruptions: AtomicU64::new(0),
            }),
        }
    }

    fn tick(&self) -> u64 {
        self.inner.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Look up a fingerprint.
    pub fn get(&self, key: &Fingerprint) -> CacheLookup {
        let now = Instant::now();
        // Clone the Arc so the shard guard is released before any removal.
        let entry = self.inner.store.get(key).map(|e| Arc::clone(e.value()));
        let Some(entry) = entry else {
            return self.miss(key, "absent");
        };

        if entry.is_expired(now) {
            if self.remove_version(key, entry.seq) {
                self.inner.expirations.fetch_add(1, Ordering::Relaxed);
                metrics::inc_cache_event("expiration");
            }
            return self.miss(key, "expired");
        }

        match serde_json::from_slice::<AnalysisResult>(&entry.payload) {
            Ok(result) => {
                let hit_count = entry.hit_count.fetch_add(1, Ordering::Relaxed) + 1;
                self.touch(&entry);
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                metrics::inc_cache_event("hit");
                debug!(key = %key, hit_count, "cache hit");
                CacheLookup::Hit(CachedResult {
                    result,
                    produced_by: entry.produced_by,
                    hit_count,
                    age: now.saturating_duration_since(entry.created_at),
                    ttl: entry.ttl,
                })
            }
            Err(e) => {
                warn!(key = %key, error = %e, "corrupted cache entry evicted");
                if self.remove_version(key, entry.seq) {
                    self.inner.corruptions.fetch_add(1, Ordering::Relaxed);
                    metrics::inc_cache_event("corruption");
                }
                self.miss(key, "corrupted")
            }
        }
    }

    fn miss(&self, key: &Fingerprint, reason: &'static str) -> CacheLookup {
        self.inner.misses.fetch_add(1, Ordering::Relaxed);
        metrics::inc_cache_event("miss");
        debug!(key = %key, reason, "cache miss");
        CacheLookup::Miss
    }

    /// Move `entry` to the most-recently-used end, unless it was removed or
    /// replaced since it was read.
    fn touch(&self, entry: &CacheEntry) {
        let mut recency = self.inner.recency.lock();
        let previous = entry.last_access.load(Ordering::Relaxed);
        if let Some(key) = recency.by_access.remove(&previous) {
            let now = self.tick();
            entry.last_access.store(now, Ordering::Relaxed);
            recency.by_access.insert(now, key);
        }
    }

    /// Store a result. Overwrites any existing entry for `key`.
    pub fn put(&self, key: Fingerprint, result: &AnalysisResult, produced_by: RoutePath, ttl: Duration) {
        let payload = match serde_json::to_vec(result) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %key, error = %e, "result not serializable, skipping cache write");
                return;
            }
        };
        self.insert_payload(key, payload, produced_by, ttl);
    }

    fn insert_payload(&self, key: Fingerprint, payload: Vec<u8>, produced_by: RoutePath, ttl: Duration) {
        if self.inner.capacity == 0 {
            return;
        }

        let mut recency = self.inner.recency.lock();
        let previous = self.inner.store.get(&key).map(|e| Arc::clone(e.value()));
        match previous {
            Some(old) => recency.unlink(&old),
            None => {
                while self.inner.store.len() >= self.inner.capacity {
                    if !self.evict_one(&mut recency) {
                        break;
                    }
                }
            }
        }

        let seq = self.tick();
        let created_at = Instant::now();
        let entry = Arc::new(CacheEntry {
            payload,
            produced_by,
            created_at,
            ttl,
            deadline: created_at.checked_add(ttl),
            seq,
            hit_count: AtomicU64::new(0),
            last_access: AtomicU64::new(seq),
        });
        recency.link(&key, &entry);
        debug!(key = %key, ttl_secs = ttl.as_secs(), path = produced_by.as_str(), "cached");
        self.inner.store.insert(key, entry);
    }

    /// Remove the entry for `key`, if any.
    pub fn invalidate(&self, key: &Fingerprint) {
        let mut recency = self.inner.recency.lock();
        if let Some((_, entry)) = self.inner.store.remove(key) {
            recency.unlink(&entry);
            debug!(key = %key, "cache entry invalidated");
        }
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut recency = self.inner.recency.lock();
        let mut removed = 0;
        while let Some(((deadline, seq), key)) = recency.first_expired(now) {
            if self.remove_locked(&mut recency, &key, seq) {
                removed += 1;
                metrics::inc_cache_event("expiration");
            } else {
                recency.by_deadline.remove(&(deadline, seq));
            }
        }
        if removed > 0 {
            self.inner
                .expirations
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, "expired cache entries swept");
        }
        removed
    }

    /// Spawn a background task that calls [`evict_expired`](Self::evict_expired)
    /// every `interval` until `shutdown` is cancelled.
    pub fn spawn_sweeper(&self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("cache sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        cache.evict_expired();
                    }
                }
            }
        })
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut recency = self.inner.recency.lock();
        self.inner.store.clear();
        recency.clear();
    }

    /// Current entry count.
    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    /// Return `true` if no entries are held.
    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }

    /// Snapshot of counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.inner.store.len(),
            capacity: self.inner.capacity,
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            evictions: self.inner.evictions.load(Ordering::Relaxed),
            expirations: self.inner.expirations.load(Ordering::Relaxed),
            corruptions: self.inner.corruptions.load(Ordering::Relaxed),
        }
    }

    /// Remove `key` only if it still holds the version `seq`, so a fresh
    /// concurrent `put` is never discarded.
    fn remove_version(&self, key: &Fingerprint, seq: u64) -> bool {
        let mut recency = self.inner.recency.lock();
        self.remove_locked(&mut recency, key, seq)
    }

    fn remove_locked(&self, recency: &mut Recency, key: &Fingerprint, seq: u64) -> bool {
        match self.inner.store.remove_if(key, |_, entry| entry.seq == seq) {
            Some((_, entry)) => {
                recency.unlink(&entry);
                true
            }
            None => false,
        }
    }

    /// Evict one entry to make room. Returns `false` if nothing could go.
    fn evict_one(&self, recency: &mut Recency) -> bool {
        let victim = match recency.first_expired(Instant::now()) {
            Some(((_, seq), key)) => Some((seq, key)),
            None => recency
                .by_access
                .values()
                .take(LRU_CANDIDATES)
                .filter_map(|key| {
                    self.inner.store.get(key).map(|e| {
                        (e.hit_count.load(Ordering::Relaxed), e.seq, key.clone())
                    })
                })
                .min_by_key(|(hits, seq, _)| (*hits, *seq))
                .map(|(_, seq, key)| (seq, key)),
        };

        let Some((seq, key)) = victim else {
            return false;
        };
        if !self.remove_locked(recency, &key, seq) {
            return false;
        }
        self.inner.evictions.fetch_add(1, Ordering::Relaxed);
        metrics::inc_cache_event("eviction");
        debug!(key = %key, "cache entry evicted for capacity");
        true
    }

    #[cfg(test)]
    fn insert_raw(&self, key: Fingerprint, payload: Vec<u8>, ttl: Duration) {
        self.insert_payload(key, payload, RoutePath::RemoteMl, ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Query, QueryContext};
    use serde_json::json;

    fn fp(text: &str) -> Fingerprint {
        Query::new(text, QueryContext::new("county:1", "table"))
            .unwrap()
            .fingerprint()
            .clone()
    }

    fn result(v: i64) -> AnalysisResult {
        AnalysisResult::new(json!({ "value": v }))
    }

    const HOUR: Duration = Duration::from_secs(3_600);

    fn hit(lookup: CacheLookup) -> CachedResult {
        match lookup {
            CacheLookup::Hit(h) => h,
            CacheLookup::Miss => panic!("expected hit"),
        }
    }

    #[test]
    fn test_put_then_get_returns_value() {
        let cache = CacheStore::new(10);
        cache.put(fp("a"), &result(1), RoutePath::RuleBased, HOUR);
        let h = hit(cache.get(&fp("a")));
        assert_eq!(h.result, result(1));
        assert_eq!(h.produced_by, RoutePath::RuleBased);
        assert_eq!(h.hit_count, 1);
    }

    #[test]
    fn test_second_put_overwrites() {
        let cache = CacheStore::new(10);
        cache.put(fp("a"), &result(1), RoutePath::RuleBased, HOUR);
        cache.put(fp("a"), &result(2), RoutePath::RemoteMl, HOUR);
        let h = hit(cache.get(&fp("a")));
        assert_eq!(h.result, result(2));
        assert_eq!(h.produced_by, RoutePath::RemoteMl);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_get_missing_is_miss() {
        let cache = CacheStore::new(10);
        assert_eq!(cache.get(&fp("missing")), CacheLookup::Miss);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_hit_count_increments() {
        let cache = CacheStore::new(10);
        cache.put(fp("a"), &result(1), RoutePath::RuleBased, HOUR);
        cache.get(&fp("a"));
        cache.get(&fp("a"));
        assert_eq!(hit(cache.get(&fp("a"))).hit_count, 3);
        assert_eq!(cache.stats().hits, 3);
    }

    #[test]
    fn test_invalidate_removes_entry() {
        let cache = CacheStore::new(10);
        cache.put(fp("a"), &result(1), RoutePath::RuleBased, HOUR);
        cache.invalidate(&fp("a"));
        assert_eq!(cache.get(&fp("a")), CacheLookup::Miss);
        // second invalidate is a no-op
        cache.invalidate(&fp("a"));
    }

    #[test]
    fn test_expired_entry_is_miss_and_removed() {
        let cache = CacheStore::new(10);
        cache.put(fp("a"), &result(1), RoutePath::RuleBased, Duration::ZERO);
        assert_eq!(cache.get(&fp("a")), CacheLookup::Miss);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_evict_expired_counts_only_expired() {
        let cache = CacheStore::new(10);
        cache.put(fp("old1"), &result(1), RoutePath::RuleBased, Duration::ZERO);
        cache.put(fp("old2"), &result(2), RoutePath::RuleBased, Duration::ZERO);
        cache.put(fp("fresh"), &result(3), RoutePath::RuleBased, HOUR);
        assert_eq!(cache.evict_expired(), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&fp("fresh")).is_hit());
        assert_eq!(cache.evict_expired(), 0);
    }

    #[test]
    fn test_corrupted_entry_is_miss_and_evicted() {
        let cache = CacheStore::new(10);
        cache.insert_raw(fp("bad"), b"{not json".to_vec(), HOUR);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&fp("bad")), CacheLookup::Miss);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().corruptions, 1);
    }

    #[test]
    fn test_capacity_is_respected() {
        let cache = CacheStore::new(3);
        for name in ["a", "b", "c", "d", "e"] {
            cache.put(fp(name), &result(1), RoutePath::RuleBased, HOUR);
        }
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.stats().evictions, 2);
        assert!(cache.get(&fp("e")).is_hit());
    }

    #[test]
    fn test_eviction_prefers_least_recently_used() {
        let cache = CacheStore::new(2);
        cache.put(fp("a"), &result(1), RoutePath::RuleBased, HOUR);
        cache.put(fp("b"), &result(2), RoutePath::RuleBased, HOUR);
        // a and b both unused: oldest (a) goes
        cache.put(fp("c"), &result(3), RoutePath::RuleBased, HOUR);
        assert_eq!(cache.get(&fp("a")), CacheLookup::Miss);
        assert!(cache.get(&fp("b")).is_hit());
    }

    #[test]
    fn test_eviction_keeps_reused_entry_over_cold_one() {
        let cache = CacheStore::new(3);
        cache.put(fp("reused"), &result(1), RoutePath::RuleBased, HOUR);
        for _ in 0..3 {
            cache.get(&fp("reused"));
        }
        cache.put(fp("cold1"), &result(2), RoutePath::RuleBased, HOUR);
        cache.put(fp("cold2"), &result(3), RoutePath::RuleBased, HOUR);
        // "reused" is least recently accessed, but it has hits; cold1 goes.
        cache.put(fp("new"), &result(4), RoutePath::RuleBased, HOUR);
        assert!(cache.get(&fp("reused")).is_hit());
        assert_eq!(cache.get(&fp("cold1")), CacheLookup::Miss);
        assert!(cache.get(&fp("cold2")).is_hit());
    }

    #[test]
    fn test_eviction_prefers_expired_entries() {
        let cache = CacheStore::new(2);
        cache.put(fp("a"), &result(1), RoutePath::RuleBased, HOUR);
        cache.put(fp("stale"), &result(2), RoutePath::RuleBased, Duration::ZERO);
        cache.put(fp("c"), &result(3), RoutePath::RuleBased, HOUR);
        assert!(cache.get(&fp("a")).is_hit());
        assert!(cache.get(&fp("c")).is_hit());
    }

    #[test]
    fn test_overwrite_at_capacity_does_not_evict() {
        let cache = CacheStore::new(2);
        cache.put(fp("a"), &result(1), RoutePath::RuleBased, HOUR);
        cache.put(fp("b"), &result(2), RoutePath::RuleBased, HOUR);
        cache.put(fp("a"), &result(3), RoutePath::RuleBased, HOUR);
        assert_eq!(cache.stats().evictions, 0);
        assert!(cache.get(&fp("b")).is_hit());
    }

    #[test]
    fn test_zero_capacity_disables_caching() {
        let cache = CacheStore::new(0);
        cache.put(fp("a"), &result(1), RoutePath::RuleBased, HOUR);
        assert!(cache.is_empty());
        assert_eq!(cache.get(&fp("a")), CacheLookup::Miss);
    }

    #[test]
    fn test_clear_removes_all_entries() {
        let cache = CacheStore::new(100);
        for i in 0..10 {
            cache.put(fp(&format!("k{i}")), &result(i), RoutePath::RuleBased, HOUR);
        }
        assert_eq!(cache.len(), 10);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_stats_hit_rate() {
        let cache = CacheStore::new(10);
        assert!(cache.stats().hit_rate().abs() < f64::EPSILON);
        cache.put(fp("a"), &result(1), RoutePath::RuleBased, HOUR);
        cache.get(&fp("a"));
        cache.get(&fp("zzz"));
        assert!((cache.stats().hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_concurrent_access_no_corruption() {
        let cache = CacheStore::new(1_000);
        let mut handles = Vec::new();

        for i in 0..10 {
            let c = cache.clone();
            handles.push(tokio::spawn(async move {
                for j in 0..50 {
                    c.put(fp(&format!("t{i}-k{j}")), &result(j), RoutePath::RuleBased, HOUR);
                }
            }));
        }
        for i in 0..10 {
            let c = cache.clone();
            handles.push(tokio::spawn(async move {
                for j in 0..50 {
                    let _ = c.get(&fp(&format!("t{i}-k{j}")));
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let stats = cache.stats();
        assert!(stats.entries <= 1_000);
        assert_eq!(stats.corruptions, 0);
    }

    fn assert_indexes_consistent(cache: &CacheStore) {
        let recency = cache.inner.recency.lock();
        assert_eq!(recency.by_access.len(), cache.len());
        assert!(recency.by_deadline.len() <= cache.len());
    }

    #[test]
    fn test_concurrent_writers_at_capacity_never_exceed_it() {
        const THREADS: usize = 8;
        const PUTS: usize = 200;
        let cache = CacheStore::new(8);

        std::thread::scope(|scope| {
            for t in 0..THREADS {
                let cache = &cache;
                scope.spawn(move || {
                    for j in 0..PUTS {
                        cache.put(fp(&format!("w{t}-{j}")), &result(1), RoutePath::RuleBased, HOUR);
                    }
                });
            }
        });

        let stats = cache.stats();
        assert_eq!(stats.entries, 8);
        assert_eq!(stats.evictions, (THREADS * PUTS - 8) as u64);
        assert_indexes_consistent(&cache);
    }

    #[test]
    fn test_large_cache_evicts_oldest_first() {
        let cache = CacheStore::new(2_000);
        for i in 0..2_500 {
            cache.put(fp(&format!("k{i}")), &result(i), RoutePath::RuleBased, HOUR);
        }
        assert_eq!(cache.len(), 2_000);
        assert_eq!(cache.stats().evictions, 500);
        assert_eq!(cache.get(&fp("k0")), CacheLookup::Miss);
        assert_eq!(cache.get(&fp("k499")), CacheLookup::Miss);
        assert!(cache.get(&fp("k500")).is_hit());
        assert!(cache.get(&fp("k2499")).is_hit());
        assert_indexes_consistent(&cache);
    }

    #[test]
    fn test_indexes_follow_overwrite_invalidate_and_clear() {
        let cache = CacheStore::new(10);
        cache.put(fp("a"), &result(1), RoutePath::RuleBased, HOUR);
        cache.put(fp("b"), &result(2), RoutePath::RuleBased, HOUR);
        cache.get(&fp("a"));
        cache.put(fp("a"), &result(3), RoutePath::RuleBased, HOUR);
        assert_indexes_consistent(&cache);

        cache.invalidate(&fp("b"));
        assert_indexes_consistent(&cache);

        cache.clear();
        assert_indexes_consistent(&cache);
        assert!(cache.inner.recency.lock().by_deadline.is_empty());
    }

    #[test]
    fn test_evict_expired_reports_each_expiration_metric() {
        metrics::init_metrics().unwrap();
        let before = metrics::get_metrics_summary()
            .cache_events
            .get("expiration")
            .copied()
            .unwrap_or(0);

        let cache = CacheStore::new(10);
        cache.put(fp("old1"), &result(1), RoutePath::RuleBased, Duration::ZERO);
        cache.put(fp("old2"), &result(2), RoutePath::RuleBased, Duration::ZERO);
        cache.put(fp("old3"), &result(3), RoutePath::RuleBased, Duration::ZERO);
        assert_eq!(cache.evict_expired(), 3);

        let after = metrics::get_metrics_summary()
            .cache_events
            .get("expiration")
            .copied()
            .unwrap_or(0);
        assert!(after >= before + 3);
        assert_eq!(cache.stats().expirations, 3);
        assert_indexes_consistent(&cache);
    }

    #[tokio::test]
    async fn test_sweeper_removes_expired_and_stops_on_cancel() {
        let cache = CacheStore::new(10);
        cache.put(fp("a"), &result(1), RoutePath::RuleBased, Duration::from_millis(10));
        let token = CancellationToken::new();
        let handle = cache.spawn_sweeper(Duration::from_millis(20), token.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.is_empty());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
