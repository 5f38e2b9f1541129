//! The answer cache: ⟨name, qtype⟩ → the records of a successful
//! resolution, held until the smallest TTL among them runs out or
//! space pressure pushes them out.

use priority_queue::PriorityQueue;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dns_wire::types::*;

use crate::config::CacheConfig;

/// A convenience wrapper around a `Cache` which lets it be shared
/// between tasks.
///
/// Invoking `clone` on a `SharedCache` gives a new instance which
/// refers to the same underlying `Cache` object.  A `get` sees either
/// all of a previous `put`'s records or none of them: the mutex makes
/// every operation atomic.
#[derive(Debug, Clone)]
pub struct SharedCache {
    cache: Arc<Mutex<Cache>>,
}

const MUTEX_POISON_MESSAGE: &str =
    "[INTERNAL ERROR] cache mutex poisoned, cannot recover from this - aborting";

impl SharedCache {
    pub fn new(config: CacheConfig) -> Self {
        SharedCache {
            cache: Arc::new(Mutex::new(Cache::new(config))),
        }
    }

    /// Get the records for a question, if a live entry exists.
    /// Lookup is case-insensitive, as names are canonicalised to
    /// lowercase on both sides.
    pub fn get(&self, name: &DomainName, qtype: QueryType) -> Option<Vec<ResourceRecord>> {
        self.cache
            .lock()
            .expect(MUTEX_POISON_MESSAGE)
            .get(name, qtype)
    }

    /// Store the records of a successful resolution.  An empty record
    /// list, or one whose minimum TTL is below the configured floor,
    /// is not stored.
    pub fn put(&self, name: &DomainName, qtype: QueryType, records: &[ResourceRecord]) {
        self.cache
            .lock()
            .expect(MUTEX_POISON_MESSAGE)
            .put(name, qtype, records);
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.cache.lock().expect(MUTEX_POISON_MESSAGE).clear();
    }

    /// Drop entries whose expiry has passed, returning how many went.
    pub fn prune(&self) -> usize {
        self.cache.lock().expect(MUTEX_POISON_MESSAGE).prune()
    }

    /// A snapshot of the hit/miss/eviction counters and current size.
    pub fn stats(&self) -> CacheStats {
        self.cache.lock().expect(MUTEX_POISON_MESSAGE).stats()
    }
}

impl Default for SharedCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

/// Counters and sizes reported by `stats`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired: u64,
    pub entries: usize,
    pub weight: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            {
                self.hits as f64 / total as f64
            }
        }
    }
}

/// Cache key: the (already lowercased) name and the query type.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
struct CacheKey {
    name: DomainName,
    qtype: QueryType,
}

/// One cached answer: the record vector, when it stops being
/// trustworthy, and how much memory it is charged for.
#[derive(Debug, Clone, Eq, PartialEq)]
struct CacheEntry {
    records: Vec<ResourceRecord>,
    expires_at: Instant,
    weight: usize,
}

/// Caching for resolved answers.
///
/// You probably want to use `SharedCache` instead.
#[derive(Debug)]
pub struct Cache {
    config: CacheConfig,

    /// Cached answers.
    entries: HashMap<CacheKey, CacheEntry>,

    /// Priority queue of keys ordered by access time.
    ///
    /// When inserting would break the weight or entry bound and there
    /// are no expired entries left to drop, keys are evicted in LRU
    /// order.
    ///
    /// INVARIANT: the keys in here are exactly the keys in `entries`.
    access_priority: PriorityQueue<CacheKey, Reverse<Instant>>,

    /// Priority queue of keys ordered by expiry time.
    ///
    /// Expired entries are dropped before anything live is evicted.
    ///
    /// INVARIANT: the keys in here are exactly the keys in `entries`.
    expiry_priority: PriorityQueue<CacheKey, Reverse<Instant>>,

    /// The approximate memory held by all entries, in octets.
    ///
    /// INVARIANT: this is the sum of the `weight` fields of the
    /// entries.
    current_weight: usize,

    hits: u64,
    misses: u64,
    evictions: u64,
    expired: u64,
}

impl Cache {
    /// Panics:
    ///
    /// - If called with a zero entry or weight bound.
    pub fn new(config: CacheConfig) -> Self {
        assert!(config.max_entries > 0, "cannot create a zero-entry cache");
        assert!(
            config.max_memory_bytes > 0,
            "cannot create a zero-weight cache"
        );

        Self {
            entries: HashMap::new(),
            access_priority: PriorityQueue::new(),
            expiry_priority: PriorityQueue::new(),
            current_weight: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            expired: 0,
            config,
        }
    }

    pub fn get(&mut self, name: &DomainName, qtype: QueryType) -> Option<Vec<ResourceRecord>> {
        let key = CacheKey {
            name: name.clone(),
            qtype,
        };
        let now = Instant::now();

        if let Some(entry) = self.entries.get(&key) {
            if entry.expires_at > now {
                self.hits += 1;
                self.access_priority.change_priority(&key, Reverse(now));
                return Some(entry.records.clone());
            }
            // stale entries are never observable; drop on the way out
            self.remove(&key);
            self.expired += 1;
        }

        self.misses += 1;
        None
    }

    pub fn put(&mut self, name: &DomainName, qtype: QueryType, records: &[ResourceRecord]) {
        if records.is_empty() {
            return;
        }

        let min_ttl = records.iter().map(|rr| rr.ttl).min().unwrap_or(0);
        if min_ttl < self.config.min_ttl_seconds {
            tracing::trace!(%name, %min_ttl, "TTL below floor, not caching");
            return;
        }

        let key = CacheKey {
            name: name.clone(),
            qtype,
        };
        let weight = entry_weight(&key, records);
        if weight > self.config.max_memory_bytes {
            // could never fit, even alone
            tracing::debug!(%name, %weight, "answer heavier than the whole cache");
            return;
        }

        let now = Instant::now();
        let expires_at = now + Duration::from_secs(u64::from(min_ttl));

        // replacing an entry is not an eviction
        self.remove(&key);

        self.remove_expired(now);
        while !self.entries.is_empty()
            && (self.entries.len() >= self.config.max_entries
                || self.current_weight + weight > self.config.max_memory_bytes)
        {
            self.evict_least_recently_used();
        }

        self.current_weight += weight;
        self.access_priority.push(key.clone(), Reverse(now));
        self.expiry_priority.push(key.clone(), Reverse(expires_at));
        self.entries.insert(
            key,
            CacheEntry {
                records: records.to_vec(),
                expires_at,
                weight,
            },
        );
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.access_priority.clear();
        self.expiry_priority.clear();
        self.current_weight = 0;
    }

    /// Delete all expired entries.
    ///
    /// Returns the number of entries deleted.
    pub fn prune(&mut self) -> usize {
        self.remove_expired(Instant::now())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            expired: self.expired,
            entries: self.entries.len(),
            weight: self.current_weight,
        }
    }

    /// Remove one entry, maintaining the size and queue invariants.
    fn remove(&mut self, key: &CacheKey) {
        if let Some(entry) = self.entries.remove(key) {
            self.access_priority.remove(key);
            self.expiry_priority.remove(key);
            self.current_weight -= entry.weight;
        }
    }

    /// Drop entries from the head of the expiry queue until a live
    /// one turns up.
    fn remove_expired(&mut self, now: Instant) -> usize {
        let mut removed = 0;

        while let Some((key, Reverse(expires_at))) = self.expiry_priority.pop() {
            if expires_at > now {
                self.expiry_priority.push(key, Reverse(expires_at));
                break;
            }

            if let Some(entry) = self.entries.remove(&key) {
                self.access_priority.remove(&key);
                self.current_weight -= entry.weight;
                removed += 1;
            }
        }

        self.expired += removed as u64;
        removed
    }

    /// Evict the least recently used entry.
    fn evict_least_recently_used(&mut self) {
        if let Some((key, _)) = self.access_priority.pop() {
            self.expiry_priority.remove(&key);
            if let Some(entry) = self.entries.remove(&key) {
                self.current_weight -= entry.weight;
                self.evictions += 1;
                tracing::trace!(name = %key.name, qtype = %key.qtype, "evicted");
            }
        }
    }
}

/// Approximate the memory an entry holds, in octets.  This does not
/// try to be exact, only monotone in real memory use: the wire size
/// of the key name, type and class numbers, and each record's name,
/// fixed fields, and RDATA.
fn entry_weight(key: &CacheKey, records: &[ResourceRecord]) -> usize {
    let mut weight = key.name.octets.len() + 4;
    for rr in records {
        weight += rr.name.octets.len() + 10 + rr.rdata.wire_len();
    }
    weight
}

#[cfg(test)]
mod tests {
    use dns_wire::types::test_util::*;
    use std::net::Ipv4Addr;

    use super::*;

    fn small_config(max_entries: usize, max_memory_bytes: usize) -> CacheConfig {
        CacheConfig {
            max_entries,
            max_memory_bytes,
            min_ttl_seconds: 10,
        }
    }

    #[test]
    fn cache_put_then_get() {
        let mut cache = Cache::new(CacheConfig::default());
        let rrs = vec![a_record("www.example.com", Ipv4Addr::new(1, 1, 1, 1))];

        cache.put(&domain("www.example.com"), QueryType::Record(RecordType::A), &rrs);

        assert_eq!(
            Some(rrs),
            cache.get(&domain("www.example.com"), QueryType::Record(RecordType::A))
        );
        assert_invariants(&cache);
    }

    #[test]
    fn cache_get_is_case_insensitive() {
        let mut cache = Cache::new(CacheConfig::default());
        let rrs = vec![a_record("example.com", Ipv4Addr::new(1, 1, 1, 1))];

        cache.put(&domain("Example.COM"), QueryType::Record(RecordType::A), &rrs);

        assert_eq!(
            Some(rrs),
            cache.get(&domain("example.com"), QueryType::Record(RecordType::A))
        );
    }

    #[test]
    fn cache_misses_on_other_qtype() {
        let mut cache = Cache::new(CacheConfig::default());
        let rrs = vec![a_record("example.com", Ipv4Addr::new(1, 1, 1, 1))];

        cache.put(&domain("example.com"), QueryType::Record(RecordType::A), &rrs);

        assert_eq!(
            None,
            cache.get(&domain("example.com"), QueryType::Record(RecordType::AAAA))
        );
    }

    #[test]
    fn cache_does_not_store_empty_answers() {
        let mut cache = Cache::new(CacheConfig::default());

        cache.put(&domain("example.com"), QueryType::Record(RecordType::A), &[]);

        assert_eq!(0, cache.stats().entries);
    }

    #[test]
    fn cache_does_not_store_short_ttls() {
        let mut cache = Cache::new(CacheConfig::default());
        let mut rr = a_record("example.com", Ipv4Addr::new(1, 1, 1, 1));
        rr.ttl = 9;

        // one record under the floor poisons the whole set: the entry
        // lives by its minimum TTL
        let rrs = vec![a_record("example.com", Ipv4Addr::new(2, 2, 2, 2)), rr];
        cache.put(&domain("example.com"), QueryType::Record(RecordType::A), &rrs);

        assert_eq!(
            None,
            cache.get(&domain("example.com"), QueryType::Record(RecordType::A))
        );
        assert_eq!(0, cache.stats().entries);
    }

    #[test]
    fn cache_expired_entries_are_not_observable() {
        let mut cache = Cache::new(CacheConfig {
            min_ttl_seconds: 0,
            ..CacheConfig::default()
        });
        let mut rr = a_record("example.com", Ipv4Addr::new(1, 1, 1, 1));
        rr.ttl = 0;

        cache.put(
            &domain("example.com"),
            QueryType::Record(RecordType::A),
            &[rr],
        );

        assert_eq!(
            None,
            cache.get(&domain("example.com"), QueryType::Record(RecordType::A))
        );
        assert_invariants(&cache);
    }

    #[test]
    fn cache_entry_bound_is_respected() {
        let mut cache = Cache::new(small_config(10, 1024 * 1024));

        for i in 0..100 {
            let name = domain(&format!("host-{i}.example.com"));
            let rrs = vec![a_record(
                &format!("host-{i}.example.com"),
                Ipv4Addr::new(10, 0, 0, 1),
            )];
            cache.put(&name, QueryType::Record(RecordType::A), &rrs);

            assert!(cache.stats().entries <= 10);
            assert_invariants(&cache);
        }

        assert_eq!(90, cache.stats().evictions);
    }

    #[test]
    fn cache_weight_bound_is_respected() {
        // each entry weighs ~100 octets, so a 500-octet cache holds a
        // handful at most
        let mut cache = Cache::new(small_config(1000, 500));

        for i in 0..50 {
            let name = domain(&format!("some-longish-name-{i:02}.example.com"));
            let rrs = vec![a_record(
                &format!("some-longish-name-{i:02}.example.com"),
                Ipv4Addr::new(10, 0, 0, 1),
            )];
            cache.put(&name, QueryType::Record(RecordType::A), &rrs);

            assert!(cache.stats().weight <= 500);
            assert_invariants(&cache);
        }

        assert!(cache.stats().entries > 0);
        assert!(cache.stats().evictions > 0);
    }

    #[test]
    fn cache_eviction_is_least_recently_used() {
        let mut cache = Cache::new(small_config(2, 1024 * 1024));

        let a = domain("a.example.com");
        let b = domain("b.example.com");
        let c = domain("c.example.com");

        cache.put(&a, QueryType::Record(RecordType::A), &[a_record("a.example.com", Ipv4Addr::new(1, 1, 1, 1))]);
        cache.put(&b, QueryType::Record(RecordType::A), &[a_record("b.example.com", Ipv4Addr::new(2, 2, 2, 2))]);

        // touch `a` so `b` is the cold one
        assert!(cache.get(&a, QueryType::Record(RecordType::A)).is_some());

        cache.put(&c, QueryType::Record(RecordType::A), &[a_record("c.example.com", Ipv4Addr::new(3, 3, 3, 3))]);

        assert!(cache.get(&a, QueryType::Record(RecordType::A)).is_some());
        assert!(cache.get(&b, QueryType::Record(RecordType::A)).is_none());
        assert!(cache.get(&c, QueryType::Record(RecordType::A)).is_some());
        assert_invariants(&cache);
    }

    #[test]
    fn cache_replacement_is_not_an_eviction() {
        let mut cache = Cache::new(CacheConfig::default());
        let name = domain("example.com");

        cache.put(&name, QueryType::Record(RecordType::A), &[a_record("example.com", Ipv4Addr::new(1, 1, 1, 1))]);
        cache.put(&name, QueryType::Record(RecordType::A), &[a_record("example.com", Ipv4Addr::new(2, 2, 2, 2))]);

        let stats = cache.stats();
        assert_eq!(1, stats.entries);
        assert_eq!(0, stats.evictions);
        assert_eq!(
            Some(vec![a_record("example.com", Ipv4Addr::new(2, 2, 2, 2))]),
            cache.get(&name, QueryType::Record(RecordType::A))
        );
        assert_invariants(&cache);
    }

    #[test]
    fn cache_counts_hits_and_misses() {
        let mut cache = Cache::new(CacheConfig::default());
        let name = domain("example.com");

        assert!(cache.get(&name, QueryType::Record(RecordType::A)).is_none());
        cache.put(&name, QueryType::Record(RecordType::A), &[a_record("example.com", Ipv4Addr::new(1, 1, 1, 1))]);
        assert!(cache.get(&name, QueryType::Record(RecordType::A)).is_some());
        assert!(cache.get(&name, QueryType::Record(RecordType::A)).is_some());

        let stats = cache.stats();
        assert_eq!(2, stats.hits);
        assert_eq!(1, stats.misses);
        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn cache_put_maintains_invariants() {
        let mut cache = Cache::new(small_config(25, 4096));

        for _ in 0..100 {
            let mut rr = arbitrary_resourcerecord();
            rr.rclass = RecordClass::IN;
            rr.ttl = 300;
            let name = rr.name.clone();
            let qtype = QueryType::Record(rr.rtype());
            cache.put(&name, qtype, &[rr]);
            assert_invariants(&cache);
        }
    }

    #[test]
    fn cache_clear_drops_everything() {
        let mut cache = Cache::new(CacheConfig::default());

        for i in 0..10 {
            let name = domain(&format!("host-{i}.example.com"));
            cache.put(
                &name,
                QueryType::Record(RecordType::A),
                &[a_record(&format!("host-{i}.example.com"), Ipv4Addr::new(10, 0, 0, 1))],
            );
        }

        cache.clear();

        let stats = cache.stats();
        assert_eq!(0, stats.entries);
        assert_eq!(0, stats.weight);
        assert_invariants(&cache);
    }

    fn assert_invariants(cache: &Cache) {
        assert_eq!(
            cache.current_weight,
            cache.entries.values().map(|e| e.weight).sum::<usize>()
        );

        assert!(cache.entries.len() <= cache.config.max_entries);
        assert!(cache.current_weight <= cache.config.max_memory_bytes);

        assert_eq!(cache.entries.len(), cache.access_priority.len());
        assert_eq!(cache.entries.len(), cache.expiry_priority.len());

        for (key, entry) in &cache.entries {
            assert!(cache.access_priority.get(key).is_some());
            assert_eq!(
                Some(&Reverse(entry.expires_at)),
                cache.expiry_priority.get(key).map(|(_, p)| p)
            );
        }
    }
}
