use hashlink::LinkedHashMap;
use std::{
    hash::Hash,
    time::{Duration, Instant},
};

/// An insertion-ordered map whose entries live for a fixed time after their last insert.
pub struct LruTimeCache<K, V> {
    /// The values with the time they were inserted. The oldest entry is at the front.
    map: LinkedHashMap<K, (V, Instant)>,
    /// The time elements remain in the cache.
    ttl: Duration,
    /// The max size of the cache.
    capacity: usize,
}

impl<K: Clone + Eq + Hash, V> LruTimeCache<K, V> {
    pub fn new(ttl: Duration, capacity: Option<usize>) -> LruTimeCache<K, V> {
        LruTimeCache {
            map: LinkedHashMap::new(),
            ttl,
            capacity: capacity.unwrap_or(usize::MAX),
        }
    }

    /// Inserts a key-value pair, moving the key to the back. Returns the entries that had to make
    /// room: the previous value of `key` and the oldest entry if the cache is full.
    pub fn insert(&mut self, key: K, value: V) -> Vec<(K, V)> {
        let mut displaced = Vec::new();
        if let Some((old, _)) = self.map.remove(&key) {
            displaced.push((key.clone(), old));
        }
        self.map.insert(key, (value, Instant::now()));

        if self.map.len() > self.capacity {
            if let Some((key, (value, _))) = self.map.pop_front() {
                displaced.push((key, value));
            }
        }
        displaced
    }

    /// Retrieves a reference to the value stored under `key` and refreshes its time. An expired
    /// value is left for [`LruTimeCache::expire`] to hand back.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let now = Instant::now();
        let ttl = self.ttl;
        match self.map.raw_entry_mut().from_key(key) {
            hashlink::linked_hash_map::RawEntryMut::Occupied(mut occupied)
                if occupied.get().1 + ttl >= now =>
            {
                occupied.get_mut().1 = now;
                occupied.to_back();
                Some(&occupied.into_mut().0)
            }
            _ => None,
        }
    }

    /// Returns a reference to the value with the given `key`, if present and not expired, without
    /// updating the timestamp.
    pub fn peek(&self, key: &K) -> Option<&V> {
        match self.map.get(key) {
            Some((value, time)) if *time + self.ttl >= Instant::now() => Some(value),
            _ => None,
        }
    }

    /// Returns the number of cached non-expired key-value pairs. Expired pairs are dropped.
    pub fn len(&mut self) -> usize {
        self.expire();
        self.map.len()
    }

    /// Removes a key-value pair from the cache, returning the value at the key if the key
    /// was previously in the map.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.map.remove(key).map(|(value, _)| value)
    }

    /// The non-expired entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        let now = Instant::now();
        let ttl = self.ttl;
        self.map
            .iter()
            .filter(move |(_, (_, time))| *time + ttl >= now)
            .map(|(key, (value, _))| (key, value))
    }

    /// Empties the cache and hands back every entry, expired or not.
    pub fn drain(&mut self) -> Vec<(K, V)> {
        let mut drained = Vec::with_capacity(self.map.len());
        while let Some((key, (value, _))) = self.map.pop_front() {
            drained.push((key, value));
        }
        drained
    }

    /// Removes expired items from the cache and hands them back.
    pub fn expire(&mut self) -> Vec<(K, V)> {
        let now = Instant::now();
        let mut expired = Vec::new();
        while let Some((_, (_, time))) = self.map.front() {
            if *time + self.ttl >= now {
                break;
            }
            if let Some((key, (value, _))) = self.map.pop_front() {
                expired.push((key, value));
            }
        }
        expired
    }
}
