// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory beacon cache.
//!
//! An append-only log of serialized records per [`BeaconKey`], with a
//! two-stage send protocol (active side / in-flight sending side) and
//! time- and size-based eviction of the active side. One mutex guards
//! the key set; each entry carries its own mutex; the total active size
//! is a global atomic.

mod entry;

use crate::MutexExt;
use entry::EntryData;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Identifies one buffered data stream: a session and its split
/// sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BeaconKey {
    pub session_number: i32,
    pub session_sequence: i32,
}

impl BeaconKey {
    pub fn new(session_number: i32, session_sequence: i32) -> Self {
        Self {
            session_number,
            session_sequence,
        }
    }
}

#[derive(Default)]
pub(crate) struct BeaconCache {
    entries: Mutex<HashMap<BeaconKey, Arc<Mutex<EntryData>>>>,
    size_bytes: AtomicU64,
}

impl BeaconCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: BeaconKey) -> Arc<Mutex<EntryData>> {
        self.entries
            .lock_or_panic()
            .entry(key)
            .or_default()
            .clone()
    }

    fn existing_entry(&self, key: BeaconKey) -> Option<Arc<Mutex<EntryData>>> {
        self.entries.lock_or_panic().get(&key).cloned()
    }

    pub fn add_action_data(&self, key: BeaconKey, timestamp: i64, data: String) {
        let added = self.entry(key).lock_or_panic().add_action_data(timestamp, data);
        self.size_bytes.fetch_add(added, Ordering::Relaxed);
    }

    pub fn add_event_data(&self, key: BeaconKey, timestamp: i64, data: String) {
        let added = self.entry(key).lock_or_panic().add_event_data(timestamp, data);
        self.size_bytes.fetch_add(added, Ordering::Relaxed);
    }

    /// Atomically moves the active side of `key` to its sending side.
    pub fn prepare_data_for_sending(&self, key: BeaconKey) {
        if let Some(entry) = self.existing_entry(key) {
            let moved = entry.lock_or_panic().prepare_data_for_sending();
            self.size_bytes.fetch_sub(moved, Ordering::Relaxed);
        }
    }

    pub fn has_data_for_sending(&self, key: BeaconKey) -> bool {
        self.existing_entry(key)
            .is_some_and(|e| e.lock_or_panic().has_data_for_sending())
    }

    /// Returns the next chunk for `key`, or `None` when its sending
    /// side is drained.
    pub fn next_chunk(
        &self,
        key: BeaconKey,
        prefix: &str,
        max_bytes: usize,
        delimiter: char,
    ) -> Option<String> {
        self.existing_entry(key)?
            .lock_or_panic()
            .next_chunk(prefix, max_bytes, delimiter)
    }

    /// Commits the in-flight chunk of `key`: its records are gone.
    pub fn remove_chunked_data(&self, key: BeaconKey) {
        if let Some(entry) = self.existing_entry(key) {
            entry.lock_or_panic().remove_data_marked_for_sending();
        }
    }

    /// Restores the sending side of `key` for a later retry.
    pub fn reset_chunked_data(&self, key: BeaconKey) {
        if let Some(entry) = self.existing_entry(key) {
            let restored = entry.lock_or_panic().reset_data_marked_for_sending();
            self.size_bytes.fetch_add(restored, Ordering::Relaxed);
        }
    }

    pub fn delete_entry(&self, key: BeaconKey) {
        let removed = self.entries.lock_or_panic().remove(&key);
        if let Some(entry) = removed {
            let freed = entry.lock_or_panic().total_bytes();
            self.size_bytes.fetch_sub(freed, Ordering::Relaxed);
        }
    }

    pub fn is_empty(&self, key: BeaconKey) -> bool {
        self.existing_entry(key)
            .is_none_or(|e| e.lock_or_panic().is_empty())
    }

    /// Total UTF-8 bytes on the active side of all entries.
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes.load(Ordering::Relaxed)
    }

    pub fn beacon_keys(&self) -> Vec<BeaconKey> {
        self.entries.lock_or_panic().keys().copied().collect()
    }

    /// Evicts active records recorded before `min_timestamp`. Returns
    /// the number of evicted records.
    pub fn evict_records_by_age(&self, min_timestamp: i64) -> usize {
        let mut evicted = 0usize;
        for key in self.beacon_keys() {
            let Some(entry) = self.existing_entry(key) else {
                continue;
            };
            let (removed, freed) = entry.lock_or_panic().remove_records_older_than(min_timestamp);
            self.size_bytes.fetch_sub(freed, Ordering::Relaxed);
            evicted += removed;
        }
        if evicted > 0 {
            debug!(
                cache.evicted_records = evicted,
                cache.min_timestamp = min_timestamp,
                "Evicted beacon cache records by age"
            );
        }
        evicted
    }

    /// Evicts up to `count` of the oldest active records of `key`,
    /// actions before events. Returns the number of evicted records.
    pub fn evict_records_by_number(&self, key: BeaconKey, count: usize) -> usize {
        let Some(entry) = self.existing_entry(key) else {
            return 0;
        };
        let (removed, freed) = entry.lock_or_panic().remove_oldest_records(count);
        self.size_bytes.fetch_sub(freed, Ordering::Relaxed);
        removed
    }

    /// When the active size exceeds `upper_bytes`, evicts the oldest
    /// record of every key round-robin until the size drops below
    /// `lower_bytes`. Returns the number of evicted records.
    pub fn evict_records_by_size(&self, upper_bytes: u64, lower_bytes: u64) -> usize {
        if self.size_bytes() <= upper_bytes {
            return 0;
        }
        let mut evicted = 0usize;
        while self.size_bytes() > lower_bytes {
            let mut removed_any = false;
            for key in self.beacon_keys() {
                if self.size_bytes() <= lower_bytes {
                    break;
                }
                let removed = self.evict_records_by_number(key, 1);
                if removed > 0 {
                    evicted += removed;
                    removed_any = true;
                }
            }
            if !removed_any {
                // Everything left is in flight; nothing more to evict.
                break;
            }
        }
        debug!(
            cache.evicted_records = evicted,
            cache.size_bytes = self.size_bytes(),
            "Evicted beacon cache records by size"
        );
        evicted
    }

    /// Removes active records of `key` matching `predicate`.
    pub fn remove_records_matching(&self, key: BeaconKey, predicate: impl Fn(&str) -> bool) {
        if let Some(entry) = self.existing_entry(key) {
            let freed = entry.lock_or_panic().remove_records_matching(predicate);
            self.size_bytes.fetch_sub(freed, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: BeaconKey = BeaconKey {
        session_number: 1,
        session_sequence: 0,
    };

    #[test]
    fn size_tracks_adds_and_deletes() {
        let cache = BeaconCache::new();
        cache.add_action_data(KEY, 1, "abcd".to_string());
        cache.add_event_data(KEY, 2, "ab".to_string());
        assert_eq!(cache.size_bytes(), 6);
        cache.delete_entry(KEY);
        assert_eq!(cache.size_bytes(), 0);
        assert!(cache.is_empty(KEY));
    }

    #[test]
    fn chunk_protocol_commits() {
        let cache = BeaconCache::new();
        cache.add_event_data(KEY, 1, "record".to_string());
        cache.prepare_data_for_sending(KEY);
        assert_eq!(cache.size_bytes(), 0);
        assert!(cache.has_data_for_sending(KEY));

        let chunk = cache.next_chunk(KEY, "prefix", 1024, '&').unwrap();
        assert_eq!(chunk, "prefix&record");
        cache.remove_chunked_data(KEY);
        assert!(!cache.has_data_for_sending(KEY));
        assert!(cache.is_empty(KEY));
    }

    #[test]
    fn chunk_protocol_resets_for_retry() {
        let cache = BeaconCache::new();
        cache.add_event_data(KEY, 1, "record".to_string());
        cache.prepare_data_for_sending(KEY);
        cache.next_chunk(KEY, "p", 1024, '&').unwrap();
        cache.reset_chunked_data(KEY);
        assert_eq!(cache.size_bytes(), 6);
        assert!(!cache.has_data_for_sending(KEY));

        cache.prepare_data_for_sending(KEY);
        assert_eq!(cache.next_chunk(KEY, "p", 1024, '&').unwrap(), "p&record");
    }

    #[test]
    fn unknown_key_is_empty_and_chunkless() {
        let cache = BeaconCache::new();
        assert!(cache.is_empty(KEY));
        assert!(!cache.has_data_for_sending(KEY));
        assert!(cache.next_chunk(KEY, "p", 10, '&').is_none());
    }

    #[test]
    fn age_eviction_removes_old_records_only() {
        let cache = BeaconCache::new();
        cache.add_event_data(KEY, 10, "old".to_string());
        cache.add_event_data(KEY, 50, "new".to_string());
        assert_eq!(cache.evict_records_by_age(30), 1);
        assert_eq!(cache.size_bytes(), 3);
    }

    #[test]
    fn size_eviction_stops_below_lower_boundary() {
        let cache = BeaconCache::new();
        let other = BeaconKey::new(2, 0);
        for i in 0..10 {
            cache.add_event_data(KEY, i, "x".repeat(10));
            cache.add_event_data(other, i, "y".repeat(10));
        }
        assert_eq!(cache.size_bytes(), 200);
        let evicted = cache.evict_records_by_size(150, 100);
        assert!(evicted >= 10);
        assert!(cache.size_bytes() <= 100);
    }

    #[test]
    fn size_eviction_noop_below_upper_boundary() {
        let cache = BeaconCache::new();
        cache.add_event_data(KEY, 1, "x".repeat(10));
        assert_eq!(cache.evict_records_by_size(100, 10), 0);
        assert_eq!(cache.size_bytes(), 10);
    }

    #[test]
    fn size_eviction_never_touches_sending_side() {
        let cache = BeaconCache::new();
        cache.add_event_data(KEY, 1, "inflight".to_string());
        cache.prepare_data_for_sending(KEY);
        cache.add_event_data(KEY, 2, "active".to_string());
        cache.evict_records_by_size(1, 0);
        assert!(cache.has_data_for_sending(KEY));
        assert_eq!(cache.size_bytes(), 0);
    }

    #[test]
    fn number_eviction_takes_oldest_per_key() {
        let cache = BeaconCache::new();
        cache.add_event_data(KEY, 1, "first".to_string());
        cache.add_event_data(KEY, 2, "second".to_string());
        assert_eq!(cache.evict_records_by_number(KEY, 1), 1);
        assert_eq!(cache.size_bytes(), 6);
        assert_eq!(cache.evict_records_by_number(BeaconKey::new(9, 9), 1), 0);
    }

    #[test]
    fn matching_removal_spares_other_records() {
        let cache = BeaconCache::new();
        cache.add_event_data(KEY, 1, "pa=3&x".to_string());
        cache.add_event_data(KEY, 1, "pa=4&x".to_string());
        cache.remove_records_matching(KEY, |data| data.contains("pa=3"));
        assert_eq!(cache.size_bytes(), 6);
    }

    #[test]
    fn concurrent_appends_are_all_counted() {
        let cache = Arc::new(BeaconCache::new());
        let threads: Vec<_> = (0..4)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        cache.add_event_data(KEY, i, format!("{t}-{i}"));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert!(cache.size_bytes() > 0);
        cache.prepare_data_for_sending(KEY);
        let mut records = 0;
        while cache.next_chunk(KEY, "", usize::MAX, '&').is_some() {
            cache.remove_chunked_data(KEY);
            records += 400; // all records fit one unbounded chunk
        }
        assert_eq!(records, 400);
    }
}
