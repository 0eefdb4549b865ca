// Copyright 2026-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;

/// One serialized record: timestamp for age eviction, payload for the
/// wire. `marked_for_sending` flags membership in the chunk currently
/// in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CacheRecord {
    pub timestamp: i64,
    pub data: String,
    pub marked_for_sending: bool,
}

impl CacheRecord {
    fn new(timestamp: i64, data: String) -> Self {
        Self {
            timestamp,
            data,
            marked_for_sending: false,
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.data.len() as u64
    }
}

#[derive(Debug, Default)]
struct SendingBuffers {
    action_data: VecDeque<CacheRecord>,
    event_data: VecDeque<CacheRecord>,
}

impl SendingBuffers {
    fn is_empty(&self) -> bool {
        self.action_data.is_empty() && self.event_data.is_empty()
    }
}

/// Per-key staging: an active append side and a sending side. The
/// global size counter of the cache tracks the active side only; data
/// moved to the sending side is in flight and no longer evictable.
#[derive(Debug, Default)]
pub(crate) struct EntryData {
    action_data: VecDeque<CacheRecord>,
    event_data: VecDeque<CacheRecord>,
    sending: Option<SendingBuffers>,
    /// UTF-8 bytes on the active side.
    total_bytes: u64,
}

impl EntryData {
    /// Appends an action record; returns the bytes added.
    pub fn add_action_data(&mut self, timestamp: i64, data: String) -> u64 {
        let record = CacheRecord::new(timestamp, data);
        let added = record.size_bytes();
        self.total_bytes += added;
        self.action_data.push_back(record);
        added
    }

    /// Appends an event record; returns the bytes added.
    pub fn add_event_data(&mut self, timestamp: i64, data: String) -> u64 {
        let record = CacheRecord::new(timestamp, data);
        let added = record.size_bytes();
        self.total_bytes += added;
        self.event_data.push_back(record);
        added
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.action_data.is_empty()
            && self.event_data.is_empty()
            && self.sending.as_ref().is_none_or(|s| s.is_empty())
    }

    /// Moves the active side to the sending side, unless a sending side
    /// already exists. Returns the bytes moved out of the active side.
    pub fn prepare_data_for_sending(&mut self) -> u64 {
        if self.sending.is_some() {
            return 0;
        }
        self.sending = Some(SendingBuffers {
            action_data: std::mem::take(&mut self.action_data),
            event_data: std::mem::take(&mut self.event_data),
        });
        std::mem::take(&mut self.total_bytes)
    }

    pub fn has_data_for_sending(&self) -> bool {
        self.sending.as_ref().is_some_and(|s| !s.is_empty())
    }

    /// Builds the next chunk from the sending side: the prefix followed
    /// by as many unmarked records as fit in `max_bytes`, joined by
    /// `delimiter`, actions before events. Taken records are marked.
    ///
    /// A single record larger than the limit is sent alone rather than
    /// wedging the stream.
    pub fn next_chunk(&mut self, prefix: &str, max_bytes: usize, delimiter: char) -> Option<String> {
        let sending = self.sending.as_mut()?;
        if sending.is_empty() {
            return None;
        }

        let mut chunk = String::with_capacity(max_bytes.min(prefix.len() + 1024));
        chunk.push_str(prefix);
        let mut taken = 0usize;
        for record in sending
            .action_data
            .iter_mut()
            .chain(sending.event_data.iter_mut())
        {
            if record.marked_for_sending {
                continue;
            }
            let next_len = chunk.len() + delimiter.len_utf8() + record.data.len();
            if next_len > max_bytes && taken > 0 {
                break;
            }
            record.marked_for_sending = true;
            chunk.push(delimiter);
            chunk.push_str(&record.data);
            taken += 1;
            if chunk.len() >= max_bytes {
                break;
            }
        }
        (taken > 0).then_some(chunk)
    }

    /// Drops every record marked for sending: the in-flight chunk was
    /// accepted by the server.
    pub fn remove_data_marked_for_sending(&mut self) {
        if let Some(sending) = self.sending.as_mut() {
            sending.action_data.retain(|r| !r.marked_for_sending);
            sending.event_data.retain(|r| !r.marked_for_sending);
        }
    }

    /// Puts the whole sending side back in front of the active side for
    /// a later retry. Returns the bytes restored to the active side.
    pub fn reset_data_marked_for_sending(&mut self) -> u64 {
        let Some(mut sending) = self.sending.take() else {
            return 0;
        };
        let mut restored = 0;
        for record in sending
            .action_data
            .iter_mut()
            .chain(sending.event_data.iter_mut())
        {
            record.marked_for_sending = false;
            restored += record.size_bytes();
        }
        sending.action_data.append(&mut self.action_data);
        self.action_data = sending.action_data;
        sending.event_data.append(&mut self.event_data);
        self.event_data = sending.event_data;
        self.total_bytes += restored;
        restored
    }

    /// Removes active records older than `min_timestamp`. Returns
    /// `(records, bytes)` removed. The sending side is never touched.
    pub fn remove_records_older_than(&mut self, min_timestamp: i64) -> (usize, u64) {
        let mut removed = 0usize;
        let mut freed = 0u64;
        for buffer in [&mut self.action_data, &mut self.event_data] {
            buffer.retain(|record| {
                if record.timestamp < min_timestamp {
                    removed += 1;
                    freed += record.size_bytes();
                    false
                } else {
                    true
                }
            });
        }
        self.total_bytes -= freed;
        (removed, freed)
    }

    /// Removes up to `count` of the oldest active records, actions
    /// before events. Returns `(records, bytes)` removed.
    pub fn remove_oldest_records(&mut self, count: usize) -> (usize, u64) {
        let mut removed = 0usize;
        let mut freed = 0u64;
        while removed < count {
            let Some(record) = self
                .action_data
                .pop_front()
                .or_else(|| self.event_data.pop_front())
            else {
                break;
            };
            removed += 1;
            freed += record.size_bytes();
        }
        self.total_bytes -= freed;
        (removed, freed)
    }

    /// Removes active records matching `predicate`. Returns the bytes
    /// freed. In-flight data is not touched.
    pub fn remove_records_matching(&mut self, predicate: impl Fn(&str) -> bool) -> u64 {
        let mut freed = 0u64;
        for buffer in [&mut self.action_data, &mut self.event_data] {
            buffer.retain(|record| {
                if predicate(&record.data) {
                    freed += record.size_bytes();
                    false
                } else {
                    true
                }
            });
        }
        self.total_bytes -= freed;
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_track_bytes() {
        let mut entry = EntryData::default();
        entry.add_action_data(1, "abcd".to_string());
        entry.add_event_data(2, "ef".to_string());
        assert_eq!(entry.total_bytes(), 6);
        assert!(!entry.is_empty());
    }

    #[test]
    fn prepare_moves_active_bytes_out() {
        let mut entry = EntryData::default();
        entry.add_event_data(1, "abcd".to_string());
        assert_eq!(entry.prepare_data_for_sending(), 4);
        assert_eq!(entry.total_bytes(), 0);
        assert!(entry.has_data_for_sending());
        // A second prepare is a no-op while a sending side exists.
        entry.add_event_data(2, "xy".to_string());
        assert_eq!(entry.prepare_data_for_sending(), 0);
        assert_eq!(entry.total_bytes(), 2);
    }

    #[test]
    fn chunk_respects_order_and_size() {
        let mut entry = EntryData::default();
        entry.add_event_data(1, "e1".to_string());
        entry.add_action_data(2, "a1".to_string());
        entry.add_action_data(3, "a2".to_string());
        entry.prepare_data_for_sending();

        let chunk = entry.next_chunk("prefix", 14, '&').unwrap();
        // Actions first, then events, until the limit.
        assert_eq!(chunk, "prefix&a1&a2");
        let rest = entry.next_chunk("prefix", 14, '&').unwrap();
        assert_eq!(rest, "prefix&e1");
        // Everything is marked now; there is no third chunk.
        assert!(entry.next_chunk("prefix", 14, '&').is_none());
    }

    #[test]
    fn oversized_record_is_sent_alone() {
        let mut entry = EntryData::default();
        entry.add_event_data(1, "x".repeat(100));
        entry.prepare_data_for_sending();
        let chunk = entry.next_chunk("p", 10, '&').unwrap();
        assert_eq!(chunk.len(), 102);
    }

    #[test]
    fn remove_commits_the_chunk() {
        let mut entry = EntryData::default();
        entry.add_event_data(1, "e1".to_string());
        entry.prepare_data_for_sending();
        entry.next_chunk("p", 100, '&').unwrap();
        entry.remove_data_marked_for_sending();
        assert!(!entry.has_data_for_sending());
        assert!(entry.is_empty());
    }

    #[test]
    fn reset_restores_in_front_of_new_data() {
        let mut entry = EntryData::default();
        entry.add_event_data(1, "old".to_string());
        entry.prepare_data_for_sending();
        entry.next_chunk("p", 100, '&').unwrap();
        // New data arrives while the chunk is in flight.
        entry.add_event_data(2, "new".to_string());
        let restored = entry.reset_data_marked_for_sending();
        assert_eq!(restored, 3);
        assert_eq!(entry.total_bytes(), 6);
        assert!(!entry.has_data_for_sending());

        entry.prepare_data_for_sending();
        let chunk = entry.next_chunk("p", 100, '&').unwrap();
        assert_eq!(chunk, "p&old&new");
    }

    #[test]
    fn age_eviction_spares_sending_side() {
        let mut entry = EntryData::default();
        entry.add_event_data(1, "sending".to_string());
        entry.prepare_data_for_sending();
        entry.add_event_data(2, "active".to_string());

        let (removed, freed) = entry.remove_records_older_than(100);
        assert_eq!(removed, 1);
        assert_eq!(freed, 6);
        assert!(entry.has_data_for_sending());
    }

    #[test]
    fn oldest_records_prefer_actions() {
        let mut entry = EntryData::default();
        entry.add_event_data(1, "event".to_string());
        entry.add_action_data(5, "action".to_string());
        assert_eq!(entry.remove_oldest_records(1), (1, 6));
        assert_eq!(entry.remove_oldest_records(2), (1, 5));
        assert_eq!(entry.remove_oldest_records(1), (0, 0));
    }

    #[test]
    fn matching_removal_reports_bytes() {
        let mut entry = EntryData::default();
        entry.add_event_data(1, "keep".to_string());
        entry.add_event_data(2, "drop-me".to_string());
        let freed = entry.remove_records_matching(|data| data.starts_with("drop"));
        assert_eq!(freed, 7);
        assert_eq!(entry.total_bytes(), 4);
    }
}
