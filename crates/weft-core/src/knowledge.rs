//! Knowledge vectors: the partial-order marker of how far each log is known.
//!
//! A vector maps each log key to the number of entries known for that log,
//! which is also the next index expected from it. A log at `3` holds indices
//! `0..3`; its highest index is `2`. Missing keys count as `0`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::LogKey;

/// A half-open range of indices `from..to` within one log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRange {
    pub log_key: LogKey,
    pub from: u64,
    pub to: u64,
}

impl LogRange {
    pub fn len(&self) -> u64 {
        self.to.saturating_sub(self.from)
    }

    pub fn is_empty(&self) -> bool {
        self.to <= self.from
    }

    /// Consecutive ranges of at most `max_len` entries covering this one.
    pub fn chunks(&self, max_len: u64) -> impl Iterator<Item = LogRange> {
        let max_len = max_len.max(1);
        let LogRange { log_key, from, to } = *self;
        let mut next = from;
        std::iter::from_fn(move || {
            if next >= to {
                return None;
            }
            let end = to.min(next.saturating_add(max_len));
            let chunk = LogRange {
                log_key,
                from: next,
                to: end,
            };
            next = end;
            Some(chunk)
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeVector {
    lengths: BTreeMap<LogKey, u64>,
}

impl KnowledgeVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries known for `log_key`.
    pub fn get(&self, log_key: &LogKey) -> u64 {
        self.lengths.get(log_key).copied().unwrap_or(0)
    }

    /// Raise the entry count for `log_key` to `len`.
    ///
    /// Never lowers a value. Returns whether the vector changed.
    pub fn advance(&mut self, log_key: LogKey, len: u64) -> bool {
        if len == 0 {
            return false;
        }
        let slot = self.lengths.entry(log_key).or_insert(0);
        if len > *slot {
            *slot = len;
            true
        } else {
            false
        }
    }

    /// Component-wise max, in place.
    pub fn merge(&mut self, other: &KnowledgeVector) {
        for (key, len) in &other.lengths {
            self.advance(*key, *len);
        }
    }

    pub fn merged(&self, other: &KnowledgeVector) -> KnowledgeVector {
        let mut out = self.clone();
        out.merge(other);
        out
    }

    /// `self[k] >= other[k]` for every key in `other`.
    pub fn dominates(&self, other: &KnowledgeVector) -> bool {
        other
            .lengths
            .iter()
            .all(|(key, len)| self.get(key) >= *len)
    }

    /// Ranges `self` is missing relative to `remote`.
    ///
    /// Fetching exactly these ranges makes `self` dominate `remote`. Output is
    /// ordered by log key.
    pub fn diff(&self, remote: &KnowledgeVector) -> Vec<LogRange> {
        remote
            .lengths
            .iter()
            .filter_map(|(key, remote_len)| {
                let local_len = self.get(key);
                (*remote_len > local_len).then_some(LogRange {
                    log_key: *key,
                    from: local_len,
                    to: *remote_len,
                })
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LogKey, &u64)> {
        self.lengths.iter()
    }

    pub fn logs(&self) -> impl Iterator<Item = &LogKey> {
        self.lengths.keys()
    }

    /// Number of logs with at least one known entry.
    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    /// Sum of entry counts across logs.
    pub fn total_entries(&self) -> u64 {
        self.lengths.values().sum()
    }
}

impl FromIterator<(LogKey, u64)> for KnowledgeVector {
    fn from_iter<I: IntoIterator<Item = (LogKey, u64)>>(iter: I) -> Self {
        let mut kv = KnowledgeVector::new();
        for (key, len) in iter {
            kv.advance(key, len);
        }
        kv
    }
}
