//! Half-open byte-key intervals for index scans.

use serde::{Deserialize, Serialize};

/// A half-open key range `[start, end)` over byte strings.
///
/// `None` on either side means unbounded. Keys compare in byte-lex
/// order, matching the engine's BLOB collation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    /// Inclusive lower bound; `None` scans from the beginning.
    pub start: Option<Vec<u8>>,
    /// Exclusive upper bound; `None` scans to the end.
    pub end: Option<Vec<u8>>,
}

impl Interval {
    /// Interval covering every key.
    pub fn all() -> Interval {
        Interval::default()
    }

    /// Interval matching exactly the keys that start with `prefix`.
    ///
    /// The upper bound is the prefix with its rightmost non-`0xFF` byte
    /// incremented and the tail dropped. A prefix of all `0xFF` bytes
    /// has no such successor, so the interval stays unbounded above. An
    /// empty prefix covers all keys.
    pub fn prefix(prefix: &[u8]) -> Interval {
        if prefix.is_empty() {
            return Interval::all();
        }
        let mut end = prefix.to_vec();
        for i in (0..end.len()).rev() {
            if end[i] < 0xFF {
                end[i] += 1;
                end.truncate(i + 1);
                return Interval {
                    start: Some(prefix.to_vec()),
                    end: Some(end),
                };
            }
        }
        Interval {
            start: Some(prefix.to_vec()),
            end: None,
        }
    }

    /// True if `key` falls inside the interval.
    pub fn contains(&self, key: &[u8]) -> bool {
        if let Some(start) = &self.start {
            if key < start.as_slice() {
                return false;
            }
        }
        if let Some(end) = &self.end {
            if key >= end.as_slice() {
                return false;
            }
        }
        true
    }
}
