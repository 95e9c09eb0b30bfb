//! Nanosecond timestamps and inclusive timestamp ranges.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Nanosecond-precision timestamp used for document versioning.
///
/// An `i64` of nanoseconds since the Unix epoch provides total ordering
/// and enough precision that two writes from the same process never
/// collide in practice. The store accepts externally supplied
/// timestamps (tests, replay); in production they come from [`Timestamp::now`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// The zero timestamp (Unix epoch).
    pub const ZERO: Timestamp = Timestamp(0);

    /// The maximum representable timestamp.
    pub const MAX: Timestamp = Timestamp(i64::MAX);

    /// Current wall-clock time. Nanosecond range covers dates through 2262.
    pub fn now() -> Timestamp {
        Timestamp(Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX))
    }

    /// Raw nanoseconds since the epoch.
    pub fn as_nanos(self) -> i64 {
        self.0
    }

    /// Builds a timestamp from raw nanoseconds.
    pub fn from_nanos(nanos: i64) -> Timestamp {
        Timestamp(nanos)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Inclusive range of timestamps for history queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampRange {
    /// Inclusive lower bound.
    pub start: Timestamp,
    /// Inclusive upper bound.
    pub end: Timestamp,
}

impl TimestampRange {
    /// Range covering every timestamp.
    pub fn all_time() -> TimestampRange {
        TimestampRange {
            start: Timestamp::ZERO,
            end: Timestamp::MAX,
        }
    }

    /// Range from the epoch up to and including `ts`.
    pub fn at_or_before(ts: Timestamp) -> TimestampRange {
        TimestampRange {
            start: Timestamp::ZERO,
            end: ts,
        }
    }

    /// Range strictly after `ts`.
    pub fn after(ts: Timestamp) -> TimestampRange {
        TimestampRange {
            start: Timestamp(ts.0.saturating_add(1)),
            end: Timestamp::MAX,
        }
    }

    /// True if `ts` lies within the range; both bounds are inclusive.
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && ts <= self.end
    }
}
