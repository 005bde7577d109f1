//! Recency windows.
//!
//! Both windows are inclusive: an event exactly `window` old is still inside
//! it. Timestamps in the future (clock skew between writers) count as age 0.

use chrono::{DateTime, Duration, Utc};

pub const DEFAULT_GLOBAL_EXCLUSION_SECS: i64 = 5 * 60;
pub const DEFAULT_STICKINESS_SECS: i64 = 10 * 60;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Windows {
    /// A shared barcode used by anyone within this period is excluded.
    pub global_exclusion: Duration,
    /// A user's own assignment within this period waives the exclusion.
    pub stickiness: Duration,
}

impl Default for Windows {
    fn default() -> Self {
        Self {
            global_exclusion: Duration::seconds(DEFAULT_GLOBAL_EXCLUSION_SECS),
            stickiness: Duration::seconds(DEFAULT_STICKINESS_SECS),
        }
    }
}

impl Windows {
    pub fn new(global_exclusion: Duration, stickiness: Duration) -> Self {
        Self {
            global_exclusion,
            stickiness,
        }
    }

    /// Last use by anyone at `last_used_at` still blocks pooling at `now`.
    pub fn is_globally_hot(&self, last_used_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        within(last_used_at, now, self.global_exclusion)
    }

    /// The user's own assignment at `assigned_at` still counts as theirs at `now`.
    pub fn is_sticky(&self, assigned_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        within(assigned_at, now, self.stickiness)
    }
}

fn within(at: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    let age = (now - at).max(Duration::zero());
    age <= window
}
