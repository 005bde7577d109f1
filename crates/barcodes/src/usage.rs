//! Usage ledger and assignment history records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use campus_core::{BarcodeId, UserId};

/// Global usage of one barcode (1:1, created lazily on first assignment).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub barcode_id: BarcodeId,
    pub total_uses: u64,
    pub last_used_at: DateTime<Utc>,
}

impl UsageRecord {
    /// The record as it looks after the very first use.
    pub fn first_use(barcode_id: BarcodeId, at: DateTime<Utc>) -> Self {
        Self {
            barcode_id,
            total_uses: 1,
            last_used_at: at,
        }
    }

    /// Count one more use at `at`.
    pub fn record_use(&mut self, at: DateTime<Utc>) {
        self.total_uses = self.total_uses.saturating_add(1);
        self.last_used_at = at;
    }
}

/// One handout of a barcode to a user. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub user_id: UserId,
    pub barcode_id: BarcodeId,
    pub assigned_at: DateTime<Utc>,
}
