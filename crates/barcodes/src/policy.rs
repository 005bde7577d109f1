//! Per-user pull settings and the pinned barcode.

use serde::{Deserialize, Serialize};

use campus_core::{BarcodeId, UserId};

use crate::Gender;

/// Per-user pool preference (configured by the user, read-only to the engine).
///
/// Users without a stored policy get the default: pulling enabled, filter
/// `Unknown`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullPolicy {
    pub pull_enabled: bool,
    pub gender_filter: Gender,
}

impl Default for PullPolicy {
    fn default() -> Self {
        Self {
            pull_enabled: true,
            gender_filter: Gender::Unknown,
        }
    }
}

/// The barcode a user currently holds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPin {
    pub user_id: UserId,
    pub barcode_id: Option<BarcodeId>,
}

/// How the pin must change when an assignment is committed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PinUpdate {
    /// Leave the pin untouched (individual tier).
    Keep,
    /// Leave the pin untouched, but only if it still points at this barcode
    /// (fallback to the existing pin).
    Expect(BarcodeId),
    /// Compare-and-swap: replace the pin only if it still equals `expected`.
    Replace {
        expected: Option<BarcodeId>,
        new: BarcodeId,
    },
}
