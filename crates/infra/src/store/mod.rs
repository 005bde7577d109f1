//! Barcode persistence boundary.
//!
//! Four stores back the assignment engine: the catalog (barcodes and their
//! profiles), the usage ledger (global recency), the assignment history
//! (per-user recency) and the user policy store (pull settings and pins).
//! [`AssignmentStore`] ties them together and adds the one write the engine
//! performs: [`AssignmentStore::commit_assignment`], which applies the pin
//! update, the usage increment and the history append as a single unit.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use campus_barcodes::{
    AssignmentRecord, Barcode, BarcodeProfile, Gender, PinUpdate, PoolEntry, PullPolicy,
    UsageRecord, UserPin, Windows,
};
use campus_core::{BarcodeId, UserId};

pub use in_memory::InMemoryBarcodeStore;
pub use postgres::PostgresBarcodeStore;

/// Store operation error.
///
/// These are **infrastructure errors**; the engine reports them separately
/// from its business outcomes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness violation, or a pin compare-and-swap that lost a race.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Backend unreachable or unusable (closed pool, poisoned lock, no runtime).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(String),
}

/// Everything one successful assignment writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentCommit {
    pub user_id: UserId,
    pub barcode_id: BarcodeId,
    pub at: DateTime<Utc>,
    pub pin: PinUpdate,
    /// Set when a barcode the user does not own was picked from the pool:
    /// the store re-checks the recency exclusion against its current state
    /// and refuses the commit if another user took the barcode meanwhile.
    pub recency_guard: Option<Windows>,
}

/// Barcodes and their demographic profiles.
pub trait BarcodeCatalog: Send + Sync {
    /// Insert a barcode and, optionally, its profile.
    ///
    /// Fails with `Conflict` if the id or the code already exists.
    fn insert_barcode(&self, barcode: Barcode, gender: Option<Gender>) -> Result<(), StoreError>;

    fn get_barcode(&self, barcode_id: BarcodeId) -> Result<Option<Barcode>, StoreError>;

    /// All barcodes owned by `owner`, oldest first.
    fn barcodes_owned_by(&self, owner: UserId) -> Result<Vec<Barcode>, StoreError>;

    /// Create or replace the profile of an existing barcode.
    fn set_profile(&self, profile: BarcodeProfile) -> Result<(), StoreError>;

    fn profile(&self, barcode_id: BarcodeId) -> Result<Option<BarcodeProfile>, StoreError>;

    /// Pool members for `user` under `filter`: owned barcodes plus shared
    /// Dynamic barcodes whose profile gender equals `filter`.
    fn pool_for(&self, user: UserId, filter: Gender) -> Result<Vec<PoolEntry>, StoreError>;

    /// Delete a barcode together with its profile, usage and history rows.
    /// Pins pointing at it are cleared.
    fn remove_barcode(&self, barcode_id: BarcodeId) -> Result<Barcode, StoreError>;
}

/// Global usage per barcode.
pub trait UsageLedger: Send + Sync {
    fn usage(&self, barcode_id: BarcodeId) -> Result<Option<UsageRecord>, StoreError>;
}

/// Append-only log of handouts.
pub trait AssignmentHistory: Send + Sync {
    /// Most recent assignment of `barcode_id` to `user`.
    fn last_assignment(
        &self,
        user: UserId,
        barcode_id: BarcodeId,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// All assignments to `user`, oldest first.
    fn assignments_for(&self, user: UserId) -> Result<Vec<AssignmentRecord>, StoreError>;
}

/// Per-user pull settings and pinned barcode.
pub trait UserPolicyStore: Send + Sync {
    fn pull_policy(&self, user: UserId) -> Result<Option<PullPolicy>, StoreError>;

    fn set_pull_policy(&self, user: UserId, policy: PullPolicy) -> Result<(), StoreError>;

    /// The user's pin; `barcode_id` is `None` when nothing is pinned.
    fn pin(&self, user: UserId) -> Result<UserPin, StoreError>;

    /// Unconditionally set (or clear) the pin.
    fn set_pin(&self, user: UserId, barcode_id: Option<BarcodeId>) -> Result<(), StoreError>;
}

/// The full store the assignment engine runs against.
pub trait AssignmentStore: BarcodeCatalog + UsageLedger + AssignmentHistory + UserPolicyStore {
    /// Apply one assignment atomically:
    ///
    /// - the pin update (compare-and-swap for `PinUpdate::Replace`, equality
    ///   check for `PinUpdate::Expect`)
    /// - the recency re-check when `recency_guard` is set
    /// - `total_uses += 1`, `last_used_at = at` on the barcode's usage record
    ///   (created on first use)
    /// - one appended `AssignmentRecord`
    ///
    /// Either all of it happens or none does. A lost compare-and-swap, a moved
    /// pin or a barcode that turned hot yields `StoreError::Conflict`.
    /// Returns the usage record after the increment.
    fn commit_assignment(&self, commit: &AssignmentCommit) -> Result<UsageRecord, StoreError>;
}

impl<S> BarcodeCatalog for Arc<S>
where
    S: BarcodeCatalog + ?Sized,
{
    fn insert_barcode(&self, barcode: Barcode, gender: Option<Gender>) -> Result<(), StoreError> {
        (**self).insert_barcode(barcode, gender)
    }

    fn get_barcode(&self, barcode_id: BarcodeId) -> Result<Option<Barcode>, StoreError> {
        (**self).get_barcode(barcode_id)
    }

    fn barcodes_owned_by(&self, owner: UserId) -> Result<Vec<Barcode>, StoreError> {
        (**self).barcodes_owned_by(owner)
    }

    fn set_profile(&self, profile: BarcodeProfile) -> Result<(), StoreError> {
        (**self).set_profile(profile)
    }

    fn profile(&self, barcode_id: BarcodeId) -> Result<Option<BarcodeProfile>, StoreError> {
        (**self).profile(barcode_id)
    }

    fn pool_for(&self, user: UserId, filter: Gender) -> Result<Vec<PoolEntry>, StoreError> {
        (**self).pool_for(user, filter)
    }

    fn remove_barcode(&self, barcode_id: BarcodeId) -> Result<Barcode, StoreError> {
        (**self).remove_barcode(barcode_id)
    }
}

impl<S> UsageLedger for Arc<S>
where
    S: UsageLedger + ?Sized,
{
    fn usage(&self, barcode_id: BarcodeId) -> Result<Option<UsageRecord>, StoreError> {
        (**self).usage(barcode_id)
    }
}

impl<S> AssignmentHistory for Arc<S>
where
    S: AssignmentHistory + ?Sized,
{
    fn last_assignment(
        &self,
        user: UserId,
        barcode_id: BarcodeId,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        (**self).last_assignment(user, barcode_id)
    }

    fn assignments_for(&self, user: UserId) -> Result<Vec<AssignmentRecord>, StoreError> {
        (**self).assignments_for(user)
    }
}

impl<S> UserPolicyStore for Arc<S>
where
    S: UserPolicyStore + ?Sized,
{
    fn pull_policy(&self, user: UserId) -> Result<Option<PullPolicy>, StoreError> {
        (**self).pull_policy(user)
    }

    fn set_pull_policy(&self, user: UserId, policy: PullPolicy) -> Result<(), StoreError> {
        (**self).set_pull_policy(user, policy)
    }

    fn pin(&self, user: UserId) -> Result<UserPin, StoreError> {
        (**self).pin(user)
    }

    fn set_pin(&self, user: UserId, barcode_id: Option<BarcodeId>) -> Result<(), StoreError> {
        (**self).set_pin(user, barcode_id)
    }
}

impl<S> AssignmentStore for Arc<S>
where
    S: AssignmentStore + ?Sized,
{
    fn commit_assignment(&self, commit: &AssignmentCommit) -> Result<UsageRecord, StoreError> {
        (**self).commit_assignment(commit)
    }
}
