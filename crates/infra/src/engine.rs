//! Barcode assignment engine.
//!
//! Decides, per request, which barcode a user is handed:
//!
//! ```text
//! Principal
//!   ↓
//! 1. Resolve tier (Individual / School), or PermissionDenied
//!   ↓
//! 2a. Individual: the user's own identification barcode
//! 2b. School, pulling disabled: the pinned barcode
//! 2c. School, pulling enabled: pool → recency exclusion → pick one,
//!     falling back to the pinned barcode when nothing is eligible
//!   ↓
//! 3. Commit pin update + usage increment + history append (one unit)
//!   ↓
//! 4. Render (timestamp prefix for Dynamic barcodes)
//! ```
//!
//! Calls for the same user are serialized in-process. The commit re-checks
//! what the decision was based on (the pin it read and, for a pool pick the
//! user does not own, the recency exclusion), so racing writers surface as
//! `StoreError::Conflict`. Nothing is written when the call fails.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, FixedOffset, Utc};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use campus_auth::{AuthzError, Principal, Tier, resolve_tier};
use campus_barcodes::{
    Barcode, BarcodeType, Gender, IssuedBarcode, PinUpdate, Picker, RandomPicker, Recency,
    Windows, is_available,
};
use campus_core::{BarcodeId, UserId};

use crate::config::{ConfigError, EngineConfig};
use crate::store::{AssignmentCommit, AssignmentStore, StoreError};

/// Why an assignment did not produce a barcode.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AssignError {
    /// The user belongs to no barcode tier.
    #[error("Permission Denied.")]
    PermissionDenied,

    /// Nothing eligible and nothing pinned.
    #[error("No barcode selected.")]
    NoCredentialSelected,

    /// Infrastructure trouble; not a policy outcome.
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
}

impl AssignError {
    /// `true` for the policy outcomes the caller shows verbatim.
    pub fn is_business(&self) -> bool {
        !matches!(self, AssignError::Store(_))
    }
}

impl From<AuthzError> for AssignError {
    fn from(value: AuthzError) -> Self {
        match value {
            AuthzError::PermissionDenied => AssignError::PermissionDenied,
        }
    }
}

/// Per-user mutexes. Users never share a slot.
#[derive(Debug, Default)]
struct UserLocks {
    slots: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl UserLocks {
    const PRUNE_THRESHOLD: usize = 1024;

    fn slot(&self, user: UserId) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        if slots.len() >= Self::PRUNE_THRESHOLD {
            // Slots only referenced by the table are idle.
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        }
        slots.entry(user).or_default().clone()
    }
}

pub struct AssignmentEngine<S, P = RandomPicker> {
    store: S,
    picker: P,
    windows: Windows,
    offset: FixedOffset,
    locks: UserLocks,
}

impl<S, P> AssignmentEngine<S, P>
where
    S: AssignmentStore,
    P: Picker,
{
    pub fn new(store: S, picker: P, config: &EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            store,
            picker,
            windows: config.windows(),
            offset: config.timestamp_offset()?,
            locks: UserLocks::default(),
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Hand `principal` a barcode at `now`.
    #[instrument(skip(self, principal), fields(user_id = %principal.user_id), err(Display))]
    pub fn assign(
        &self,
        principal: &Principal,
        now: DateTime<Utc>,
    ) -> Result<IssuedBarcode, AssignError> {
        let user = principal.user_id;
        let tier = match resolve_tier(principal) {
            Ok(tier) => tier,
            Err(e) => {
                info!("no barcode tier for user");
                return Err(e.into());
            }
        };

        let slot = self.locks.slot(user);
        // The guard protects no data, so a poisoned lock is still usable.
        let _guard = slot.lock().unwrap_or_else(|p| p.into_inner());

        let (barcode, pin) = match tier {
            Tier::Individual => (self.resolve_individual(user)?, PinUpdate::Keep),
            Tier::School => self.resolve_school(user, now)?,
        };

        // A foreign pool pick is only valid while nobody else holds it.
        let recency_guard = match pin {
            PinUpdate::Replace { .. } if !barcode.is_owned_by(user) => Some(self.windows),
            _ => None,
        };
        let commit = AssignmentCommit {
            user_id: user,
            barcode_id: barcode.id,
            at: now,
            pin,
            recency_guard,
        };
        let usage = self.store.commit_assignment(&commit).map_err(|e| {
            warn!(error = %e, barcode_id = %barcode.id, "failed to commit assignment");
            AssignError::Store(e)
        })?;

        debug!(
            %tier,
            barcode_id = %barcode.id,
            barcode_type = %barcode.barcode_type,
            total_uses = usage.total_uses,
            "barcode assigned"
        );

        Ok(IssuedBarcode::render(&barcode, now, self.offset))
    }

    /// Most recently created identification barcode owned by `user`.
    fn resolve_individual(&self, user: UserId) -> Result<Barcode, AssignError> {
        self.store
            .barcodes_owned_by(user)?
            .into_iter()
            .filter(|b| b.barcode_type == BarcodeType::Identification)
            .max_by_key(|b| b.created_at)
            .ok_or_else(|| {
                info!("individual user has no identification barcode");
                AssignError::NoCredentialSelected
            })
    }

    fn resolve_school(
        &self,
        user: UserId,
        now: DateTime<Utc>,
    ) -> Result<(Barcode, PinUpdate), AssignError> {
        let policy = self.store.pull_policy(user)?.unwrap_or_default();
        let pinned = self.store.pin(user)?.barcode_id;

        if policy.pull_enabled {
            let eligible = self.eligible(user, policy.gender_filter, now)?;
            if let Some(chosen) = self.picker.pick_one(&eligible) {
                return Ok((
                    chosen.clone(),
                    PinUpdate::Replace {
                        expected: pinned,
                        new: chosen.id,
                    },
                ));
            }
            info!("pool empty; falling back to pinned barcode");
        }

        let barcode = self.pinned_barcode(pinned)?.ok_or_else(|| {
            info!("no pinned barcode to fall back to");
            AssignError::NoCredentialSelected
        })?;
        let pin = PinUpdate::Expect(barcode.id);
        Ok((barcode, pin))
    }

    /// Pool members that survive the recency exclusion.
    pub fn eligible(
        &self,
        user: UserId,
        filter: Gender,
        now: DateTime<Utc>,
    ) -> Result<Vec<Barcode>, StoreError> {
        let pool = self.store.pool_for(user, filter)?;
        let pool_size = pool.len();

        let mut eligible = Vec::with_capacity(pool_size);
        for entry in pool {
            let barcode = entry.barcode;
            let recency = if barcode.is_owned_by(user) {
                Recency::default()
            } else {
                Recency {
                    last_used_at: self.store.usage(barcode.id)?.map(|u| u.last_used_at),
                    last_assigned_to_user: self.store.last_assignment(user, barcode.id)?,
                }
            };

            if is_available(&barcode, user, recency, now, &self.windows) {
                eligible.push(barcode);
            }
        }

        debug!(
            pool_size,
            eligible = eligible.len(),
            excluded = pool_size - eligible.len(),
            "pool evaluated"
        );
        Ok(eligible)
    }

    /// The pinned barcode, if the pin is set and still points at a catalog record.
    fn pinned_barcode(&self, pinned: Option<BarcodeId>) -> Result<Option<Barcode>, StoreError> {
        match pinned {
            Some(id) => self.store.get_barcode(id),
            None => Ok(None),
        }
    }
}
