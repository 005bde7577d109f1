use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use campus_barcodes::{
    AssignmentRecord, Barcode, BarcodeProfile, Gender, PinUpdate, PoolEntry, PullPolicy,
    Recency, UsageRecord, UserPin, is_available, is_pool_member,
};
use campus_core::{BarcodeId, UserId};

use super::{
    AssignmentCommit, AssignmentHistory, AssignmentStore, BarcodeCatalog, StoreError,
    UsageLedger, UserPolicyStore,
};

#[derive(Debug, Default)]
struct State {
    barcodes: HashMap<BarcodeId, Barcode>,
    codes: HashMap<String, BarcodeId>,
    profiles: HashMap<BarcodeId, Gender>,
    usage: HashMap<BarcodeId, UsageRecord>,
    history: Vec<AssignmentRecord>,
    last_assigned: HashMap<(UserId, BarcodeId), DateTime<Utc>>,
    policies: HashMap<UserId, PullPolicy>,
    pins: HashMap<UserId, BarcodeId>,
}

/// In-memory barcode store for tests/dev.
///
/// All state sits behind one `RwLock`, so every `commit_assignment` is
/// trivially atomic. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryBarcodeStore {
    state: RwLock<State>,
}

impl InMemoryBarcodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }
}

impl BarcodeCatalog for InMemoryBarcodeStore {
    fn insert_barcode(&self, barcode: Barcode, gender: Option<Gender>) -> Result<(), StoreError> {
        let mut state = self.write()?;

        if state.barcodes.contains_key(&barcode.id) {
            return Err(StoreError::Conflict(format!("barcode {} already exists", barcode.id)));
        }
        if state.codes.contains_key(&barcode.code) {
            return Err(StoreError::Conflict(format!(
                "barcode code '{}' already exists",
                barcode.code
            )));
        }

        if let Some(gender) = gender {
            state.profiles.insert(barcode.id, gender);
        }
        state.codes.insert(barcode.code.clone(), barcode.id);
        state.barcodes.insert(barcode.id, barcode);
        Ok(())
    }

    fn get_barcode(&self, barcode_id: BarcodeId) -> Result<Option<Barcode>, StoreError> {
        Ok(self.read()?.barcodes.get(&barcode_id).cloned())
    }

    fn barcodes_owned_by(&self, owner: UserId) -> Result<Vec<Barcode>, StoreError> {
        let state = self.read()?;
        let mut owned: Vec<Barcode> = state
            .barcodes
            .values()
            .filter(|b| b.is_owned_by(owner))
            .cloned()
            .collect();
        owned.sort_by_key(|b| (b.created_at, b.id));
        Ok(owned)
    }

    fn set_profile(&self, profile: BarcodeProfile) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if !state.barcodes.contains_key(&profile.barcode_id) {
            return Err(StoreError::NotFound(format!("barcode {}", profile.barcode_id)));
        }
        state.profiles.insert(profile.barcode_id, profile.gender);
        Ok(())
    }

    fn profile(&self, barcode_id: BarcodeId) -> Result<Option<BarcodeProfile>, StoreError> {
        Ok(self
            .read()?
            .profiles
            .get(&barcode_id)
            .map(|gender| BarcodeProfile {
                barcode_id,
                gender: *gender,
            }))
    }

    fn pool_for(&self, user: UserId, filter: Gender) -> Result<Vec<PoolEntry>, StoreError> {
        let state = self.read()?;
        let mut pool: Vec<PoolEntry> = state
            .barcodes
            .values()
            .filter_map(|b| {
                let gender = state.profiles.get(&b.id).copied();
                is_pool_member(b, gender, user, filter).then(|| PoolEntry {
                    barcode: b.clone(),
                    gender,
                })
            })
            .collect();

        // HashMap order is arbitrary; keep results stable for deterministic pickers.
        pool.sort_by_key(|e| (e.barcode.created_at, e.barcode.id));
        Ok(pool)
    }

    fn remove_barcode(&self, barcode_id: BarcodeId) -> Result<Barcode, StoreError> {
        let mut state = self.write()?;
        let barcode = state
            .barcodes
            .remove(&barcode_id)
            .ok_or_else(|| StoreError::NotFound(format!("barcode {barcode_id}")))?;

        state.codes.remove(&barcode.code);
        state.profiles.remove(&barcode_id);
        state.usage.remove(&barcode_id);
        state.history.retain(|r| r.barcode_id != barcode_id);
        state.last_assigned.retain(|(_, b), _| *b != barcode_id);
        state.pins.retain(|_, pinned| *pinned != barcode_id);
        Ok(barcode)
    }
}

impl UsageLedger for InMemoryBarcodeStore {
    fn usage(&self, barcode_id: BarcodeId) -> Result<Option<UsageRecord>, StoreError> {
        Ok(self.read()?.usage.get(&barcode_id).cloned())
    }
}

impl AssignmentHistory for InMemoryBarcodeStore {
    fn last_assignment(
        &self,
        user: UserId,
        barcode_id: BarcodeId,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.read()?.last_assigned.get(&(user, barcode_id)).copied())
    }

    fn assignments_for(&self, user: UserId) -> Result<Vec<AssignmentRecord>, StoreError> {
        let state = self.read()?;
        let mut records: Vec<AssignmentRecord> = state
            .history
            .iter()
            .filter(|r| r.user_id == user)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.assigned_at);
        Ok(records)
    }
}

impl UserPolicyStore for InMemoryBarcodeStore {
    fn pull_policy(&self, user: UserId) -> Result<Option<PullPolicy>, StoreError> {
        Ok(self.read()?.policies.get(&user).copied())
    }

    fn set_pull_policy(&self, user: UserId, policy: PullPolicy) -> Result<(), StoreError> {
        self.write()?.policies.insert(user, policy);
        Ok(())
    }

    fn pin(&self, user: UserId) -> Result<UserPin, StoreError> {
        Ok(UserPin {
            user_id: user,
            barcode_id: self.read()?.pins.get(&user).copied(),
        })
    }

    fn set_pin(&self, user: UserId, barcode_id: Option<BarcodeId>) -> Result<(), StoreError> {
        let mut state = self.write()?;
        match barcode_id {
            Some(id) => {
                if !state.barcodes.contains_key(&id) {
                    return Err(StoreError::NotFound(format!("barcode {id}")));
                }
                state.pins.insert(user, id);
            }
            None => {
                state.pins.remove(&user);
            }
        }
        Ok(())
    }
}

impl AssignmentStore for InMemoryBarcodeStore {
    fn commit_assignment(&self, commit: &AssignmentCommit) -> Result<UsageRecord, StoreError> {
        let mut state = self.write()?;

        // Validate everything before touching anything so failure writes nothing.
        let barcode = state
            .barcodes
            .get(&commit.barcode_id)
            .ok_or_else(|| StoreError::NotFound(format!("barcode {}", commit.barcode_id)))?;

        let current_pin = state.pins.get(&commit.user_id).copied();
        let pin_holds = match commit.pin {
            PinUpdate::Keep => true,
            PinUpdate::Expect(pinned) => current_pin == Some(pinned),
            PinUpdate::Replace { expected, .. } => current_pin == expected,
        };
        if !pin_holds {
            return Err(StoreError::Conflict(format!(
                "pin for user {} changed concurrently",
                commit.user_id
            )));
        }

        if let Some(windows) = &commit.recency_guard {
            let recency = Recency {
                last_used_at: state.usage.get(&commit.barcode_id).map(|u| u.last_used_at),
                last_assigned_to_user: state
                    .last_assigned
                    .get(&(commit.user_id, commit.barcode_id))
                    .copied(),
            };
            if !is_available(barcode, commit.user_id, recency, commit.at, windows) {
                return Err(StoreError::Conflict(format!(
                    "barcode {} was handed out concurrently",
                    commit.barcode_id
                )));
            }
        }

        if let PinUpdate::Replace { new, .. } = commit.pin {
            state.pins.insert(commit.user_id, new);
        }

        let usage = state
            .usage
            .entry(commit.barcode_id)
            .and_modify(|u| u.record_use(commit.at))
            .or_insert_with(|| UsageRecord::first_use(commit.barcode_id, commit.at))
            .clone();

        state.history.push(AssignmentRecord {
            user_id: commit.user_id,
            barcode_id: commit.barcode_id,
            assigned_at: commit.at,
        });
        state
            .last_assigned
            .entry((commit.user_id, commit.barcode_id))
            .and_modify(|t| *t = (*t).max(commit.at))
            .or_insert(commit.at);

        Ok(usage)
    }
}
