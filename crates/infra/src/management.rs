//! Catalog and policy management on behalf of a principal.
//!
//! These are the write paths that feed the assignment engine: registering
//! and removing barcodes, pinning a barcode, and changing pull settings.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, instrument};

use campus_auth::{Principal, may_manage};
use campus_barcodes::{Barcode, BarcodeProfile, BarcodeType, Gender, PullPolicy};
use campus_core::{BarcodeId, DomainError};

use crate::store::{AssignmentStore, StoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ManageError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Input for registering a barcode owned by the acting principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBarcode {
    pub code: String,
    pub barcode_type: BarcodeType,
    pub shareable: bool,
    /// Profile gender; without one the barcode never joins a gender-filtered pool.
    pub gender: Option<Gender>,
}

pub struct BarcodeManager<S> {
    store: S,
}

impl<S> BarcodeManager<S>
where
    S: AssignmentStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[instrument(skip(self, principal, new), fields(user_id = %principal.user_id), err)]
    pub fn register(
        &self,
        principal: &Principal,
        new: NewBarcode,
        now: DateTime<Utc>,
    ) -> Result<Barcode, ManageError> {
        let barcode = Barcode::new(
            principal.user_id,
            new.code,
            new.barcode_type,
            new.shareable,
            now,
        )?;

        self.store.insert_barcode(barcode.clone(), new.gender).map_err(|e| match e {
            StoreError::Conflict(msg) => ManageError::Domain(DomainError::conflict(msg)),
            other => ManageError::Store(other),
        })?;

        info!(barcode_id = %barcode.id, barcode_type = %barcode.barcode_type, "barcode registered");
        Ok(barcode)
    }

    /// Owner or admin only.
    #[instrument(skip(self, principal), fields(user_id = %principal.user_id), err)]
    pub fn remove(&self, principal: &Principal, barcode_id: BarcodeId) -> Result<Barcode, ManageError> {
        let barcode = self
            .store
            .get_barcode(barcode_id)?
            .ok_or(DomainError::NotFound)?;

        if !may_manage(principal, barcode.owner) {
            return Err(DomainError::Unauthorized.into());
        }

        let removed = self.store.remove_barcode(barcode_id)?;
        info!(barcode_id = %barcode_id, "barcode removed");
        Ok(removed)
    }

    /// Re-tag a barcode's profile gender. Owner or admin only.
    pub fn set_profile(
        &self,
        principal: &Principal,
        barcode_id: BarcodeId,
        gender: Gender,
    ) -> Result<(), ManageError> {
        let barcode = self
            .store
            .get_barcode(barcode_id)?
            .ok_or(DomainError::NotFound)?;

        if !may_manage(principal, barcode.owner) {
            return Err(DomainError::Unauthorized.into());
        }

        self.store.set_profile(BarcodeProfile { barcode_id, gender })?;
        Ok(())
    }

    /// Pin a barcode the principal owns, or a shared Dynamic barcode.
    pub fn pin(&self, principal: &Principal, barcode_id: BarcodeId) -> Result<(), ManageError> {
        let barcode = self
            .store
            .get_barcode(barcode_id)?
            .ok_or(DomainError::NotFound)?;

        if !barcode.is_owned_by(principal.user_id) && !barcode.is_shared_dynamic() {
            return Err(DomainError::Unauthorized.into());
        }

        self.store.set_pin(principal.user_id, Some(barcode_id))?;
        Ok(())
    }

    pub fn unpin(&self, principal: &Principal) -> Result<(), ManageError> {
        self.store.set_pin(principal.user_id, None)?;
        Ok(())
    }

    pub fn set_pull_policy(&self, principal: &Principal, policy: PullPolicy) -> Result<(), ManageError> {
        self.store.set_pull_policy(principal.user_id, policy)?;
        Ok(())
    }
}
