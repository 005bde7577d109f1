//! Tier resolution: which barcode policy applies to a principal.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use campus_core::UserId;

use crate::Principal;

/// Barcode policy tier of a principal.
///
/// The two tiers are independent policies, not degrees of one policy:
/// `Individual` users get their own identification barcode and ignore pull
/// settings entirely, `School` users draw from the shared pool.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Individual,
    School,
}

impl core::fmt::Display for Tier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Tier::Individual => f.write_str("individual"),
            Tier::School => f.write_str("school"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    /// The principal belongs to no group that grants barcode access.
    #[error("Permission Denied.")]
    PermissionDenied,
}

/// Resolve the tier of a principal.
///
/// Individual membership takes precedence when both groups are present.
///
/// - No IO
/// - No panics
pub fn resolve_tier(principal: &Principal) -> Result<Tier, AuthzError> {
    if principal.is_individual_tier() {
        Ok(Tier::Individual)
    } else if principal.is_school_tier() {
        Ok(Tier::School)
    } else {
        Err(AuthzError::PermissionDenied)
    }
}

/// Owner-or-admin check for catalog management operations.
pub fn may_manage(principal: &Principal, owner: UserId) -> bool {
    principal.user_id == owner || principal.is_admin()
}
