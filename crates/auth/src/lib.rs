//! `campus-auth`: barcode access tiers derived from group membership.
//!
//! This crate is intentionally decoupled from sessions, HTTP and storage.

pub mod groups;
pub mod principal;
pub mod tier;

pub use groups::Group;
pub use principal::Principal;
pub use tier::{AuthzError, Tier, may_manage, resolve_tier};
