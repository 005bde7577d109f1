//! Barcode domain module.
//!
//! Catalog records, usage/assignment ledgers, per-user policy, the pool
//! eligibility rules and output formatting, implemented purely as
//! deterministic domain logic (no IO, no storage). Randomness enters only
//! through the [`Picker`] seam.

pub mod barcode;
pub mod format;
pub mod policy;
pub mod selection;
pub mod usage;
pub mod window;

pub use barcode::{Barcode, BarcodeProfile, BarcodeType, Gender};
pub use format::{IssuedBarcode, TIMESTAMP_WIDTH, format_timestamp};
pub use policy::{PinUpdate, PullPolicy, UserPin};
pub use selection::{FirstPicker, Picker, PoolEntry, RandomPicker, Recency, is_available, is_pool_member};
pub use usage::{AssignmentRecord, UsageRecord};
pub use window::{DEFAULT_GLOBAL_EXCLUSION_SECS, DEFAULT_STICKINESS_SECS, Windows};
