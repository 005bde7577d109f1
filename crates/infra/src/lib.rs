//! Infrastructure layer: barcode stores, the assignment engine and its wiring.

pub mod config;
pub mod engine;
pub mod management;
pub mod response;
pub mod store;


pub use config::{ConfigError, EngineConfig};
pub use engine::{AssignError, AssignmentEngine};
pub use management::{BarcodeManager, ManageError, NewBarcode};
pub use response::AssignmentResponse;
pub use store::{
    AssignmentCommit, AssignmentHistory, AssignmentStore, BarcodeCatalog, InMemoryBarcodeStore,
    PostgresBarcodeStore, StoreError, UsageLedger, UserPolicyStore,
};
