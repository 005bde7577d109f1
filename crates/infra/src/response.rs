//! Caller-facing result envelope.
//!
//! ```json
//! {"status": "success", "barcode": "20230101000000abc123", "barcode_type": "dynamic"}
//! {"status": "error", "message": "No barcode selected."}
//! ```

use serde::{Deserialize, Serialize};

use campus_barcodes::{BarcodeType, IssuedBarcode};

use crate::engine::AssignError;
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AssignmentResponse {
    Success {
        barcode: String,
        barcode_type: BarcodeType,
    },
    Error {
        message: String,
    },
}

impl AssignmentResponse {
    /// Map an engine outcome to the envelope.
    ///
    /// Store failures are not policy outcomes and are handed back unchanged
    /// for the transport layer to report as an operational error.
    pub fn from_outcome(outcome: Result<IssuedBarcode, AssignError>) -> Result<Self, StoreError> {
        match outcome {
            Ok(issued) => Ok(issued.into()),
            Err(AssignError::Store(e)) => Err(e),
            Err(business) => Ok(AssignmentResponse::Error {
                message: business.to_string(),
            }),
        }
    }
}

impl From<IssuedBarcode> for AssignmentResponse {
    fn from(value: IssuedBarcode) -> Self {
        AssignmentResponse::Success {
            barcode: value.barcode,
            barcode_type: value.barcode_type,
        }
    }
}
