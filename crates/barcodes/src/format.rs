//! Presented form of a barcode.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::{Barcode, BarcodeType};

/// Width of the `YYYYMMDDHHMMSS` prefix.
pub const TIMESTAMP_WIDTH: usize = 14;

/// Render `now` as `YYYYMMDDHHMMSS` in the given offset.
pub fn format_timestamp(now: DateTime<Utc>, offset: FixedOffset) -> String {
    now.with_timezone(&offset).format("%Y%m%d%H%M%S").to_string()
}

/// A barcode as handed to the scanner, with its type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedBarcode {
    pub barcode: String,
    pub barcode_type: BarcodeType,
}

impl IssuedBarcode {
    /// Dynamic barcodes get the timestamp prefix; everything else is verbatim.
    pub fn render(barcode: &Barcode, now: DateTime<Utc>, offset: FixedOffset) -> Self {
        let presented = match barcode.barcode_type {
            BarcodeType::Dynamic => format!("{}{}", format_timestamp(now, offset), barcode.code),
            BarcodeType::Identification | BarcodeType::Other => barcode.code.clone(),
        };

        Self {
            barcode: presented,
            barcode_type: barcode.barcode_type,
        }
    }
}
