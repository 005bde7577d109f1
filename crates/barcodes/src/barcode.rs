//! Catalog records: barcodes and their demographic profile.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use campus_core::{BarcodeId, DomainError, DomainResult, UserId};

/// Kind of credential a barcode represents.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarcodeType {
    /// Shareable pool credential; presented with a timestamp prefix.
    Dynamic,
    /// A person's own identification credential.
    Identification,
    Other,
}

impl BarcodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BarcodeType::Dynamic => "dynamic",
            BarcodeType::Identification => "identification",
            BarcodeType::Other => "other",
        }
    }
}

impl core::fmt::Display for BarcodeType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for BarcodeType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dynamic" => Ok(BarcodeType::Dynamic),
            "identification" => Ok(BarcodeType::Identification),
            "other" => Ok(BarcodeType::Other),
            _ => Err(DomainError::validation(format!("unknown barcode type '{s}'"))),
        }
    }
}

/// Demographic tag used for gender-filtered pooling.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    #[default]
    Unknown,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Unknown => "unknown",
        }
    }
}

impl core::str::FromStr for Gender {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            "unknown" => Ok(Gender::Unknown),
            _ => Err(DomainError::validation(format!("unknown gender '{s}'"))),
        }
    }
}

/// A barcode credential in the catalog.
///
/// # Invariants
/// - `code` is non-empty (global uniqueness is enforced by the catalog store).
/// - `shareable` is only ever `true` for `Dynamic` barcodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Barcode {
    pub id: BarcodeId,
    pub code: String,
    pub barcode_type: BarcodeType,
    pub owner: UserId,
    pub shareable: bool,
    pub created_at: DateTime<Utc>,
}

impl Barcode {
    /// Validate and build a new catalog record.
    pub fn new(
        owner: UserId,
        code: impl Into<String>,
        barcode_type: BarcodeType,
        shareable: bool,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let code = code.into();
        if code.trim().is_empty() {
            return Err(DomainError::validation("barcode code cannot be empty"));
        }

        Ok(Self {
            id: BarcodeId::new(),
            code,
            barcode_type,
            owner,
            shareable: shareable && barcode_type == BarcodeType::Dynamic,
            created_at,
        })
    }

    /// Override the generated id (fixtures, imports with external ids).
    pub fn with_id(mut self, id: BarcodeId) -> Self {
        self.id = id;
        self
    }

    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.owner == user
    }

    /// Whether this barcode may be handed to users other than its owner.
    pub fn is_shared_dynamic(&self) -> bool {
        self.barcode_type == BarcodeType::Dynamic && self.shareable
    }
}

/// Optional demographic add-on for a barcode (1:1).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarcodeProfile {
    pub barcode_id: BarcodeId,
    pub gender: Gender,
}
