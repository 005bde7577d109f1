use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Group a user belongs to.
///
/// Groups are opaque strings managed by the identity layer; only a few of
/// them carry meaning for barcode assignment (see the associated constants).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Group(Cow<'static, str>);

impl Group {
    /// Members draw barcodes from the shared school pool.
    pub const SCHOOL: Group = Group(Cow::Borrowed("School"));
    /// Members always receive their own identification barcode.
    pub const INDIVIDUAL: Group = Group(Cow::Borrowed("Individual"));
    /// Members may manage any barcode in the catalog.
    pub const ADMIN: Group = Group(Cow::Borrowed("Admin"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Group {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
