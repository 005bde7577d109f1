use serde::{Deserialize, Serialize};

use campus_core::UserId;

use crate::Group;

/// An authenticated user together with the groups they belong to.
///
/// Group membership is resolved upstream (session/identity layer); this
/// type only carries the facts the barcode engine needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub groups: Vec<Group>,
}

impl Principal {
    pub fn new(user_id: UserId, groups: Vec<Group>) -> Self {
        Self { user_id, groups }
    }

    /// Build a principal from the two tier flags supplied by a request handler.
    pub fn from_flags(user_id: UserId, is_school: bool, is_individual: bool) -> Self {
        let mut groups = Vec::new();
        if is_school {
            groups.push(Group::SCHOOL);
        }
        if is_individual {
            groups.push(Group::INDIVIDUAL);
        }
        Self { user_id, groups }
    }

    pub fn with_group(mut self, group: Group) -> Self {
        if !self.in_group(&group) {
            self.groups.push(group);
        }
        self
    }

    pub fn in_group(&self, group: &Group) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    pub fn is_school_tier(&self) -> bool {
        self.in_group(&Group::SCHOOL)
    }

    pub fn is_individual_tier(&self) -> bool {
        self.in_group(&Group::INDIVIDUAL)
    }

    pub fn is_admin(&self) -> bool {
        self.in_group(&Group::ADMIN)
    }
}
