//! Collaborator membership on a document.

use serde::{Deserialize, Serialize};

use super::document::DocumentId;

/// What a collaborator may do with a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    View,
    Edit,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::View => "view",
            Permission::Edit => "edit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "view" => Some(Permission::View),
            "edit" => Some(Permission::Edit),
            _ => None,
        }
    }

    pub fn can_edit(&self) -> bool {
        matches!(self, Permission::Edit)
    }
}

/// Membership row: a set keyed by (document, user), never a sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collaborator {
    pub document_id: DocumentId,
    pub user_id: String,
    pub permission: Permission,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_parse() {
        assert_eq!(Permission::parse("view"), Some(Permission::View));
        assert_eq!(Permission::parse("edit"), Some(Permission::Edit));
        assert_eq!(Permission::parse("owner"), None);
    }

    #[test]
    fn test_can_edit() {
        assert!(Permission::Edit.can_edit());
        assert!(!Permission::View.can_edit());
    }
}
