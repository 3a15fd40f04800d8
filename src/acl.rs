//! Role-based access control for documents.
//!
//! Permissions are `(doc, user) → role` entries behind the [`PermissionStore`]
//! capability trait; the [`Checker`] answers whether a user may perform an
//! [`Action`]. A user with no recorded permission is denied everything.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

/// Errors raised by permission lookups and checks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AclError {
    #[error("access denied")]
    AccessDenied,
    #[error("no permission recorded for user {user_id} on document {doc_id}")]
    PermissionNotFound { doc_id: String, user_id: String },
}

/// A user's access level for a document. Roles are ordered: each level
/// includes everything below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    /// Read-only access.
    Viewer,
    /// Read and write access.
    Editor,
    /// Full access: read, write, share, delete.
    Owner,
}

impl Role {
    pub fn can_read(self) -> bool {
        self >= Role::Viewer
    }

    pub fn can_write(self) -> bool {
        self >= Role::Editor
    }

    pub fn can_share(self) -> bool {
        self >= Role::Owner
    }

    pub fn can_delete(self) -> bool {
        self >= Role::Owner
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Editor => "editor",
            Role::Owner => "owner",
        }
    }
}

/// An operation a user wants to perform on a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
    Share,
    Delete,
}

/// A recorded grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    pub doc_id: String,
    pub user_id: String,
    pub role: Role,
}

/// Capability trait for persisting grants. Implementations are injected into
/// the [`Checker`] and the server; tests substitute doubles freely.
pub trait PermissionStore: Send + Sync {
    /// Record `role` for the user on the document, replacing any prior grant.
    fn grant(&self, doc_id: &str, user_id: &str, role: Role) -> Result<(), AclError>;

    /// Remove the user's grant on the document.
    fn revoke(&self, doc_id: &str, user_id: &str) -> Result<(), AclError>;

    /// The user's role on the document.
    fn role_of(&self, doc_id: &str, user_id: &str) -> Result<Role, AclError>;

    /// Every grant recorded for the document.
    fn permissions_for(&self, doc_id: &str) -> Result<Vec<Permission>, AclError>;
}

/// In-memory [`PermissionStore`].
#[derive(Debug, Default)]
pub struct MemoryPermissionStore {
    grants: RwLock<HashMap<(String, String), Role>>,
}

impl MemoryPermissionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PermissionStore for MemoryPermissionStore {
    fn grant(&self, doc_id: &str, user_id: &str, role: Role) -> Result<(), AclError> {
        self.grants
            .write()
            .insert((doc_id.to_string(), user_id.to_string()), role);
        Ok(())
    }

    fn revoke(&self, doc_id: &str, user_id: &str) -> Result<(), AclError> {
        self.grants
            .write()
            .remove(&(doc_id.to_string(), user_id.to_string()))
            .map(|_| ())
            .ok_or_else(|| AclError::PermissionNotFound {
                doc_id: doc_id.to_string(),
                user_id: user_id.to_string(),
            })
    }

    fn role_of(&self, doc_id: &str, user_id: &str) -> Result<Role, AclError> {
        self.grants
            .read()
            .get(&(doc_id.to_string(), user_id.to_string()))
            .copied()
            .ok_or_else(|| AclError::PermissionNotFound {
                doc_id: doc_id.to_string(),
                user_id: user_id.to_string(),
            })
    }

    fn permissions_for(&self, doc_id: &str) -> Result<Vec<Permission>, AclError> {
        Ok(self
            .grants
            .read()
            .iter()
            .filter(|((doc, _), _)| doc == doc_id)
            .map(|((doc, user), role)| Permission {
                doc_id: doc.clone(),
                user_id: user.clone(),
                role: *role,
            })
            .collect())
    }
}

/// Answers permission questions against a [`PermissionStore`].
#[derive(Clone)]
pub struct Checker {
    store: Arc<dyn PermissionStore>,
}

impl Checker {
    pub fn new(store: Arc<dyn PermissionStore>) -> Self {
        Self { store }
    }

    /// Whether the user may perform `action`. A missing grant is an ordinary
    /// "no", not an error.
    pub fn can_perform(&self, doc_id: &str, user_id: &str, action: Action) -> Result<bool, AclError> {
        let role = match self.store.role_of(doc_id, user_id) {
            Ok(role) => role,
            Err(AclError::PermissionNotFound { .. }) => return Ok(false),
            Err(err) => return Err(err),
        };

        Ok(match action {
            Action::Read => role.can_read(),
            Action::Write => role.can_write(),
            Action::Share => role.can_share(),
            Action::Delete => role.can_delete(),
        })
    }

    /// Like [`Checker::can_perform`] but turns "no" into [`AclError::AccessDenied`].
    pub fn require(&self, doc_id: &str, user_id: &str, action: Action) -> Result<(), AclError> {
        if self.can_perform(doc_id, user_id, action)? {
            Ok(())
        } else {
            Err(AclError::AccessDenied)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker() -> (Arc<MemoryPermissionStore>, Checker) {
        let store = Arc::new(MemoryPermissionStore::new());
        let checker = Checker::new(store.clone());
        (store, checker)
    }

    #[test]
    fn test_role_ordering() {
        assert!(Role::Viewer.can_read());
        assert!(!Role::Viewer.can_write());
        assert!(Role::Editor.can_write());
        assert!(!Role::Editor.can_delete());
        assert!(Role::Owner.can_share());
        assert!(Role::Owner.can_delete());
    }

    #[test]
    fn test_grant_and_lookup() {
        let (store, _) = checker();
        store.grant("doc", "alice", Role::Editor).unwrap();
        assert_eq!(store.role_of("doc", "alice").unwrap(), Role::Editor);

        // Re-granting replaces the role.
        store.grant("doc", "alice", Role::Owner).unwrap();
        assert_eq!(store.role_of("doc", "alice").unwrap(), Role::Owner);
    }

    #[test]
    fn test_revoke() {
        let (store, _) = checker();
        store.grant("doc", "alice", Role::Viewer).unwrap();
        store.revoke("doc", "alice").unwrap();
        assert!(matches!(
            store.role_of("doc", "alice"),
            Err(AclError::PermissionNotFound { .. })
        ));
        assert!(store.revoke("doc", "alice").is_err());
    }

    #[test]
    fn test_permissions_for_document() {
        let (store, _) = checker();
        store.grant("doc", "alice", Role::Owner).unwrap();
        store.grant("doc", "bob", Role::Viewer).unwrap();
        store.grant("other", "carol", Role::Editor).unwrap();

        let perms = store.permissions_for("doc").unwrap();
        assert_eq!(perms.len(), 2);
        assert!(perms.iter().all(|p| p.doc_id == "doc"));
    }

    #[test]
    fn test_checker_unknown_user_is_denied() {
        let (_, checker) = checker();
        assert!(!checker.can_perform("doc", "ghost", Action::Read).unwrap());
        assert_eq!(
            checker.require("doc", "ghost", Action::Read).unwrap_err(),
            AclError::AccessDenied
        );
    }

    #[test]
    fn test_checker_respects_role_levels() {
        let (store, checker) = checker();
        store.grant("doc", "viewer", Role::Viewer).unwrap();
        store.grant("doc", "editor", Role::Editor).unwrap();

        assert!(checker.can_perform("doc", "viewer", Action::Read).unwrap());
        assert!(!checker.can_perform("doc", "viewer", Action::Write).unwrap());
        assert!(checker.can_perform("doc", "editor", Action::Write).unwrap());
        assert!(!checker.can_perform("doc", "editor", Action::Delete).unwrap());

        checker.require("doc", "editor", Action::Write).unwrap();
        assert_eq!(
            checker.require("doc", "viewer", Action::Write).unwrap_err(),
            AclError::AccessDenied
        );
    }
}
