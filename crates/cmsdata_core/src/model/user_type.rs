//! User type domain model.
//!
//! A user type names a back-office role and carries its default permission
//! codes (single letters such as `"A"`, `"D"`, `"F"` in the stock set).
//!
//! # Invariants
//! - `alias` is a stable identifier: a letter followed by letters, digits or `_`.
//! - Permission codes keep caller order and are unique within one user type.

use crate::model::entity::{
    assign_once, ChangeTracker, Entity, EntityId, IdentityError, ValidationError,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

static ALIAS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("valid alias regex"));

/// Tracked property names, as used by queries and dirty reporting.
pub const PROPERTY_ID: &str = "id";
pub const PROPERTY_NAME: &str = "name";
pub const PROPERTY_ALIAS: &str = "alias";
pub const PROPERTY_PERMISSIONS: &str = "permissions";
/// Query-only property: matches user types holding the given permission code.
pub const PROPERTY_PERMISSION: &str = "permission";

#[derive(Debug, Clone, PartialEq, Eq)]
struct UserTypeState {
    name: String,
    alias: String,
    permissions: Vec<String>,
}

/// Role description persisted in `user_types`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "UserTypeRecord", into = "UserTypeRecord")]
pub struct UserType {
    id: Option<EntityId>,
    state: ChangeTracker<UserTypeState>,
}

/// Wire shape of a user type.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserTypeRecord {
    id: Option<EntityId>,
    name: String,
    alias: String,
    permissions: Vec<String>,
}

impl TryFrom<UserTypeRecord> for UserType {
    type Error = IdentityError;

    fn try_from(value: UserTypeRecord) -> Result<Self, Self::Error> {
        let mut user_type = Self::new(value.name, value.alias, value.permissions);
        if let Some(id) = value.id {
            assign_once(&mut user_type.id, id)?;
        }
        Ok(user_type)
    }
}

impl From<UserType> for UserTypeRecord {
    fn from(value: UserType) -> Self {
        let UserTypeState {
            name,
            alias,
            permissions,
        } = value.state.current().clone();
        Self {
            id: value.id,
            name,
            alias,
            permissions,
        }
    }
}

impl UserType {
    /// Creates a new, identity-less and clean user type.
    pub fn new<P, S>(name: impl Into<String>, alias: impl Into<String>, permissions: P) -> Self
    where
        P: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: None,
            state: ChangeTracker::new(UserTypeState {
                name: name.into(),
                alias: alias.into(),
                permissions: permissions.into_iter().map(Into::into).collect(),
            }),
        }
    }

    /// Rebuilds a persisted user type from storage values. Always clean.
    pub(crate) fn hydrate(
        id: EntityId,
        name: String,
        alias: String,
        permissions: Vec<String>,
    ) -> Self {
        let mut user_type = Self::new(name, alias, permissions);
        user_type.id = Some(id);
        user_type
    }

    pub fn name(&self) -> &str {
        &self.state.current().name
    }

    pub fn alias(&self) -> &str {
        &self.state.current().alias
    }

    pub fn permissions(&self) -> &[String] {
        &self.state.current().permissions
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.state.current_mut().name = name.into();
    }

    pub fn set_alias(&mut self, alias: impl Into<String>) {
        self.state.current_mut().alias = alias.into();
    }

    pub fn set_permissions<P, S>(&mut self, permissions: P)
    where
        P: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.current_mut().permissions = permissions.into_iter().map(Into::into).collect();
    }

    /// True when identity and every tracked field match `other`.
    pub fn same_values(&self, other: &Self) -> bool {
        self.id == other.id && self.state.current() == other.state.current()
    }
}

impl PartialEq for UserType {
    fn eq(&self, other: &Self) -> bool {
        self.same_values(other)
    }
}

impl Eq for UserType {}

impl Entity for UserType {
    const ENTITY_TYPE: &'static str = "user_type";

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn assign_identity(&mut self, id: EntityId) -> Result<(), IdentityError> {
        assign_once(&mut self.id, id)
    }

    fn dirty_properties(&self) -> Vec<&'static str> {
        let current = self.state.current();
        let snapshot = self.state.snapshot();
        let mut dirty = Vec::new();
        if current.name != snapshot.name {
            dirty.push(PROPERTY_NAME);
        }
        if current.alias != snapshot.alias {
            dirty.push(PROPERTY_ALIAS);
        }
        if current.permissions != snapshot.permissions {
            dirty.push(PROPERTY_PERMISSIONS);
        }
        dirty
    }

    fn mark_clean(&mut self) {
        self.state.mark_clean();
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let current = self.state.current();
        if current.name.trim().is_empty() {
            return Err(ValidationError::Blank {
                property: PROPERTY_NAME,
            });
        }
        if current.alias.is_empty() {
            return Err(ValidationError::Blank {
                property: PROPERTY_ALIAS,
            });
        }
        if !ALIAS_RE.is_match(&current.alias) {
            return Err(ValidationError::InvalidFormat {
                property: PROPERTY_ALIAS,
                value: current.alias.clone(),
            });
        }

        let mut seen = BTreeSet::new();
        for code in &current.permissions {
            if code.trim().is_empty() {
                return Err(ValidationError::Blank {
                    property: PROPERTY_PERMISSIONS,
                });
            }
            if !seen.insert(code.as_str()) {
                return Err(ValidationError::Duplicate {
                    property: PROPERTY_PERMISSIONS,
                    value: code.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{UserType, PROPERTY_ALIAS, PROPERTY_NAME, PROPERTY_PERMISSIONS};
    use crate::model::entity::{Entity, ValidationError};

    fn editor() -> UserType {
        UserType::new("Editor", "editor", ["A", "D", "F"])
    }

    #[test]
    fn new_user_type_is_clean_and_identity_less() {
        let user_type = editor();
        assert!(!user_type.has_identity());
        assert!(!user_type.is_dirty());
    }

    #[test]
    fn setters_mark_only_changed_properties_dirty() {
        let mut user_type = editor();
        user_type.set_name("Senior Editor");
        user_type.set_permissions(["Z", "Y", "X"]);

        assert_eq!(
            user_type.dirty_properties(),
            vec![PROPERTY_NAME, PROPERTY_PERMISSIONS]
        );
    }

    #[test]
    fn restoring_original_value_clears_dirty_state() {
        let mut user_type = editor();
        user_type.set_alias("writer");
        assert_eq!(user_type.dirty_properties(), vec![PROPERTY_ALIAS]);

        user_type.set_alias("editor");
        assert!(!user_type.is_dirty());
    }

    #[test]
    fn mark_clean_accepts_current_state() {
        let mut user_type = editor();
        user_type.set_name("Writer");
        user_type.mark_clean();
        assert!(!user_type.is_dirty());
        assert_eq!(user_type.name(), "Writer");
    }

    #[test]
    fn validate_rejects_bad_alias_and_duplicate_codes() {
        let bad_alias = UserType::new("Editor", "1editor", ["A"]);
        assert_eq!(
            bad_alias.validate().unwrap_err(),
            ValidationError::InvalidFormat {
                property: PROPERTY_ALIAS,
                value: "1editor".to_string(),
            }
        );

        let duplicate = UserType::new("Editor", "editor", ["A", "A"]);
        assert!(matches!(
            duplicate.validate().unwrap_err(),
            ValidationError::Duplicate { .. }
        ));

        let blank_name = UserType::new("  ", "editor", Vec::<String>::new());
        assert_eq!(
            blank_name.validate().unwrap_err(),
            ValidationError::Blank {
                property: PROPERTY_NAME
            }
        );
    }

    #[test]
    fn hydrated_user_type_has_identity_and_is_clean() {
        let user_type = UserType::hydrate(
            4,
            "Writer".to_string(),
            "writer".to_string(),
            vec!["A".to_string()],
        );
        assert_eq!(user_type.id(), Some(4));
        assert!(!user_type.is_dirty());
    }

    #[test]
    fn deserialized_identity_must_be_positive() {
        let restored: UserType = serde_json::from_value(serde_json::json!({
            "id": 12,
            "name": "Writer",
            "alias": "writer",
            "permissions": ["A"],
        }))
        .unwrap();
        assert_eq!(restored.id(), Some(12));
        assert!(!restored.is_dirty());

        for id in [0, -3] {
            let result = serde_json::from_value::<UserType>(serde_json::json!({
                "id": id,
                "name": "Ghost",
                "alias": "ghost",
                "permissions": [],
            }));
            assert!(result.is_err(), "id {id} must be rejected");
        }
    }
}
