use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::error::MessageError;

/// An authenticated user as seen by the audience filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserIdentity {
    pub id: Uuid,
    pub username: String,
    pub is_staff: bool,
    pub group_ids: Vec<i64>,
    /// Free-form profile attributes, e.g. `tier = gold`.
    pub attributes: BTreeMap<String, String>,
}

impl UserIdentity {
    pub fn new(id: Uuid, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            is_staff: false,
            group_ids: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }
}

/// Whoever is making the current request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Viewer {
    #[default]
    Anonymous,
    User(UserIdentity),
}

impl Viewer {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Viewer::Anonymous)
    }

    pub fn user(&self) -> Option<&UserIdentity> {
        match self {
            Viewer::User(user) => Some(user),
            Viewer::Anonymous => None,
        }
    }

    pub fn is_staff(&self) -> bool {
        self.user().is_some_and(|u| u.is_staff)
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.user()
            .and_then(|u| u.attributes.get(key))
            .map(String::as_str)
    }
}

/// A named, host-supplied audience predicate.
pub trait CustomGroup: Send + Sync {
    fn contains(&self, viewer: &Viewer) -> bool;
}

impl<F> CustomGroup for F
where
    F: Fn(&Viewer) -> bool + Send + Sync,
{
    fn contains(&self, viewer: &Viewer) -> bool {
        self(viewer)
    }
}

/// Matches users whose profile attribute `key` equals `value`.
#[derive(Debug, Clone)]
pub struct AttributeMatch {
    pub key: String,
    pub value: String,
}

impl CustomGroup for AttributeMatch {
    fn contains(&self, viewer: &Viewer) -> bool {
        viewer.attribute(&self.key) == Some(self.value.as_str())
    }
}

/// Matches staff users.
#[derive(Debug, Clone, Copy)]
pub struct StaffOnly;

impl CustomGroup for StaffOnly {
    fn contains(&self, viewer: &Viewer) -> bool {
        viewer.is_staff()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid custom group definition '{0}': expected key=attr:value or key=@staff")]
pub struct CustomGroupConfigError(pub String);

/// Immutable set of custom groups, built once at startup.
#[derive(Clone, Default)]
pub struct CustomGroupRegistry {
    groups: BTreeMap<String, Arc<dyn CustomGroup>>,
}

impl CustomGroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<G>(mut self, key: impl Into<String>, group: G) -> Self
    where
        G: CustomGroup + 'static,
    {
        self.groups.insert(key.into(), Arc::new(group));
        self
    }

    /// Parse `key=attr:value` and `key=@staff` entries separated by `;`.
    pub fn from_config(spec: &str) -> Result<Self, CustomGroupConfigError> {
        let mut registry = Self::new();
        for entry in spec.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let invalid = || CustomGroupConfigError(entry.to_string());
            let (key, rule) = entry.split_once('=').ok_or_else(invalid)?;
            let key = key.trim();
            let rule = rule.trim();
            if key.is_empty() {
                return Err(invalid());
            }
            registry = if rule == "@staff" {
                registry.with(key, StaffOnly)
            } else {
                let (attr, value) = rule.split_once(':').ok_or_else(invalid)?;
                if attr.trim().is_empty() {
                    return Err(invalid());
                }
                registry.with(
                    key,
                    AttributeMatch {
                        key: attr.trim().to_string(),
                        value: value.trim().to_string(),
                    },
                )
            };
        }
        Ok(registry)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.groups.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// `None` when `key` is not registered.
    pub fn matches(&self, key: &str, viewer: &Viewer) -> Option<bool> {
        self.groups.get(key).map(|group| group.contains(viewer))
    }

    /// Save-time check for `target_custom_group`. Empty means unused.
    pub fn validate(&self, key: &str) -> Result<(), MessageError> {
        if key.is_empty() || self.contains_key(key) {
            Ok(())
        } else {
            Err(MessageError::UnknownCustomGroup(key.to_string()))
        }
    }
}

impl fmt::Debug for CustomGroupRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.groups.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with_tier(tier: &str) -> Viewer {
        let mut user = UserIdentity::new(Uuid::new_v4(), "someone");
        user.attributes.insert("tier".into(), tier.into());
        Viewer::User(user)
    }

    #[test]
    fn closure_groups() {
        let registry = CustomGroupRegistry::new()
            .with("vip", |v: &Viewer| v.attribute("tier") == Some("gold"));

        assert_eq!(registry.matches("vip", &user_with_tier("gold")), Some(true));
        assert_eq!(registry.matches("vip", &user_with_tier("silver")), Some(false));
        assert_eq!(registry.matches("vip", &Viewer::Anonymous), Some(false));
        assert_eq!(registry.matches("nope", &Viewer::Anonymous), None);
    }

    #[test]
    fn validate_rejects_unknown_keys() {
        let registry = CustomGroupRegistry::new().with("vip", StaffOnly);
        assert_eq!(registry.validate(""), Ok(()));
        assert_eq!(registry.validate("vip"), Ok(()));
        assert_eq!(
            registry.validate("beta"),
            Err(MessageError::UnknownCustomGroup("beta".into()))
        );
    }

    #[test]
    fn from_config_parses_entries() {
        let registry = CustomGroupRegistry::from_config(" vip=tier:gold ; ops=@staff;").unwrap();
        assert_eq!(registry.keys().collect::<Vec<_>>(), vec!["ops", "vip"]);
        assert_eq!(registry.matches("vip", &user_with_tier("gold")), Some(true));

        let mut staff = UserIdentity::new(Uuid::new_v4(), "admin");
        staff.is_staff = true;
        assert_eq!(registry.matches("ops", &Viewer::User(staff)), Some(true));
        assert_eq!(registry.matches("ops", &user_with_tier("gold")), Some(false));
    }

    #[test]
    fn from_config_rejects_malformed_entries() {
        assert!(CustomGroupRegistry::from_config("").unwrap().is_empty());
        assert!(CustomGroupRegistry::from_config("vip").is_err());
        assert!(CustomGroupRegistry::from_config("vip=gold").is_err());
        assert!(CustomGroupRegistry::from_config("=tier:gold").is_err());
    }
}
