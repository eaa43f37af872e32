use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity of a message. Ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    #[default]
    Info,
    Success,
    Warning,
    Error,
    Emergency,
}

impl Level {
    pub const ALL: [Level; 6] = [
        Level::Debug,
        Level::Info,
        Level::Success,
        Level::Warning,
        Level::Error,
        Level::Emergency,
    ];

    /// Numeric value, compatible with the usual flash-message level constants.
    pub fn value(self) -> u16 {
        match self {
            Level::Debug => 10,
            Level::Info => 20,
            Level::Success => 25,
            Level::Warning => 30,
            Level::Error => 40,
            Level::Emergency => 999,
        }
    }

    pub fn from_value(value: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|level| level.value() == value)
    }

    pub fn tag(self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Success => "success",
            Level::Warning => "warning",
            Level::Error => "error",
            Level::Emergency => "emergency",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|level| level.tag() == tag)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Which audience-matching rule applies to a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Target {
    /// All users, even logged out.
    AllUsers,
    /// All logged-in users.
    #[default]
    AuthenticatedUsers,
    /// Logged-out visitors only.
    AnonymousUsers,
    /// Specific users or groups, including a registered custom group.
    UsersOrGroups,
}

impl Target {
    pub fn as_str(self) -> &'static str {
        match self {
            Target::AllUsers => "ALL_USERS",
            Target::AuthenticatedUsers => "AUTHENTICATED_USERS",
            Target::AnonymousUsers => "ANONYMOUS_USERS",
            Target::UsersOrGroups => "USERS_OR_GROUPS",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ALL_USERS" => Some(Target::AllUsers),
            "AUTHENTICATED_USERS" => Some(Target::AuthenticatedUsers),
            "ANONYMOUS_USERS" => Some(Target::AnonymousUsers),
            "USERS_OR_GROUPS" => Some(Target::UsersOrGroups),
            _ => None,
        }
    }
}

/// A message shown repeatedly to its audience until dismissed.
///
/// `id`, `created_at` and `updated_at` are `None` until the message has been
/// stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentMessage {
    pub id: Option<i64>,
    pub content: String,
    /// Content may contain markup and is rendered without escaping.
    pub mark_content_safe: bool,
    pub level: Level,
    pub target: Target,
    pub target_users: Vec<Uuid>,
    pub target_groups: Vec<i64>,
    /// Registered custom group key, empty when unused.
    pub target_custom_group: String,
    pub display_from: DateTime<Utc>,
    pub display_until: Option<DateTime<Utc>>,
    pub is_dismissable: bool,
    /// Space separated tokens appended to the default tags.
    pub custom_tags: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PersistentMessage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: None,
            content: content.into(),
            mark_content_safe: false,
            level: Level::default(),
            target: Target::default(),
            target_users: Vec::new(),
            target_groups: Vec::new(),
            target_custom_group: String::new(),
            display_from: Utc::now(),
            display_until: None,
            is_dismissable: true,
            custom_tags: String::new(),
            created_at: None,
            updated_at: None,
        }
    }

    /// True while `now` falls in `[display_from, display_until)`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.display_from <= now && self.display_until.is_none_or(|until| until > now)
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }

    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        self.display_until = Some(now);
    }

    pub fn reactivate(&mut self) {
        self.display_until = None;
    }

    pub fn has_custom_group(&self) -> bool {
        !self.target_custom_group.is_empty()
    }

    /// Message text, verbatim. Escaping is the renderer's job unless
    /// `mark_content_safe` is set.
    pub fn message(&self) -> &str {
        &self.content
    }

    pub fn dismiss_url(&self) -> String {
        match self.id {
            Some(id) => format!("/alerts/dismiss/{}", id),
            None => String::new(),
        }
    }
}
