use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Level, PersistentMessage, Target};

// -- JWT Claims --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Template context --

/// One entry of the `persistent_messages` context list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentMessageContext {
    pub pk: i64,
    pub level: u16,
    pub status: String,
    pub message: String,
    pub extra_tags: String,
    pub is_dismissable: bool,
    pub is_safe: bool,
}

/// One entry of the combined flash + persistent list.
/// Flash messages have an empty `pk` and `dismiss_url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedMessage {
    pub pk: Option<i64>,
    pub level: u16,
    pub level_tag: String,
    pub message: String,
    pub extra_tags: String,
    pub tags: String,
    pub is_safe: bool,
    pub is_dismissable: bool,
    pub is_persistent: bool,
    pub dismiss_url: String,
    pub created_at: Option<DateTime<Utc>>,
}

// -- Admin --

/// Body of `POST /admin/messages` and `PUT /admin/messages/{id}`.
/// Omitted fields take the message defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MessageRequest {
    pub content: String,
    #[serde(default)]
    pub mark_content_safe: bool,
    #[serde(default)]
    pub level: Level,
    #[serde(default)]
    pub target: Target,
    #[serde(default)]
    pub target_users: Vec<Uuid>,
    #[serde(default)]
    pub target_groups: Vec<i64>,
    #[serde(default)]
    pub target_custom_group: String,
    pub display_from: Option<DateTime<Utc>>,
    pub display_until: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub is_dismissable: bool,
    #[serde(default)]
    pub custom_tags: String,
}

fn default_true() -> bool {
    true
}

impl MessageRequest {
    pub fn into_message(self) -> PersistentMessage {
        let mut message = PersistentMessage::new(self.content);
        message.mark_content_safe = self.mark_content_safe;
        message.level = self.level;
        message.target = self.target;
        message.target_users = self.target_users;
        message.target_groups = self.target_groups;
        message.target_custom_group = self.target_custom_group;
        if let Some(from) = self.display_from {
            message.display_from = from;
        }
        message.display_until = self.display_until;
        message.is_dismissable = self.is_dismissable;
        message.custom_tags = self.custom_tags;
        message
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BulkIdsRequest {
    pub ids: Vec<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BulkUpdateResponse {
    pub updated: usize,
}

#[derive(Debug, Serialize)]
pub struct AdminMessageResponse {
    #[serde(flatten)]
    pub message: PersistentMessage,
    pub is_active: bool,
    pub tags: String,
    pub dismissal_count: u64,
}
