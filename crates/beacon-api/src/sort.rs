use chrono::{DateTime, Utc};
use tracing::warn;

use beacon_types::api::SerializedMessage;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SortError {
    #[error("cannot sort messages by unknown field '{0}'")]
    UnknownField(String),

    #[error("message {index} has no value for '{field}'")]
    MissingField { field: String, index: usize },
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum SortKey<'a> {
    Int(i64),
    Text(&'a str),
    Time(DateTime<Utc>),
    Flag(bool),
}

const FIELDS: [&str; 8] = [
    "level",
    "level_tag",
    "message",
    "extra_tags",
    "tags",
    "pk",
    "created_at",
    "is_persistent",
];

fn key<'a>(message: &'a SerializedMessage, field: &str) -> Option<SortKey<'a>> {
    match field {
        "level" => Some(SortKey::Int(i64::from(message.level))),
        "level_tag" => Some(SortKey::Text(&message.level_tag)),
        "message" => Some(SortKey::Text(&message.message)),
        "extra_tags" => Some(SortKey::Text(&message.extra_tags)),
        "tags" => Some(SortKey::Text(&message.tags)),
        "pk" => message.pk.map(SortKey::Int),
        "created_at" => message.created_at.map(SortKey::Time),
        "is_persistent" => Some(SortKey::Flag(message.is_persistent)),
        _ => None,
    }
}

/// Stable sort by `sort_by`; a leading `-` reverses. Empty means `level`.
pub fn sort_messages(
    mut messages: Vec<SerializedMessage>,
    sort_by: &str,
) -> Result<Vec<SerializedMessage>, SortError> {
    sort_in_place(&mut messages, sort_by)?;
    Ok(messages)
}

/// Like [`sort_messages`], but outside debug mode a failure is logged and the
/// messages come back in their original order.
pub fn sort_or_original(
    mut messages: Vec<SerializedMessage>,
    sort_by: &str,
    debug: bool,
) -> Result<Vec<SerializedMessage>, SortError> {
    match sort_in_place(&mut messages, sort_by) {
        Ok(()) => Ok(messages),
        Err(e) if debug => Err(e),
        Err(e) => {
            warn!("Error sorting messages - returning unsorted: {}", e);
            Ok(messages)
        }
    }
}

/// Every key is checked before anything moves, so on error `messages` is
/// left untouched.
fn sort_in_place(messages: &mut [SerializedMessage], sort_by: &str) -> Result<(), SortError> {
    let sort_by = if sort_by.is_empty() { "level" } else { sort_by };
    let reverse = sort_by.starts_with('-');
    let field = sort_by.trim_start_matches('-');

    if !FIELDS.contains(&field) {
        return Err(SortError::UnknownField(field.to_string()));
    }
    if let Some(index) = messages.iter().position(|m| key(m, field).is_none()) {
        return Err(SortError::MissingField {
            field: field.to_string(),
            index,
        });
    }

    messages.sort_by(|a, b| {
        let ordering = key(a, field).cmp(&key(b, field));
        if reverse { ordering.reverse() } else { ordering }
    });
    Ok(())
}
