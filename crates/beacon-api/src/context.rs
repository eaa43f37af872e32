//! Message lists handed to the view layer.

use beacon_types::PersistentMessage;
use beacon_types::api::{PersistentMessageContext, SerializedMessage};

use crate::flash::FlashMessage;

/// The `persistent_messages` context entry.
pub fn persistent_messages(messages: &[PersistentMessage]) -> Vec<PersistentMessageContext> {
    messages
        .iter()
        .filter_map(|pm| {
            Some(PersistentMessageContext {
                pk: pm.id?,
                level: pm.level.value(),
                status: pm.level_tag().to_string(),
                message: pm.message().to_string(),
                extra_tags: pm.extra_tags(),
                is_dismissable: pm.is_dismissable,
                is_safe: pm.mark_content_safe,
            })
        })
        .collect()
}

pub fn serialize_persistent(pm: &PersistentMessage) -> SerializedMessage {
    SerializedMessage {
        pk: pm.id,
        level: pm.level.value(),
        level_tag: pm.level_tag().to_string(),
        message: pm.message().to_string(),
        extra_tags: pm.extra_tags(),
        tags: pm.tags(),
        is_safe: pm.mark_content_safe,
        is_dismissable: pm.is_dismissable,
        is_persistent: true,
        dismiss_url: pm.dismiss_url(),
        created_at: pm.created_at,
    }
}

pub fn serialize_flash(message: &FlashMessage) -> SerializedMessage {
    SerializedMessage {
        pk: None,
        level: message.level.value(),
        level_tag: message.level.tag().to_string(),
        message: message.message.clone(),
        extra_tags: message.extra_tags.clone(),
        tags: message.tags(),
        is_safe: message.is_safe(),
        is_dismissable: message.is_dismissable(),
        is_persistent: false,
        dismiss_url: String::new(),
        created_at: None,
    }
}

/// The `all_messages` context entry: queued flash messages followed by the
/// persistent ones. A flash message echoing a persistent message's text is
/// dropped in favour of the persistent entry, which can be dismissed.
pub fn all_messages(flash: &[FlashMessage], persistent: &[PersistentMessage]) -> Vec<SerializedMessage> {
    flash
        .iter()
        .filter(|f| !persistent.iter().any(|pm| pm.message() == f.message))
        .map(serialize_flash)
        .chain(persistent.iter().map(serialize_persistent))
        .collect()
}
