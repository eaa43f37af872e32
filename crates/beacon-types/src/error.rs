/// Domain errors raised by persistent message operations.
///
/// Storage layers wrap these in `anyhow::Error`; HTTP handlers downcast to
/// pick a status code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    /// The message has `is_dismissable = false`.
    #[error("persistent message {0} cannot be dismissed")]
    Undismissable(i64),

    /// `target_custom_group` names a key missing from the registry.
    #[error("custom group '{0}' is not registered")]
    UnknownCustomGroup(String),

    #[error("message content must not be empty")]
    EmptyContent,

    #[error("target user {0} does not exist")]
    UnknownTargetUser(uuid::Uuid),

    #[error("target group {0} does not exist")]
    UnknownTargetGroup(i64),
}
