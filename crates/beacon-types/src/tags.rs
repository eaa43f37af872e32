//! Derived display tags for persistent messages.
//!
//! The tag string is what the rendering layer hangs styling and behaviour
//! hooks on, e.g. `persistent pm-12 dismissable unsafe warning`.

use crate::models::PersistentMessage;

pub const PERSISTENT: &str = "persistent";
pub const DISMISSABLE: &str = "dismissable";
pub const UNDISMISSABLE: &str = "undismissable";
pub const SAFE: &str = "safe";
pub const UNSAFE: &str = "unsafe";

/// Tokens the default tags own. Custom tags cannot add them a second time
/// or contradict them.
const RESERVED: [&str; 5] = [PERSISTENT, DISMISSABLE, UNDISMISSABLE, SAFE, UNSAFE];

/// Join whitespace separated token lists, dropping repeated tokens.
/// The first occurrence wins, so order is preserved.
pub fn merge_tags<'a, I>(sources: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen: Vec<&str> = Vec::new();
    for source in sources {
        for token in source.split_whitespace() {
            if !seen.contains(&token) {
                seen.push(token);
            }
        }
    }
    seen.join(" ")
}

/// `extra_tags` followed by the level tag, skipping whichever is empty.
pub fn combine_tags(extra_tags: &str, level_tag: &str) -> String {
    [extra_tags, level_tag]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

impl PersistentMessage {
    pub fn level_tag(&self) -> &'static str {
        self.level.tag()
    }

    /// Opaque per-message tag; only stored messages have one.
    pub fn id_tag(&self) -> Option<String> {
        self.id.map(|id| format!("pm-{}", id))
    }

    pub fn default_tags(&self) -> String {
        let id_tag = self.id_tag();
        let mut tags = vec![PERSISTENT];
        if let Some(id_tag) = id_tag.as_deref() {
            tags.push(id_tag);
        }
        tags.push(if self.is_dismissable { DISMISSABLE } else { UNDISMISSABLE });
        tags.push(if self.mark_content_safe { SAFE } else { UNSAFE });
        tags.join(" ")
    }

    pub fn extra_tags(&self) -> String {
        let defaults = self.default_tags();
        let custom = self
            .custom_tags
            .split_whitespace()
            .filter(|token| !RESERVED.contains(token))
            .collect::<Vec<_>>()
            .join(" ");
        merge_tags([defaults.as_str(), custom.as_str()])
    }

    pub fn tags(&self) -> String {
        combine_tags(&self.extra_tags(), self.level_tag())
    }
}
