//! Transient, session-scoped flash messages and the hook that feeds
//! persistent messages into them.

use std::collections::HashMap;
use std::sync::Mutex;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use tracing::{debug, error};

use beacon_types::tags::combine_tags;
use beacon_types::{Level, PersistentMessage, Viewer};

use crate::auth::AppState;
use crate::middleware::{NewSession, Session};

/// A one-shot message, shown once and then discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashMessage {
    pub level: Level,
    pub message: String,
    pub extra_tags: String,
}

impl FlashMessage {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            extra_tags: String::new(),
        }
    }

    pub fn tags(&self) -> String {
        combine_tags(&self.extra_tags, self.level.tag())
    }

    fn has_tag(&self, tag: &str) -> bool {
        self.extra_tags.split_whitespace().any(|t| t == tag)
    }

    pub fn is_safe(&self) -> bool {
        self.has_tag(beacon_types::tags::SAFE)
    }

    pub fn is_dismissable(&self) -> bool {
        self.has_tag(beacon_types::tags::DISMISSABLE)
    }
}

impl From<&PersistentMessage> for FlashMessage {
    fn from(pm: &PersistentMessage) -> Self {
        Self {
            level: pm.level,
            message: pm.message().to_string(),
            extra_tags: pm.extra_tags(),
        }
    }
}

/// Per-session flash queues, held in memory.
#[derive(Debug, Default)]
pub struct FlashStore {
    queues: Mutex<HashMap<String, Vec<FlashMessage>>>,
}

impl FlashStore {
    pub fn add(&self, session: &Session, message: FlashMessage) {
        self.with_queues(|queues| queues.entry(session.0.clone()).or_default().push(message));
    }

    /// Queue `message` unless one with the same text is already waiting.
    /// Returns whether it was queued.
    pub fn add_unique(&self, session: &Session, message: FlashMessage) -> bool {
        self.with_queues(|queues| {
            let queue = queues.entry(session.0.clone()).or_default();
            if queue.iter().any(|m| m.message == message.message) {
                return false;
            }
            queue.push(message);
            true
        })
    }

    /// Drop queued messages carrying `tag`. Returns how many were removed.
    pub fn remove_tagged(&self, session: &Session, tag: &str) -> usize {
        self.with_queues(|queues| {
            let Some(queue) = queues.get_mut(&session.0) else {
                return 0;
            };
            let before = queue.len();
            queue.retain(|m| !m.has_tag(tag));
            let removed = before - queue.len();
            if queue.is_empty() {
                queues.remove(&session.0);
            }
            removed
        })
    }

    /// The queued messages, leaving them in place.
    pub fn peek(&self, session: &Session) -> Vec<FlashMessage> {
        self.with_queues(|queues| queues.get(&session.0).cloned().unwrap_or_default())
    }

    /// Number of sessions holding a queue.
    pub fn session_count(&self) -> usize {
        self.with_queues(|queues| queues.len())
    }

    /// Drain the queue: once read, flash messages are gone.
    pub fn take(&self, session: &Session) -> Vec<FlashMessage> {
        self.with_queues(|queues| queues.remove(&session.0).unwrap_or_default())
    }

    fn with_queues<T>(&self, f: impl FnOnce(&mut HashMap<String, Vec<FlashMessage>>) -> T) -> T {
        // a poisoned queue map only ever holds complete pushes
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut queues)
    }
}

/// After a successful response, queue every persistent message that applies
/// to the viewer as a flash message for the session. Sessions minted on this
/// request are skipped until the client sends the cookie back.
pub async fn queue_persistent_messages(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let viewer = req.extensions().get::<Viewer>().cloned().unwrap_or_default();
    let session = req
        .extensions()
        .get::<Session>()
        .filter(|_| req.extensions().get::<NewSession>().is_none())
        .cloned();

    let response = next.run(req).await;
    if !response.status().is_success() {
        return response;
    }
    let Some(session) = session else {
        return response;
    };

    let db = state.clone();
    let result = tokio::task::spawn_blocking(move || {
        db.db.messages_for(&viewer, &db.custom_groups, Utc::now())
    })
    .await;

    match result {
        Ok(Ok(messages)) => {
            let mut queued = 0;
            for pm in &messages {
                if state.flash.add_unique(&session, FlashMessage::from(pm)) {
                    queued += 1;
                }
            }
            if queued > 0 {
                debug!("Queued {} persistent message(s) as flash", queued);
            }
        }
        Ok(Err(e)) => error!("DB messages_for error: {}", e),
        Err(e) => error!("spawn_blocking join error: {}", e),
    }
    response
}
