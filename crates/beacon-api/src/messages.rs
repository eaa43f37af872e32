use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, warn};

use beacon_types::api::SerializedMessage;
use beacon_types::{MessageError, PersistentMessage, Viewer};

use crate::auth::AppState;
use crate::context;
use crate::middleware::Session;
use crate::render::BannerTemplate;
use crate::sort::sort_or_original;

#[derive(Debug, Default, Deserialize)]
pub struct SortQuery {
    /// Field name, `-` prefixed for descending. Defaults to `level`.
    #[serde(default)]
    pub sort: String,
}

/// `DELETE /alerts/dismiss/{message_id}`
pub async fn dismiss_message(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Extension(session): Extension<Session>,
    Path(message_id): Path<i64>,
) -> Result<StatusCode, StatusCode> {
    let db = state.clone();
    let found = tokio::task::spawn_blocking(move || -> anyhow::Result<bool> {
        let Some(message) = db.db.get_message(message_id)? else {
            return Ok(false);
        };
        db.db.dismiss(&message, &viewer, Utc::now())?;
        Ok(true)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|e| match e.downcast_ref::<MessageError>() {
        Some(MessageError::Undismissable(id)) => {
            warn!("Attempt to dismiss undismissable message {}", id);
            StatusCode::BAD_REQUEST
        }
        _ => {
            error!("DB dismiss error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    })?;

    if !found {
        return Err(StatusCode::NOT_FOUND);
    }
    // copies queued before the dismissal must not resurface
    state.flash.remove_tagged(&session, &format!("pm-{}", message_id));
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /messages`
pub async fn persistent_messages(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
) -> Result<impl IntoResponse, StatusCode> {
    let messages = load_for(&state, viewer).await?;
    Ok(Json(context::persistent_messages(&messages)))
}

/// `GET /messages/all`. Reading drains the session's flash queue.
pub async fn all_messages(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Extension(session): Extension<Session>,
    Query(query): Query<SortQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let messages = combined(&state, viewer, &session, &query.sort).await?;
    Ok(Json(messages))
}

/// `GET /messages/banner`
pub async fn banner(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Extension(session): Extension<Session>,
    Query(query): Query<SortQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let messages = combined(&state, viewer, &session, &query.sort).await?;
    Ok(BannerTemplate { messages })
}

async fn combined(
    state: &AppState,
    viewer: Viewer,
    session: &Session,
    sort: &str,
) -> Result<Vec<SerializedMessage>, StatusCode> {
    let persistent = load_for(state, viewer).await?;
    let flash = state.flash.take(session);
    sort_or_original(context::all_messages(&flash, &persistent), sort, state.debug).map_err(|e| {
        error!("Sorting messages failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

async fn load_for(state: &AppState, viewer: Viewer) -> Result<Vec<PersistentMessage>, StatusCode> {
    let db = state.clone();
    tokio::task::spawn_blocking(move || db.db.messages_for(&viewer, &db.custom_groups, Utc::now()))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("DB messages_for error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}
