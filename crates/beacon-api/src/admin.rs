//! Operator endpoints for managing persistent messages.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, warn};

use beacon_db::{Database, MessageFilter};
use beacon_types::api::{AdminMessageResponse, BulkIdsRequest, BulkUpdateResponse, MessageRequest};
use beacon_types::{MessageError, PersistentMessage};

use crate::auth::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct AdminListQuery {
    /// Case-insensitive content search.
    pub q: Option<String>,
    pub active: Option<bool>,
}

/// `GET /admin/messages`
pub async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<AdminListQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let filter = MessageFilter {
        query: query.q.filter(|q| !q.trim().is_empty()),
        active: query.active,
    };
    let rows = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<AdminMessageResponse>> {
        let now = Utc::now();
        db.db
            .list_messages(&filter, now)?
            .into_iter()
            .map(|pm| admin_view(&db.db, pm))
            .collect()
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|e| {
        error!("DB list_messages error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(rows))
}

/// `POST /admin/messages`
pub async fn create_message(
    State(state): State<AppState>,
    Json(req): Json<MessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let created = tokio::task::spawn_blocking(move || -> anyhow::Result<AdminMessageResponse> {
        let mut pm = req.into_message();
        db.db.create_message(&mut pm, &db.custom_groups, Utc::now())?;
        admin_view(&db.db, pm)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(write_error)?;

    Ok((StatusCode::CREATED, Json(created)))
}

/// `PUT /admin/messages/{id}`: replaces every field.
pub async fn update_message(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<MessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let updated = tokio::task::spawn_blocking(move || -> anyhow::Result<Option<AdminMessageResponse>> {
        let mut pm = req.into_message();
        pm.id = Some(id);
        if !db.db.update_message(&mut pm, &db.custom_groups, Utc::now())? {
            return Ok(None);
        }
        match db.db.get_message(id)? {
            Some(stored) => admin_view(&db.db, stored).map(Some),
            None => Ok(None),
        }
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(write_error)?
    .ok_or(StatusCode::NOT_FOUND)?;

    info!("Updated persistent message {}", id);
    Ok(Json(updated))
}

/// `POST /admin/messages/deactivate`
pub async fn deactivate_messages(
    State(state): State<AppState>,
    Json(req): Json<BulkIdsRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    bulk(state, req.ids, Database::deactivate_messages, "deactivated").await
}

/// `POST /admin/messages/activate`
pub async fn activate_messages(
    State(state): State<AppState>,
    Json(req): Json<BulkIdsRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    bulk(state, req.ids, Database::reactivate_messages, "activated").await
}

async fn bulk(
    state: AppState,
    ids: Vec<i64>,
    op: fn(&Database, &[i64], chrono::DateTime<Utc>) -> anyhow::Result<usize>,
    verb: &'static str,
) -> Result<Json<BulkUpdateResponse>, StatusCode> {
    let updated = tokio::task::spawn_blocking(move || op(&state.db, &ids, Utc::now()))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("DB bulk update error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    info!("{} message(s) {}", updated, verb);
    Ok(Json(BulkUpdateResponse { updated }))
}

fn admin_view(db: &Database, message: PersistentMessage) -> anyhow::Result<AdminMessageResponse> {
    let dismissal_count = match message.id {
        Some(id) => db.dismissal_count(id)?,
        None => 0,
    };
    Ok(AdminMessageResponse {
        is_active: message.is_active(),
        tags: message.tags(),
        dismissal_count,
        message,
    })
}

fn write_error(e: anyhow::Error) -> StatusCode {
    match e.downcast_ref::<MessageError>() {
        Some(
            err @ (MessageError::EmptyContent
            | MessageError::UnknownCustomGroup(_)
            | MessageError::UnknownTargetUser(_)
            | MessageError::UnknownTargetGroup(_)),
        ) => {
            warn!("Rejected persistent message: {}", err);
            StatusCode::UNPROCESSABLE_ENTITY
        }
        _ => {
            error!("DB write error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
