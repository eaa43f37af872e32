use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::{error, warn};
use uuid::Uuid;

use beacon_types::Viewer;
use beacon_types::api::Claims;

use crate::auth::AppState;

pub const SESSION_COOKIE: &str = "beacon_session";

/// Opaque per-browser session key. Keys the flash queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session(pub String);

/// Marks a [`Session`] minted for this request. The client has not yet shown
/// it can hold the cookie, so nothing is stored under its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewSession;

/// Attach a [`Session`], issuing a cookie on first contact.
pub async fn session(jar: CookieJar, mut req: Request, next: Next) -> Response {
    let existing = jar
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty());
    let is_new = existing.is_none();
    let key = existing.unwrap_or_else(|| Uuid::new_v4().to_string());

    req.extensions_mut().insert(Session(key.clone()));
    if is_new {
        req.extensions_mut().insert(NewSession);
    }
    let response = next.run(req).await;

    if is_new {
        let cookie = Cookie::build((SESSION_COOKIE, key))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax);
        (jar.add(cookie), response).into_response()
    } else {
        response
    }
}

/// Resolve the bearer token into a [`Viewer`]. No token means anonymous;
/// a bad token, or one for a deleted user, is rejected.
pub async fn resolve_viewer(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = match req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        None => None,
        Some(value) => Some(
            value
                .strip_prefix("Bearer ")
                .ok_or(StatusCode::UNAUTHORIZED)?
                .to_string(),
        ),
    };

    let viewer = match token {
        None => Viewer::Anonymous,
        Some(token) => {
            let claims = decode_claims(&token, &state.jwt_secret)?;
            let db = state.clone();
            let identity = tokio::task::spawn_blocking(move || db.db.load_identity(claims.sub))
                .await
                .map_err(|e| {
                    error!("spawn_blocking join error: {}", e);
                    StatusCode::INTERNAL_SERVER_ERROR
                })?
                .map_err(|e| {
                    error!("DB load_identity error: {}", e);
                    StatusCode::INTERNAL_SERVER_ERROR
                })?;
            match identity {
                Some(identity) => Viewer::User(identity),
                None => {
                    warn!("Token for unknown user {}", claims.sub);
                    return Err(StatusCode::UNAUTHORIZED);
                }
            }
        }
    };

    req.extensions_mut().insert(viewer);
    Ok(next.run(req).await)
}

pub fn decode_claims(token: &str, secret: &str) -> Result<Claims, StatusCode> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| StatusCode::UNAUTHORIZED)?;

    Ok(token_data.claims)
}

/// Anonymous viewers cannot reach the wrapped routes.
pub async fn require_user(req: Request, next: Next) -> Result<Response, StatusCode> {
    match req.extensions().get::<Viewer>() {
        Some(Viewer::User(_)) => Ok(next.run(req).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

/// Operator-only routes.
pub async fn require_staff(req: Request, next: Next) -> Result<Response, StatusCode> {
    match req.extensions().get::<Viewer>() {
        Some(viewer) if viewer.is_staff() => Ok(next.run(req).await),
        Some(Viewer::User(_)) => Err(StatusCode::FORBIDDEN),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}
