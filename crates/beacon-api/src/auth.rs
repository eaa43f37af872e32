use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{error, info};
use uuid::Uuid;

use beacon_db::Database;
use beacon_types::CustomGroupRegistry;
use beacon_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

use crate::flash::FlashStore;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub custom_groups: CustomGroupRegistry,
    pub flash: FlashStore,
    /// Surface presentation errors instead of degrading quietly.
    pub debug: bool,
}

impl AppStateInner {
    pub fn new(db: Database, jwt_secret: impl Into<String>, custom_groups: CustomGroupRegistry) -> Self {
        Self {
            db,
            jwt_secret: jwt_secret.into(),
            custom_groups,
            flash: FlashStore::default(),
            debug: false,
        }
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    // Validate input
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(StatusCode::BAD_REQUEST);
    }
    if req.password.len() < 8 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let password_hash = hash_password(&req.password).map_err(|e| {
        error!("Password hashing failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let user_id = Uuid::new_v4();

    let db = state.clone();
    let username = req.username.clone();
    let created = tokio::task::spawn_blocking(move || -> anyhow::Result<bool> {
        if db.db.get_user_by_username(&username)?.is_some() {
            return Ok(false);
        }
        db.db.create_user(&user_id.to_string(), &username, &password_hash)?;
        Ok(true)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|e| {
        error!("DB create_user error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    if !created {
        return Err(StatusCode::CONFLICT);
    }

    let token = create_token(&state.jwt_secret, user_id, &req.username)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.clone();
    let username = req.username.clone();
    let user = tokio::task::spawn_blocking(move || db.db.get_user_by_username(&username))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    verify_password(&req.password, &user.password)?;

    let user_id: Uuid = user.id.parse().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let token = create_token(&state.jwt_secret, user_id, &user.username)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(LoginResponse {
        user_id,
        username: user.username,
        token,
    }))
}

/// Hash with Argon2id and a fresh salt.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("argon2: {}", e))?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, stored: &str) -> Result<(), StatusCode> {
    let parsed_hash = PasswordHash::new(stored).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| StatusCode::UNAUTHORIZED)
}

pub fn create_token(secret: &str, user_id: Uuid, username: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// Create the operator account on first start. Existing accounts are only
/// promoted to staff, their password is left alone.
pub fn ensure_staff_user(db: &Database, username: &str, password: &str) -> anyhow::Result<Uuid> {
    if let Some(existing) = db.get_user_by_username(username)? {
        let id: Uuid = existing.id.parse()?;
        if !existing.is_staff {
            db.set_staff(id, true)?;
            info!("Promoted existing user '{}' to staff", username);
        }
        return Ok(id);
    }

    let id = Uuid::new_v4();
    db.create_user(&id.to_string(), username, &hash_password(password)?)?;
    db.set_staff(id, true)?;
    info!("Created staff user '{}'", username);
    Ok(id)
}
