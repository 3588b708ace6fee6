use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use rand_core::OsRng;
use tracing::{error, info};
use uuid::Uuid;

use ballot_db::Database;
use ballot_gateway::dispatcher::Dispatcher;
use ballot_types::api::{AuthResponse, Claims, LoginRequest, MeResponse, RegisterRequest};

use crate::error::{ApiError, ApiResult};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    /// Base address share links are built on
    pub public_url: String,
    pub dispatcher: Dispatcher,
}

impl AppStateInner {
    /// Run a blocking storage call off the async runtime.
    pub async fn with_db<F, T>(&self, f: F) -> ApiResult<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ApiError::Internal(anyhow::anyhow!("storage task failed: {}", e))
            })?
            .map_err(ApiError::Internal)
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    // Validate input
    let username_len = req.username.chars().count();
    if !(3..=32).contains(&username_len) {
        return Err(ApiError::Validation("username must be 3 to 32 characters".into()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::Validation("password must be at least 8 characters".into()));
    }

    let username = req.username.clone();
    if state
        .with_db(move |db| db.get_user_by_username(&username))
        .await?
        .is_some()
    {
        return Err(ApiError::UsernameTaken);
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("password hashing failed: {}", e)))?
        .to_string();

    let user_id = Uuid::new_v4();

    let username = req.username.clone();
    // A concurrent registration can take the name after the lookup above.
    let created = state
        .with_db(move |db| db.create_user(&user_id.to_string(), &username, &password_hash))
        .await?;
    if !created {
        return Err(ApiError::UsernameTaken);
    }

    let token = create_token(&state.jwt_secret, user_id, &req.username)?;

    info!("Registered user {} ({})", req.username, user_id);

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user_id,
            username: req.username,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let username = req.username.clone();
    let user = state
        .with_db(move |db| db.get_user_by_username(&username))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("corrupt password hash: {}", e)))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("corrupt user id '{}': {}", user.id, e)))?;

    let token = create_token(&state.jwt_secret, user_id, &user.username)?;

    Ok(Json(AuthResponse {
        user_id,
        username: user.username,
        token,
    }))
}

pub async fn me(Extension(claims): Extension<Claims>) -> Json<MeResponse> {
    Json(MeResponse {
        user_id: claims.sub,
        username: claims.username,
    })
}

pub fn create_token(secret: &str, user_id: Uuid, username: &str) -> ApiResult<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(e.into()))?;

    Ok(token)
}
