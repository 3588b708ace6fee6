use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use ballot_types::api::Claims;

use crate::auth::AppState;
use crate::error::ApiError;

/// Decode the bearer token if one is present. A present but invalid token
/// is an error rather than silently anonymous.
fn bearer_claims(headers: &HeaderMap, secret: &str) -> Result<Option<Claims>, ApiError> {
    let Some(auth_header) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };

    let token = auth_header
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::Unauthorized)?;

    Ok(Some(token_data.claims))
}

/// Extract and validate JWT from Authorization header.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = bearer_claims(req.headers(), &state.jwt_secret)?.ok_or(ApiError::Unauthorized)?;
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Like `require_auth`, but lets requests without a token through.
pub async fn optional_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(claims) = bearer_claims(req.headers(), &state.jwt_secret)? {
        req.extensions_mut().insert(claims);
    }
    Ok(next.run(req).await)
}

/// Claims inserted by `optional_auth`, if the caller is signed in.
pub struct MaybeClaims(pub Option<Claims>);

impl<S: Send + Sync> FromRequestParts<S> for MaybeClaims {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<Claims>().cloned()))
    }
}
