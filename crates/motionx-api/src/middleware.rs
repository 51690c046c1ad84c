use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use motionx_sync::AuthUser;
use motionx_types::api::Claims;

use crate::state::AppState;

/// Validate a session token and return its identity.
pub fn verify_token(token: &str, secret: &str) -> Option<AuthUser> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()?;
    Some(AuthUser {
        id: data.claims.sub,
        email: data.claims.email,
    })
}

/// Sign a session token. Used by local tooling and tests; production tokens
/// come from the auth provider.
pub fn issue_token(secret: &str, user_id: Uuid, email: Option<&str>) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        email: email.map(str::to_string),
        exp: (Utc::now().timestamp() + 7 * 24 * 3600) as usize,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

/// Extract and validate the bearer token; the identity lands in request
/// extensions as an [`AuthUser`].
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let user = verify_token(token, &state.jwt_secret).ok_or(StatusCode::UNAUTHORIZED)?;
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}
