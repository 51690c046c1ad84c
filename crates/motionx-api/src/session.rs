use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use tracing::error;

use motionx_sync::SessionOutcome;
use motionx_types::api::SessionResponse;

use crate::middleware::verify_token;
use crate::state::AppState;

/// GET /session: the caller's profile, provisioned on first visit.
/// Without a valid session the caller is sent to the login page.
pub async fn current_session(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
) -> Result<Response, StatusCode> {
    let user = bearer.and_then(|TypedHeader(auth)| verify_token(auth.token(), &state.jwt_secret));

    let outcome = state.sessions().resolve(user).await.map_err(|e| {
        error!("Session resolution failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    match outcome {
        SessionOutcome::Redirect(to) => Ok(Redirect::to(to).into_response()),
        SessionOutcome::Ready {
            user,
            profile,
            provisioned,
        } => Ok(Json(SessionResponse {
            user_id: user.id,
            profile,
            provisioned,
        })
        .into_response()),
    }
}
