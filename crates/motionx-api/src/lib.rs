pub mod middleware;
pub mod session;
pub mod state;
pub mod storage;
pub mod upload;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
};

use crate::state::AppState;

/// Upload relay and session routes.
pub fn routes(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/upload", post(upload::upload))
        .layer(DefaultBodyLimit::max(upload::MAX_UPLOAD_BYTES + 64 * 1024))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    Router::new()
        .route("/session", get(session::current_session))
        .merge(protected)
        .with_state(state)
}
