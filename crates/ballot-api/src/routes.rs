use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use ballot_gateway::connection;

use crate::auth::{self, AppState};
use crate::middleware::{optional_auth, require_auth};
use crate::polls;

/// Full HTTP surface: REST routes plus the WebSocket gateway.
pub fn app(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/polls/{poll_id}", get(polls::get_poll))
        .route("/health", get(polls::health))
        .route("/gateway", get(ws_upgrade))
        .with_state(state.clone());

    let open_routes = Router::new()
        .route("/polls", post(polls::create_poll))
        .layer(middleware::from_fn_with_state(state.clone(), optional_auth))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/polls/mine", get(polls::my_polls))
        .route("/polls/{poll_id}/vote", post(polls::cast_vote))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(open_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Viewers may watch polls without signing in, so the upgrade is unauthenticated.
async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let dispatcher = state.dispatcher.clone();
    let db = state.db.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, db))
}
