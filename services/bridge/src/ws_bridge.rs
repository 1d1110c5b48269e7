use crate::session::run_session;
use crate::state::AppState;
use axum::{
    extract::{Query, State, ws::WebSocketUpgrade},
    response::IntoResponse,
};
use std::collections::HashMap;

/// Upgrade first; identity parameters are checked inside the session so a
/// bad request still gets a close frame with a readable reason.
pub async fn ws_bridge_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_session(socket, params, state))
}
