use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
};

use kindred_gateway::connection;

use crate::state::AppState;

pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let gateway = state.gateway.clone();
    let jwt_secret = state.jwt_secret.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, gateway, jwt_secret))
}
