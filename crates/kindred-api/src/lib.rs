pub mod error;
pub mod extract;
pub mod matches;
pub mod messages;
pub mod middleware;
pub mod presence;
pub mod state;
pub mod ws;

#[cfg(test)]
mod tests;

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, post, put},
};

use crate::middleware::require_auth;
use crate::state::AppState;

/// Every HTTP route of the service. The live channel at `/gateway`
/// authenticates in-band with an `auth` frame; everything else needs a
/// bearer token.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/gateway", get(ws::ws_upgrade))
        .route("/online-count", get(presence::online_count));

    let protected_routes = Router::new()
        .route("/matches", get(matches::list_conversations))
        .route("/matches/direct", post(matches::start_direct_chat))
        .route("/matches/{match_id}", delete(matches::unmatch))
        .route("/matches/{match_id}/messages", get(messages::get_history))
        .route("/matches/{match_id}/messages", post(messages::send_message))
        .route("/messages/{message_id}", delete(messages::unsend_message))
        .route("/messages/{message_id}/read", post(messages::mark_read))
        .route("/messages/{message_id}/hide", post(messages::hide_message))
        .route("/swipes", post(matches::swipe))
        .route("/swipes/undo", post(matches::undo_swipe))
        .route("/swipes/exclusions", get(matches::exclusions))
        .route("/me/ghost-mode", put(presence::set_ghost_mode))
        .layer(axum_middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
