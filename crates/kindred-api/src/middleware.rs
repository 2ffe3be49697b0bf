use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use tracing::warn;
use uuid::Uuid;

use kindred_gateway::auth::verify_token;

use crate::error::ApiError;
use crate::state::AppState;

/// The user a request was authenticated as.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Uuid);

/// Extract and validate the JWT from the Authorization header.
pub async fn require_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response, ApiError> {
    let Some(bearer) = req.headers().typed_get::<Authorization<Bearer>>() else {
        warn!(target: "kindred::audit", path = %req.uri().path(), "request without bearer token");
        return Err(ApiError::MissingToken);
    };

    let user_id = verify_token(&state.jwt_secret, bearer.token()).map_err(|e| {
        warn!(target: "kindred::audit", path = %req.uri().path(), error = %e, "rejected bearer token");
        ApiError::MissingToken
    })?;

    req.extensions_mut().insert(AuthUser(user_id));
    Ok(next.run(req).await)
}
