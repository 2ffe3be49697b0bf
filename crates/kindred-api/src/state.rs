use std::sync::Arc;

use kindred_gateway::Gateway;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub gateway: Gateway,
    pub jwt_secret: String,
}
