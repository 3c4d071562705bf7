use crate::state::AppState;
use axum::Router;

pub mod handlers;
pub mod provider;

pub fn router() -> Router<AppState> {
    handlers::oauth_routes()
}
