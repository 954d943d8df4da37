pub mod handlers;
pub mod mcp;
pub mod pipeline;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    handlers::routes()
}
