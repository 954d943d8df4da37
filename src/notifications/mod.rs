pub mod handlers;
pub mod mailer;
pub mod services;
pub mod template;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    handlers::routes()
}
