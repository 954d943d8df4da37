use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use tracing::instrument;
use uuid::Uuid;

use super::services::{send_completion_email, EmailOutcome};
use crate::{auth::Caller, error::AppResult, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new().route("/send-order-completion-email", post(send_order_completion_email))
}

#[derive(Debug, Deserialize)]
pub struct SendEmailBody {
    pub order_id: Uuid,
    #[serde(default)]
    pub force: bool,
}

/// POST /send-order-completion-email { order_id, force? }
#[instrument(skip(state, caller))]
pub async fn send_order_completion_email(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<SendEmailBody>,
) -> AppResult<Json<EmailOutcome>> {
    Ok(Json(
        send_completion_email(&state, &caller, body.order_id, body.force).await?,
    ))
}
