use axum::{
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use time::OffsetDateTime;
use tracing::{instrument, warn};

use super::events::StripeEvent;
use super::services::{handle_event, WebhookAck};
use super::signature;
use crate::{
    error::{AppError, AppResult},
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new().route("/stripe-webhook", post(stripe_webhook))
}

/// POST /stripe-webhook (raw body, `Stripe-Signature` header)
#[instrument(skip_all)]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<WebhookAck>> {
    let header = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::validation("missing Stripe-Signature header"))?;

    let secret = &state.config.stripe.webhook_secret;
    if secret.is_empty() {
        return Err(AppError::Internal("webhook secret is not configured".into()));
    }

    let now = OffsetDateTime::now_utc().unix_timestamp();
    if let Err(e) = signature::verify(header, &body, secret, now) {
        warn!(error = %e, "webhook signature rejected");
        return Err(AppError::validation(format!("invalid signature: {}", e)));
    }

    let event: StripeEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::validation(format!("invalid event payload: {}", e)))?;

    Ok(Json(handle_event(&state, event).await?))
}
