use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use tracing::instrument;

use super::dto::{CreatePaymentBody, CreatedPaymentResponse, VerifyPaymentBody, VerifyPaymentResponse};
use super::services;
use crate::{auth::AuthUser, error::AppResult, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/create-payment-intent", post(create_payment_intent))
        .route("/verify-payment-order", post(verify_payment_order))
}

/// POST /create-payment-intent { image_count, batch_name?, analysis_type?, customer_email? }
#[instrument(skip(state, body))]
pub async fn create_payment_intent(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreatePaymentBody>,
) -> AppResult<(StatusCode, Json<CreatedPaymentResponse>)> {
    let created = services::create_payment_session(&state, &user, body).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// POST /verify-payment-order { session_id } | { order_id }
#[instrument(skip(state, body))]
pub async fn verify_payment_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<VerifyPaymentBody>,
) -> AppResult<Json<VerifyPaymentResponse>> {
    Ok(Json(services::verify_payment(&state, &user, body).await?))
}
