use lazy_static::lazy_static;
use regex::Regex;
use serde_json::json;
use tracing::{info, instrument, warn};

use super::dto::{CreatePaymentBody, CreatedPaymentResponse, VerifyPaymentBody, VerifyPaymentResponse};
use super::stripe::{is_checkout_session_id, CheckoutRequest};
use crate::auth::AuthUser;
use crate::error::AppError;
use crate::invoke::{spawn_invoke, PROCESS_IMAGE_BATCH};
use crate::orders::repo as orders_repo;
use crate::orders::repo_types::{NewBatch, NewOrder, NewPayment, Order};
use crate::pricing::{self, MAX_IMAGES_PER_ORDER};
use crate::state::AppState;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Body email wins over the token's email claim.
pub fn resolve_email(body: Option<&str>, claim: Option<&str>) -> Result<String, AppError> {
    let email = body
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .or(claim)
        .ok_or_else(|| AppError::validation("customer_email is required"))?;
    if !is_valid_email(email) {
        return Err(AppError::validation("customer_email is not a valid address"));
    }
    Ok(email.to_lowercase())
}

pub fn validate_image_count(image_count: i32) -> Result<(), AppError> {
    if !(1..=MAX_IMAGES_PER_ORDER).contains(&image_count) {
        return Err(AppError::validation(format!(
            "image_count must be between 1 and {}",
            MAX_IMAGES_PER_ORDER
        )));
    }
    Ok(())
}

fn stripe_failed(e: anyhow::Error) -> AppError {
    AppError::upstream(format!("payment provider error: {:#}", e))
}

#[instrument(skip(st, user, body), fields(user_id = %user.id, image_count = body.image_count))]
pub async fn create_payment_session(
    st: &AppState,
    user: &AuthUser,
    body: CreatePaymentBody,
) -> anyhow::Result<CreatedPaymentResponse> {
    validate_image_count(body.image_count)?;
    let quote = pricing::quote(body.image_count)?;
    let email = resolve_email(body.customer_email.as_deref(), user.email.as_deref())?;
    let currency = st.config.stripe.currency.as_str();

    let customer_id = st
        .payments
        .find_or_create_customer(&email, user.id)
        .await
        .map_err(stripe_failed)?;

    let order = orders_repo::insert_order(
        &st.db,
        &NewOrder {
            user_id: user.id,
            customer_email: &email,
            image_count: body.image_count,
            amount_cents: quote.total_cents,
            currency,
            stripe_customer_id: Some(&customer_id),
        },
    )
    .await?;

    let batch_name = body
        .batch_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Order {} ({} images)", &order.id.simple().to_string()[..8], body.image_count));
    let batch = orders_repo::insert_batch(
        &st.db,
        &NewBatch {
            user_id: user.id,
            order_id: order.id,
            name: &batch_name,
            analysis_type: body.analysis_type.unwrap_or_default().as_str(),
        },
    )
    .await?;

    let frontend = &st.config.frontend_url;
    let success_url = format!(
        "{}/payment-success?session_id={{CHECKOUT_SESSION_ID}}&order_id={}",
        frontend, order.id
    );
    let cancel_url = format!("{}/payment-cancelled?order_id={}", frontend, order.id);
    let product_name = format!("ORBIT image analysis ({} images)", body.image_count);

    let session = st
        .payments
        .create_checkout_session(&CheckoutRequest {
            order_id: order.id,
            batch_id: batch.id,
            user_id: user.id,
            customer_id: &customer_id,
            image_count: body.image_count,
            amount_cents: quote.total_cents,
            currency,
            product_name: &product_name,
            success_url: &success_url,
            cancel_url: &cancel_url,
        })
        .await
        .map_err(stripe_failed)?;

    orders_repo::insert_payment(
        &st.db,
        &NewPayment {
            order_id: order.id,
            user_id: user.id,
            amount_cents: quote.total_cents,
            currency,
            stripe_checkout_session_id: &session.id,
        },
    )
    .await?;
    orders_repo::set_checkout_session(&st.db, order.id, &session.id).await?;

    info!(order_id = %order.id, batch_id = %batch.id, session_id = %session.id, amount = quote.total_cents, "checkout session created");

    Ok(CreatedPaymentResponse {
        order_id: order.id,
        batch_id: batch.id,
        session_id: session.id,
        checkout_url: session.url,
        pricing: quote,
    })
}

/// Marks the order paid and hands its batch to the processing handler.
pub async fn apply_payment_success(st: &AppState, order: &Order, intent_id: Option<&str>) -> anyhow::Result<()> {
    orders_repo::mark_order_paid(&st.db, order.id, intent_id).await?;
    // checkout.session.completed and payment_intent.succeeded both land here
    if order.is_paid() {
        info!(order_id = %order.id, "order already paid; processing not re-triggered");
        return Ok(());
    }
    info!(order_id = %order.id, "order marked paid");
    trigger_processing(st, order);
    Ok(())
}

pub fn trigger_processing(st: &AppState, order: &Order) {
    let Some(batch_id) = order.batch_id else {
        warn!(order_id = %order.id, "paid order has no batch; processing not triggered");
        return;
    };
    spawn_invoke(
        st.invoker.clone(),
        PROCESS_IMAGE_BATCH,
        json!({ "batch_id": batch_id, "order_id": order.id }),
    );
}

#[instrument(skip(st, user, body), fields(user_id = %user.id))]
pub async fn verify_payment(
    st: &AppState,
    user: &AuthUser,
    body: VerifyPaymentBody,
) -> anyhow::Result<VerifyPaymentResponse> {
    let (order, session) = match (body.session_id.as_deref(), body.order_id) {
        (Some(session_id), _) => {
            if !is_checkout_session_id(session_id) {
                return Err(AppError::validation("session_id is not a checkout session id").into());
            }
            let session = st
                .payments
                .retrieve_checkout_session(session_id)
                .await
                .map_err(stripe_failed)?;
            let order = match orders_repo::find_order_by_checkout_session(&st.db, &session.id).await? {
                Some(order) => Some(order),
                None => match session.order_id() {
                    Some(id) => orders_repo::find_order(&st.db, id).await?,
                    None => None,
                },
            };
            (order.ok_or_else(|| AppError::not_found("order not found"))?, session)
        }
        (None, Some(order_id)) => {
            let order = orders_repo::find_order(&st.db, order_id)
                .await?
                .ok_or_else(|| AppError::not_found("order not found"))?;
            let session_id = order
                .stripe_checkout_session_id
                .as_deref()
                .ok_or_else(|| AppError::Conflict("order has no checkout session".into()))?;
            let session = st
                .payments
                .retrieve_checkout_session(session_id)
                .await
                .map_err(stripe_failed)?;
            (order, session)
        }
        (None, None) => return Err(AppError::validation("session_id or order_id is required").into()),
    };

    if order.user_id != user.id {
        return Err(AppError::Forbidden("order belongs to another user".into()).into());
    }

    let verified = session.is_paid();

    let order = if verified && !order.is_paid() {
        info!(order_id = %order.id, "payment confirmed by session lookup; applying missed webhook");
        apply_payment_success(st, &order, session.payment_intent.as_deref()).await?;
        orders_repo::find_order(&st.db, order.id).await?.unwrap_or(order)
    } else {
        order
    };

    Ok(VerifyPaymentResponse {
        order_id: order.id,
        batch_id: order.batch_id,
        payment_status: order.payment_status,
        order_status: order.order_status,
        processing_stage: order.processing_stage,
        verified,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_format() {
        assert!(is_valid_email("a@b.co"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a b@c.de"));
    }

    #[test]
    fn body_email_overrides_claim() {
        assert_eq!(resolve_email(Some(" Ann@Example.com "), Some("x@y.z")).unwrap(), "ann@example.com");
        assert_eq!(resolve_email(None, Some("x@y.z")).unwrap(), "x@y.z");
        assert_eq!(resolve_email(Some(""), Some("x@y.z")).unwrap(), "x@y.z");
        assert!(matches!(resolve_email(None, None), Err(AppError::Validation(_))));
        assert!(matches!(resolve_email(Some("nope"), None), Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn paid_order_with_batch_triggers_processing() {
        use crate::state::fakes::RecordingInvoker;
        use std::sync::Arc;

        let invoker = Arc::new(RecordingInvoker::default());
        let st = AppState { invoker: invoker.clone(), ..AppState::fake() };

        let mut order = crate::notifications::template::tests::order();
        trigger_processing(&st, &order);
        let batch_id = uuid::Uuid::new_v4();
        order.batch_id = Some(batch_id);
        trigger_processing(&st, &order);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let calls = invoker.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, PROCESS_IMAGE_BATCH);
        assert_eq!(calls[0].1["batch_id"], batch_id.to_string());
    }

    #[tokio::test]
    async fn verify_rejects_foreign_session_ids() {
        let st = AppState::fake();
        let user = AuthUser { id: uuid::Uuid::new_v4(), email: None };
        let body = VerifyPaymentBody { session_id: Some("../../customers/cus_x".into()), order_id: None };
        let err = verify_payment(&st, &user, body).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<AppError>(), Some(AppError::Validation(_))));
    }

    #[test]
    fn image_count_bounds() {
        assert!(validate_image_count(1).is_ok());
        assert!(validate_image_count(MAX_IMAGES_PER_ORDER).is_ok());
        assert!(validate_image_count(0).is_err());
        assert!(validate_image_count(MAX_IMAGES_PER_ORDER + 1).is_err());
    }
}
