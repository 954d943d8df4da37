use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::events::{EventKind, OrderRefs, StripeEvent};
use crate::orders::repo as orders_repo;
use crate::orders::repo_types::Order;
use crate::payments::services::apply_payment_success;
use crate::state::AppState;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct WebhookAck {
    pub received: bool,
    pub handled: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl WebhookAck {
    fn handled(order_id: Uuid) -> Self {
        Self { received: true, handled: true, duplicate: false, order_id: Some(order_id), reason: None }
    }

    fn duplicate(order_id: Uuid) -> Self {
        Self { received: true, handled: false, duplicate: true, order_id: Some(order_id), reason: None }
    }

    pub fn ignored(reason: &str) -> Self {
        Self { received: true, handled: false, duplicate: false, order_id: None, reason: Some(reason.to_string()) }
    }
}

/// Tries each reference the event carries until one resolves to an order.
async fn locate_order(st: &AppState, refs: &OrderRefs) -> anyhow::Result<Option<Order>> {
    if let Some(intent) = refs.payment_intent_id.as_deref() {
        if let Some(order) = orders_repo::find_order_by_payment_intent(&st.db, intent).await? {
            return Ok(Some(order));
        }
    }
    if let Some(session) = refs.checkout_session_id.as_deref() {
        if let Some(order) = orders_repo::find_order_by_checkout_session(&st.db, session).await? {
            return Ok(Some(order));
        }
    }
    if let Some(order_id) = refs.metadata_order_id {
        if let Some(order) = orders_repo::find_order(&st.db, order_id).await? {
            return Ok(Some(order));
        }
    }
    if refs.payment_intent_id.is_some() || refs.checkout_session_id.is_some() {
        let via_payments = orders_repo::find_order_id_via_payments(
            &st.db,
            refs.payment_intent_id.as_deref(),
            refs.checkout_session_id.as_deref(),
        )
        .await?;
        if let Some(order_id) = via_payments {
            return orders_repo::find_order(&st.db, order_id).await;
        }
    }
    Ok(None)
}

#[instrument(skip(st, event), fields(event_id = %event.id, event_type = %event.kind))]
pub async fn handle_event(st: &AppState, event: StripeEvent) -> anyhow::Result<WebhookAck> {
    let Some(kind) = EventKind::parse(&event.kind) else {
        info!("event type not handled");
        return Ok(WebhookAck::ignored("event type not handled"));
    };

    let refs = OrderRefs::extract(kind, &event.data.object);
    let Some(order) = locate_order(st, &refs).await? else {
        warn!(?refs, "no order matches webhook event");
        return Ok(WebhookAck::ignored("order not found"));
    };

    if order.has_event(&event.id) {
        info!(order_id = %order.id, "duplicate webhook event skipped");
        return Ok(WebhookAck::duplicate(order.id));
    }

    match kind.failure_status() {
        None => {
            apply_payment_success(st, &order, refs.payment_intent_id.as_deref()).await?;
        }
        Some(status) => {
            orders_repo::mark_order_unpaid(
                &st.db,
                order.id,
                status,
                refs.payment_intent_id.as_deref(),
                refs.failure_reason.as_deref(),
            )
            .await?;
            info!(order_id = %order.id, %status, "payment not completed");
        }
    }

    // only once the update above has landed, so a failed attempt is retried in full
    if !orders_repo::record_webhook_event(&st.db, order.id, &event.id).await? {
        info!(order_id = %order.id, "event recorded by a concurrent delivery");
    }

    Ok(WebhookAck::handled(order.id))
}
