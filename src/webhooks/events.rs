use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::status::PaymentStatus;

#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: EventData,
}

#[derive(Debug, Deserialize)]
pub struct EventData {
    pub object: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    CheckoutCompleted,
    CheckoutExpired,
    IntentSucceeded,
    IntentFailed,
    IntentCanceled,
}

impl EventKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "checkout.session.completed" => Some(Self::CheckoutCompleted),
            "checkout.session.expired" => Some(Self::CheckoutExpired),
            "payment_intent.succeeded" => Some(Self::IntentSucceeded),
            "payment_intent.payment_failed" => Some(Self::IntentFailed),
            "payment_intent.canceled" => Some(Self::IntentCanceled),
            _ => None,
        }
    }

    fn is_checkout(self) -> bool {
        matches!(self, Self::CheckoutCompleted | Self::CheckoutExpired)
    }

    /// `None` means the payment succeeded; otherwise the status to record.
    pub fn failure_status(self) -> Option<PaymentStatus> {
        match self {
            Self::CheckoutCompleted | Self::IntentSucceeded => None,
            Self::CheckoutExpired => Some(PaymentStatus::Expired),
            Self::IntentFailed => Some(PaymentStatus::Failed),
            Self::IntentCanceled => Some(PaymentStatus::Canceled),
        }
    }
}

/// Identifiers an event object offers for locating its order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OrderRefs {
    pub payment_intent_id: Option<String>,
    pub checkout_session_id: Option<String>,
    pub metadata_order_id: Option<Uuid>,
    pub failure_reason: Option<String>,
}

impl OrderRefs {
    pub fn extract(kind: EventKind, object: &Value) -> Self {
        let str_at = |ptr: &str| object.pointer(ptr).and_then(Value::as_str).map(str::to_string);

        let (payment_intent_id, checkout_session_id) = if kind.is_checkout() {
            // payment_intent is a string id unless the event was expanded
            let intent = str_at("/payment_intent").or_else(|| str_at("/payment_intent/id"));
            (intent, str_at("/id"))
        } else {
            (str_at("/id"), None)
        };

        let failure_reason = str_at("/last_payment_error/message")
            .or_else(|| str_at("/cancellation_reason"))
            .or_else(|| (kind == EventKind::CheckoutExpired).then(|| "checkout session expired".to_string()));

        Self {
            payment_intent_id,
            checkout_session_id,
            metadata_order_id: str_at("/metadata/order_id").and_then(|v| v.parse().ok()),
            failure_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_envelope() {
        let raw = json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": { "object": { "id": "cs_1" } }
        });
        let ev: StripeEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(ev.id, "evt_1");
        assert_eq!(EventKind::parse(&ev.kind), Some(EventKind::CheckoutCompleted));
        assert_eq!(EventKind::parse("customer.created"), None);
    }

    #[test]
    fn checkout_refs() {
        let order_id = Uuid::new_v4();
        let obj = json!({
            "id": "cs_1",
            "payment_intent": "pi_1",
            "metadata": { "order_id": order_id.to_string() }
        });
        let refs = OrderRefs::extract(EventKind::CheckoutCompleted, &obj);
        assert_eq!(refs.checkout_session_id.as_deref(), Some("cs_1"));
        assert_eq!(refs.payment_intent_id.as_deref(), Some("pi_1"));
        assert_eq!(refs.metadata_order_id, Some(order_id));
        assert_eq!(refs.failure_reason, None);
    }

    #[test]
    fn intent_refs_with_failure() {
        let obj = json!({
            "id": "pi_2",
            "metadata": { "order_id": "not-a-uuid" },
            "last_payment_error": { "message": "card declined" }
        });
        let refs = OrderRefs::extract(EventKind::IntentFailed, &obj);
        assert_eq!(refs.payment_intent_id.as_deref(), Some("pi_2"));
        assert_eq!(refs.checkout_session_id, None);
        assert_eq!(refs.metadata_order_id, None);
        assert_eq!(refs.failure_reason.as_deref(), Some("card declined"));
    }

    #[test]
    fn expired_session_has_reason() {
        let refs = OrderRefs::extract(EventKind::CheckoutExpired, &json!({ "id": "cs_9", "payment_intent": null }));
        assert_eq!(refs.payment_intent_id, None);
        assert_eq!(refs.failure_reason.as_deref(), Some("checkout session expired"));
        assert_eq!(EventKind::CheckoutExpired.failure_status(), Some(PaymentStatus::Expired));
        assert_eq!(EventKind::IntentSucceeded.failure_status(), None);
    }
}
