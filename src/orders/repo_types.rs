use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Order record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub customer_email: String,
    pub image_count: i32,
    pub amount_cents: i64,
    pub currency: String,
    pub payment_status: String,
    pub order_status: String,
    pub processing_stage: String,
    pub stripe_customer_id: Option<String>,
    pub stripe_checkout_session_id: Option<String>,
    pub stripe_payment_intent_id: Option<String>,
    #[serde(skip_serializing)]
    pub webhook_events: Vec<String>,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub email_sent_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub processing_started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Order {
    pub fn has_event(&self, event_id: &str) -> bool {
        self.webhook_events.iter().any(|e| e == event_id)
    }

    pub fn is_paid(&self) -> bool {
        self.payment_status == crate::status::PaymentStatus::Completed.as_str()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Batch {
    pub id: Uuid,
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub name: String,
    pub status: String,
    pub analysis_type: String,
    pub total_images: i32,
    pub processed_count: i32,
    pub error_count: i32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub processing_started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub processing_completed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub stripe_checkout_session_id: Option<String>,
    pub stripe_payment_intent_id: Option<String>,
    #[serde(skip_serializing)]
    pub webhook_events: Vec<String>,
    pub failure_reason: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug)]
pub struct NewOrder<'a> {
    pub user_id: Uuid,
    pub customer_email: &'a str,
    pub image_count: i32,
    pub amount_cents: i64,
    pub currency: &'a str,
    pub stripe_customer_id: Option<&'a str>,
}

#[derive(Debug)]
pub struct NewBatch<'a> {
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub name: &'a str,
    pub analysis_type: &'a str,
}

#[derive(Debug)]
pub struct NewPayment<'a> {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub amount_cents: i64,
    pub currency: &'a str,
    pub stripe_checkout_session_id: &'a str,
}
