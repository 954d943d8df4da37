use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::config::StripeConfig;

/// The subset of a Checkout Session the handlers read.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<String>,
    /// "paid", "unpaid" or "no_payment_required"
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl CheckoutSession {
    pub fn is_paid(&self) -> bool {
        self.payment_status.as_deref() == Some("paid")
    }

    pub fn order_id(&self) -> Option<Uuid> {
        self.metadata.get("order_id").and_then(|v| v.parse().ok())
    }
}

/// Checkout Session ids are `cs_` followed by ASCII letters, digits and underscores.
pub fn is_checkout_session_id(id: &str) -> bool {
    id.strip_prefix("cs_")
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_'))
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest<'a> {
    pub order_id: Uuid,
    pub batch_id: Uuid,
    pub user_id: Uuid,
    pub customer_id: &'a str,
    pub image_count: i32,
    pub amount_cents: i64,
    pub currency: &'a str,
    pub product_name: &'a str,
    pub success_url: &'a str,
    pub cancel_url: &'a str,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Reuses the customer registered under `email`, creating one if none exists.
    async fn find_or_create_customer(&self, email: &str, user_id: Uuid) -> anyhow::Result<String>;
    async fn create_checkout_session(&self, req: &CheckoutRequest<'_>) -> anyhow::Result<CheckoutSession>;
    async fn retrieve_checkout_session(&self, session_id: &str) -> anyhow::Result<CheckoutSession>;
}

#[derive(Clone)]
pub struct StripeClient {
    http: Client,
    secret_key: String,
    api_base: String,
}

#[derive(Deserialize)]
struct CustomerList {
    data: Vec<Customer>,
}

#[derive(Deserialize)]
struct Customer {
    id: String,
}

#[derive(Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

impl StripeClient {
    pub fn new(http: Client, cfg: &StripeConfig) -> Self {
        Self {
            http,
            secret_key: cfg.secret_key.clone(),
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
        }
    }

    async fn read<T: serde::de::DeserializeOwned>(res: reqwest::Response, what: &str) -> anyhow::Result<T> {
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<StripeErrorBody>(&body)
                .ok()
                .map(|b| {
                    format!(
                        "{} ({})",
                        b.error.message.unwrap_or_default(),
                        b.error.kind.unwrap_or_else(|| "unknown".into())
                    )
                })
                .unwrap_or(body);
            anyhow::bail!("stripe {} failed with {}: {}", what, status, detail);
        }
        res.json::<T>()
            .await
            .with_context(|| format!("decode stripe {} response", what))
    }
}

/// Form fields for a one-line Checkout Session.
pub fn checkout_form(req: &CheckoutRequest<'_>) -> Vec<(String, String)> {
    let order_id = req.order_id.to_string();
    let batch_id = req.batch_id.to_string();
    let user_id = req.user_id.to_string();
    let image_count = req.image_count.to_string();

    let mut form = vec![
        ("mode".to_string(), "payment".to_string()),
        ("customer".to_string(), req.customer_id.to_string()),
        ("client_reference_id".to_string(), order_id.clone()),
        ("success_url".to_string(), req.success_url.to_string()),
        ("cancel_url".to_string(), req.cancel_url.to_string()),
        ("line_items[0][quantity]".to_string(), "1".to_string()),
        ("line_items[0][price_data][currency]".to_string(), req.currency.to_string()),
        ("line_items[0][price_data][unit_amount]".to_string(), req.amount_cents.to_string()),
        ("line_items[0][price_data][product_data][name]".to_string(), req.product_name.to_string()),
    ];
    for prefix in ["metadata", "payment_intent_data[metadata]"] {
        for (key, value) in [
            ("order_id", &order_id),
            ("batch_id", &batch_id),
            ("user_id", &user_id),
            ("image_count", &image_count),
        ] {
            form.push((format!("{}[{}]", prefix, key), value.clone()));
        }
    }
    form
}

#[async_trait]
impl PaymentGateway for StripeClient {
    #[instrument(skip(self))]
    async fn find_or_create_customer(&self, email: &str, user_id: Uuid) -> anyhow::Result<String> {
        let res = self
            .http
            .get(format!("{}/v1/customers", self.api_base))
            .bearer_auth(&self.secret_key)
            .query(&[("email", email), ("limit", "1")])
            .send()
            .await
            .context("stripe list customers")?;
        let existing: CustomerList = Self::read(res, "list customers").await?;
        if let Some(c) = existing.data.into_iter().next() {
            debug!(customer_id = %c.id, "reusing stripe customer");
            return Ok(c.id);
        }

        let res = self
            .http
            .post(format!("{}/v1/customers", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&[
                ("email", email.to_string()),
                ("metadata[user_id]", user_id.to_string()),
            ])
            .send()
            .await
            .context("stripe create customer")?;
        let created: Customer = Self::read(res, "create customer").await?;
        debug!(customer_id = %created.id, "created stripe customer");
        Ok(created.id)
    }

    #[instrument(skip(self, req), fields(order_id = %req.order_id, amount = req.amount_cents))]
    async fn create_checkout_session(&self, req: &CheckoutRequest<'_>) -> anyhow::Result<CheckoutSession> {
        let res = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&checkout_form(req))
            .send()
            .await
            .context("stripe create checkout session")?;
        Self::read(res, "create checkout session").await
    }

    #[instrument(skip(self))]
    async fn retrieve_checkout_session(&self, session_id: &str) -> anyhow::Result<CheckoutSession> {
        anyhow::ensure!(is_checkout_session_id(session_id), "malformed checkout session id");
        let res = self
            .http
            .get(format!("{}/v1/checkout/sessions/{}", self.api_base, session_id))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .context("stripe retrieve checkout session")?;
        Self::read(res, "retrieve checkout session").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkout_form_carries_amount_and_metadata() {
        let order_id = Uuid::new_v4();
        let req = CheckoutRequest {
            order_id,
            batch_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            customer_id: "cus_123",
            image_count: 12,
            amount_cents: 600,
            currency: "usd",
            product_name: "ORBIT analysis - 12 images",
            success_url: "https://app/success",
            cancel_url: "https://app/cancel",
        };
        let form: HashMap<String, String> = checkout_form(&req).into_iter().collect();
        assert_eq!(form["mode"], "payment");
        assert_eq!(form["line_items[0][price_data][unit_amount]"], "600");
        assert_eq!(form["metadata[order_id]"], order_id.to_string());
        assert_eq!(form["payment_intent_data[metadata][image_count]"], "12");
        assert_eq!(form["client_reference_id"], order_id.to_string());
    }

    #[test]
    fn session_id_shape() {
        assert!(is_checkout_session_id("cs_test_a1B2c3"));
        assert!(!is_checkout_session_id("cs_"));
        assert!(!is_checkout_session_id("pi_123"));
        assert!(!is_checkout_session_id("../../customers/cus_x"));
        assert!(!is_checkout_session_id("cs_test/../../customers/cus_x"));
        assert!(!is_checkout_session_id("cs_abc?expand[]=customer"));
    }

    #[test]
    fn session_helpers() {
        let order_id = Uuid::new_v4();
        let raw = serde_json::json!({
            "id": "cs_test_1",
            "payment_status": "paid",
            "payment_intent": "pi_1",
            "metadata": { "order_id": order_id.to_string() }
        });
        let session: CheckoutSession = serde_json::from_value(raw).unwrap();
        assert!(session.is_paid());
        assert_eq!(session.order_id(), Some(order_id));
        assert_eq!(session.url, None);
    }
}
