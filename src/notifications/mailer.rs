use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::config::EmailConfig;

#[derive(Debug, Clone, Serialize)]
pub struct EmailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Returns the provider's message id.
    async fn send(&self, message: &EmailMessage) -> anyhow::Result<String>;
}

pub struct ResendMailer {
    http: Client,
    api_key: String,
    api_base: String,
}

#[derive(Deserialize)]
struct SendResponse {
    id: String,
}

impl ResendMailer {
    pub fn new(http: Client, cfg: &EmailConfig) -> Self {
        Self {
            http,
            api_key: cfg.api_key.clone(),
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    #[instrument(skip(self, message), fields(to = ?message.to))]
    async fn send(&self, message: &EmailMessage) -> anyhow::Result<String> {
        anyhow::ensure!(!self.api_key.is_empty(), "RESEND_API_KEY is not configured");
        let res = self
            .http
            .post(format!("{}/emails", self.api_base))
            .bearer_auth(&self.api_key)
            .json(message)
            .send()
            .await
            .context("resend send")?;
        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            anyhow::bail!("resend returned {}: {}", status, text);
        }
        let body: SendResponse = res.json().await.context("decode resend response")?;
        Ok(body.id)
    }
}
