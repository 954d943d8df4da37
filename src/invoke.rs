use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{error, info, instrument};

pub const PROCESS_IMAGE_BATCH: &str = "process-image-batch";
pub const SEND_COMPLETION_EMAIL: &str = "send-order-completion-email";

/// Calls another handler of this service over HTTP with the service key.
#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    async fn invoke(&self, handler: &str, payload: Value) -> anyhow::Result<Value>;
}

pub struct HttpInvoker {
    http: Client,
    base_url: String,
    service_key: String,
}

impl HttpInvoker {
    pub fn new(http: Client, public_base_url: &str, service_key: &str) -> Self {
        Self {
            http,
            base_url: format!("{}/api/v1", public_base_url.trim_end_matches('/')),
            service_key: service_key.to_string(),
        }
    }
}

#[async_trait]
impl FunctionInvoker for HttpInvoker {
    #[instrument(skip(self, payload))]
    async fn invoke(&self, handler: &str, payload: Value) -> anyhow::Result<Value> {
        let res = self
            .http
            .post(format!("{}/{}", self.base_url, handler))
            .bearer_auth(&self.service_key)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("invoke {}", handler))?;
        let status = res.status();
        let body: Value = res.json().await.unwrap_or(Value::Null);
        anyhow::ensure!(status.is_success(), "{} returned {}: {}", handler, status, body);
        Ok(body)
    }
}

/// Fire-and-forget invocation; the caller's response does not wait for it.
pub fn spawn_invoke(invoker: Arc<dyn FunctionInvoker>, handler: &'static str, payload: Value) {
    tokio::spawn(async move {
        match invoker.invoke(handler, payload).await {
            Ok(_) => info!(handler, "background invocation finished"),
            Err(e) => error!(handler, error = %format!("{:#}", e), "background invocation failed"),
        }
    });
}
