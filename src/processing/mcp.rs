use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{debug, instrument};

use crate::status::AnalysisType;

pub const EMBED_TOOL_NAME: &str = "process_image_metadata";
pub const COMPRESSION_QUALITY: u8 = 95;

#[derive(Debug, Clone, Serialize)]
pub struct EmbedRequest<'a> {
    pub source_path: &'a str,
    pub output_path: &'a str,
    pub metadata: &'a Value,
    pub compression_quality: u8,
}

/// The AI analysis and metadata embedding endpoints.
#[async_trait]
pub trait ImageAnalyzer: Send + Sync {
    async fn analyze(&self, image_url: &str, analysis_type: AnalysisType) -> anyhow::Result<Value>;
    async fn embed_metadata(&self, req: &EmbedRequest<'_>) -> anyhow::Result<Value>;
    /// Mock analyzers never write processed objects to storage.
    fn writes_objects(&self) -> bool {
        true
    }
}

/// Strips the `{success, data, error}` tool envelope when present.
pub fn unwrap_envelope(body: Value) -> anyhow::Result<Value> {
    let Some(success) = body.get("success").and_then(Value::as_bool) else {
        return Ok(body);
    };
    if !success {
        let msg = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("tool reported failure without a message");
        anyhow::bail!("{}", msg);
    }
    Ok(body.get("data").cloned().unwrap_or(Value::Null))
}

pub struct McpClient {
    http: Client,
    base_url: String,
    bearer: String,
}

impl McpClient {
    pub fn new(http: Client, base_url: &str, bearer: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer: bearer.to_string(),
        }
    }

    async fn call(&self, endpoint: &str, payload: Value) -> anyhow::Result<Value> {
        let res = self
            .http
            .post(format!("{}/{}", self.base_url, endpoint))
            .bearer_auth(&self.bearer)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("call {}", endpoint))?;
        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            anyhow::bail!("{} failed: {} - {}", endpoint, status, text);
        }
        let body: Value = res
            .json()
            .await
            .with_context(|| format!("decode {} response", endpoint))?;
        unwrap_envelope(body)
    }
}

#[async_trait]
impl ImageAnalyzer for McpClient {
    #[instrument(skip(self, image_url))]
    async fn analyze(&self, image_url: &str, analysis_type: AnalysisType) -> anyhow::Result<Value> {
        let out = self
            .call(
                "mcp-ai-analysis",
                json!({ "image_url": image_url, "analysis_type": analysis_type.as_str() }),
            )
            .await?;
        debug!(bytes = out.to_string().len(), "analysis received");
        Ok(out)
    }

    #[instrument(skip(self, req), fields(output = req.output_path))]
    async fn embed_metadata(&self, req: &EmbedRequest<'_>) -> anyhow::Result<Value> {
        self.call(
            "mcp-metadata",
            json!({ "tool_name": EMBED_TOOL_NAME, "parameters": req }),
        )
        .await
    }
}

/// Stand-in used when `MOCK_MODE` is on; nothing leaves the process.
pub struct MockAnalyzer;

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

pub fn mock_analysis(image_url: &str, analysis_type: AnalysisType) -> Value {
    let kind = analysis_type.as_str();
    let product = analysis_type == AnalysisType::Product;
    let title = if product { "Product" } else { "Lifestyle" };
    json!({
        "analysis_type": kind,
        "metadata": {
            "title": format!("{} Image Analysis", title),
            "description": format!("Mock analysis for {} image from {}", kind, image_url),
            "tags": ["mock", "test", kind, "ai-generated"],
            "colors": ["#FF5733", "#33FF57", "#3357FF", "#FFD700"],
            "objects": if product {
                json!(["product", "packaging", "label", "brand"])
            } else {
                json!(["person", "environment", "activity", "lifestyle"])
            },
            "scene": {
                "setting": if product { "studio" } else { "outdoor" },
                "lighting": "professional",
                "mood": "positive",
                "composition": "centered"
            },
            "technical": { "resolution": "1920x1080", "quality": "high", "format": "JPEG" }
        },
        "confidence": 0.94,
        "model_version": "mock-v1.0",
        "timestamp": now_rfc3339()
    })
}

pub fn mock_embed(req: &EmbedRequest<'_>) -> Value {
    let fields: Vec<&String> = req
        .metadata
        .as_object()
        .map(|m| m.keys().collect())
        .unwrap_or_default();
    json!({
        "processed_path": req.output_path,
        "original_size": 1_024_000,
        "processed_size": 1_124_000,
        "compression_quality": req.compression_quality,
        "format": "JPEG",
        "embedded_fields": fields,
        "timestamp": now_rfc3339()
    })
}

#[async_trait]
impl ImageAnalyzer for MockAnalyzer {
    async fn analyze(&self, image_url: &str, analysis_type: AnalysisType) -> anyhow::Result<Value> {
        Ok(mock_analysis(image_url, analysis_type))
    }

    async fn embed_metadata(&self, req: &EmbedRequest<'_>) -> anyhow::Result<Value> {
        Ok(mock_embed(req))
    }

    fn writes_objects(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_passthrough_and_unwrap() {
        let plain = json!({ "metadata": { "title": "x" } });
        assert_eq!(unwrap_envelope(plain.clone()).unwrap(), plain);

        let wrapped = json!({ "success": true, "data": { "processed_path": "p" } });
        assert_eq!(unwrap_envelope(wrapped).unwrap(), json!({ "processed_path": "p" }));

        let failed = json!({ "success": false, "error": "model overloaded" });
        assert_eq!(unwrap_envelope(failed).unwrap_err().to_string(), "model overloaded");
    }

    #[tokio::test]
    async fn mock_analysis_follows_type() {
        let out = MockAnalyzer.analyze("https://img", AnalysisType::Product).await.unwrap();
        assert_eq!(out["analysis_type"], "product");
        assert_eq!(out["metadata"]["scene"]["setting"], "studio");
        assert_eq!(out["metadata"]["objects"][0], "product");

        let out = MockAnalyzer.analyze("https://img", AnalysisType::Lifestyle).await.unwrap();
        assert_eq!(out["metadata"]["title"], "Lifestyle Image Analysis");
    }

    #[tokio::test]
    async fn mock_embed_lists_fields() {
        let metadata = json!({ "title": "t", "tags": [] });
        let req = EmbedRequest {
            source_path: "original/a.jpg",
            output_path: "processed/a.jpg",
            metadata: &metadata,
            compression_quality: COMPRESSION_QUALITY,
        };
        let out = MockAnalyzer.embed_metadata(&req).await.unwrap();
        assert_eq!(out["processed_path"], "processed/a.jpg");
        assert_eq!(out["compression_quality"], 95);
        assert_eq!(out["embedded_fields"].as_array().unwrap().len(), 2);
        assert!(!MockAnalyzer.writes_objects());
    }

    #[test]
    fn embed_request_serializes_as_tool_parameters() {
        let metadata = json!({ "title": "t" });
        let req = EmbedRequest {
            source_path: "s",
            output_path: "o",
            metadata: &metadata,
            compression_quality: 95,
        };
        let body = json!({ "tool_name": EMBED_TOOL_NAME, "parameters": &req });
        assert_eq!(body["parameters"]["output_path"], "o");
        assert_eq!(body["parameters"]["metadata"]["title"], "t");
    }
}
