use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::mcp::{EmbedRequest, COMPRESSION_QUALITY};
use crate::auth::Caller;
use crate::error::AppError;
use crate::images::repo::{self as images_repo, Image};
use crate::invoke::{spawn_invoke, SEND_COMPLETION_EMAIL};
use crate::orders::repo as orders_repo;
use crate::orders::repo_types::Order;
use crate::state::AppState;
use crate::status::{batch_outcome, AnalysisType, ImageStatus, OrderStatus};
use crate::storage::processed_key;

/// Originals are presigned for the analysis endpoint for one hour.
const ANALYSIS_URL_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone, Copy)]
pub enum BatchTarget {
    Batch(Uuid),
    Order(Uuid),
}

#[derive(Debug, Serialize)]
pub struct ImageOutcome {
    pub image_id: Uuid,
    pub original_filename: String,
    pub status: ImageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_path_processed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub order_id: Uuid,
    pub batch_id: Uuid,
    pub status: OrderStatus,
    pub processed: usize,
    pub failed: usize,
    pub images: Vec<ImageOutcome>,
}

/// Looks the order up, retrying to ride out the webhook/insert race.
pub async fn find_order_with_retry(st: &AppState, target: BatchTarget) -> anyhow::Result<Option<Order>> {
    let attempts = st.config.pipeline.order_lookup_retries.max(1);
    let delay = Duration::from_millis(st.config.pipeline.order_lookup_delay_ms);
    for attempt in 1..=attempts {
        let found = match target {
            BatchTarget::Batch(id) => orders_repo::find_order_by_batch(&st.db, id).await?,
            BatchTarget::Order(id) => orders_repo::find_order(&st.db, id).await?,
        };
        if found.is_some() {
            return Ok(found);
        }
        if attempt < attempts {
            warn!(?target, attempt, "order not visible yet; retrying");
            tokio::time::sleep(delay).await;
        }
    }
    Ok(None)
}

fn extension_of(path: &str) -> &str {
    path.rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.contains('/') && !ext.is_empty())
        .unwrap_or("jpg")
}

/// Runs one image through analysis and embedding; returns the processed path.
#[instrument(skip(st, image), fields(image_id = %image.id))]
async fn process_image(st: &AppState, image: &Image, analysis_type: AnalysisType) -> anyhow::Result<String> {
    images_repo::set_status(&st.db, image.id, ImageStatus::Processing, None).await?;

    let url = st
        .storage
        .presign_get(&image.storage_path_original, ANALYSIS_URL_TTL_SECS)
        .await
        .context("presign original")?;
    let analysis = st
        .analyzer
        .analyze(&url, analysis_type)
        .await
        .context("ai analysis")?;

    images_repo::store_analysis(&st.db, image.id, &analysis).await?;
    let stored = images_repo::find_image(&st.db, image.id).await?;
    anyhow::ensure!(
        stored.is_some_and(|i| i.ai_analysis.is_some()),
        "analysis write did not persist"
    );

    let output_path = processed_key(
        image.user_id,
        image.batch_id,
        image.id,
        extension_of(&image.storage_path_original),
    );
    let metadata = analysis.get("metadata").cloned().unwrap_or(analysis);
    let embed = st
        .analyzer
        .embed_metadata(&EmbedRequest {
            source_path: &image.storage_path_original,
            output_path: &output_path,
            metadata: &metadata,
            compression_quality: COMPRESSION_QUALITY,
        })
        .await
        .context("metadata embed")?;

    let processed_path = embed
        .get("processed_path")
        .and_then(|v| v.as_str())
        .unwrap_or(&output_path)
        .to_string();

    if st.analyzer.writes_objects() {
        let exists = st
            .storage
            .object_exists(&processed_path)
            .await
            .context("check processed object")?;
        anyhow::ensure!(exists, "processed image missing from storage at {}", processed_path);
    }
    images_repo::store_processed(&st.db, image.id, &processed_path, &embed).await?;

    images_repo::set_status(&st.db, image.id, ImageStatus::Completed, None).await?;
    Ok(processed_path)
}

#[instrument(skip(st, caller))]
pub async fn process_batch(st: &AppState, caller: &Caller, target: BatchTarget) -> anyhow::Result<BatchReport> {
    let order = find_order_with_retry(st, target)
        .await?
        .ok_or_else(|| AppError::not_found("order not found"))?;
    caller.ensure_owns(order.user_id)?;
    if !order.is_paid() {
        return Err(AppError::Conflict("order payment is not completed".into()).into());
    }
    let batch_id = order
        .batch_id
        .ok_or_else(|| AppError::Conflict("order has no batch".into()))?;
    let batch = orders_repo::find_batch(&st.db, batch_id)
        .await?
        .ok_or_else(|| AppError::not_found("batch not found"))?;

    if images_repo::count_by_batch(&st.db, batch_id).await? == 0 {
        return Err(AppError::Conflict("batch has no images yet".into()).into());
    }

    let analysis_type: AnalysisType = batch.analysis_type.parse().unwrap_or_default();
    orders_repo::mark_processing_started(&st.db, order.id, batch_id).await?;
    info!(order_id = %order.id, %batch_id, %analysis_type, "batch processing started");

    match run_batch(st, &order, batch_id, analysis_type).await {
        Ok(report) => Ok(report),
        Err(e) => {
            error!(order_id = %order.id, %batch_id, error = %format!("{:#}", e), "batch run aborted");
            if let Err(reset) = orders_repo::reset_processing(&st.db, order.id, batch_id).await {
                error!(order_id = %order.id, error = %format!("{:#}", reset), "order left in processing stage");
            }
            Err(e)
        }
    }
}

/// Everything after the order is marked processing. An error here leaves the
/// caller to hand the order back to the sweep.
async fn run_batch(
    st: &AppState,
    order: &Order,
    batch_id: Uuid,
    analysis_type: AnalysisType,
) -> anyhow::Result<BatchReport> {
    let pending = images_repo::list_pending_by_batch(&st.db, batch_id).await?;
    let mut outcomes = Vec::with_capacity(pending.len());
    for image in &pending {
        let outcome = match process_image(st, image, analysis_type).await {
            Ok(path) => ImageOutcome {
                image_id: image.id,
                original_filename: image.original_filename.clone(),
                status: ImageStatus::Completed,
                storage_path_processed: Some(path),
                error: None,
            },
            Err(e) => {
                let msg = format!("{:#}", e);
                warn!(image_id = %image.id, error = %msg, "image processing failed");
                if let Err(e) = images_repo::set_status(&st.db, image.id, ImageStatus::Error, Some(&msg)).await {
                    error!(image_id = %image.id, error = %e, "could not record image failure");
                }
                ImageOutcome {
                    image_id: image.id,
                    original_filename: image.original_filename.clone(),
                    status: ImageStatus::Error,
                    storage_path_processed: None,
                    error: Some(msg),
                }
            }
        };
        outcomes.push(outcome);
    }

    // counts cover the whole batch so reruns keep earlier results
    let all = images_repo::list_by_batch(&st.db, batch_id).await?;
    let processed = all
        .iter()
        .filter(|i| i.processing_status == ImageStatus::Completed.as_str())
        .count();
    let failed = all
        .iter()
        .filter(|i| i.processing_status == ImageStatus::Error.as_str())
        .count();
    let (status, stage) = batch_outcome(processed, failed);
    orders_repo::finish_processing(&st.db, order.id, batch_id, status, stage, processed as i32, failed as i32)
        .await?;
    info!(order_id = %order.id, %batch_id, processed, failed, %status, "batch processing finished");

    if processed > 0 {
        spawn_invoke(st.invoker.clone(), SEND_COMPLETION_EMAIL, json!({ "order_id": order.id }));
    }

    Ok(BatchReport {
        order_id: order.id,
        batch_id,
        status,
        processed,
        failed,
        images: outcomes,
    })
}

#[derive(Debug, Serialize)]
pub struct SweepOutcome {
    pub order_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Processes paid orders whose batches never started, oldest first.
#[instrument(skip(st))]
pub async fn process_pending_orders(st: &AppState, limit: i64) -> anyhow::Result<Vec<SweepOutcome>> {
    let orders = orders_repo::list_pending_paid_orders(&st.db, limit).await?;
    info!(count = orders.len(), "pending paid orders found");

    let mut out = Vec::with_capacity(orders.len());
    for order in orders {
        let outcome = match process_batch(st, &Caller::Service, BatchTarget::Order(order.id)).await {
            Ok(report) => SweepOutcome { order_id: order.id, status: Some(report.status), error: None },
            Err(e) => SweepOutcome { order_id: order.id, status: None, error: Some(format!("{:#}", e)) },
        };
        out.push(outcome);
    }
    Ok(out)
}
