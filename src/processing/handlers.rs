use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::instrument;
use uuid::Uuid;

use super::pipeline::{process_batch, process_pending_orders, BatchReport, BatchTarget};
use crate::{
    auth::{Caller, ServiceCaller},
    error::{AppError, AppResult},
    state::AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/process-image-batch", post(process_image_batch))
        .route("/process-pending-orders", post(process_pending))
}

#[derive(Debug, Deserialize)]
pub struct ProcessBatchBody {
    #[serde(default)]
    pub batch_id: Option<Uuid>,
    #[serde(default)]
    pub order_id: Option<Uuid>,
}

impl ProcessBatchBody {
    fn target(&self) -> Result<BatchTarget, AppError> {
        match (self.batch_id, self.order_id) {
            (Some(id), _) => Ok(BatchTarget::Batch(id)),
            (None, Some(id)) => Ok(BatchTarget::Order(id)),
            (None, None) => Err(AppError::validation("batch_id or order_id is required")),
        }
    }
}

/// POST /process-image-batch { batch_id } | { order_id }
#[instrument(skip(state, caller))]
pub async fn process_image_batch(
    State(state): State<AppState>,
    caller: Caller,
    Json(body): Json<ProcessBatchBody>,
) -> AppResult<Json<BatchReport>> {
    let target = body.target()?;
    Ok(Json(process_batch(&state, &caller, target).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct SweepBody {
    #[serde(default)]
    pub limit: Option<i64>,
}

/// POST /process-pending-orders { limit? } (service key only)
#[instrument(skip(state, _svc))]
pub async fn process_pending(
    State(state): State<AppState>,
    _svc: ServiceCaller,
    body: Option<Json<SweepBody>>,
) -> AppResult<Json<Value>> {
    let limit = body
        .and_then(|Json(b)| b.limit)
        .unwrap_or(10)
        .clamp(1, 100);
    let outcomes = process_pending_orders(&state, limit).await?;
    Ok(Json(json!({ "count": outcomes.len(), "orders": outcomes })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_id_takes_precedence() {
        let (b, o) = (Uuid::new_v4(), Uuid::new_v4());
        let body = ProcessBatchBody { batch_id: Some(b), order_id: Some(o) };
        assert!(matches!(body.target(), Ok(BatchTarget::Batch(id)) if id == b));
        let body = ProcessBatchBody { batch_id: None, order_id: Some(o) };
        assert!(matches!(body.target(), Ok(BatchTarget::Order(id)) if id == o));
        let body = ProcessBatchBody { batch_id: None, order_id: None };
        assert!(matches!(body.target(), Err(AppError::Validation(_))));
    }
}
