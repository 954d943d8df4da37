use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use uuid::Uuid;

use super::repo;
use super::repo_types::{Batch, Order};
use crate::{
    auth::{AuthUser, JwtKeys},
    error::{AppError, AppResult},
    images::repo::{self as images_repo, Image},
    images::services::presign_many,
    state::AppState,
};

/// Presigned download links in the access view live 30 minutes.
const DOWNLOAD_URL_TTL_SECS: u64 = 30 * 60;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/orders", get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/access", get(access_order))
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}
fn default_limit() -> i64 {
    20
}

#[derive(Debug, Serialize)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: Order,
    pub batch: Option<Batch>,
    pub images: Vec<Image>,
}

#[derive(Debug, Deserialize)]
pub struct AccessQuery {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct AccessibleImage {
    pub image_id: Uuid,
    pub original_filename: String,
    pub status: String,
    pub processed: bool,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct OrderAccess {
    pub order_id: Uuid,
    pub batch_name: Option<String>,
    pub order_status: String,
    pub expires_in: u64,
    pub images: Vec<AccessibleImage>,
}

#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(p): Query<Pagination>,
) -> AppResult<Json<Vec<Order>>> {
    let orders = repo::list_orders_by_user(&state.db, user.id, p.limit.clamp(1, 100), p.offset.max(0)).await?;
    Ok(Json(orders))
}

async fn load_details(st: &AppState, order: Order) -> anyhow::Result<OrderDetails> {
    let (batch, images) = match order.batch_id {
        Some(batch_id) => (
            repo::find_batch(&st.db, batch_id).await?,
            images_repo::list_by_batch(&st.db, batch_id).await?,
        ),
        None => (None, Vec::new()),
    };
    Ok(OrderDetails { order, batch, images })
}

#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<OrderDetails>> {
    let order = repo::find_order(&state.db, id)
        .await?
        .filter(|o| o.user_id == user.id)
        .ok_or_else(|| AppError::not_found("order not found"))?;
    Ok(Json(load_details(&state, order).await?))
}

/// GET /orders/:id/access?token=... (emailed link, no session needed)
#[instrument(skip(state, q))]
pub async fn access_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(q): Query<AccessQuery>,
) -> AppResult<Json<OrderAccess>> {
    let claims = JwtKeys::new(&state.config.jwt)
        .verify_order_access(&q.token)
        .map_err(|e| {
            warn!(error = %e, order_id = %id, "order access token rejected");
            AppError::Unauthorized("invalid or expired access token".into())
        })?;
    if claims.sub != id {
        return Err(AppError::Forbidden("token was issued for another order".into()));
    }

    let order = repo::find_order(&state.db, id)
        .await?
        .ok_or_else(|| AppError::not_found("order not found"))?;
    // a resent email replaces the token; older links stop working
    if order.access_token.as_deref().is_some_and(|stored| stored != q.token) {
        return Err(AppError::Unauthorized("access token has been superseded".into()));
    }

    let details = load_details(&state, order).await?;
    let keys: Vec<&str> = details
        .images
        .iter()
        .map(|img| img.storage_path_processed.as_deref().unwrap_or(&img.storage_path_original))
        .collect();
    let urls = presign_many(&state, &keys, DOWNLOAD_URL_TTL_SECS)
        .await
        .map_err(|e| AppError::upstream(format!("storage error: {:#}", e)))?;

    let images = details
        .images
        .into_iter()
        .zip(urls)
        .map(|(img, url)| AccessibleImage {
            image_id: img.id,
            processed: img.storage_path_processed.is_some(),
            original_filename: img.original_filename,
            status: img.processing_status,
            url,
        })
        .collect();

    Ok(Json(OrderAccess {
        order_id: details.order.id,
        batch_name: details.batch.map(|b| b.name),
        order_status: details.order.order_status,
        expires_in: DOWNLOAD_URL_TTL_SECS,
        images,
    }))
}
