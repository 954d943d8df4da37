use anyhow::Context;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::status::ImageStatus;

/// Image record in the database.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Image {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub original_filename: String,
    pub mime_type: String,
    pub file_size: i64,
    pub storage_path_original: String,
    pub storage_path_processed: Option<String>,
    pub ai_analysis: Option<serde_json::Value>,
    pub embed_result: Option<serde_json::Value>,
    pub processing_status: String,
    pub error_message: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub processed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

const IMAGE_COLUMNS: &str = r#"
    id, batch_id, order_id, user_id, original_filename, mime_type, file_size,
    storage_path_original, storage_path_processed, ai_analysis, embed_result,
    processing_status, error_message, processed_at, created_at
"#;

pub struct NewImage<'a> {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub original_filename: &'a str,
    pub mime_type: &'a str,
    pub file_size: i64,
    pub storage_path_original: &'a str,
}

/// Insert a new pending image row.
pub async fn insert_image(db: &PgPool, new: &NewImage<'_>) -> anyhow::Result<Image> {
    let sql = format!(
        r#"
        INSERT INTO images (id, batch_id, order_id, user_id, original_filename,
                            mime_type, file_size, storage_path_original, processing_status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {IMAGE_COLUMNS}
        "#
    );
    sqlx::query_as::<_, Image>(&sql)
        .bind(new.id)
        .bind(new.batch_id)
        .bind(new.order_id)
        .bind(new.user_id)
        .bind(new.original_filename)
        .bind(new.mime_type)
        .bind(new.file_size)
        .bind(new.storage_path_original)
        .bind(ImageStatus::Pending.as_str())
        .fetch_one(db)
        .await
        .context("insert image")
}

pub async fn count_by_batch(db: &PgPool, batch_id: Uuid) -> anyhow::Result<i64> {
    let (count,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM images WHERE batch_id = $1")
        .bind(batch_id)
        .fetch_one(db)
        .await
        .context("count images by batch")?;
    Ok(count)
}

/// Recomputes `batches.total_images` from the images table.
pub async fn refresh_batch_total(db: &PgPool, batch_id: Uuid) -> anyhow::Result<i32> {
    let (total,) = sqlx::query_as::<_, (i32,)>(
        r#"
        UPDATE batches
           SET total_images = (SELECT COUNT(*)::int FROM images WHERE batch_id = $1),
               updated_at = now()
         WHERE id = $1
        RETURNING total_images
        "#,
    )
    .bind(batch_id)
    .fetch_one(db)
    .await
    .context("refresh batch total")?;
    Ok(total)
}

// ---- Queries ----

/// All images of a batch, upload order.
pub async fn list_by_batch(db: &PgPool, batch_id: Uuid) -> anyhow::Result<Vec<Image>> {
    let sql = format!(
        "SELECT {IMAGE_COLUMNS} FROM images WHERE batch_id = $1 ORDER BY created_at ASC"
    );
    sqlx::query_as::<_, Image>(&sql)
        .bind(batch_id)
        .fetch_all(db)
        .await
        .context("list images by batch")
}

/// Images still waiting for analysis, upload order.
pub async fn list_pending_by_batch(db: &PgPool, batch_id: Uuid) -> anyhow::Result<Vec<Image>> {
    let sql = format!(
        r#"
        SELECT {IMAGE_COLUMNS} FROM images
         WHERE batch_id = $1 AND processing_status = $2
         ORDER BY created_at ASC
        "#
    );
    sqlx::query_as::<_, Image>(&sql)
        .bind(batch_id)
        .bind(ImageStatus::Pending.as_str())
        .fetch_all(db)
        .await
        .context("list pending images")
}

pub async fn find_image(db: &PgPool, image_id: Uuid) -> anyhow::Result<Option<Image>> {
    let sql = format!("SELECT {IMAGE_COLUMNS} FROM images WHERE id = $1");
    sqlx::query_as::<_, Image>(&sql)
        .bind(image_id)
        .fetch_optional(db)
        .await
        .context("find image")
}

// ---- Status updates ----

pub async fn set_status(
    db: &PgPool,
    image_id: Uuid,
    status: ImageStatus,
    error: Option<&str>,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE images
           SET processing_status = $2, error_message = $3, updated_at = now(),
               processed_at = CASE WHEN $2::text = $4::text THEN now() ELSE processed_at END
         WHERE id = $1
        "#,
    )
    .bind(image_id)
    .bind(status.as_str())
    .bind(error)
    .bind(ImageStatus::Completed.as_str())
    .execute(db)
    .await
    .context("set image status")?;
    Ok(())
}

pub async fn store_analysis(db: &PgPool, image_id: Uuid, analysis: &serde_json::Value) -> anyhow::Result<()> {
    sqlx::query("UPDATE images SET ai_analysis = $2, updated_at = now() WHERE id = $1")
        .bind(image_id)
        .bind(analysis)
        .execute(db)
        .await
        .context("store analysis")?;
    Ok(())
}

pub async fn store_processed(
    db: &PgPool,
    image_id: Uuid,
    processed_path: &str,
    embed_result: &serde_json::Value,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE images
           SET storage_path_processed = $2, embed_result = $3, updated_at = now()
         WHERE id = $1
        "#,
    )
    .bind(image_id)
    .bind(processed_path)
    .bind(embed_result)
    .execute(db)
    .await
    .context("store processed path")?;
    Ok(())
}
