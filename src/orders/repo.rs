use anyhow::Context;
use sqlx::PgPool;
use uuid::Uuid;

use super::repo_types::{Batch, NewBatch, NewOrder, NewPayment, Order, Payment};
use crate::status::{OrderStatus, PaymentRecordStatus, PaymentStatus, ProcessingStage};

const ORDER_COLUMNS: &str = r#"
    id, user_id, batch_id, customer_email, image_count, amount_cents, currency,
    payment_status, order_status, processing_stage, stripe_customer_id,
    stripe_checkout_session_id, stripe_payment_intent_id, webhook_events,
    access_token, email_sent_at, processing_started_at, completed_at,
    created_at, updated_at
"#;

const BATCH_COLUMNS: &str = r#"
    id, user_id, order_id, name, status, analysis_type, total_images,
    processed_count, error_count, processing_started_at,
    processing_completed_at, created_at
"#;

const PAYMENT_COLUMNS: &str = r#"
    id, order_id, user_id, amount_cents, currency, status,
    stripe_checkout_session_id, stripe_payment_intent_id, webhook_events,
    failure_reason, created_at
"#;

// ---- Inserts ----

pub async fn insert_order(db: &PgPool, new: &NewOrder<'_>) -> anyhow::Result<Order> {
    let sql = format!(
        r#"
        INSERT INTO orders (user_id, customer_email, image_count, amount_cents, currency, stripe_customer_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {ORDER_COLUMNS}
        "#
    );
    sqlx::query_as::<_, Order>(&sql)
        .bind(new.user_id)
        .bind(new.customer_email)
        .bind(new.image_count)
        .bind(new.amount_cents)
        .bind(new.currency)
        .bind(new.stripe_customer_id)
        .fetch_one(db)
        .await
        .context("insert order")
}

/// Creates the batch and points the order at it.
pub async fn insert_batch(db: &PgPool, new: &NewBatch<'_>) -> anyhow::Result<Batch> {
    let sql = format!(
        r#"
        INSERT INTO batches (user_id, order_id, name, analysis_type)
        VALUES ($1, $2, $3, $4)
        RETURNING {BATCH_COLUMNS}
        "#
    );
    let batch = sqlx::query_as::<_, Batch>(&sql)
        .bind(new.user_id)
        .bind(new.order_id)
        .bind(new.name)
        .bind(new.analysis_type)
        .fetch_one(db)
        .await
        .context("insert batch")?;

    sqlx::query("UPDATE orders SET batch_id = $2, updated_at = now() WHERE id = $1")
        .bind(new.order_id)
        .bind(batch.id)
        .execute(db)
        .await
        .context("link order to batch")?;

    Ok(batch)
}

pub async fn insert_payment(db: &PgPool, new: &NewPayment<'_>) -> anyhow::Result<Payment> {
    let sql = format!(
        r#"
        INSERT INTO payments (order_id, user_id, amount_cents, currency, stripe_checkout_session_id)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {PAYMENT_COLUMNS}
        "#
    );
    sqlx::query_as::<_, Payment>(&sql)
        .bind(new.order_id)
        .bind(new.user_id)
        .bind(new.amount_cents)
        .bind(new.currency)
        .bind(new.stripe_checkout_session_id)
        .fetch_one(db)
        .await
        .context("insert payment")
}

pub async fn set_checkout_session(db: &PgPool, order_id: Uuid, session_id: &str) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE orders
           SET stripe_checkout_session_id = $2, updated_at = now()
         WHERE id = $1
        "#,
    )
    .bind(order_id)
    .bind(session_id)
    .execute(db)
    .await
    .context("store checkout session")?;
    Ok(())
}

// ---- Lookups ----

async fn find_order_where(db: &PgPool, clause: &str, value: &str) -> anyhow::Result<Option<Order>> {
    let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE {clause} LIMIT 1");
    sqlx::query_as::<_, Order>(&sql)
        .bind(value)
        .fetch_optional(db)
        .await
        .with_context(|| format!("find order where {}", clause))
}

pub async fn find_order(db: &PgPool, order_id: Uuid) -> anyhow::Result<Option<Order>> {
    let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
    sqlx::query_as::<_, Order>(&sql)
        .bind(order_id)
        .fetch_optional(db)
        .await
        .context("find order")
}

pub async fn find_order_by_batch(db: &PgPool, batch_id: Uuid) -> anyhow::Result<Option<Order>> {
    let sql = format!(
        r#"
        SELECT {ORDER_COLUMNS} FROM orders
         WHERE batch_id = $1
            OR id = (SELECT order_id FROM batches WHERE id = $1)
         LIMIT 1
        "#
    );
    sqlx::query_as::<_, Order>(&sql)
        .bind(batch_id)
        .fetch_optional(db)
        .await
        .context("find order by batch")
}

pub async fn find_order_by_payment_intent(db: &PgPool, intent_id: &str) -> anyhow::Result<Option<Order>> {
    find_order_where(db, "stripe_payment_intent_id = $1", intent_id).await
}

pub async fn find_order_by_checkout_session(db: &PgPool, session_id: &str) -> anyhow::Result<Option<Order>> {
    find_order_where(db, "stripe_checkout_session_id = $1", session_id).await
}

/// Last resort for webhooks: the payments table may know the intent before the order does.
pub async fn find_order_id_via_payments(
    db: &PgPool,
    intent_id: Option<&str>,
    session_id: Option<&str>,
) -> anyhow::Result<Option<Uuid>> {
    let row = sqlx::query_as::<_, (Uuid,)>(
        r#"
        SELECT order_id
          FROM payments
         WHERE ($1::text IS NOT NULL AND stripe_payment_intent_id = $1)
            OR ($2::text IS NOT NULL AND stripe_checkout_session_id = $2)
         ORDER BY created_at DESC
         LIMIT 1
        "#,
    )
    .bind(intent_id)
    .bind(session_id)
    .fetch_optional(db)
    .await
    .context("find order via payments")?;
    Ok(row.map(|(id,)| id))
}

pub async fn list_orders_by_user(
    db: &PgPool,
    user_id: Uuid,
    limit: i64,
    offset: i64,
) -> anyhow::Result<Vec<Order>> {
    let sql = format!(
        r#"
        SELECT {ORDER_COLUMNS} FROM orders
         WHERE user_id = $1
         ORDER BY created_at DESC
         LIMIT $2 OFFSET $3
        "#
    );
    sqlx::query_as::<_, Order>(&sql)
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(db)
        .await
        .context("list orders by user")
}

/// Paid orders nobody has started processing yet, oldest first.
pub async fn list_pending_paid_orders(db: &PgPool, limit: i64) -> anyhow::Result<Vec<Order>> {
    let sql = format!(
        r#"
        SELECT {ORDER_COLUMNS} FROM orders
         WHERE payment_status = $1
           AND processing_stage = $2
           AND batch_id IS NOT NULL
         ORDER BY created_at ASC
         LIMIT $3
        "#
    );
    sqlx::query_as::<_, Order>(&sql)
        .bind(PaymentStatus::Completed.as_str())
        .bind(ProcessingStage::Pending.as_str())
        .bind(limit)
        .fetch_all(db)
        .await
        .context("list pending paid orders")
}

pub async fn find_batch(db: &PgPool, batch_id: Uuid) -> anyhow::Result<Option<Batch>> {
    let sql = format!("SELECT {BATCH_COLUMNS} FROM batches WHERE id = $1");
    sqlx::query_as::<_, Batch>(&sql)
        .bind(batch_id)
        .fetch_optional(db)
        .await
        .context("find batch")
}

// ---- Payment lifecycle ----

/// Appends a webhook event id to the order and its payments.
/// Returns false when the order already carried the id.
pub async fn record_webhook_event(db: &PgPool, order_id: Uuid, event_id: &str) -> anyhow::Result<bool> {
    let appended = sqlx::query_as::<_, (Uuid,)>(
        r#"
        UPDATE orders
           SET webhook_events = array_append(webhook_events, $2), updated_at = now()
         WHERE id = $1 AND NOT ($2 = ANY(webhook_events))
        RETURNING id
        "#,
    )
    .bind(order_id)
    .bind(event_id)
    .fetch_optional(db)
    .await
    .context("append order webhook event")?
    .is_some();

    if appended {
        sqlx::query(
            r#"
            UPDATE payments
               SET webhook_events = array_append(webhook_events, $2), updated_at = now()
             WHERE order_id = $1 AND NOT ($2 = ANY(webhook_events))
            "#,
        )
        .bind(order_id)
        .bind(event_id)
        .execute(db)
        .await
        .context("append payment webhook event")?;
    }

    Ok(appended)
}

pub async fn mark_order_paid(db: &PgPool, order_id: Uuid, intent_id: Option<&str>) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE orders
           SET payment_status = $2,
               order_status = CASE WHEN order_status = $3::text THEN $4::text ELSE order_status END,
               stripe_payment_intent_id = COALESCE($5, stripe_payment_intent_id),
               updated_at = now()
         WHERE id = $1
        "#,
    )
    .bind(order_id)
    .bind(PaymentStatus::Completed.as_str())
    .bind(OrderStatus::Pending.as_str())
    .bind(OrderStatus::Paid.as_str())
    .bind(intent_id)
    .execute(db)
    .await
    .context("mark order paid")?;

    update_payment_record(db, order_id, PaymentRecordStatus::Succeeded, intent_id, None).await
}

/// Records a failed, canceled or expired payment. A succeeded payment is never
/// downgraded, on the order or on its payment rows.
pub async fn mark_order_unpaid(
    db: &PgPool,
    order_id: Uuid,
    status: PaymentStatus,
    intent_id: Option<&str>,
    reason: Option<&str>,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE orders
           SET payment_status = $2,
               stripe_payment_intent_id = COALESCE($3, stripe_payment_intent_id),
               updated_at = now()
         WHERE id = $1 AND payment_status <> $4
        "#,
    )
    .bind(order_id)
    .bind(status.as_str())
    .bind(intent_id)
    .bind(PaymentStatus::Completed.as_str())
    .execute(db)
    .await
    .context("mark order unpaid")?;

    let record = match status {
        PaymentStatus::Canceled | PaymentStatus::Expired => PaymentRecordStatus::Canceled,
        _ => PaymentRecordStatus::Failed,
    };
    update_payment_record(db, order_id, record, intent_id, reason).await
}

async fn update_payment_record(
    db: &PgPool,
    order_id: Uuid,
    status: PaymentRecordStatus,
    intent_id: Option<&str>,
    reason: Option<&str>,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE payments
           SET status = $2,
               stripe_payment_intent_id = COALESCE($3, stripe_payment_intent_id),
               failure_reason = $4,
               updated_at = now()
         WHERE order_id = $1 AND status <> $5
        "#,
    )
    .bind(order_id)
    .bind(status.as_str())
    .bind(intent_id)
    .bind(reason)
    .bind(PaymentRecordStatus::Succeeded.as_str())
    .execute(db)
    .await
    .context("update payment record")?;
    Ok(())
}

// ---- Processing markers ----

pub async fn mark_processing_started(db: &PgPool, order_id: Uuid, batch_id: Uuid) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE orders
           SET processing_stage = $2, order_status = $3,
               processing_started_at = COALESCE(processing_started_at, now()),
               updated_at = now()
         WHERE id = $1
        "#,
    )
    .bind(order_id)
    .bind(ProcessingStage::Processing.as_str())
    .bind(OrderStatus::Processing.as_str())
    .execute(db)
    .await
    .context("mark order processing")?;

    sqlx::query(
        r#"
        UPDATE batches
           SET status = $2,
               processing_started_at = COALESCE(processing_started_at, now()),
               updated_at = now()
         WHERE id = $1
        "#,
    )
    .bind(batch_id)
    .bind(OrderStatus::Processing.as_str())
    .execute(db)
    .await
    .context("mark batch processing")?;
    Ok(())
}

/// Puts an interrupted run back where the pending sweep will find it.
pub async fn reset_processing(db: &PgPool, order_id: Uuid, batch_id: Uuid) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE orders
           SET processing_stage = $2, order_status = $3, updated_at = now()
         WHERE id = $1 AND processing_stage = $4
        "#,
    )
    .bind(order_id)
    .bind(ProcessingStage::Pending.as_str())
    .bind(OrderStatus::Paid.as_str())
    .bind(ProcessingStage::Processing.as_str())
    .execute(db)
    .await
    .context("reset order processing")?;

    sqlx::query("UPDATE batches SET status = $2, updated_at = now() WHERE id = $1 AND status = $3")
        .bind(batch_id)
        .bind(OrderStatus::Pending.as_str())
        .bind(OrderStatus::Processing.as_str())
        .execute(db)
        .await
        .context("reset batch processing")?;
    Ok(())
}

pub async fn finish_processing(
    db: &PgPool,
    order_id: Uuid,
    batch_id: Uuid,
    status: OrderStatus,
    stage: ProcessingStage,
    processed: i32,
    failed: i32,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE batches
           SET status = $2, processed_count = $3, error_count = $4,
               processing_completed_at = now(), updated_at = now()
         WHERE id = $1
        "#,
    )
    .bind(batch_id)
    .bind(status.as_str())
    .bind(processed)
    .bind(failed)
    .execute(db)
    .await
    .context("finish batch")?;

    sqlx::query(
        r#"
        UPDATE orders
           SET order_status = $2, processing_stage = $3,
               completed_at = now(), updated_at = now()
         WHERE id = $1
        "#,
    )
    .bind(order_id)
    .bind(status.as_str())
    .bind(stage.as_str())
    .execute(db)
    .await
    .context("finish order")?;
    Ok(())
}

pub async fn store_access_token(db: &PgPool, order_id: Uuid, token: &str) -> anyhow::Result<()> {
    sqlx::query("UPDATE orders SET access_token = $2, updated_at = now() WHERE id = $1")
        .bind(order_id)
        .bind(token)
        .execute(db)
        .await
        .context("store access token")?;
    Ok(())
}

pub async fn mark_email_sent(db: &PgPool, order_id: Uuid) -> anyhow::Result<()> {
    sqlx::query("UPDATE orders SET email_sent_at = now(), updated_at = now() WHERE id = $1")
        .bind(order_id)
        .execute(db)
        .await
        .context("mark email sent")?;
    Ok(())
}
