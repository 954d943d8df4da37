use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use super::mailer::EmailMessage;
use super::template::{self, CompletionEmail};
use crate::auth::{Caller, JwtKeys};
use crate::error::AppError;
use crate::images::repo as images_repo;
use crate::orders::repo as orders_repo;
use crate::state::AppState;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct EmailOutcome {
    pub sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[instrument(skip(st, caller))]
pub async fn send_completion_email(
    st: &AppState,
    caller: &Caller,
    order_id: Uuid,
    force: bool,
) -> anyhow::Result<EmailOutcome> {
    let order = orders_repo::find_order(&st.db, order_id)
        .await?
        .ok_or_else(|| AppError::not_found("order not found"))?;
    caller.ensure_owns(order.user_id)?;

    if order.email_sent_at.is_some() && !force {
        info!(%order_id, "completion email already sent");
        return Ok(EmailOutcome { sent: false, message_id: None, reason: Some("already sent".into()) });
    }

    let batch_id = order
        .batch_id
        .ok_or_else(|| AppError::Conflict("order has no batch".into()))?;
    let batch = orders_repo::find_batch(&st.db, batch_id)
        .await?
        .ok_or_else(|| AppError::not_found("batch not found"))?;
    let images = images_repo::list_by_batch(&st.db, batch_id).await?;

    let token = JwtKeys::new(&st.config.jwt).sign_order_access(order.id)?;

    let download_url = template::download_url(&st.config.frontend_url, order.id, &token);
    let email = CompletionEmail {
        order: &order,
        batch: &batch,
        images: &images,
        download_url: &download_url,
    };
    let message = EmailMessage {
        from: st.config.email.from.clone(),
        to: vec![order.customer_email.clone()],
        subject: template::subject(&email),
        html: template::render(&email),
    };

    let message_id = st
        .mailer
        .send(&message)
        .await
        .map_err(|e| AppError::upstream(format!("email provider error: {:#}", e)))?;
    // the emailed link replaces any earlier one only once it is on its way
    orders_repo::store_access_token(&st.db, order.id, &token).await?;
    orders_repo::mark_email_sent(&st.db, order.id).await?;
    info!(%order_id, %message_id, "completion email sent");

    Ok(EmailOutcome { sent: true, message_id: Some(message_id), reason: None })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::notifications::mailer::Mailer;
    use crate::state::fakes::{seed_image, seed_paid_order, test_db, FakeMailer};

    struct DownMailer;

    #[async_trait]
    impl Mailer for DownMailer {
        async fn send(&self, _message: &EmailMessage) -> anyhow::Result<String> {
            anyhow::bail!("503 service unavailable")
        }
    }

    #[tokio::test]
    async fn failed_send_keeps_previous_link() {
        let Some(db) = test_db().await else { return };
        let st = AppState { mailer: Arc::new(DownMailer), ..AppState::with_db(db) };
        let (order, batch) = seed_paid_order(&st.db, 1).await;
        seed_image(&st.db, &order, batch.id, "a.jpg").await;
        orders_repo::store_access_token(&st.db, order.id, "earlier-token").await.unwrap();

        let err = send_completion_email(&st, &Caller::Service, order.id, true).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<AppError>(), Some(AppError::Upstream(_))));

        let stored = orders_repo::find_order(&st.db, order.id).await.unwrap().unwrap();
        assert_eq!(stored.access_token.as_deref(), Some("earlier-token"));
        assert!(stored.email_sent_at.is_none());
    }

    #[tokio::test]
    async fn sends_once_unless_forced() {
        let Some(db) = test_db().await else { return };
        let mailer = Arc::new(FakeMailer::default());
        let st = AppState { mailer: mailer.clone(), ..AppState::with_db(db) };
        let (order, batch) = seed_paid_order(&st.db, 1).await;
        seed_image(&st.db, &order, batch.id, "a.jpg").await;

        let first = send_completion_email(&st, &Caller::Service, order.id, false).await.unwrap();
        assert!(first.sent);
        let stored = orders_repo::find_order(&st.db, order.id).await.unwrap().unwrap();
        let token = stored.access_token.clone().unwrap();
        assert!(stored.email_sent_at.is_some());
        assert!(mailer.sent.lock().unwrap()[0].html.contains(&token));

        let again = send_completion_email(&st, &Caller::Service, order.id, false).await.unwrap();
        assert_eq!(again, EmailOutcome { sent: false, message_id: None, reason: Some("already sent".into()) });

        let forced = send_completion_email(&st, &Caller::Service, order.id, true).await.unwrap();
        assert!(forced.sent);
        assert_eq!(mailer.sent.lock().unwrap().len(), 2);
    }
}
