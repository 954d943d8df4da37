use anyhow::Context;
use bytes::Bytes;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::repo::{self, Image, NewImage};
use super::validation::{validate_image, ImageKind, MAX_FILES_PER_BATCH};
use crate::error::AppError;
use crate::orders::repo as orders_repo;
use crate::state::AppState;
use crate::storage::original_key;

pub struct UploadFile {
    pub name: String,
    pub content_type: String,
    pub body: Bytes,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Rejected {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct UploadOutcome {
    pub order_id: Uuid,
    pub batch_id: Uuid,
    pub uploaded: Vec<Image>,
    pub rejected: Vec<Rejected>,
}

/// How many more images the batch may take.
pub fn remaining_slots(paid_images: i32, already_uploaded: i64) -> i64 {
    let ceiling = i64::from(paid_images).min(MAX_FILES_PER_BATCH);
    (ceiling - already_uploaded).max(0)
}

/// Splits files into those worth storing and those rejected up front.
pub fn screen_files(files: Vec<UploadFile>, mut slots: i64) -> (Vec<(UploadFile, ImageKind)>, Vec<Rejected>) {
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();
    for file in files {
        let kind = match validate_image(&file.content_type, &file.body) {
            Ok(kind) => kind,
            Err(reason) => {
                rejected.push(Rejected { name: file.name, reason });
                continue;
            }
        };
        if slots == 0 {
            rejected.push(Rejected {
                name: file.name,
                reason: "image limit for this order reached".into(),
            });
            continue;
        }
        slots -= 1;
        accepted.push((file, kind));
    }
    (accepted, rejected)
}

/// Stores what it can; `rejected` carries files the caller already turned away.
#[instrument(skip(st, files, rejected), fields(files = files.len(), pre_rejected = rejected.len()))]
pub async fn upload_order_images(
    st: &AppState,
    user_id: Uuid,
    order_id: Uuid,
    files: Vec<UploadFile>,
    mut rejected: Vec<Rejected>,
) -> anyhow::Result<UploadOutcome> {
    if files.is_empty() && rejected.is_empty() {
        return Err(AppError::validation("at least one file is required").into());
    }

    let order = orders_repo::find_order(&st.db, order_id)
        .await?
        .ok_or_else(|| AppError::not_found("order not found"))?;
    if order.user_id != user_id {
        return Err(AppError::Forbidden("order belongs to another user".into()).into());
    }
    let batch_id = order
        .batch_id
        .ok_or_else(|| AppError::Conflict("order has no batch".into()))?;

    let existing = repo::count_by_batch(&st.db, batch_id).await?;
    let (accepted, screened_out) = screen_files(files, remaining_slots(order.image_count, existing));
    rejected.extend(screened_out);

    let mut uploaded = Vec::with_capacity(accepted.len());
    for (file, kind) in accepted {
        let image_id = Uuid::new_v4();
        let key = original_key(user_id, batch_id, image_id, kind.ext());
        let size = file.body.len() as i64;

        if let Err(e) = st.storage.put_object(&key, file.body, kind.mime()).await {
            warn!(error = %format!("{:#}", e), %key, "storing original failed");
            rejected.push(Rejected { name: file.name, reason: "storage upload failed".into() });
            continue;
        }

        let new = NewImage {
            id: image_id,
            batch_id,
            order_id,
            user_id,
            original_filename: &file.name,
            mime_type: kind.mime(),
            file_size: size,
            storage_path_original: &key,
        };
        match repo::insert_image(&st.db, &new).await {
            Ok(image) => uploaded.push(image),
            Err(e) => {
                warn!(error = %format!("{:#}", e), %key, "image row insert failed; removing object");
                if let Err(e) = st.storage.delete_object(&key).await {
                    warn!(error = %format!("{:#}", e), %key, "orphaned original left in storage");
                }
                rejected.push(Rejected { name: file.name, reason: "could not record image".into() });
            }
        }
    }

    let total = repo::refresh_batch_total(&st.db, batch_id)
        .await
        .context("refresh batch total after upload")?;
    info!(%order_id, %batch_id, uploaded = uploaded.len(), rejected = rejected.len(), total, "upload finished");

    if uploaded.is_empty() {
        let summary = rejected
            .iter()
            .map(|r| format!("{}: {}", r.name, r.reason))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(AppError::validation(format!("no files were accepted ({})", summary)).into());
    }

    Ok(UploadOutcome { order_id, batch_id, uploaded, rejected })
}

/// Presigns every key; one failure fails the whole list.
pub async fn presign_many(st: &AppState, keys: &[&str], expires_seconds: u64) -> anyhow::Result<Vec<String>> {
    let mut out = Vec::with_capacity(keys.len());
    for k in keys {
        out.push(
            st.storage
                .presign_get(k, expires_seconds)
                .await
                .with_context(|| format!("presign {}", k))?,
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10];

    fn file(name: &str, ct: &str, body: &'static [u8]) -> UploadFile {
        UploadFile { name: name.into(), content_type: ct.into(), body: Bytes::from_static(body) }
    }

    #[test]
    fn slots_respect_paid_count_and_hard_cap() {
        assert_eq!(remaining_slots(10, 0), 10);
        assert_eq!(remaining_slots(10, 7), 3);
        assert_eq!(remaining_slots(10, 12), 0);
        assert_eq!(remaining_slots(900, 0), MAX_FILES_PER_BATCH);
    }

    #[test]
    fn screening_reports_each_rejection() {
        let files = vec![
            file("a.jpg", "image/jpeg", JPEG),
            file("fake.png", "image/png", JPEG),
            file("doc.pdf", "application/pdf", b"%PDF"),
            file("b.jpg", "image/jpeg", JPEG),
            file("c.jpg", "image/jpeg", JPEG),
        ];
        let (accepted, rejected) = screen_files(files, 2);
        let names: Vec<_> = accepted.iter().map(|(f, _)| f.name.as_str()).collect();
        assert_eq!(names, ["a.jpg", "b.jpg"]);
        let rejected_names: Vec<_> = rejected.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(rejected_names, ["fake.png", "doc.pdf", "c.jpg"]);
        assert!(rejected[2].reason.contains("limit"));
    }

    #[tokio::test]
    async fn presign_many_keeps_order() {
        let state = AppState::fake();
        let urls = presign_many(&state, &["a/b/c.jpg", "x/y/z.png"], 1800).await.unwrap();
        assert_eq!(urls.len(), 2);
        assert!(urls[0].ends_with("a/b/c.jpg"));
        assert!(urls[1].ends_with("x/y/z.png"));
    }

    #[tokio::test]
    async fn partial_upload_stores_the_good_files() {
        let Some(db) = crate::state::fakes::test_db().await else { return };
        let st = AppState::with_db(db);
        let (order, batch) = crate::state::fakes::seed_order(&st.db, 2).await;
        let decode_failure = Rejected { name: "bad.jpg".into(), reason: "invalid base64".into() };

        let outcome = upload_order_images(
            &st,
            order.user_id,
            order.id,
            vec![file("good.jpg", "image/jpeg", JPEG), file("doc.pdf", "application/pdf", b"%PDF")],
            vec![decode_failure.clone()],
        )
        .await
        .unwrap();

        assert_eq!(outcome.batch_id, batch.id);
        assert_eq!(outcome.uploaded.len(), 1);
        assert_eq!(outcome.uploaded[0].original_filename, "good.jpg");
        let rejected_names: Vec<_> = outcome.rejected.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(rejected_names, ["bad.jpg", "doc.pdf"]);
        assert_eq!(outcome.rejected[0], decode_failure);
        assert!(st.storage.object_exists(&outcome.uploaded[0].storage_path_original).await.unwrap());
    }

    #[tokio::test]
    async fn upload_with_nothing_storable_fails() {
        let Some(db) = crate::state::fakes::test_db().await else { return };
        let st = AppState::with_db(db);
        let (order, _) = crate::state::fakes::seed_order(&st.db, 2).await;
        let decode_failure = Rejected { name: "bad.jpg".into(), reason: "invalid base64".into() };

        let err = upload_order_images(&st, order.user_id, order.id, Vec::new(), vec![decode_failure])
            .await
            .unwrap_err();
        match err.downcast_ref::<AppError>() {
            Some(AppError::Validation(msg)) => assert!(msg.contains("bad.jpg: invalid base64")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn upload_to_someone_elses_order_is_forbidden() {
        let Some(db) = crate::state::fakes::test_db().await else { return };
        let st = AppState::with_db(db);
        let (order, _) = crate::state::fakes::seed_order(&st.db, 1).await;

        let err = upload_order_images(&st, Uuid::new_v4(), order.id, vec![file("a.jpg", "image/jpeg", JPEG)], Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<AppError>(), Some(AppError::Forbidden(_))));
    }
}
