use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use serde::Deserialize;
use tracing::instrument;
use uuid::Uuid;

use super::services::{upload_order_images, Rejected, UploadFile, UploadOutcome};
use super::validation::{decode_base64_payload, MAX_FILE_BYTES};
use crate::{
    auth::AuthUser,
    error::{AppError, AppResult},
    state::AppState,
};

/// Whole request ceiling; individual files are still capped at `MAX_FILE_BYTES`.
const MAX_REQUEST_BYTES: usize = 200 * 1024 * 1024;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/upload-order-images", post(upload_base64))
        .route("/upload-order-images/multipart", post(upload_multipart))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BYTES))
}

#[derive(Debug, Deserialize)]
pub struct Base64File {
    pub name: String,
    #[serde(default)]
    pub content_type: Option<String>,
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub struct UploadBase64Body {
    pub order_id: Uuid,
    pub files: Vec<Base64File>,
}

fn multipart_failed(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(e.body_text())
    } else {
        AppError::validation(format!("malformed multipart body: {}", e.body_text()))
    }
}

/// Decodes every file; the ones that do not decode are reported, not fatal.
pub fn decode_files(files: Vec<Base64File>) -> (Vec<UploadFile>, Vec<Rejected>) {
    let mut decoded = Vec::with_capacity(files.len());
    let mut rejected = Vec::new();
    for f in files {
        match decode_base64_payload(&f.data) {
            Ok((bytes, embedded_mime)) => {
                let content_type = f
                    .content_type
                    .or(embedded_mime)
                    .unwrap_or_else(|| "application/octet-stream".into());
                decoded.push(UploadFile { name: f.name, content_type, body: Bytes::from(bytes) });
            }
            Err(reason) => rejected.push(Rejected { name: f.name, reason }),
        }
    }
    (decoded, rejected)
}

fn oversized(name: &str, len: usize) -> Option<Rejected> {
    (len > MAX_FILE_BYTES).then(|| Rejected {
        name: name.to_string(),
        reason: format!("file exceeds {} bytes", MAX_FILE_BYTES),
    })
}

/// POST /upload-order-images { order_id, files: [{ name, content_type?, data }] }
#[instrument(skip(state, body), fields(order_id = %body.order_id))]
pub async fn upload_base64(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<UploadBase64Body>,
) -> AppResult<Json<UploadOutcome>> {
    let (files, rejected) = decode_files(body.files);
    let outcome = upload_order_images(&state, user.id, body.order_id, files, rejected).await?;
    Ok(Json(outcome))
}

/// POST /upload-order-images/multipart
/// Fields: order_id, files / files[] (one part per image)
#[instrument(skip(state, mp))]
pub async fn upload_multipart(
    State(state): State<AppState>,
    user: AuthUser,
    mut mp: Multipart,
) -> AppResult<Json<UploadOutcome>> {
    let mut order_id: Option<Uuid> = None;
    let mut files = Vec::new();
    let mut rejected = Vec::new();

    while let Some(field) = mp.next_field().await.map_err(multipart_failed)? {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("order_id") => {
                let raw = field.text().await.map_err(multipart_failed)?;
                order_id = Some(
                    raw.trim()
                        .parse()
                        .map_err(|_| AppError::validation("order_id must be a UUID"))?,
                );
            }
            Some("files") | Some("files[]") => {
                let name = field.file_name().unwrap_or("unnamed").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let body = field.bytes().await.map_err(multipart_failed)?;
                match oversized(&name, body.len()) {
                    Some(r) => rejected.push(r),
                    None => files.push(UploadFile { name, content_type, body }),
                }
            }
            _ => {}
        }
    }

    let order_id = order_id.ok_or_else(|| AppError::validation("order_id is required"))?;
    let outcome = upload_order_images(&state, user.id, order_id, files, rejected).await?;
    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    use super::*;

    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10];

    fn b64(name: &str, data: String) -> Base64File {
        Base64File { name: name.into(), content_type: None, data }
    }

    #[test]
    fn undecodable_file_is_rejected_alone() {
        let files = vec![
            b64("good.jpg", format!("data:image/jpeg;base64,{}", STANDARD.encode(JPEG))),
            b64("bad.jpg", "@@not-base64@@".into()),
            b64("plain.jpg", STANDARD.encode(JPEG)),
        ];
        let (decoded, rejected) = decode_files(files);

        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].name, "good.jpg");
        assert_eq!(decoded[0].content_type, "image/jpeg");
        assert_eq!(&decoded[0].body[..], JPEG);
        assert_eq!(decoded[1].content_type, "application/octet-stream");
        assert_eq!(rejected, vec![Rejected { name: "bad.jpg".into(), reason: "invalid base64".into() }]);
    }

    #[test]
    fn oversized_part_is_reported() {
        assert!(oversized("a.jpg", MAX_FILE_BYTES).is_none());
        let r = oversized("huge.jpg", MAX_FILE_BYTES + 1).unwrap();
        assert_eq!(r.name, "huge.jpg");
        assert!(r.reason.contains("exceeds"));
    }
}
