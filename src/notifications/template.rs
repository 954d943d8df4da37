use std::fmt::Write as _;

use crate::images::repo::Image;
use crate::orders::repo_types::{Batch, Order};
use crate::status::ImageStatus;

pub struct CompletionEmail<'a> {
    pub order: &'a Order,
    pub batch: &'a Batch,
    pub images: &'a [Image],
    pub download_url: &'a str,
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

pub fn download_url(frontend_url: &str, order_id: uuid::Uuid, token: &str) -> String {
    format!("{}/orders/{}?token={}", frontend_url.trim_end_matches('/'), order_id, token)
}

pub fn subject(email: &CompletionEmail<'_>) -> String {
    format!("Your ORBIT order for \"{}\" is ready", email.batch.name)
}

pub fn render(email: &CompletionEmail<'_>) -> String {
    let completed = email
        .images
        .iter()
        .filter(|i| i.processing_status == ImageStatus::Completed.as_str())
        .count();
    let failed = email
        .images
        .iter()
        .filter(|i| i.processing_status == ImageStatus::Error.as_str())
        .count();

    let mut rows = String::new();
    for img in email.images {
        let _ = write!(
            rows,
            "<tr><td>{}</td><td>{}</td></tr>",
            escape_html(&img.original_filename),
            escape_html(&img.processing_status)
        );
    }

    let greeting = escape_html(&email.order.customer_email);
    let batch_name = escape_html(&email.batch.name);
    let url = escape_html(email.download_url);

    format!(
        r#"<!DOCTYPE html>
<html>
<body style="font-family: sans-serif; color: #1f2937;">
  <h1>Your images are ready</h1>
  <p>Hi {greeting},</p>
  <p>We finished processing your order <strong>{order_id}</strong>.</p>
  <table cellpadding="4">
    <tr><td>Batch</td><td>{batch_name}</td></tr>
    <tr><td>Images</td><td>{total}</td></tr>
    <tr><td>Processed</td><td>{completed}</td></tr>
    <tr><td>Failed</td><td>{failed}</td></tr>
  </table>
  <h2>Images</h2>
  <table cellpadding="4">
    <tr><th align="left">File</th><th align="left">Status</th></tr>
    {rows}
  </table>
  <p><a href="{url}">Download your processed images</a></p>
  <p>The link stays valid for 7 days.</p>
</body>
</html>"#,
        order_id = email.order.id,
        total = email.images.len(),
    )
}
