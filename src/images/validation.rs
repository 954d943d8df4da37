use base64::{engine::general_purpose::STANDARD, Engine as _};

pub const MAX_FILE_BYTES: usize = 20 * 1024 * 1024;

/// Upload ceiling per batch, independent of how many images were paid for.
pub const MAX_FILES_PER_BATCH: i64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Webp,
    Heic,
    Gif,
}

impl ImageKind {
    pub fn from_mime(ct: &str) -> Option<Self> {
        let essence = ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match essence.as_str() {
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/webp" => Some(Self::Webp),
            "image/heic" | "image/heif" => Some(Self::Heic),
            "image/gif" => Some(Self::Gif),
            _ => None,
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Webp => "image/webp",
            Self::Heic => "image/heic",
            Self::Gif => "image/gif",
        }
    }

    pub fn ext(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Webp => "webp",
            Self::Heic => "heic",
            Self::Gif => "gif",
        }
    }

    /// Checks the leading bytes against the format's signature.
    pub fn matches(self, data: &[u8]) -> bool {
        match self {
            Self::Jpeg => data.starts_with(&[0xFF, 0xD8, 0xFF]),
            Self::Png => data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]),
            Self::Webp => data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP",
            Self::Gif => data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a"),
            Self::Heic => {
                data.len() >= 12
                    && &data[4..8] == b"ftyp"
                    && matches!(
                        &data[8..12],
                        b"heic" | b"heix" | b"hevc" | b"hevx" | b"mif1" | b"msf1" | b"heim" | b"heis"
                    )
            }
        }
    }
}

/// Validates a declared content type against the payload; returns the detected kind.
pub fn validate_image(content_type: &str, data: &[u8]) -> Result<ImageKind, String> {
    let kind = ImageKind::from_mime(content_type)
        .ok_or_else(|| format!("unsupported content type `{}`", content_type))?;
    if data.is_empty() {
        return Err("file is empty".into());
    }
    if data.len() > MAX_FILE_BYTES {
        return Err(format!("file exceeds {} bytes", MAX_FILE_BYTES));
    }
    if !kind.matches(data) {
        return Err(format!("file content does not look like {}", kind.mime()));
    }
    Ok(kind)
}

/// Decodes plain base64 or a `data:<mime>;base64,<payload>` URL.
/// Returns the bytes and the mime type embedded in a data URL, if any.
pub fn decode_base64_payload(raw: &str) -> Result<(Vec<u8>, Option<String>), String> {
    let (mime, payload) = match raw.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest
                .split_once(',')
                .ok_or_else(|| "malformed data URL".to_string())?;
            let mime = header.strip_suffix(";base64").ok_or_else(|| "data URL is not base64".to_string())?;
            (Some(mime.to_string()).filter(|m| !m.is_empty()), payload)
        }
        None => (None, raw),
    };
    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD.decode(cleaned).map_err(|_| "invalid base64".to_string())?;
    Ok((bytes, mime))
}

#[cfg(test)]
mod tests {
    use super::*;

    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];
    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];

    #[test]
    fn mime_mapping() {
        assert_eq!(ImageKind::from_mime("image/jpg"), Some(ImageKind::Jpeg));
        assert_eq!(ImageKind::from_mime("IMAGE/PNG"), Some(ImageKind::Png));
        assert_eq!(ImageKind::from_mime("image/webp; q=1"), Some(ImageKind::Webp));
        assert_eq!(ImageKind::from_mime("application/pdf"), None);
        assert_eq!(ImageKind::Heic.ext(), "heic");
    }

    #[test]
    fn magic_bytes_must_match_declared_type() {
        assert_eq!(validate_image("image/jpeg", JPEG), Ok(ImageKind::Jpeg));
        assert_eq!(validate_image("image/png", PNG), Ok(ImageKind::Png));
        assert!(validate_image("image/png", JPEG).is_err());
        assert!(validate_image("image/jpeg", b"<html>").is_err());
    }

    #[test]
    fn container_formats() {
        let mut webp = b"RIFF".to_vec();
        webp.extend_from_slice(&[0x24, 0, 0, 0]);
        webp.extend_from_slice(b"WEBPVP8 ");
        assert!(ImageKind::Webp.matches(&webp));

        let mut heic = vec![0, 0, 0, 0x18];
        heic.extend_from_slice(b"ftypheic");
        assert!(ImageKind::Heic.matches(&heic));
        assert!(!ImageKind::Heic.matches(b"ftypheic"));
        assert!(ImageKind::Gif.matches(b"GIF89a\x01\x00"));
    }

    #[test]
    fn rejects_empty_and_unknown() {
        assert_eq!(validate_image("image/jpeg", &[]), Err("file is empty".into()));
        assert!(validate_image("text/plain", JPEG).unwrap_err().contains("unsupported"));
    }

    #[test]
    fn decodes_plain_and_data_url() {
        let encoded = STANDARD.encode(JPEG);
        let (bytes, mime) = decode_base64_payload(&encoded).unwrap();
        assert_eq!(bytes, JPEG);
        assert_eq!(mime, None);

        let url = format!("data:image/jpeg;base64,{}", encoded);
        let (bytes, mime) = decode_base64_payload(&url).unwrap();
        assert_eq!(bytes, JPEG);
        assert_eq!(mime.as_deref(), Some("image/jpeg"));

        assert!(decode_base64_payload("data:image/png,abc").is_err());
        assert!(decode_base64_payload("@@not base64@@").is_err());
    }
}
