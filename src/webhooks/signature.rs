use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed payload, seconds.
pub const TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("malformed Stripe-Signature header")]
    Malformed,
    #[error("signature timestamp outside tolerance")]
    Stale,
    #[error("no matching v1 signature")]
    Mismatch,
}

struct ParsedHeader<'a> {
    timestamp: i64,
    signatures: Vec<&'a str>,
}

fn parse_header(header: &str) -> Result<ParsedHeader<'_>, SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" => signatures.push(value),
            _ => {}
        }
    }
    match timestamp {
        Some(timestamp) if !signatures.is_empty() => Ok(ParsedHeader { timestamp, signatures }),
        _ => Err(SignatureError::Malformed),
    }
}

fn signed_payload_mac(secret: &str, timestamp: i64, payload: &[u8]) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac
}

pub fn compute(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    hex::encode(signed_payload_mac(secret, timestamp, payload).finalize().into_bytes())
}

/// Verifies a `Stripe-Signature` header (`t=...,v1=...[,v1=...]`) against the raw body.
pub fn verify(header: &str, payload: &[u8], secret: &str, now: i64) -> Result<(), SignatureError> {
    let parsed = parse_header(header)?;
    if (now - parsed.timestamp).abs() > TOLERANCE_SECS {
        return Err(SignatureError::Stale);
    }
    let mac = signed_payload_mac(secret, parsed.timestamp, payload);
    let matched = parsed
        .signatures
        .iter()
        .filter_map(|sig| hex::decode(sig).ok())
        .any(|sig| mac.clone().verify_slice(&sig).is_ok());
    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"id":"evt_1","type":"checkout.session.completed"}"#;

    fn header(ts: i64, body: &[u8]) -> String {
        format!("t={},v1={}", ts, compute(SECRET, ts, body))
    }

    #[test]
    fn accepts_valid_signature() {
        let now = 1_700_000_000;
        assert_eq!(verify(&header(now, BODY), BODY, SECRET, now + 10), Ok(()));
    }

    #[test]
    fn accepts_any_matching_v1() {
        let now = 1_700_000_000;
        let h = format!("t={},v1=deadbeef,v1={}", now, compute(SECRET, now, BODY));
        assert_eq!(verify(&h, BODY, SECRET, now), Ok(()));
    }

    #[test]
    fn rejects_tampered_body() {
        let now = 1_700_000_000;
        let h = header(now, BODY);
        assert_eq!(verify(&h, b"{}", SECRET, now), Err(SignatureError::Mismatch));
        assert_eq!(verify(&h, BODY, "other", now), Err(SignatureError::Mismatch));
    }

    #[test]
    fn skips_non_hex_candidates() {
        let now = 1_700_000_000;
        let h = format!("t={},v1=zz-not-hex,v1={}", now, compute(SECRET, now, BODY));
        assert_eq!(verify(&h, BODY, SECRET, now), Ok(()));
        let h = format!("t={},v1=zz-not-hex", now);
        assert_eq!(verify(&h, BODY, SECRET, now), Err(SignatureError::Mismatch));
    }

    #[test]
    fn rejects_truncated_signature() {
        let now = 1_700_000_000;
        let sig = compute(SECRET, now, BODY);
        let h = format!("t={},v1={}", now, &sig[..32]);
        assert_eq!(verify(&h, BODY, SECRET, now), Err(SignatureError::Mismatch));
    }

    #[test]
    fn rejects_stale_timestamp() {
        let now = 1_700_000_000;
        let h = header(now - TOLERANCE_SECS - 1, BODY);
        assert_eq!(verify(&h, BODY, SECRET, now), Err(SignatureError::Stale));
    }

    #[test]
    fn rejects_malformed_header() {
        assert_eq!(verify("", BODY, SECRET, 0), Err(SignatureError::Malformed));
        assert_eq!(verify("t=abc,v1=00", BODY, SECRET, 0), Err(SignatureError::Malformed));
        assert_eq!(verify("t=10", BODY, SECRET, 10), Err(SignatureError::Malformed));
    }
}
