//! Push webhook authentication and decoding.
//!
//! Hosts sign the raw body with `X-Hub-Signature: sha1=<hex>`. Hosts that
//! cannot sign may embed the shared secret in the JSON body instead; that is
//! only honoured when no signature header was sent.

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use portlane_core::PushEvent;
use serde::Deserialize;
use sha1::Sha1;
use thiserror::Error;

type HmacSha1 = Hmac<Sha1>;

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature";

/// Event headers, in order of precedence.
const EVENT_HEADERS: [&str; 3] = ["X-GitHub-Event", "X-Gitea-Event", "X-Gogs-Event"];

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing signature")]
    MissingSignature,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("unsupported event: {0}")]
    UnsupportedEvent(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

/// An authenticated webhook delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    Ping,
    Push(PushEvent),
}

#[derive(Deserialize)]
struct EmbeddedSecret {
    #[serde(default)]
    secret: Option<String>,
}

/// `sha1=<hex>` signature of `body`.
pub fn compute_signature(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).expect("HMAC can take any size key");
    mac.update(body);
    format!("sha1={}", hex::encode(mac.finalize().into_bytes()))
}

/// Check a `sha1=<hex>` signature in constant time.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Some(sig_hex) = signature.strip_prefix("sha1=") else {
        return false;
    };

    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };

    let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).expect("HMAC can take any size key");
    mac.update(body);

    mac.verify_slice(&sig_bytes).is_ok()
}

/// The event type announced by the host, if any.
pub fn event_type(headers: &HeaderMap) -> Option<&str> {
    EVENT_HEADERS
        .iter()
        .find_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()))
}

fn authenticate(headers: &HeaderMap, body: &[u8], secret: &str) -> Result<(), WebhookError> {
    if let Some(signature) = headers.get(SIGNATURE_HEADER) {
        let signature = signature.to_str().unwrap_or_default();
        return if verify_signature(secret, body, signature) {
            Ok(())
        } else {
            Err(WebhookError::InvalidSignature)
        };
    }

    let embedded: EmbeddedSecret = serde_json::from_slice(body)?;
    match embedded.secret {
        Some(s) if s == secret => Ok(()),
        Some(_) => Err(WebhookError::InvalidSignature),
        None => Err(WebhookError::MissingSignature),
    }
}

/// Authenticate a delivery, then classify and decode it.
///
/// With no secret configured every delivery is accepted. Deliveries without
/// an event header are treated as pushes.
pub fn validate(
    headers: &HeaderMap,
    body: &[u8],
    secret: Option<&str>,
) -> Result<WebhookEvent, WebhookError> {
    if let Some(secret) = secret.filter(|s| !s.is_empty()) {
        authenticate(headers, body, secret)?;
    }

    match event_type(headers) {
        Some("ping") => return Ok(WebhookEvent::Ping),
        Some("push") | None => {}
        Some(other) => return Err(WebhookError::UnsupportedEvent(other.to_string())),
    }

    Ok(WebhookEvent::Push(serde_json::from_slice(body)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "It's a Secret to Everybody";
    const BODY: &[u8] = br#"{"repository":{"full_name":"example/ports"},"commits":[{"id":"abc","modified":["net/foo/Makefile"]}]}"#;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    #[test]
    fn test_signature_roundtrip() {
        let signature = compute_signature(SECRET, BODY);
        assert!(signature.starts_with("sha1="));
        assert_eq!(signature.len(), "sha1=".len() + 40);
        assert!(verify_signature(SECRET, BODY, &signature));
        assert!(!verify_signature("other", BODY, &signature));
        assert!(!verify_signature(SECRET, b"tampered", &signature));
    }

    #[test]
    fn test_signature_known_value() {
        // HMAC-SHA1("key", "The quick brown fox jumps over the lazy dog")
        assert_eq!(
            compute_signature("key", b"The quick brown fox jumps over the lazy dog"),
            "sha1=de7c9b85b8b78aa6bc8a7a36f70a90701c9db4d9"
        );
    }

    #[test]
    fn test_malformed_signatures() {
        assert!(!verify_signature(SECRET, BODY, "sha256=00"));
        assert!(!verify_signature(SECRET, BODY, "sha1=not-hex"));
        assert!(!verify_signature(SECRET, BODY, ""));
    }

    #[test]
    fn test_signed_push() {
        let signature = compute_signature(SECRET, BODY);
        let headers = headers(&[("X-GitHub-Event", "push"), (SIGNATURE_HEADER, &signature)]);

        let event = validate(&headers, BODY, Some(SECRET)).unwrap();
        let WebhookEvent::Push(push) = event else {
            panic!("expected push, got {:?}", event);
        };
        assert_eq!(push.repository.full_name, "example/ports");
        assert_eq!(push.commits[0].modified, vec!["net/foo/Makefile"]);
    }

    #[test]
    fn test_bad_signature_rejected() {
        let headers = headers(&[("X-GitHub-Event", "push"), (SIGNATURE_HEADER, "sha1=0000")]);
        assert!(matches!(
            validate(&headers, BODY, Some(SECRET)),
            Err(WebhookError::InvalidSignature)
        ));
    }

    #[test]
    fn test_missing_signature_rejected() {
        let headers = headers(&[("X-GitHub-Event", "push")]);
        assert!(matches!(
            validate(&headers, BODY, Some(SECRET)),
            Err(WebhookError::MissingSignature)
        ));
    }

    #[test]
    fn test_embedded_secret() {
        let body = format!(r#"{{"secret":"{}","commits":[]}}"#, SECRET);
        let headers = headers(&[("X-Gitea-Event", "push")]);
        assert!(matches!(
            validate(&headers, body.as_bytes(), Some(SECRET)),
            Ok(WebhookEvent::Push(_))
        ));

        let body = r#"{"secret":"wrong","commits":[]}"#;
        assert!(matches!(
            validate(&headers, body.as_bytes(), Some(SECRET)),
            Err(WebhookError::InvalidSignature)
        ));
    }

    #[test]
    fn test_embedded_secret_ignored_when_signed() {
        let body = format!(r#"{{"secret":"{}","commits":[]}}"#, SECRET);
        let headers = headers(&[("X-GitHub-Event", "push"), (SIGNATURE_HEADER, "sha1=0000")]);
        assert!(matches!(
            validate(&headers, body.as_bytes(), Some(SECRET)),
            Err(WebhookError::InvalidSignature)
        ));
    }

    #[test]
    fn test_ping() {
        let headers = headers(&[("X-GitHub-Event", "ping")]);
        assert_eq!(
            validate(&headers, b"{}", None).unwrap(),
            WebhookEvent::Ping
        );
    }

    #[test]
    fn test_ping_still_authenticated() {
        let headers = headers(&[("X-GitHub-Event", "ping"), (SIGNATURE_HEADER, "sha1=0000")]);
        assert!(validate(&headers, b"{}", Some(SECRET)).is_err());
    }

    #[test]
    fn test_other_event_rejected() {
        let headers = headers(&[("X-GitHub-Event", "issues")]);
        assert!(matches!(
            validate(&headers, BODY, None),
            Err(WebhookError::UnsupportedEvent(e)) if e == "issues"
        ));
    }

    #[test]
    fn test_missing_event_header_is_push() {
        assert!(matches!(
            validate(&HeaderMap::new(), BODY, None),
            Ok(WebhookEvent::Push(_))
        ));
    }

    #[test]
    fn test_event_header_precedence() {
        let headers = headers(&[("X-Gogs-Event", "push"), ("X-GitHub-Event", "ping")]);
        assert_eq!(event_type(&headers), Some("ping"));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            validate(&HeaderMap::new(), b"{not json", None),
            Err(WebhookError::InvalidPayload(_))
        ));
    }
}
