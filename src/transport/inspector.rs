//! Handshake inspection.
//!
//! The inspector extracts a [`ClientIdentity`] from the upgrade request. A
//! rejection becomes an HTTP 400 whose body is the returned reason.

use tokio_tungstenite::tungstenite::http::HeaderMap;
use tracing::warn;

use crate::session::identity::{ClientIdentity, TOKEN_LEN};

pub trait HandshakeInspector: Send + Sync {
    fn extract(&self, headers: &HeaderMap) -> Result<ClientIdentity, String>;
}

/// Header-based inspector.
///
/// Reads `x-client-id` (required), `x-device-id` (optional decimal; a
/// non-digit prefix is tolerated and the numeric run parsed), and
/// `x-session-token` (optional, exactly 32 lowercase-hex characters; other
/// lengths are ignored).
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultInspector;

impl HandshakeInspector for DefaultInspector {
    fn extract(&self, headers: &HeaderMap) -> Result<ClientIdentity, String> {
        let client_id = headers
            .get("x-client-id")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                warn!("missing x-client-id header");
                "missing x-client-id header".to_string()
            })?
            .to_string();

        let mut device_id = 0u64;
        if let Some(raw) = headers.get("x-device-id").and_then(|v| v.to_str().ok()) {
            device_id = parse_device_id(raw)
                .ok_or_else(|| format!("device id '{raw}' contains no numeric part"))?;
        }

        let mut token = [0u8; TOKEN_LEN];
        if let Some(raw) = headers.get("x-session-token").and_then(|v| v.to_str().ok()) {
            if raw.len() == TOKEN_LEN * 2 {
                token = ClientIdentity::parse_token(raw)
                    .ok_or_else(|| "invalid session token format".to_string())?;
            }
        }

        Ok(ClientIdentity::with_token(client_id, device_id, token))
    }
}

/// Parses the numeric run starting at the first digit.
fn parse_device_id(raw: &str) -> Option<u64> {
    let start = raw.find(|c: char| c.is_ascii_digit())?;
    let digits: String = raw[start..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                tokio_tungstenite::tungstenite::http::header::HeaderName::from_bytes(
                    name.as_bytes(),
                )
                .unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn requires_client_id() {
        assert!(DefaultInspector.extract(&headers(&[])).is_err());
    }

    #[test]
    fn parses_plain_identity() {
        let identity = DefaultInspector
            .extract(&headers(&[("x-client-id", "u1"), ("x-device-id", "42")]))
            .unwrap();
        assert_eq!(identity.client_id, "u1");
        assert_eq!(identity.device_id, 42);
        assert!(!identity.has_token());
    }

    #[test]
    fn tolerates_device_id_prefix() {
        let identity = DefaultInspector
            .extract(&headers(&[("x-client-id", "u1"), ("x-device-id", "dev-77x")]))
            .unwrap();
        assert_eq!(identity.device_id, 77);
    }

    #[test]
    fn rejects_non_numeric_device_id() {
        assert!(DefaultInspector
            .extract(&headers(&[("x-client-id", "u1"), ("x-device-id", "alpha")]))
            .is_err());
    }

    #[test]
    fn parses_exact_length_token_and_ignores_others() {
        let token_hex = "00ff00ff00ff00ff00ff00ff00ff00ff";
        let identity = DefaultInspector
            .extract(&headers(&[
                ("x-client-id", "u1"),
                ("x-session-token", token_hex),
            ]))
            .unwrap();
        assert!(identity.has_token());

        let short = DefaultInspector
            .extract(&headers(&[("x-client-id", "u1"), ("x-session-token", "abcd")]))
            .unwrap();
        assert!(!short.has_token());
    }

    #[test]
    fn rejects_bad_hex_token() {
        let bad = "zz".repeat(16);
        assert!(DefaultInspector
            .extract(&headers(&[("x-client-id", "u1"), ("x-session-token", &bad)]))
            .is_err());
    }
}
