//! Client identity and reconnect tokens.

use std::hash::{Hash, Hasher};

use uuid::Uuid;

/// Length of the session token in bytes.
pub const TOKEN_LEN: usize = 16;

/// Identity presented at handshake time.
///
/// Equality and hashing use only `(client_id, device_id)`; the token is a
/// reconnect credential, not part of the identity. On first contact the
/// token is absent (all zero) and the store mints one.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub client_id: String,
    pub device_id: u64,
    pub token: [u8; TOKEN_LEN],
}

impl ClientIdentity {
    pub fn new(client_id: impl Into<String>, device_id: u64) -> Self {
        Self {
            client_id: client_id.into(),
            device_id,
            token: [0u8; TOKEN_LEN],
        }
    }

    pub fn with_token(client_id: impl Into<String>, device_id: u64, token: [u8; TOKEN_LEN]) -> Self {
        Self {
            client_id: client_id.into(),
            device_id,
            token,
        }
    }

    /// True when any token byte is set.
    pub fn has_token(&self) -> bool {
        self.token.iter().any(|b| *b != 0)
    }

    /// Replaces the token with a freshly generated 128-bit value.
    pub fn mint_token(&mut self) {
        self.token = Uuid::new_v4().into_bytes();
    }

    /// Lowercase-hex form used in the handshake response header.
    pub fn token_hex(&self) -> String {
        hex::encode(self.token)
    }

    /// Parses a 32-character lowercase-hex token. Returns None for any
    /// other length or non-hex input.
    pub fn parse_token(text: &str) -> Option<[u8; TOKEN_LEN]> {
        if text.len() != TOKEN_LEN * 2 {
            return None;
        }
        let mut token = [0u8; TOKEN_LEN];
        hex::decode_to_slice(text, &mut token).ok()?;
        Some(token)
    }
}

impl PartialEq for ClientIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.client_id == other.client_id && self.device_id == other.device_id
    }
}

impl Eq for ClientIdentity {}

impl Hash for ClientIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.client_id.hash(state);
        self.device_id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_not_part_of_identity() {
        let mut a = ClientIdentity::new("user", 1);
        let b = ClientIdentity::new("user", 1);
        a.mint_token();
        assert_eq!(a, b);
    }

    #[test]
    fn minted_token_round_trips_hex() {
        let mut id = ClientIdentity::new("user", 1);
        id.mint_token();
        assert!(id.has_token());
        let hex = id.token_hex();
        assert_eq!(hex.len(), 32);
        assert_eq!(ClientIdentity::parse_token(&hex), Some(id.token));
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(ClientIdentity::parse_token("abc").is_none());
        assert!(ClientIdentity::parse_token(&"zz".repeat(16)).is_none());
    }
}
