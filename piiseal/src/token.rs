//! Persisted ciphertext token format.
//!
//! A token is the ciphertext prefix followed by standard base64 of the IV
//! and the CBC ciphertext:
//!
//! ```text
//! $$$ base64( [iv:16][ciphertext:N*16] )
//! ```
//!
//! This string is what ends up in the shadow table, so the layout must stay
//! byte-stable across releases.

use crate::error::Error;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::fmt;

/// Marker reserved for encrypted values. Must never be empty.
pub const CIPHERTEXT_PREFIX: &str = "$$$";

/// IV size, one AES block.
pub const IV_SIZE: usize = 16;

/// Returns true if `value` already carries the ciphertext prefix.
#[must_use]
pub fn is_encrypted(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.starts_with(CIPHERTEXT_PREFIX))
}

/// Decoded form of an encrypted token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedToken {
    iv: [u8; IV_SIZE],
    ciphertext: Vec<u8>,
}

impl EncryptedToken {
    /// Creates a token from an IV and the raw CBC output.
    #[must_use]
    pub const fn new(iv: [u8; IV_SIZE], ciphertext: Vec<u8>) -> Self {
        Self { iv, ciphertext }
    }

    /// Returns the IV.
    #[must_use]
    pub const fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }

    /// Returns the ciphertext without the IV.
    #[must_use]
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Parses a prefixed token.
    ///
    /// # Errors
    ///
    /// Returns `Error::MalformedToken` if:
    /// - The prefix is missing
    /// - The payload is not valid base64
    /// - The payload is shorter than one IV plus one block
    /// - The ciphertext is not a whole number of blocks
    pub fn parse(token: &str) -> Result<Self, Error> {
        let payload = token
            .strip_prefix(CIPHERTEXT_PREFIX)
            .ok_or_else(|| Error::MalformedToken("missing ciphertext prefix".to_string()))?;

        let bytes = STANDARD
            .decode(payload)
            .map_err(|e| Error::MalformedToken(format!("invalid base64: {e}")))?;

        if bytes.len() < IV_SIZE * 2 {
            return Err(Error::MalformedToken(format!(
                "token too short: {} bytes (min: {})",
                bytes.len(),
                IV_SIZE * 2
            )));
        }

        let (iv, ciphertext) = bytes.split_at(IV_SIZE);
        if ciphertext.len() % IV_SIZE != 0 {
            return Err(Error::MalformedToken(format!(
                "ciphertext is not block aligned: {} bytes",
                ciphertext.len()
            )));
        }

        let mut iv_bytes = [0u8; IV_SIZE];
        iv_bytes.copy_from_slice(iv);

        Ok(Self { iv: iv_bytes, ciphertext: ciphertext.to_vec() })
    }
}

impl fmt::Display for EncryptedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut bytes = Vec::with_capacity(IV_SIZE + self.ciphertext.len());
        bytes.extend_from_slice(&self.iv);
        bytes.extend_from_slice(&self.ciphertext);
        write!(f, "{CIPHERTEXT_PREFIX}{}", STANDARD.encode(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KNOWN_TOKEN: &str = "$$$GTaogsGC8vbgE098AN9kC+UCHD8vYzVgFF0hFDnuKIw=";

    #[test]
    fn test_is_encrypted() {
        assert!(is_encrypted(Some("$$$abc")));
        assert!(!is_encrypted(Some("abc$$$")));
        assert!(!is_encrypted(Some("")));
        assert!(!is_encrypted(None));
    }

    #[test]
    fn test_parse_known_token() {
        let token = EncryptedToken::parse(KNOWN_TOKEN).expect("Failed to parse token");

        assert_eq!(hex::encode(token.iv()), "1936a882c182f2f6e0134f7c00df640b");
        assert_eq!(token.ciphertext().len(), 16);
        assert_eq!(token.to_string(), KNOWN_TOKEN);
    }

    #[test]
    fn test_parse_missing_prefix() {
        let result = EncryptedToken::parse("GTaogsGC8vbgE098AN9kC+UCHD8vYzVgFF0hFDnuKIw=");
        assert!(matches!(result, Err(Error::MalformedToken(_))));
    }

    #[test]
    fn test_parse_invalid_base64() {
        let result = EncryptedToken::parse("$$$not base64!");
        assert!(matches!(result, Err(Error::MalformedToken(_))));
    }

    #[test]
    fn test_parse_truncated() {
        let short = format!("{CIPHERTEXT_PREFIX}{}", STANDARD.encode([7u8; 20]));
        let result = EncryptedToken::parse(&short);
        assert!(matches!(result, Err(Error::MalformedToken(_))));
    }

    #[test]
    fn test_parse_unaligned_ciphertext() {
        let unaligned = format!("{CIPHERTEXT_PREFIX}{}", STANDARD.encode([7u8; 40]));
        let result = EncryptedToken::parse(&unaligned);
        assert!(matches!(result, Err(Error::MalformedToken(_))));
    }

    #[test]
    fn test_display_layout() {
        let token = EncryptedToken::new([1u8; IV_SIZE], vec![2u8; 32]);
        let encoded = token.to_string();

        assert!(encoded.starts_with(CIPHERTEXT_PREFIX));
        let parsed = EncryptedToken::parse(&encoded).unwrap();
        assert_eq!(parsed, token);
    }
}
