//! Lookup hashes for searching encrypted fields.
//!
//! When a field is encrypted its primary column holds
//! `hex(SHA-1(lowercase(trim(plaintext))))` instead of the plaintext, so
//! equality queries keep working: callers hash the search term the same way
//! and compare against the column. The hash is an index, not an integrity
//! proof; the integrity check lives in [`crate::verifier`].

use sha1::{Digest, Sha1};

/// Length of a hex-encoded lookup hash.
pub const LOOKUP_HASH_LEN: usize = 40;

/// Normalizes a value before hashing: strips leading and trailing ASCII
/// control characters and spaces (every char up to U+0020), then lowercases.
///
/// Unicode whitespace such as U+00A0 is kept so hashes stay compatible with
/// rows written by existing deployments.
#[must_use]
pub fn normalize(raw: &str) -> String {
    raw.trim_matches(|c: char| c <= ' ').to_lowercase()
}

/// Computes the lookup hash of a value. `None` in, `None` out.
///
/// # Example
///
/// ```
/// use piiseal::lookup_hash::lookup_hash;
///
/// assert_eq!(lookup_hash(Some(" Foo ")), lookup_hash(Some("foo")));
/// assert_eq!(lookup_hash(None), None);
/// ```
#[must_use]
pub fn lookup_hash(raw: Option<&str>) -> Option<String> {
    raw.map(|value| hex::encode(Sha1::digest(normalize(value).as_bytes())))
}

/// Returns true if `value` has the shape of a lookup hash (40 hex chars).
///
/// Used by the migration to avoid hashing a hash. A genuine 40-character hex
/// plaintext is indistinguishable from a hash and is skipped as well.
#[must_use]
pub fn looks_like_lookup_hash(value: &str) -> bool {
    value.len() == LOOKUP_HASH_LEN && value.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_hash_known_value() {
        assert_eq!(
            lookup_hash(Some("alice@example.com")).as_deref(),
            Some("fc2398a73dd54d6237c4fdb58fd7d75347cf5af3")
        );
    }

    #[test]
    fn test_lookup_hash_normalizes() {
        assert_eq!(lookup_hash(Some(" Foo ")), lookup_hash(Some("foo")));
        assert_eq!(
            lookup_hash(Some("FOO")).as_deref(),
            Some("0beec7b5ea3f0fdbc95d0dd47f3c5bc275da8a33")
        );
    }

    #[test]
    fn test_normalize_trims_control_chars_only() {
        assert_eq!(normalize("\u{1}Foo\t\n"), "foo");
        assert_eq!(lookup_hash(Some("\u{0}foo\u{1f}")), lookup_hash(Some("foo")));
        assert_eq!(normalize("\u{a0}foo\u{a0}"), "\u{a0}foo\u{a0}");
        assert_ne!(lookup_hash(Some("\u{2003}foo")), lookup_hash(Some("foo")));
    }

    #[test]
    fn test_lookup_hash_none() {
        assert_eq!(lookup_hash(None), None);
    }

    #[test]
    fn test_lookup_hash_shape() {
        let hash = lookup_hash(Some("anything")).unwrap();
        assert_eq!(hash.len(), LOOKUP_HASH_LEN);
        assert!(looks_like_lookup_hash(&hash));
    }

    #[test]
    fn test_different_values_different_hashes() {
        assert_ne!(lookup_hash(Some("alice")), lookup_hash(Some("bob")));
    }

    #[test]
    fn test_looks_like_lookup_hash() {
        assert!(looks_like_lookup_hash("FC2398A73DD54D6237C4FDB58FD7D75347CF5AF3"));
        assert!(!looks_like_lookup_hash("fc2398a73dd54d6237c4fdb58fd7d75347cf5af"));
        assert!(!looks_like_lookup_hash("zc2398a73dd54d6237c4fdb58fd7d75347cf5af3"));
        assert!(!looks_like_lookup_hash("alice@example.com"));
    }
}
