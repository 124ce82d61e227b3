//! Integrity check between a primary-record lookup hash and its shadow
//! ciphertext.
//!
//! Every decrypt-on-read goes through here: the ciphertext is decrypted, the
//! plaintext re-hashed and compared with the hash stored in the primary
//! record. A mismatch means the two drifted apart (a partial write, a manual
//! edit, a wrong key) and the decrypted value must not be served.

use crate::cipher::FieldCipher;
use crate::context::FieldContext;
use crate::error::{Error, IntegrityFailure};
use crate::lookup_hash::{lookup_hash, looks_like_lookup_hash};

/// Returns true if a shadow record no longer belongs to its primary value.
///
/// Once a field is encrypted its primary value is a lookup hash. A primary
/// value that is `None` or not hash-shaped was cleared or rewritten in
/// plaintext after encryption; it is authoritative and the shadow record is
/// left over.
#[must_use]
pub fn is_stale_shadow(stored_primary: Option<&str>) -> bool {
    !stored_primary.is_some_and(looks_like_lookup_hash)
}

/// Cross-checks lookup hashes against shadow ciphertexts.
pub struct IntegrityVerifier<'a> {
    cipher: &'a FieldCipher,
}

impl<'a> IntegrityVerifier<'a> {
    #[must_use]
    pub const fn new(cipher: &'a FieldCipher) -> Self {
        Self { cipher }
    }

    /// Returns true if `paired_ciphertext` decrypts to a value whose lookup
    /// hash equals `stored_hash`, ignoring case.
    ///
    /// Any decryption failure counts as a mismatch.
    #[must_use]
    pub fn verify(&self, stored_hash: Option<&str>, paired_ciphertext: &str) -> bool {
        match self.cipher.try_decrypt(paired_ciphertext) {
            Ok(plaintext) => hashes_match(stored_hash, &plaintext),
            Err(_) => false,
        }
    }

    /// Decrypts `paired_ciphertext` and returns the plaintext only if it is
    /// consistent with `stored_hash`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Key` if the key cannot be resolved, and
    /// `Error::Integrity` for a malformed token, a failed decryption or a
    /// hash mismatch. The mismatched value is never returned.
    pub fn decrypt_verified(
        &self,
        context: &FieldContext,
        stored_hash: Option<&str>,
        paired_ciphertext: &str,
    ) -> Result<String, Error> {
        let plaintext = match self.cipher.try_decrypt(paired_ciphertext) {
            Ok(plaintext) => plaintext,
            Err(err @ Error::Key(_)) => return Err(err),
            Err(err) => {
                tracing::debug!(context = %context, error = %err, "shadow ciphertext unreadable");
                return Err(IntegrityFailure::new(context.clone()).into());
            }
        };

        if hashes_match(stored_hash, &plaintext) {
            Ok(plaintext)
        } else {
            Err(IntegrityFailure::new(context.clone()).into())
        }
    }
}

fn hashes_match(stored_hash: Option<&str>, plaintext: &str) -> bool {
    match (stored_hash, lookup_hash(Some(plaintext))) {
        (Some(stored), Some(computed)) => stored.eq_ignore_ascii_case(&computed),
        _ => false,
    }
}
