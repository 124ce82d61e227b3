//! Symmetric encryption of single field values.
//!
//! `FieldCipher` turns a plaintext string into a self-describing token
//! (see [`crate::token`]) using AES in CBC mode with PKCS#7 padding and a
//! fresh random IV per call, and back.
//!
//! Two error policies are offered:
//!
//! - `encrypt` / `decrypt` fail open: any failure returns the input unchanged,
//!   so a bad value never aborts a read or a batch. Callers that need the
//!   confidentiality guarantee check [`FieldCipher::is_encrypted`] on the result.
//! - `try_encrypt` / `try_decrypt` surface typed errors; strict deployments
//!   route through these.

use crate::error::{Error, KeyError};
use crate::key_provider::KeyProvider;
use crate::token::{self, EncryptedToken, IV_SIZE};
use aes::cipher::{
    block_padding::Pkcs7, BlockCipher, BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit,
};
use aes::{Aes128, Aes192, Aes256};
use rand::{rngs::OsRng, RngCore};
use std::sync::Arc;
use zeroize::Zeroizing;

fn encrypt_with<C>(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, KeyError>
where
    C: BlockEncryptMut + BlockCipher + KeyInit,
{
    let encryptor = cbc::Encryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| KeyError::InvalidKey { length: key.len() })?;
    Ok(encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

fn decrypt_with<C>(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, Error>
where
    C: BlockDecryptMut + BlockCipher + KeyInit,
{
    let decryptor = cbc::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(|_| KeyError::InvalidKey { length: key.len() })?;
    decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| Error::DecryptionFailed("bad padding: wrong key or corrupted ciphertext".to_string()))
}

/// Runs AES-CBC/PKCS#7 encryption, choosing the AES variant from the key length.
pub(crate) fn encrypt_cbc(key: &[u8], iv: &[u8; IV_SIZE], plaintext: &[u8]) -> Result<Vec<u8>, KeyError> {
    match key.len() {
        16 => encrypt_with::<Aes128>(key, iv, plaintext),
        24 => encrypt_with::<Aes192>(key, iv, plaintext),
        32 => encrypt_with::<Aes256>(key, iv, plaintext),
        length => Err(KeyError::InvalidKey { length }),
    }
}

pub(crate) fn decrypt_cbc(key: &[u8], iv: &[u8; IV_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
    match key.len() {
        16 => decrypt_with::<Aes128>(key, iv, ciphertext),
        24 => decrypt_with::<Aes192>(key, iv, ciphertext),
        32 => decrypt_with::<Aes256>(key, iv, ciphertext),
        length => Err(KeyError::InvalidKey { length }.into()),
    }
}

/// Encrypts and decrypts individual field values.
///
/// # Example
///
/// ```rust,ignore
/// use piiseal::cipher::FieldCipher;
///
/// let cipher = FieldCipher::global();
/// let token = cipher.encrypt(Some("alice@example.com")).unwrap();
/// assert!(FieldCipher::is_encrypted(Some(&token)));
/// assert_eq!(cipher.decrypt(Some(&token)).as_deref(), Some("alice@example.com"));
/// ```
#[derive(Clone)]
pub struct FieldCipher {
    keys: Arc<KeyProvider>,
}

impl FieldCipher {
    /// Creates a cipher over the given key provider.
    #[must_use]
    pub const fn new(keys: Arc<KeyProvider>) -> Self {
        Self { keys }
    }

    /// Creates a cipher over the process-wide key provider.
    #[must_use]
    pub fn global() -> Self {
        Self::new(KeyProvider::global())
    }

    /// Returns the key provider backing this cipher.
    #[must_use]
    pub fn key_provider(&self) -> &KeyProvider {
        &self.keys
    }

    /// Returns true iff `value` is present and starts with the ciphertext prefix.
    #[must_use]
    pub fn is_encrypted(value: Option<&str>) -> bool {
        token::is_encrypted(value)
    }

    /// Encrypts a value, returning it unchanged if it is already a token.
    ///
    /// # Errors
    ///
    /// Returns `Error::Key` if the key cannot be resolved.
    pub fn try_encrypt(&self, plaintext: &str) -> Result<String, Error> {
        if token::is_encrypted(Some(plaintext)) {
            return Ok(plaintext.to_string());
        }

        let key = self.keys.get_key()?;

        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        let ciphertext = encrypt_cbc(key.expose(), &iv, plaintext.as_bytes())?;
        Ok(EncryptedToken::new(iv, ciphertext).to_string())
    }

    /// Decrypts a token, returning the value unchanged if it is not a token.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The key cannot be resolved
    /// - The token is malformed
    /// - Padding or UTF-8 validation fails after decryption
    pub fn try_decrypt(&self, value: &str) -> Result<String, Error> {
        if !token::is_encrypted(Some(value)) {
            return Ok(value.to_string());
        }

        let parsed = EncryptedToken::parse(value)?;
        let key = self.keys.get_key()?;

        let plaintext = Zeroizing::new(decrypt_cbc(key.expose(), parsed.iv(), parsed.ciphertext())?);
        std::str::from_utf8(&plaintext)
            .map(str::to_owned)
            .map_err(|e| Error::DecryptionFailed(format!("plaintext is not UTF-8: {e}")))
    }

    /// Fail-open encryption: `None` stays `None`, failures return the input.
    #[must_use]
    pub fn encrypt(&self, value: Option<&str>) -> Option<String> {
        let value = value?;
        match self.try_encrypt(value) {
            Ok(token) => Some(token),
            Err(err) => {
                log_fail_open("encrypt", &err);
                Some(value.to_string())
            }
        }
    }

    /// Fail-open decryption: `None` stays `None`, failures return the token.
    #[must_use]
    pub fn decrypt(&self, value: Option<&str>) -> Option<String> {
        let value = value?;
        match self.try_decrypt(value) {
            Ok(plaintext) => Some(plaintext),
            Err(err) => {
                log_fail_open("decrypt", &err);
                Some(value.to_string())
            }
        }
    }
}

fn log_fail_open(operation: &'static str, err: &Error) {
    match err {
        Error::Key(_) => tracing::error!(operation, error = %err, "value left untouched"),
        _ => tracing::warn!(operation, error = %err, "value left untouched"),
    }
}
