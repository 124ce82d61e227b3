//! Key source abstraction and the memoized process-wide encryption key.

use crate::cipher::encrypt_cbc;
use crate::error::KeyError;
use crate::token::IV_SIZE;
use md5::{Digest, Md5};
use once_cell::sync::{Lazy, OnceCell};
use secrecy::{ExposeSecret, SecretString, SecretVec};
use std::sync::Arc;

/// Environment variable holding the explicit secret.
pub const ENV_ENCRYPTION_KEY: &str = "PII_ENCKEY";

/// Environment variable holding the database URL used as fallback seed.
pub const ENV_DATABASE_URL: &str = "PII_DB_URL";

/// Supplies raw key configuration to a [`KeyProvider`].
///
/// Implementations must be thread-safe (`Send + Sync`); the provider may
/// consult a source from any thread that first asks for the key.
///
/// # Example
///
/// ```rust,ignore
/// use piiseal::key_provider::KeySource;
///
/// struct VaultSource;
///
/// impl KeySource for VaultSource {
///     fn explicit_secret(&self) -> Result<Option<SecretString>, KeyError> {
///         // fetch from wherever secrets live
///     }
/// }
/// ```
pub trait KeySource: Send + Sync {
    /// Returns the explicitly configured secret, if any.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::Source` if the backing store cannot be read.
    fn explicit_secret(&self) -> Result<Option<SecretString>, KeyError>;

    /// Returns the seed a key is derived from when no explicit secret is set.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::Source` if the backing store cannot be read.
    fn fallback_seed(&self) -> Result<Option<String>, KeyError> {
        Ok(None)
    }
}

/// Reads key configuration from environment variables on every attempt.
#[derive(Debug, Clone)]
pub struct EnvKeySource {
    key_var: String,
    seed_var: String,
}

impl EnvKeySource {
    /// Creates a source reading `PII_ENCKEY` and `PII_DB_URL`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_vars(ENV_ENCRYPTION_KEY, ENV_DATABASE_URL)
    }

    /// Creates a source reading custom variable names.
    #[must_use]
    pub fn with_vars(key_var: impl Into<String>, seed_var: impl Into<String>) -> Self {
        Self { key_var: key_var.into(), seed_var: seed_var.into() }
    }
}

impl Default for EnvKeySource {
    fn default() -> Self {
        Self::new()
    }
}

impl KeySource for EnvKeySource {
    fn explicit_secret(&self) -> Result<Option<SecretString>, KeyError> {
        Ok(non_blank_env(&self.key_var).map(SecretString::new))
    }

    fn fallback_seed(&self) -> Result<Option<String>, KeyError> {
        Ok(non_blank_env(&self.seed_var))
    }
}

fn non_blank_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

/// Fixed key configuration, typically built from [`crate::config::Settings`].
pub struct StaticKeySource {
    secret: Option<SecretString>,
    seed: Option<String>,
}

impl StaticKeySource {
    /// Creates a source with an optional secret and optional fallback seed.
    #[must_use]
    pub const fn new(secret: Option<SecretString>, seed: Option<String>) -> Self {
        Self { secret, seed }
    }
}

impl KeySource for StaticKeySource {
    fn explicit_secret(&self) -> Result<Option<SecretString>, KeyError> {
        Ok(self.secret.as_ref().map(|s| SecretString::new(s.expose_secret().clone())))
    }

    fn fallback_seed(&self) -> Result<Option<String>, KeyError> {
        Ok(self.seed.clone())
    }
}

/// Validated symmetric key.
///
/// The UTF-8 bytes of the configured secret are used directly as AES key
/// material: 16, 24 or 32 bytes select AES-128, AES-192 or AES-256.
pub struct EncryptionKey {
    bytes: SecretVec<u8>,
}

impl EncryptionKey {
    /// Builds a key from a secret and runs the validation round trip.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidKey` if the key cannot encrypt a test value.
    pub fn from_secret(secret: &SecretString) -> Result<Self, KeyError> {
        let bytes = SecretVec::new(secret.expose_secret().as_bytes().to_vec());
        validate_key(bytes.expose_secret())?;
        Ok(Self { bytes })
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        self.bytes.expose_secret()
    }

    /// Returns the key length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.expose_secret().len()
    }

    /// Always false for a validated key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.expose_secret().is_empty()
    }
}

/// Checks that `key` can perform a trivial encryption with a zero IV.
///
/// # Errors
///
/// Returns `KeyError::InvalidKey` carrying the rejected length.
pub fn validate_key(key: &[u8]) -> Result<(), KeyError> {
    encrypt_cbc(key, &[0u8; IV_SIZE], b"test").map(|_| ())
}

/// Derives the fallback secret: lowercase hex MD5 of the seed (32 chars).
#[must_use]
pub fn derive_secret_from_seed(seed: &str) -> SecretString {
    let digest = Md5::digest(seed.as_bytes());
    SecretString::new(hex::encode(digest))
}

/// Resolves the encryption key once and hands out the memoized value.
///
/// The first caller performs resolution and validation while concurrent
/// callers block; later calls are lock-free. A failed attempt leaves the
/// provider unresolved so the next call retries with fresh configuration.
pub struct KeyProvider {
    source: Box<dyn KeySource>,
    key: OnceCell<EncryptionKey>,
}

static GLOBAL: Lazy<Arc<KeyProvider>> = Lazy::new(|| Arc::new(KeyProvider::new(EnvKeySource::new())));

impl KeyProvider {
    /// Creates a provider over the given source.
    pub fn new(source: impl KeySource + 'static) -> Self {
        Self { source: Box::new(source), key: OnceCell::new() }
    }

    /// Returns the process-wide provider bound to the environment.
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    /// Returns the key, resolving it on first use.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::Missing` if no secret and no seed are configured,
    /// or `KeyError::InvalidKey` if the material fails validation.
    pub fn get_key(&self) -> Result<&EncryptionKey, KeyError> {
        self.key.get_or_try_init(|| self.resolve())
    }

    /// Returns true once a key has been resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.key.get().is_some()
    }

    fn resolve(&self) -> Result<EncryptionKey, KeyError> {
        let secret = match self.source.explicit_secret()? {
            Some(secret) if !secret.expose_secret().trim().is_empty() => secret,
            _ => {
                let seed = self
                    .source
                    .fallback_seed()?
                    .filter(|s| !s.trim().is_empty())
                    .ok_or(KeyError::Missing)?;
                tracing::warn!(
                    "encryption key was derived from the database URL; set {ENV_ENCRYPTION_KEY} \
                     explicitly to decouple the key from connection settings"
                );
                derive_secret_from_seed(&seed)
            }
        };

        let key = EncryptionKey::from_secret(&secret)?;
        tracing::debug!(key_len = key.len(), "encryption key resolved");
        Ok(key)
    }
}
