//! File-based key source for `piiseal`.
//!
//! The secret lives in a single file, read on every resolution attempt so a
//! corrected file is picked up without a restart. Suitable for development
//! and for deployments that mount secrets as files.

#![warn(clippy::pedantic, clippy::nursery)]

use piiseal::error::KeyError;
use piiseal::key_provider::KeySource;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use secrecy::SecretString;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Length of a generated secret; 32 ASCII characters select AES-256.
pub const GENERATED_KEY_LEN: usize = 32;

/// Key source backed by a secret file.
///
/// Surrounding whitespace in the file is ignored; an empty file counts as
/// no secret configured. An optional fallback seed can be attached for
/// deployments that still derive the key from the database URL.
#[derive(Debug, Clone)]
pub struct FileKeySource {
    path: PathBuf,
    seed: Option<String>,
}

impl FileKeySource {
    /// Creates a `FileKeySource`.
    ///
    /// # Arguments
    ///
    /// * `path` - File holding the secret
    ///
    /// # Errors
    ///
    /// Returns `KeyError::Source` if the file does not exist.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, KeyError> {
        let path = path.into();
        if !path.is_file() {
            return Err(KeyError::Source(format!("key file does not exist: {}", path.display())));
        }
        Ok(Self { path, seed: None })
    }

    /// Attaches a fallback seed used when the file is empty.
    #[must_use]
    pub fn with_seed(mut self, seed: impl Into<String>) -> Self {
        self.seed = Some(seed.into());
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes a freshly generated secret to `path` with owner-only permissions.
    ///
    /// Refuses to overwrite an existing file.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::Io` if the file exists or cannot be written.
    pub fn init(path: impl AsRef<Path>) -> Result<(), KeyError> {
        let path = path.as_ref();
        let secret = generate_secret();

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(path)?;
        file.write_all(secret.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;

        tracing::info!(path = %path.display(), "encryption key generated");
        Ok(())
    }
}

/// Generates a random alphanumeric secret of [`GENERATED_KEY_LEN`] characters.
#[must_use]
pub fn generate_secret() -> Zeroizing<String> {
    Zeroizing::new(OsRng.sample_iter(&Alphanumeric).take(GENERATED_KEY_LEN).map(char::from).collect())
}

impl KeySource for FileKeySource {
    fn explicit_secret(&self) -> Result<Option<SecretString>, KeyError> {
        let contents = Zeroizing::new(std::fs::read_to_string(&self.path)?);
        let secret = contents.trim();
        if secret.is_empty() {
            tracing::debug!(path = %self.path.display(), "key file is empty");
            return Ok(None);
        }
        Ok(Some(SecretString::new(secret.to_string())))
    }

    fn fallback_seed(&self) -> Result<Option<String>, KeyError> {
        Ok(self.seed.clone())
    }
}
