//! Runtime settings: where the key comes from and how strictly failures are
//! treated.
//!
//! Settings are read from a TOML file, from the environment, or both (the
//! environment wins). Blank values count as unset.
//!
//! ```toml
//! encryption_key = "0123456789abcdef"
//! database_url = "postgres://db.internal:5432/users"
//! strict = false
//! ```

use crate::error::Error;
use crate::key_provider::{StaticKeySource, ENV_DATABASE_URL, ENV_ENCRYPTION_KEY};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::Path;

/// Environment variable switching strict mode on (`1`, `true` or `yes`).
pub const ENV_STRICT: &str = "PII_STRICT";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawSettings {
    encryption_key: Option<String>,
    database_url: Option<String>,
    strict: bool,
}

/// Resolved settings.
#[derive(Debug, Default)]
pub struct Settings {
    /// Explicit secret; its UTF-8 bytes are the AES key.
    pub encryption_key: Option<SecretString>,
    /// Seed the fallback key is derived from when no secret is set.
    pub database_url: Option<String>,
    /// Fail reads of legacy in-place tokens that cannot be decrypted instead
    /// of serving them as stored. Migration and shadow reads are unaffected.
    pub strict: bool,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

impl From<RawSettings> for Settings {
    fn from(raw: RawSettings) -> Self {
        Self {
            encryption_key: non_blank(raw.encryption_key).map(SecretString::new),
            database_url: non_blank(raw.database_url),
            strict: raw.strict,
        }
    }
}

impl Settings {
    /// Reads settings from the process environment only.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Parses settings from TOML text.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the text is not valid TOML or has unknown keys.
    pub fn from_toml_str(text: &str) -> Result<Self, Error> {
        let raw: RawSettings = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        Ok(raw.into())
    }

    /// Reads a TOML settings file and applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the file cannot be read and `Error::Config` if it
    /// does not parse.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let settings = Self::from_toml_str(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "settings loaded");
        Ok(settings.with_env_overrides())
    }

    /// Overrides fields with `PII_ENCKEY`, `PII_DB_URL` and `PII_STRICT` when set.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Overrides fields from an arbitrary variable lookup.
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(key) = non_blank(lookup(ENV_ENCRYPTION_KEY)) {
            self.encryption_key = Some(SecretString::new(key));
        }
        if let Some(url) = non_blank(lookup(ENV_DATABASE_URL)) {
            self.database_url = Some(url);
        }
        if let Some(flag) = non_blank(lookup(ENV_STRICT)) {
            self.strict = parse_flag(&flag);
        }
        self
    }

    /// Builds a key source carrying these settings.
    #[must_use]
    pub fn key_source(&self) -> StaticKeySource {
        let secret = self.encryption_key.as_ref().map(|k| SecretString::new(k.expose_secret().clone()));
        StaticKeySource::new(secret, self.database_url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_provider::KeySource;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_from_toml_str() {
        let settings = Settings::from_toml_str(
            r#"
            encryption_key = "1234567891123456"
            database_url = "postgres://localhost/users"
            strict = true
            "#,
        )
        .unwrap();

        assert_eq!(settings.encryption_key.unwrap().expose_secret(), "1234567891123456");
        assert_eq!(settings.database_url.as_deref(), Some("postgres://localhost/users"));
        assert!(settings.strict);
    }

    #[test]
    fn test_blank_values_are_unset() {
        let settings = Settings::from_toml_str("encryption_key = \"   \"\ndatabase_url = \"\"").unwrap();

        assert!(settings.encryption_key.is_none());
        assert!(settings.database_url.is_none());
        assert!(!settings.strict);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result = Settings::from_toml_str("encryption_kee = \"x\"");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_overrides_win() {
        let settings = Settings::from_toml_str("encryption_key = \"from-file-000000\"")
            .unwrap()
            .with_overrides_from(lookup(&[(ENV_ENCRYPTION_KEY, "from-env-0000000"), (ENV_STRICT, "Yes")]));

        assert_eq!(settings.encryption_key.unwrap().expose_secret(), "from-env-0000000");
        assert!(settings.strict);
    }

    #[test]
    fn test_blank_override_ignored() {
        let settings = Settings::from_toml_str("database_url = \"postgres://a\"")
            .unwrap()
            .with_overrides_from(lookup(&[(ENV_DATABASE_URL, " ")]));

        assert_eq!(settings.database_url.as_deref(), Some("postgres://a"));
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("1"));
        assert!(parse_flag("TRUE"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("no"));
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "database_url = \"jdbc:postgresql://localhost:5432/keycloak\"").unwrap();

        let settings = Settings::load(file.path()).unwrap();
        assert!(settings.database_url.is_some());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(Settings::load("/nonexistent/piiseal.toml"), Err(Error::Io(_))));
    }

    #[test]
    fn test_key_source() {
        let settings = Settings::from_toml_str("database_url = \"postgres://a\"").unwrap();
        let source = settings.key_source();

        assert!(source.explicit_secret().unwrap().is_none());
        assert_eq!(source.fallback_seed().unwrap().as_deref(), Some("postgres://a"));
    }
}
