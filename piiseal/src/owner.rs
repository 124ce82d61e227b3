//! Owner records and the accessor the core reads and writes them through.

use crate::context::{OwnerId, TenantId};
use crate::error::StoreError;
use crate::policy::is_core_field;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A record whose fields may be encrypted, e.g. a user.
///
/// Core fields and dynamic attributes share one ordered map; a `None` value
/// is a field that exists but is unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRecord {
    pub id: OwnerId,
    pub tenant: TenantId,
    /// Service accounts are never migrated.
    #[serde(default)]
    pub service_account: bool,
    #[serde(default)]
    pub fields: BTreeMap<String, Option<String>>,
}

impl OwnerRecord {
    #[must_use]
    pub fn new(id: impl Into<OwnerId>, tenant: impl Into<TenantId>) -> Self {
        Self { id: id.into(), tenant: tenant.into(), service_account: false, fields: BTreeMap::new() }
    }

    /// Sets a field, builder style.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: Option<&str>) -> Self {
        self.fields.insert(name.into(), value.map(str::to_string));
        self
    }

    /// Marks the record as a service account.
    #[must_use]
    pub const fn as_service_account(mut self) -> Self {
        self.service_account = true;
        self
    }

    /// Returns a field's value; `None` if unset or absent.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Option::as_deref)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: Option<String>) {
        self.fields.insert(name.into(), value);
    }

    /// Enumerates dynamic attributes (everything that is not a core field).
    pub fn attributes(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.fields
            .iter()
            .filter(|(name, _)| !is_core_field(name))
            .map(|(name, value)| (name.as_str(), value.as_deref()))
    }
}

/// Reads and writes owner records by field name.
pub trait OwnerAccess {
    /// Loads an owner record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the backend fails.
    fn load_owner(&mut self, id: &OwnerId) -> Result<Option<OwnerRecord>, StoreError>;

    /// Overwrites one field of an owner record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::OwnerNotFound` if the owner does not exist.
    fn write_field(&mut self, id: &OwnerId, field: &str, value: Option<String>) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attributes_exclude_core_fields() {
        let owner = OwnerRecord::new("u-1", "acme")
            .with_field("username", Some("alice"))
            .with_field("email", Some("alice@example.com"))
            .with_field("pii-phone", Some("555-0100"))
            .with_field("locale", None);

        let attributes: Vec<_> = owner.attributes().collect();
        assert_eq!(attributes, vec![("locale", None), ("pii-phone", Some("555-0100"))]);
    }

    #[test]
    fn test_field_access() {
        let mut owner = OwnerRecord::new("u-1", "acme").with_field("email", None);
        assert_eq!(owner.field("email"), None);
        assert_eq!(owner.field("missing"), None);

        owner.set_field("email", Some("a@b.c".to_string()));
        assert_eq!(owner.field("email"), Some("a@b.c"));
    }

    #[test]
    fn test_deserialize_defaults() {
        let owner: OwnerRecord = serde_json::from_str(r#"{"id":"u-1","tenant":"acme"}"#).unwrap();
        assert!(!owner.service_account);
        assert!(owner.fields.is_empty());
    }
}
