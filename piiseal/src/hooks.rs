//! Lifecycle hooks: the write path, the read path and equality lookup.
//!
//! [`PiiEncryption`] ties the cipher, the tenant settings and a [`Store`]
//! together. Hosts call [`PiiEncryption::handle_event`] (or
//! [`PiiEncryption::encrypt_owner`] directly) after an owner is written, and
//! read owners back through [`PiiEncryption::load_owner`] /
//! [`PiiEncryption::load_field`] so that every served value has passed the
//! integrity check.

use crate::cipher::FieldCipher;
use crate::config::Settings;
use crate::context::{FieldContext, OwnerId, TenantId};
use crate::error::{Error, StoreError};
use crate::key_provider::KeyProvider;
use crate::lookup_hash::lookup_hash;
use crate::migration::{MigrationReport, Migrator};
use crate::owner::OwnerRecord;
use crate::policy::{FieldPolicy, TenantSettings, USERNAME_FIELD};
use crate::store::{OwnerSnapshot, Store};
use crate::verifier::{is_stale_shadow, IntegrityVerifier};
use std::sync::Arc;

/// Owner lifecycle events that trigger encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    /// Self-registration.
    Register { tenant: TenantId, owner: OwnerId },
    /// Self-service profile update.
    ProfileUpdated { tenant: TenantId, owner: OwnerId },
    /// Administrative creation; only the username is known.
    AdminCreated { tenant: TenantId, username: String },
    /// Administrative update of the resource at `resource_path`,
    /// e.g. `users/7f9c...`.
    AdminUpdated { tenant: TenantId, resource_path: String },
}

impl DomainEvent {
    #[must_use]
    pub const fn tenant(&self) -> &TenantId {
        match self {
            Self::Register { tenant, .. }
            | Self::ProfileUpdated { tenant, .. }
            | Self::AdminCreated { tenant, .. }
            | Self::AdminUpdated { tenant, .. } => tenant,
        }
    }
}

/// Extracts the owner id from an admin resource path: the second `/` segment.
fn owner_from_resource_path(path: &str) -> Option<OwnerId> {
    path.split('/').nth(1).filter(|segment| !segment.is_empty()).map(OwnerId::from)
}

/// An owner as served to callers, with plaintext restored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedOwner {
    pub record: OwnerRecord,
    /// Fields withheld because they failed verification or decryption.
    pub unreadable: Vec<String>,
}

/// Encryption façade over one store.
pub struct PiiEncryption<S: Store> {
    store: Arc<S>,
    cipher: FieldCipher,
    settings: Arc<dyn TenantSettings>,
    strict: bool,
}

impl<S: Store> PiiEncryption<S> {
    #[must_use]
    pub fn new(store: Arc<S>, cipher: FieldCipher, settings: Arc<dyn TenantSettings>) -> Self {
        Self { store, cipher, settings, strict: false }
    }

    /// Builds a façade whose key and strictness come from `config`.
    #[must_use]
    pub fn from_settings(store: Arc<S>, config: &Settings, tenants: Arc<dyn TenantSettings>) -> Self {
        let cipher = FieldCipher::new(Arc::new(KeyProvider::new(config.key_source())));
        Self::new(store, cipher, tenants).with_strict(config.strict)
    }

    /// In strict mode legacy tokens that cannot be decrypted fail the read
    /// instead of being served as stored.
    #[must_use]
    pub const fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub const fn cipher(&self) -> &FieldCipher {
        &self.cipher
    }

    /// Returns a migrator sharing this façade's store, cipher and settings.
    #[must_use]
    pub fn migrator(&self) -> Migrator<'_, S> {
        Migrator::new(&self.store, &self.cipher, self.settings.as_ref())
    }

    /// Encrypts every in-scope field of one owner in a single unit of work.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::OwnerNotFound` for an unknown owner, `Error::Key`
    /// for unusable key material, or a store error. Nothing is written on error.
    pub fn encrypt_owner(&self, owner: &OwnerId) -> Result<MigrationReport, Error> {
        let migrator = self.migrator();
        self.store.transaction(|tx| migrator.encrypt_owner_in(tx, owner))
    }

    /// Reacts to an owner lifecycle event.
    ///
    /// Events whose owner cannot be resolved are logged and ignored.
    ///
    /// # Errors
    ///
    /// Same as [`Self::encrypt_owner`].
    pub fn handle_event(&self, event: &DomainEvent) -> Result<MigrationReport, Error> {
        let tenant = event.tenant();
        if !self.settings.is_encryption_enabled(tenant) {
            tracing::debug!(event = "USER_ENCRYPTION_SKIPPED", tenant = %tenant, "encryption disabled for tenant");
            return Ok(MigrationReport::default());
        }

        let owner = match event {
            DomainEvent::Register { owner, .. } | DomainEvent::ProfileUpdated { owner, .. } => Some(owner.clone()),
            DomainEvent::AdminCreated { tenant, username } => self.find_owner(tenant, USERNAME_FIELD, username)?,
            DomainEvent::AdminUpdated { resource_path, .. } => owner_from_resource_path(resource_path),
        };

        match owner {
            Some(owner) => self.encrypt_owner(&owner),
            None => {
                tracing::warn!(tenant = %tenant, ?event, "event does not resolve to an owner");
                Ok(MigrationReport::default())
            }
        }
    }

    /// Reads one field, verifying and decrypting it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Integrity` if the field's shadow record does not match
    /// its lookup hash, `StoreError::OwnerNotFound` for an unknown owner, or
    /// `Error::Key` for unusable key material.
    pub fn load_field(&self, owner: &OwnerId, field: &str) -> Result<Option<String>, Error> {
        let snapshot = self.read_snapshot(owner)?;
        let stored = snapshot.record.field(field);

        let Some(shadow) = snapshot.shadow(field).filter(|_| !is_stale_shadow(stored)) else {
            return self.read_legacy(stored);
        };

        let context = FieldContext::new(snapshot.record.tenant.clone(), owner.clone(), field);
        match IntegrityVerifier::new(&self.cipher).decrypt_verified(&context, stored, shadow.ciphertext()) {
            Ok(plaintext) => Ok(Some(plaintext)),
            Err(Error::Integrity(failure)) => {
                failure.log();
                Err(failure.into())
            }
            Err(err) => Err(err),
        }
    }

    /// Reads a whole owner with plaintext restored.
    ///
    /// Fields that fail verification or decryption are withheld (set to
    /// `None` and listed in [`LoadedOwner::unreadable`]) rather than failing
    /// the whole read.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::OwnerNotFound` for an unknown owner or `Error::Key`
    /// for unusable key material.
    pub fn load_owner(&self, owner: &OwnerId) -> Result<LoadedOwner, Error> {
        let OwnerSnapshot { mut record, shadows } = self.read_snapshot(owner)?;
        let verifier = IntegrityVerifier::new(&self.cipher);
        let mut unreadable = Vec::new();
        let mut verified = Vec::with_capacity(shadows.len());

        for shadow in &shadows {
            let field = shadow.field_name();
            if is_stale_shadow(record.field(field)) {
                continue;
            }
            verified.push(field);
            let context = FieldContext::new(record.tenant.clone(), owner.clone(), field);
            match verifier.decrypt_verified(&context, record.field(field), shadow.ciphertext()) {
                Ok(plaintext) => record.set_field(field, Some(plaintext)),
                Err(Error::Integrity(failure)) => {
                    failure.log();
                    record.set_field(field, None);
                    unreadable.push(field.to_string());
                }
                Err(err) => return Err(err),
            }
        }

        for (name, value) in &mut record.fields {
            if verified.contains(&name.as_str()) || !FieldCipher::is_encrypted(value.as_deref()) {
                continue;
            }
            match self.read_legacy(value.as_deref()) {
                Ok(plaintext) => *value = plaintext,
                Err(err @ Error::Key(_)) => return Err(err),
                Err(err) => {
                    tracing::warn!(owner = %owner, field = %name, error = %err, "legacy token unreadable, field withheld");
                    *value = None;
                    unreadable.push(name.clone());
                }
            }
        }

        Ok(LoadedOwner { record, unreadable })
    }

    /// Finds owners of `tenant` whose `field` equals `value`.
    ///
    /// Plaintext matches win; if there are none and the field is encrypted
    /// for this tenant, owners whose stored lookup hash equals the value's
    /// hash are returned.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` if the backend fails.
    pub fn search_owners(&self, tenant: &TenantId, field: &str, value: &str) -> Result<Vec<OwnerId>, Error> {
        let plain = self.store.find_owners_by_field(tenant, field, value)?;
        if !plain.is_empty() {
            return Ok(plain);
        }

        if !FieldPolicy::new(self.settings.as_ref()).should_encrypt(tenant, field) {
            return Ok(Vec::new());
        }
        match lookup_hash(Some(value)) {
            Some(hash) => Ok(self.store.find_owners_by_field(tenant, field, &hash)?),
            None => Ok(Vec::new()),
        }
    }

    /// Returns the first owner [`Self::search_owners`] finds.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` if the backend fails.
    pub fn find_owner(&self, tenant: &TenantId, field: &str, value: &str) -> Result<Option<OwnerId>, Error> {
        Ok(self.search_owners(tenant, field, value)?.into_iter().next())
    }

    fn read_snapshot(&self, owner: &OwnerId) -> Result<OwnerSnapshot, Error> {
        Ok(self.store.read_owner(owner)?.ok_or_else(|| StoreError::OwnerNotFound(owner.to_string()))?)
    }

    /// Values stored as a token directly in the primary record, without a
    /// shadow record, predate the shadow table and are decrypted in place.
    fn read_legacy(&self, value: Option<&str>) -> Result<Option<String>, Error> {
        if self.strict {
            value.map(|v| self.cipher.try_decrypt(v)).transpose()
        } else {
            Ok(self.cipher.decrypt(value))
        }
    }
}
