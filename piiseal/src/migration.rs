//! Bulk conversion of a tenant's owners between plaintext and
//! encrypted+hashed representation.
//!
//! Each owner is converted inside its own unit of work, so either its shadow
//! records and lookup hashes land together or nothing for that owner does.
//! Both directions are idempotent: a second run finds nothing to change.

use crate::cipher::FieldCipher;
use crate::context::{FieldContext, OwnerId, TenantId};
use crate::error::{Error, IntegrityFailure, StoreError};
use crate::lookup_hash::{lookup_hash, looks_like_lookup_hash};
use crate::policy::{FieldPolicy, TenantSettings};
use crate::shadow::ShadowRecord;
use crate::store::{Store, Transaction};
use crate::verifier::{is_stale_shadow, IntegrityVerifier};

/// Counters describing what a migration run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub owners_visited: usize,
    pub fields_changed: usize,
    pub skipped_service_accounts: usize,
    /// In-scope values left alone because they already look like a lookup hash.
    pub skipped_hashed: usize,
    /// Owners left untouched because a shadow record failed verification.
    pub failures: Vec<IntegrityFailure>,
}

impl MigrationReport {
    /// Adds another report's counters to this one.
    pub fn merge(&mut self, other: Self) {
        self.owners_visited += other.owners_visited;
        self.fields_changed += other.fields_changed;
        self.skipped_service_accounts += other.skipped_service_accounts;
        self.skipped_hashed += other.skipped_hashed;
        self.failures.extend(other.failures);
    }
}

/// Drives encrypt-all / decrypt-all for one tenant at a time.
pub struct Migrator<'a, S: Store> {
    store: &'a S,
    cipher: &'a FieldCipher,
    settings: &'a dyn TenantSettings,
}

impl<'a, S: Store> Migrator<'a, S> {
    #[must_use]
    pub fn new(store: &'a S, cipher: &'a FieldCipher, settings: &'a dyn TenantSettings) -> Self {
        Self { store, cipher, settings }
    }

    /// Enables or disables encryption for a tenant and migrates its owners.
    ///
    /// Enabling first checks that the key resolves; the flag is not flipped
    /// if it does not.
    ///
    /// # Errors
    ///
    /// Returns `Error::Key` for unusable key material and `Error::Store` if the
    /// flag or a record cannot be written.
    pub fn set_tenant_encryption(&self, tenant: &TenantId, enabled: bool) -> Result<MigrationReport, Error> {
        if enabled {
            self.cipher.key_provider().get_key()?;
        }

        self.settings.set_encryption_enabled(tenant, enabled)?;
        tracing::debug!(
            event = if enabled { "ENCRYPTION_ENABLED" } else { "ENCRYPTION_DISABLED" },
            tenant = %tenant,
            "tenant encryption toggled"
        );

        if enabled {
            self.encrypt_all(tenant)
        } else {
            self.decrypt_all(tenant)
        }
    }

    /// Encrypts every in-scope field of every non-service owner of `tenant`.
    ///
    /// Does nothing if the tenant has encryption disabled.
    ///
    /// # Errors
    ///
    /// Returns error if the key cannot be resolved or the store fails. Owners
    /// converted before the error stay converted.
    pub fn encrypt_all(&self, tenant: &TenantId) -> Result<MigrationReport, Error> {
        let mut report = MigrationReport::default();
        if !self.settings.is_encryption_enabled(tenant) {
            tracing::debug!(tenant = %tenant, "encryption disabled, nothing to encrypt");
            return Ok(report);
        }

        for owner in self.store.owners_in_tenant(tenant)? {
            let owner_report = self.store.transaction(|tx| self.encrypt_owner_in(tx, &owner))?;
            report.merge(owner_report);
        }

        tracing::info!(
            tenant = %tenant,
            owners = report.owners_visited,
            fields = report.fields_changed,
            "tenant encrypted"
        );
        Ok(report)
    }

    /// Restores plaintext for every owner of `tenant` that has shadow records,
    /// removing the records.
    ///
    /// An owner whose shadow record fails verification is skipped, logged, and
    /// listed in [`MigrationReport::failures`]; the rest of the tenant proceeds.
    ///
    /// # Errors
    ///
    /// Returns error if the key cannot be resolved or the store fails.
    pub fn decrypt_all(&self, tenant: &TenantId) -> Result<MigrationReport, Error> {
        let mut report = MigrationReport::default();

        for owner in self.store.owners_in_tenant(tenant)? {
            match self.store.transaction(|tx| self.decrypt_owner_in(tx, &owner)) {
                Ok(owner_report) => report.merge(owner_report),
                Err(Error::Integrity(failure)) => {
                    failure.log();
                    report.owners_visited += 1;
                    report.failures.push(failure);
                }
                Err(err) => return Err(err),
            }
        }

        tracing::info!(
            tenant = %tenant,
            owners = report.owners_visited,
            fields = report.fields_changed,
            failures = report.failures.len(),
            "tenant decrypted"
        );
        Ok(report)
    }

    /// Encrypts one owner within the caller's unit of work.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::OwnerNotFound` for an unknown owner, `Error::Key`
    /// for unusable key material, or a store error.
    pub fn encrypt_owner_in(&self, tx: &mut dyn Transaction, id: &OwnerId) -> Result<MigrationReport, Error> {
        let owner = tx.load_owner(id)?.ok_or_else(|| StoreError::OwnerNotFound(id.to_string()))?;
        let policy = FieldPolicy::new(self.settings);
        let mut report = MigrationReport::default();

        if !policy.is_enabled(&owner.tenant) {
            return Ok(report);
        }
        report.owners_visited = 1;
        if owner.service_account {
            report.skipped_service_accounts = 1;
            return Ok(report);
        }

        for (field, value) in &owner.fields {
            if !policy.should_encrypt(&owner.tenant, field) {
                continue;
            }
            let Some(value) = value.as_deref() else {
                continue;
            };
            if looks_like_lookup_hash(value) {
                report.skipped_hashed += 1;
                continue;
            }

            // Values stored as tokens directly in the primary record predate
            // shadow records; lift them into the shadow table.
            let plaintext = if FieldCipher::is_encrypted(Some(value)) {
                match self.cipher.try_decrypt(value) {
                    Ok(plaintext) => plaintext,
                    Err(err @ Error::Key(_)) => return Err(err),
                    Err(err) => {
                        tracing::warn!(owner = %id, field = %field, error = %err, "legacy token unreadable, left as is");
                        continue;
                    }
                }
            } else {
                value.to_string()
            };

            let token = self.cipher.try_encrypt(&plaintext)?;
            let mut shadow = tx
                .shadow_record(id, field, true)?
                .unwrap_or_else(|| ShadowRecord::new(id.clone(), field.as_str()));
            shadow.set_ciphertext(token);
            tx.persist_shadow(shadow)?;
            tx.write_field(id, field, lookup_hash(Some(&plaintext)))?;
            report.fields_changed += 1;
        }

        // Fields cleared or rewritten in plaintext since they were encrypted
        let current = tx.load_owner(id)?.unwrap_or(owner);
        for shadow in tx.shadows_for_owner(id)? {
            if is_stale_shadow(current.field(shadow.field_name())) {
                tx.remove_shadow(&shadow)?;
                report.fields_changed += 1;
            }
        }

        tracing::debug!(event = "USER_ENCRYPTION", tenant = %current.tenant, owner = %id, fields = report.fields_changed);
        Ok(report)
    }

    /// Decrypts one owner within the caller's unit of work.
    ///
    /// Every shadow record is verified before anything is written, so a
    /// mismatch leaves the owner entirely untouched.
    ///
    /// # Errors
    ///
    /// Returns `Error::Integrity` on the first mismatching field, `Error::Key`
    /// for unusable key material, or a store error.
    pub fn decrypt_owner_in(&self, tx: &mut dyn Transaction, id: &OwnerId) -> Result<MigrationReport, Error> {
        let mut report = MigrationReport::default();
        let Some(owner) = tx.load_owner(id)? else {
            return Ok(report);
        };
        let shadows = tx.shadows_for_owner(id)?;

        let verifier = IntegrityVerifier::new(self.cipher);
        let mut restored = Vec::with_capacity(shadows.len());
        let mut stale = Vec::new();
        for shadow in &shadows {
            let stored = owner.field(shadow.field_name());
            if is_stale_shadow(stored) {
                stale.push(shadow);
                continue;
            }
            let context = FieldContext::new(owner.tenant.clone(), id.clone(), shadow.field_name());
            let plaintext = verifier.decrypt_verified(&context, stored, shadow.ciphertext())?;
            restored.push((shadow, plaintext));
        }

        for shadow in stale {
            tx.remove_shadow(shadow)?;
            report.fields_changed += 1;
        }
        for (shadow, plaintext) in &restored {
            tx.write_field(id, shadow.field_name(), Some(plaintext.clone()))?;
            tx.remove_shadow(shadow)?;
            report.fields_changed += 1;
        }

        for (field, value) in &owner.fields {
            if restored.iter().any(|(s, _)| s.field_name() == field.as_str()) {
                continue;
            }
            if let Some(token) = value.as_deref().filter(|v| FieldCipher::is_encrypted(Some(v))) {
                match self.cipher.try_decrypt(token) {
                    Ok(plaintext) => {
                        tx.write_field(id, field, Some(plaintext))?;
                        report.fields_changed += 1;
                    }
                    Err(err @ Error::Key(_)) => return Err(err),
                    Err(err) => {
                        tracing::warn!(owner = %id, field = %field, error = %err, "legacy token unreadable, left as is");
                    }
                }
            }
        }

        if report.fields_changed > 0 {
            report.owners_visited = 1;
            tracing::debug!(event = "USER_DECRYPTION", tenant = %owner.tenant, owner = %id, fields = report.fields_changed);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_provider::{KeyProvider, StaticKeySource};
    use crate::memory::MemoryStore;
    use crate::owner::OwnerRecord;
    use crate::policy::{EncryptionCapability, InMemoryTenantSettings};
    use secrecy::SecretString;
    use std::sync::Arc;

    fn test_cipher() -> FieldCipher {
        let source = StaticKeySource::new(Some(SecretString::new("1234567891123456".into())), None);
        FieldCipher::new(Arc::new(KeyProvider::new(source)))
    }

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_owner(
                OwnerRecord::new("u-1", "acme")
                    .with_field("username", Some("alice"))
                    .with_field("email", Some("Alice@Example.com"))
                    .with_field("firstName", Some("Alice"))
                    .with_field("lastName", None)
                    .with_field("pii-phone", Some("555-0100"))
                    .with_field("locale", Some("en")),
            )
            .unwrap();
        store
            .insert_owner(
                OwnerRecord::new("svc-1", "acme")
                    .as_service_account()
                    .with_field("username", Some("service-account-api")),
            )
            .unwrap();
        store
            .insert_owner(OwnerRecord::new("u-9", "other").with_field("username", Some("zed")))
            .unwrap();
        store
    }

    fn enabled(tenant: &TenantId) -> InMemoryTenantSettings {
        let settings = InMemoryTenantSettings::new();
        settings.set_encryption_enabled(tenant, true).unwrap();
        settings
    }

    #[test]
    fn test_encrypt_all_hashes_in_scope_fields() {
        let store = seeded_store();
        let cipher = test_cipher();
        let tenant = TenantId::from("acme");
        let settings = enabled(&tenant);

        let report = Migrator::new(&store, &cipher, &settings).encrypt_all(&tenant).unwrap();

        assert_eq!(report.fields_changed, 4);
        assert_eq!(report.skipped_service_accounts, 1);

        let owner = store.raw_owner(&OwnerId::from("u-1")).unwrap().unwrap();
        assert_eq!(owner.field("username"), lookup_hash(Some("alice")).as_deref());
        assert_eq!(owner.field("email"), lookup_hash(Some("alice@example.com")).as_deref());
        assert_eq!(owner.field("lastName"), None);
        assert_eq!(owner.field("locale"), Some("en"));
        assert_eq!(store.shadow_count().unwrap(), 4);

        let service = store.raw_owner(&OwnerId::from("svc-1")).unwrap().unwrap();
        assert_eq!(service.field("username"), Some("service-account-api"));

        let other = store.raw_owner(&OwnerId::from("u-9")).unwrap().unwrap();
        assert_eq!(other.field("username"), Some("zed"));
    }

    #[test]
    fn test_encrypt_all_disabled_tenant() {
        let store = seeded_store();
        let cipher = test_cipher();
        let settings = InMemoryTenantSettings::new();

        let report = Migrator::new(&store, &cipher, &settings).encrypt_all(&TenantId::from("acme")).unwrap();

        assert_eq!(report, MigrationReport::default());
        assert_eq!(store.shadow_count().unwrap(), 0);
    }

    #[test]
    fn test_encrypt_all_is_idempotent() {
        let store = seeded_store();
        let cipher = test_cipher();
        let tenant = TenantId::from("acme");
        let settings = enabled(&tenant);
        let migrator = Migrator::new(&store, &cipher, &settings);

        migrator.encrypt_all(&tenant).unwrap();
        let after_first = store.snapshot().unwrap();

        let second = migrator.encrypt_all(&tenant).unwrap();
        assert_eq!(second.fields_changed, 0);
        assert_eq!(second.skipped_hashed, 4);
        assert_eq!(store.snapshot().unwrap(), after_first);
    }

    #[test]
    fn test_round_trip_restores_original_state() {
        let store = seeded_store();
        let original = store.snapshot().unwrap();
        let cipher = test_cipher();
        let tenant = TenantId::from("acme");
        let settings = enabled(&tenant);
        let migrator = Migrator::new(&store, &cipher, &settings);

        migrator.encrypt_all(&tenant).unwrap();
        let report = migrator.decrypt_all(&tenant).unwrap();

        assert_eq!(report.fields_changed, 4);
        assert!(report.failures.is_empty());
        assert_eq!(store.snapshot().unwrap(), original);

        let again = migrator.decrypt_all(&tenant).unwrap();
        assert_eq!(again.fields_changed, 0);
        assert_eq!(store.snapshot().unwrap(), original);
    }

    #[test]
    fn test_decrypt_all_skips_tampered_owner() {
        let store = seeded_store();
        store
            .insert_owner(OwnerRecord::new("u-2", "acme").with_field("username", Some("bob")))
            .unwrap();
        let cipher = test_cipher();
        let tenant = TenantId::from("acme");
        let settings = enabled(&tenant);
        let migrator = Migrator::new(&store, &cipher, &settings);
        migrator.encrypt_all(&tenant).unwrap();

        // Point u-1's username hash at a different value
        store
            .transaction(|tx| Ok(tx.write_field(&OwnerId::from("u-1"), "username", lookup_hash(Some("eve")))?))
            .unwrap();
        let tampered = store.raw_owner(&OwnerId::from("u-1")).unwrap();

        let report = migrator.decrypt_all(&tenant).unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].context().owner(), &OwnerId::from("u-1"));
        assert_eq!(store.raw_owner(&OwnerId::from("u-1")).unwrap(), tampered);
        assert_eq!(store.raw_owner(&OwnerId::from("u-2")).unwrap().unwrap().field("username"), Some("bob"));
    }

    #[test]
    fn test_set_tenant_encryption_toggles_and_migrates() {
        let store = seeded_store();
        let original = store.snapshot().unwrap();
        let cipher = test_cipher();
        let settings = InMemoryTenantSettings::new();
        let tenant = TenantId::from("acme");
        let migrator = Migrator::new(&store, &cipher, &settings);

        let enabled = migrator.set_tenant_encryption(&tenant, true).unwrap();
        assert!(settings.is_encryption_enabled(&tenant));
        assert_eq!(enabled.fields_changed, 4);

        migrator.set_tenant_encryption(&tenant, false).unwrap();
        assert!(!settings.is_encryption_enabled(&tenant));
        assert_eq!(store.snapshot().unwrap(), original);
    }

    #[test]
    fn test_enable_with_bad_key_keeps_flag_off() {
        let store = seeded_store();
        let source = StaticKeySource::new(Some(SecretString::new("too-short".into())), None);
        let cipher = FieldCipher::new(Arc::new(KeyProvider::new(source)));
        let settings = InMemoryTenantSettings::new();
        let tenant = TenantId::from("acme");

        let result = Migrator::new(&store, &cipher, &settings).set_tenant_encryption(&tenant, true);

        assert!(matches!(result, Err(Error::Key(_))));
        assert!(!settings.is_encryption_enabled(&tenant));
        assert_eq!(store.shadow_count().unwrap(), 0);
    }

    #[test]
    fn test_legacy_primary_token_is_lifted() {
        let store = MemoryStore::new();
        let cipher = test_cipher();
        let legacy = cipher.try_encrypt("555-0199").unwrap();
        store
            .insert_owner(OwnerRecord::new("u-1", "acme").with_field("pii-phone", Some(&legacy)))
            .unwrap();
        let tenant = TenantId::from("acme");
        let settings = enabled(&tenant);

        Migrator::new(&store, &cipher, &settings).encrypt_all(&tenant).unwrap();

        let owner = store.raw_owner(&OwnerId::from("u-1")).unwrap().unwrap();
        assert_eq!(owner.field("pii-phone"), lookup_hash(Some("555-0199")).as_deref());
    }

    #[test]
    fn test_hash_shaped_plaintext_is_skipped() {
        let store = MemoryStore::new();
        let hex_name = "0123456789abcdef0123456789abcdef01234567";
        store.insert_owner(OwnerRecord::new("u-1", "acme").with_field("username", Some(hex_name))).unwrap();
        let cipher = test_cipher();
        let tenant = TenantId::from("acme");
        let settings = enabled(&tenant);

        let report = Migrator::new(&store, &cipher, &settings).encrypt_all(&tenant).unwrap();

        assert_eq!(report.skipped_hashed, 1);
        assert_eq!(store.shadow_count().unwrap(), 0);
    }

    #[test]
    fn test_cleared_field_drops_shadow_and_disable_restores() {
        let store = seeded_store();
        let cipher = test_cipher();
        let tenant = TenantId::from("acme");
        let settings = enabled(&tenant);
        let migrator = Migrator::new(&store, &cipher, &settings);
        let owner = OwnerId::from("u-1");
        migrator.encrypt_all(&tenant).unwrap();

        store.transaction(|tx| Ok(tx.write_field(&owner, "email", None)?)).unwrap();
        let report = store.transaction(|tx| migrator.encrypt_owner_in(tx, &owner)).unwrap();
        assert_eq!(report.fields_changed, 1);
        assert_eq!(store.shadow_count().unwrap(), 3);

        settings.set_encryption_enabled(&tenant, false).unwrap();
        let report = migrator.decrypt_all(&tenant).unwrap();

        assert!(report.failures.is_empty());
        assert_eq!(store.shadow_count().unwrap(), 0);
        let restored = store.raw_owner(&owner).unwrap().unwrap();
        assert_eq!(restored.field("email"), None);
        assert_eq!(restored.field("username"), Some("alice"));
        assert_eq!(restored.field("pii-phone"), Some("555-0100"));
    }

    #[test]
    fn test_decrypt_all_tolerates_unhooked_clear() {
        let store = seeded_store();
        let cipher = test_cipher();
        let tenant = TenantId::from("acme");
        let settings = enabled(&tenant);
        let migrator = Migrator::new(&store, &cipher, &settings);
        let owner = OwnerId::from("u-1");
        migrator.encrypt_all(&tenant).unwrap();

        // Cleared without the write hook running: the shadow is still there
        store.transaction(|tx| Ok(tx.write_field(&owner, "firstName", None)?)).unwrap();
        assert_eq!(store.shadow_count().unwrap(), 4);

        let report = migrator.set_tenant_encryption(&tenant, false).unwrap();

        assert!(report.failures.is_empty());
        assert_eq!(store.shadow_count().unwrap(), 0);
        let restored = store.raw_owner(&owner).unwrap().unwrap();
        assert_eq!(restored.field("firstName"), None);
        assert_eq!(restored.field("email"), Some("Alice@Example.com"));
    }

    #[test]
    fn test_plaintext_edit_after_opt_out_keeps_new_value() {
        let store = MemoryStore::new();
        store
            .insert_owner(
                OwnerRecord::new("u-1", "acme")
                    .with_field("username", Some("alice"))
                    .with_field("phone", Some("555-0100")),
            )
            .unwrap();
        let cipher = test_cipher();
        let tenant = TenantId::from("acme");
        let settings = enabled(&tenant);
        settings.set_field_opt_in(&tenant, "phone", true).unwrap();
        let migrator = Migrator::new(&store, &cipher, &settings);
        let owner = OwnerId::from("u-1");
        migrator.encrypt_all(&tenant).unwrap();
        assert_eq!(store.shadow_count().unwrap(), 2);

        settings.set_field_opt_in(&tenant, "phone", false).unwrap();
        store.transaction(|tx| Ok(tx.write_field(&owner, "phone", Some("555-0199".to_string()))?)).unwrap();
        store.transaction(|tx| migrator.encrypt_owner_in(tx, &owner)).unwrap();
        assert_eq!(store.shadow_count().unwrap(), 1);

        let report = migrator.set_tenant_encryption(&tenant, false).unwrap();
        assert!(report.failures.is_empty());
        let restored = store.raw_owner(&owner).unwrap().unwrap();
        assert_eq!(restored.field("phone"), Some("555-0199"));
        assert_eq!(restored.field("username"), Some("alice"));
    }
}
