//! Field classification: which fields of which tenant get encrypted.

use crate::context::TenantId;
use crate::error::StoreError;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// Name prefix that puts a dynamic attribute in scope unconditionally.
pub const PII_ATTRIBUTE_PREFIX: &str = "pii-";

/// Core owner fields, in scope whenever the tenant has encryption enabled.
pub const CORE_FIELDS: [&str; 4] = ["username", "email", "firstName", "lastName"];

/// Field holding the login identifier.
pub const USERNAME_FIELD: &str = "username";

/// Returns true if `field` is one of the always-encrypted core fields.
#[must_use]
pub fn is_core_field(field: &str) -> bool {
    CORE_FIELDS.contains(&field)
}

/// Read-only view of tenant encryption settings.
///
/// Tenants a capability knows nothing about report encryption as disabled.
pub trait EncryptionCapability: Send + Sync {
    /// Returns the tenant's `enabled` flag.
    fn is_encryption_enabled(&self, tenant: &TenantId) -> bool;

    /// Returns the declarative per-field opt-in, if the tenant's attribute
    /// schema configures one for `field`.
    fn field_opt_in(&self, tenant: &TenantId, field: &str) -> Option<bool>;
}

/// Writable tenant configuration store.
pub trait TenantSettings: EncryptionCapability {
    /// Persists the tenant's `enabled` flag.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the flag cannot be persisted.
    fn set_encryption_enabled(&self, tenant: &TenantId, enabled: bool) -> Result<(), StoreError>;
}

/// Capability used when the host has no encryption support wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct Disabled;

impl EncryptionCapability for Disabled {
    fn is_encryption_enabled(&self, _tenant: &TenantId) -> bool {
        false
    }

    fn field_opt_in(&self, _tenant: &TenantId, _field: &str) -> Option<bool> {
        None
    }
}

#[derive(Debug, Default)]
struct TenantState {
    enabled: HashSet<TenantId>,
    opt_in: HashMap<(TenantId, String), bool>,
}

/// In-memory tenant settings.
#[derive(Debug, Default)]
pub struct InMemoryTenantSettings {
    state: RwLock<TenantState>,
}

impl InMemoryTenantSettings {
    /// Creates settings with every tenant disabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares the per-field opt-in for one attribute of a tenant's schema.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Poisoned` if the settings lock was poisoned.
    pub fn set_field_opt_in(
        &self,
        tenant: &TenantId,
        field: impl Into<String>,
        enabled: bool,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        state.opt_in.insert((tenant.clone(), field.into()), enabled);
        Ok(())
    }
}

impl EncryptionCapability for InMemoryTenantSettings {
    fn is_encryption_enabled(&self, tenant: &TenantId) -> bool {
        self.state.read().map(|s| s.enabled.contains(tenant)).unwrap_or(false)
    }

    fn field_opt_in(&self, tenant: &TenantId, field: &str) -> Option<bool> {
        let state = self.state.read().ok()?;
        state.opt_in.get(&(tenant.clone(), field.to_string())).copied()
    }
}

impl TenantSettings for InMemoryTenantSettings {
    fn set_encryption_enabled(&self, tenant: &TenantId, enabled: bool) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        if enabled {
            state.enabled.insert(tenant.clone());
        } else {
            state.enabled.remove(tenant);
        }
        Ok(())
    }
}

/// Decides per (tenant, field) whether a value is encrypted.
pub struct FieldPolicy<'a, C: EncryptionCapability + ?Sized> {
    capability: &'a C,
}

impl<'a, C: EncryptionCapability + ?Sized> FieldPolicy<'a, C> {
    /// Creates a policy over the given capability.
    #[must_use]
    pub const fn new(capability: &'a C) -> Self {
        Self { capability }
    }

    /// Returns the tenant's `enabled` flag.
    #[must_use]
    pub fn is_enabled(&self, tenant: &TenantId) -> bool {
        self.capability.is_encryption_enabled(tenant)
    }

    /// Returns true if `field` of `tenant` must be stored encrypted.
    ///
    /// Order of checks:
    /// 1. Tenant disabled → false
    /// 2. Core field → true
    /// 3. `pii-` prefix → true
    /// 4. Declarative opt-in, default false
    #[must_use]
    pub fn should_encrypt(&self, tenant: &TenantId, field: &str) -> bool {
        if !self.is_enabled(tenant) {
            return false;
        }
        if is_core_field(field) || field.starts_with(PII_ATTRIBUTE_PREFIX) {
            return true;
        }
        self.capability.field_opt_in(tenant, field).unwrap_or(false)
    }
}
