//! # `piiseal`
//!
//! Reversible field-level encryption for user records, with searchable
//! lookup hashes and an integrity check on every read.
//!
//! ## Features
//!
//! - AES-CBC/PKCS#7 tokens (`$$$` + base64(IV || ciphertext)), random IV per value
//! - SHA-1 lookup hashes of normalized plaintext for equality search
//! - Shadow records holding the ciphertext beside each hashed field
//! - Per-tenant enable/disable with bulk, idempotent migration both ways
//! - Hash-versus-ciphertext verification before a value is served
//!
//! ## Example
//!
//! ```rust,ignore
//! use piiseal::prelude::*;
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! let settings = Arc::new(InMemoryTenantSettings::new());
//! let pii = PiiEncryption::new(store, FieldCipher::global(), settings);
//!
//! pii.migrator().set_tenant_encryption(&TenantId::from("acme"), true)?;
//! let owner = pii.find_owner(&TenantId::from("acme"), "email", "alice@example.com")?;
//! ```

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cipher;
pub mod config;
pub mod context;
pub mod error;
pub mod hooks;
pub mod key_provider;
pub mod lookup_hash;
pub mod memory;
pub mod migration;
pub mod owner;
pub mod policy;
pub mod shadow;
pub mod store;
pub mod token;
pub mod verifier;

pub mod prelude {
    //! Convenience re-exports for common use.
    pub use crate::cipher::FieldCipher;
    pub use crate::config::Settings;
    pub use crate::context::{FieldContext, OwnerId, TenantId};
    pub use crate::error::{Error, IntegrityFailure, KeyError, StoreError};
    pub use crate::hooks::{DomainEvent, LoadedOwner, PiiEncryption};
    pub use crate::key_provider::{EnvKeySource, KeyProvider, KeySource, StaticKeySource};
    pub use crate::lookup_hash::{looks_like_lookup_hash, lookup_hash};
    pub use crate::memory::{MemorySnapshot, MemoryStore};
    pub use crate::migration::{MigrationReport, Migrator};
    pub use crate::owner::OwnerRecord;
    pub use crate::policy::{EncryptionCapability, FieldPolicy, InMemoryTenantSettings, TenantSettings};
    pub use crate::shadow::ShadowRecord;
    pub use crate::store::{Store, Transaction};
    pub use crate::verifier::IntegrityVerifier;
}
