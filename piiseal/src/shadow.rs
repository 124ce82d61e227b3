//! Shadow records: the side table holding the ciphertext of each encrypted
//! (owner, field) pair.

use crate::context::OwnerId;
use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current ciphertext for one field of one owner.
///
/// At most one live record exists per (owner, field). Records are created
/// lazily on first encryption and removed when the field is migrated back
/// to plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowRecord {
    id: Uuid,
    owner_ref: OwnerId,
    field_name: String,
    ciphertext: String,
}

impl ShadowRecord {
    /// Creates an unpersisted record with a fresh identifier.
    #[must_use]
    pub fn new(owner_ref: OwnerId, field_name: impl Into<String>) -> Self {
        Self { id: Uuid::new_v4(), owner_ref, field_name: field_name.into(), ciphertext: String::new() }
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub const fn owner_ref(&self) -> &OwnerId {
        &self.owner_ref
    }

    #[must_use]
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    #[must_use]
    pub fn ciphertext(&self) -> &str {
        &self.ciphertext
    }

    pub fn set_ciphertext(&mut self, token: String) {
        self.ciphertext = token;
    }
}

/// Shadow record persistence within the caller's unit of work.
pub trait ShadowStore {
    /// Finds the record for (owner, field).
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the backend fails.
    fn find_shadow(&mut self, owner: &OwnerId, field: &str) -> Result<Option<ShadowRecord>, StoreError>;

    /// Lists every record of one owner.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the backend fails.
    fn shadows_for_owner(&mut self, owner: &OwnerId) -> Result<Vec<ShadowRecord>, StoreError>;

    /// Inserts or updates a record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if a different record already exists for the
    /// same (owner, field) pair, or if the backend fails.
    fn persist_shadow(&mut self, record: ShadowRecord) -> Result<(), StoreError>;

    /// Deletes a record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the backend fails.
    fn remove_shadow(&mut self, record: &ShadowRecord) -> Result<(), StoreError>;

    /// Lookup-or-create: returns the existing record for (owner, field), a new
    /// unpersisted one if `create_if_missing`, otherwise `None`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the lookup fails.
    fn shadow_record(
        &mut self,
        owner: &OwnerId,
        field: &str,
        create_if_missing: bool,
    ) -> Result<Option<ShadowRecord>, StoreError> {
        match self.find_shadow(owner, field)? {
            Some(record) => Ok(Some(record)),
            None if create_if_missing => Ok(Some(ShadowRecord::new(owner.clone(), field))),
            None => Ok(None),
        }
    }
}
