//! Unit-of-work boundary over owner records and shadow records.
//!
//! The core never commits on its own: every write it performs happens inside
//! [`Store::transaction`], and the store guarantees that the shadow record
//! and the primary-record hash written in one transaction become visible
//! together or not at all.

use crate::context::{OwnerId, TenantId};
use crate::error::{Error, StoreError};
use crate::owner::{OwnerAccess, OwnerRecord};
use crate::shadow::{ShadowRecord, ShadowStore};

/// Everything a unit of work can touch.
pub trait Transaction: OwnerAccess + ShadowStore {}

impl<T: OwnerAccess + ShadowStore> Transaction for T {}

/// Consistent view of one owner and its shadow records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerSnapshot {
    pub record: OwnerRecord,
    pub shadows: Vec<ShadowRecord>,
}

impl OwnerSnapshot {
    /// Returns the shadow record for `field`, if any.
    #[must_use]
    pub fn shadow(&self, field: &str) -> Option<&ShadowRecord> {
        self.shadows.iter().find(|s| s.field_name() == field)
    }
}

/// Persistence backend.
pub trait Store: Send + Sync {
    /// Lists the owners of a tenant.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the backend fails.
    fn owners_in_tenant(&self, tenant: &TenantId) -> Result<Vec<OwnerId>, StoreError>;

    /// Lists owners of a tenant whose `field` equals `value` exactly.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the backend fails.
    fn find_owners_by_field(
        &self,
        tenant: &TenantId,
        field: &str,
        value: &str,
    ) -> Result<Vec<OwnerId>, StoreError>;

    /// Reads one owner together with its shadow records, consistently.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the backend fails.
    fn read_owner(&self, id: &OwnerId) -> Result<Option<OwnerSnapshot>, StoreError>;

    /// Runs `work` as one atomic unit: its writes are published if it returns
    /// `Ok` and discarded if it returns `Err`.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `work`, or `Error::Store` if the unit of
    /// work itself cannot be started or committed.
    fn transaction<T, F>(&self, work: F) -> Result<T, Error>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T, Error>;
}
