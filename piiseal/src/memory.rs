//! In-memory reference [`Store`].
//!
//! A transaction works on a private copy of the state while holding the
//! write lock and publishes the copy on success, so concurrent readers see
//! either all of a transaction or none of it.

use crate::context::{OwnerId, TenantId};
use crate::error::{Error, StoreError};
use crate::owner::{OwnerAccess, OwnerRecord};
use crate::shadow::{ShadowRecord, ShadowStore};
use crate::store::{OwnerSnapshot, Store, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;

type ShadowKey = (OwnerId, String);

#[derive(Debug, Clone, Default)]
struct MemoryState {
    owners: BTreeMap<OwnerId, OwnerRecord>,
    shadows: BTreeMap<ShadowKey, ShadowRecord>,
}

/// Serializable dump of a [`MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    #[serde(default)]
    pub owners: Vec<OwnerRecord>,
    #[serde(default)]
    pub shadows: Vec<ShadowRecord>,
}

impl From<MemorySnapshot> for MemoryState {
    fn from(snapshot: MemorySnapshot) -> Self {
        Self {
            owners: snapshot.owners.into_iter().map(|o| (o.id.clone(), o)).collect(),
            shadows: snapshot
                .shadows
                .into_iter()
                .map(|s| ((s.owner_ref().clone(), s.field_name().to_string()), s))
                .collect(),
        }
    }
}

impl From<&MemoryState> for MemorySnapshot {
    fn from(state: &MemoryState) -> Self {
        Self {
            owners: state.owners.values().cloned().collect(),
            shadows: state.shadows.values().cloned().collect(),
        }
    }
}

/// Store backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a store from a snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: MemorySnapshot) -> Self {
        Self { state: RwLock::new(snapshot.into()) }
    }

    /// Dumps the current state.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Poisoned` if the state lock was poisoned.
    pub fn snapshot(&self) -> Result<MemorySnapshot, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(MemorySnapshot::from(&*state))
    }

    /// Inserts or replaces an owner record outside any transaction.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Poisoned` if the state lock was poisoned.
    pub fn insert_owner(&self, record: OwnerRecord) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::Poisoned)?;
        state.owners.insert(record.id.clone(), record);
        Ok(())
    }

    /// Returns a copy of an owner record as stored (no decryption).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Poisoned` if the state lock was poisoned.
    pub fn raw_owner(&self, id: &OwnerId) -> Result<Option<OwnerRecord>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.owners.get(id).cloned())
    }

    /// Number of live shadow records.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Poisoned` if the state lock was poisoned.
    pub fn shadow_count(&self) -> Result<usize, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.shadows.len())
    }
}

struct MemoryTx {
    state: MemoryState,
}

impl OwnerAccess for MemoryTx {
    fn load_owner(&mut self, id: &OwnerId) -> Result<Option<OwnerRecord>, StoreError> {
        Ok(self.state.owners.get(id).cloned())
    }

    fn write_field(&mut self, id: &OwnerId, field: &str, value: Option<String>) -> Result<(), StoreError> {
        let owner = self
            .state
            .owners
            .get_mut(id)
            .ok_or_else(|| StoreError::OwnerNotFound(id.to_string()))?;
        owner.set_field(field, value);
        Ok(())
    }
}

impl ShadowStore for MemoryTx {
    fn find_shadow(&mut self, owner: &OwnerId, field: &str) -> Result<Option<ShadowRecord>, StoreError> {
        Ok(self.state.shadows.get(&(owner.clone(), field.to_string())).cloned())
    }

    fn shadows_for_owner(&mut self, owner: &OwnerId) -> Result<Vec<ShadowRecord>, StoreError> {
        Ok(self.state.shadows.values().filter(|s| s.owner_ref() == owner).cloned().collect())
    }

    fn persist_shadow(&mut self, record: ShadowRecord) -> Result<(), StoreError> {
        if !self.state.owners.contains_key(record.owner_ref()) {
            return Err(StoreError::OwnerNotFound(record.owner_ref().to_string()));
        }

        let key = (record.owner_ref().clone(), record.field_name().to_string());
        if let Some(existing) = self.state.shadows.get(&key) {
            if existing.id() != record.id() {
                return Err(StoreError::Backend(format!(
                    "duplicate shadow record for {}|{}",
                    key.0, key.1
                )));
            }
        }
        self.state.shadows.insert(key, record);
        Ok(())
    }

    fn remove_shadow(&mut self, record: &ShadowRecord) -> Result<(), StoreError> {
        let key = (record.owner_ref().clone(), record.field_name().to_string());
        if self.state.shadows.get(&key).is_some_and(|s| s.id() == record.id()) {
            self.state.shadows.remove(&key);
        }
        Ok(())
    }
}

impl Store for MemoryStore {
    fn owners_in_tenant(&self, tenant: &TenantId) -> Result<Vec<OwnerId>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.owners.values().filter(|o| &o.tenant == tenant).map(|o| o.id.clone()).collect())
    }

    fn find_owners_by_field(
        &self,
        tenant: &TenantId,
        field: &str,
        value: &str,
    ) -> Result<Vec<OwnerId>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state
            .owners
            .values()
            .filter(|o| &o.tenant == tenant && o.field(field) == Some(value))
            .map(|o| o.id.clone())
            .collect())
    }

    fn read_owner(&self, id: &OwnerId) -> Result<Option<OwnerSnapshot>, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::Poisoned)?;
        Ok(state.owners.get(id).map(|record| OwnerSnapshot {
            record: record.clone(),
            shadows: state.shadows.values().filter(|s| s.owner_ref() == id).cloned().collect(),
        }))
    }

    fn transaction<T, F>(&self, work: F) -> Result<T, Error>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T, Error>,
    {
        let mut guard = self.state.write().map_err(|_| StoreError::Poisoned)?;
        let mut tx = MemoryTx { state: guard.clone() };

        let output = work(&mut tx)?;
        *guard = tx.state;
        drop(guard);

        Ok(output)
    }
}
