//! In-memory [`StateStore`] with the same contract as the file store.
//!
//! Used by tests and dry runs. Nothing survives the process.

use super::{
    check_write_once, AllocationGuard, InstanceIdentity, InstanceKey, SharedInfraState,
    StateStore,
};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: Mutex<BTreeMap<InstanceKey, InstanceIdentity>>,
    infra: Mutex<Option<SharedInfraState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with the shared tier already recorded.
    pub fn with_infra(admin_password: &str) -> Self {
        let store = Self::default();
        *store.infra.lock() = Some(SharedInfraState {
            admin_password: admin_password.to_string(),
            created_at: chrono::Utc::now(),
        });
        store
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &InstanceKey) -> Result<Option<InstanceIdentity>> {
        Ok(self.records.lock().get(key).cloned())
    }

    fn put(&self, key: &InstanceKey, identity: &InstanceIdentity) -> Result<()> {
        let mut records = self.records.lock();
        check_write_once(key, records.get(key), identity)?;
        records.insert(key.clone(), identity.clone());
        Ok(())
    }

    fn delete(&self, key: &InstanceKey) -> Result<bool> {
        Ok(self.records.lock().remove(key).is_some())
    }

    fn list(&self) -> Result<Vec<(InstanceKey, InstanceIdentity)>> {
        Ok(self
            .records
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn get_infra(&self) -> Result<Option<SharedInfraState>> {
        Ok(self.infra.lock().clone())
    }

    fn put_infra(&self, state: &SharedInfraState) -> Result<()> {
        let mut infra = self.infra.lock();
        if let Some(existing) = infra.as_ref() {
            if existing.admin_password != state.admin_password {
                return Err(Error::State(
                    "refusing to replace the shared infrastructure credential; tear it down first"
                        .to_string(),
                ));
            }
        }
        *infra = Some(state.clone());
        Ok(())
    }

    fn delete_infra(&self) -> Result<bool> {
        Ok(self.infra.lock().take().is_some())
    }

    fn lock_allocations(&self) -> Result<AllocationGuard> {
        Ok(AllocationGuard::noop())
    }
}
