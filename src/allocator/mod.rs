//! Allocation of the scarce per-instance resources: service port, cache
//! namespace index and secrets.
//!
//! Uniqueness is always computed against the record set passed in by the
//! caller, which must be read fresh from the state store under the
//! allocation lock. Nothing here caches previous allocations.

mod port;
mod secret;

pub use port::{find_free_port, PortProbe, TcpPortProbe};
pub use secret::{generate_secret, mask_secret, SECRET_LEN};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::state::{InstanceIdentity, InstanceKey};
use chrono::Utc;
use std::collections::HashSet;

/// Cache namespace for the next instance: one past the highest index in use,
/// never at or below `floor`.
///
/// The floor holds even when records exist. A hand-edited record with an
/// index at or below the floor is ignored for the next pick, so the reserved
/// low indices are never handed out: with `floor = 2` and only index 1 in
/// use the result is 3, not 2.
pub fn next_namespace_index<'a>(
    in_use: impl IntoIterator<Item = &'a InstanceIdentity>,
    floor: u32,
) -> Result<u32> {
    let highest = in_use
        .into_iter()
        .map(|identity| identity.cache_namespace_index)
        .fold(floor, u32::max);
    highest
        .checked_add(1)
        .ok_or_else(|| Error::Allocation("cache namespace indices exhausted".to_string()))
}

pub struct ResourceAllocator {
    probe: Box<dyn PortProbe>,
    default_port: u16,
    port_attempts: u32,
    namespace_floor: u32,
}

impl ResourceAllocator {
    pub fn new(
        probe: Box<dyn PortProbe>,
        default_port: u16,
        port_attempts: u32,
        namespace_floor: u32,
    ) -> Self {
        Self {
            probe,
            default_port,
            port_attempts,
            namespace_floor,
        }
    }

    pub fn from_settings(settings: &Settings, probe: Box<dyn PortProbe>) -> Self {
        Self::new(
            probe,
            settings.default_port,
            settings.port_attempts,
            settings.namespace_floor,
        )
    }

    /// Build a fresh identity for `key`, unique against `existing`.
    pub fn allocate(
        &self,
        key: &InstanceKey,
        existing: &[(InstanceKey, InstanceIdentity)],
        preferred_port: Option<u16>,
    ) -> Result<InstanceIdentity> {
        let others = existing.iter().filter(|(k, _)| k != key).map(|(_, id)| id);

        let reserved: HashSet<u16> = others.clone().map(|id| id.service_port).collect();
        let start = preferred_port.unwrap_or(self.default_port);
        let service_port = find_free_port(self.probe.as_ref(), start, &reserved, self.port_attempts)?;
        let cache_namespace_index = next_namespace_index(others, self.namespace_floor)?;

        let database_name = key.database_name();
        tracing::info!(
            "Allocated port {} and cache namespace {} for '{}'",
            service_port,
            cache_namespace_index,
            key
        );

        Ok(InstanceIdentity {
            database_user: database_name.clone(),
            database_name,
            database_password: generate_secret(),
            cache_namespace_index,
            service_port,
            encryption_key: generate_secret(),
            created_at: Utc::now(),
        })
    }
}
