//! Durable identity records.
//!
//! One [`InstanceIdentity`] per [`InstanceKey`], plus a single
//! [`SharedInfraState`] for the shared database/cache tier. The
//! [`StateStore`] trait is the only way the rest of the crate touches
//! persisted identity.
//!
//! # Concurrency
//!
//! Stores are not transactional. Two invocations that allocate at the same
//! time can both read the same record set and pick the same port or cache
//! index. Callers that allocate must hold the guard returned by
//! [`StateStore::lock_allocations`] from the moment they read the record set
//! until the new record is persisted.

mod file;
mod memory;
mod record;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::fmt;

/// Longest accepted server or instance name.
const MAX_NAME_LEN: usize = 64;

/// Identifies one instance: a server name and an instance name.
///
/// Both parts are lower-cased on construction and restricted to ASCII
/// alphanumerics. The separators used by the derived names (`_` in the
/// database identifier, `-` in the unit id, `__` in the record filename)
/// can therefore never occur inside a part, so distinct keys always derive
/// distinct names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceKey {
    server: String,
    instance: String,
}

impl InstanceKey {
    pub fn new(server: &str, instance: &str) -> Result<Self> {
        Ok(Self {
            server: Self::validate_part("server", server)?,
            instance: Self::validate_part("instance", instance)?,
        })
    }

    fn validate_part(what: &str, value: &str) -> Result<String> {
        if value.is_empty() {
            return Err(Error::Precondition(format!("{} name cannot be empty", what)));
        }
        if value.len() > MAX_NAME_LEN {
            return Err(Error::Precondition(format!(
                "{} name '{}' is too long (max {} characters)",
                what, value, MAX_NAME_LEN
            )));
        }
        if !value.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::Precondition(format!(
                "{} name '{}' contains invalid characters. Only letters and digits allowed.",
                what, value
            )));
        }
        Ok(value.to_ascii_lowercase())
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Database name and login role: `server_instance`.
    pub fn database_name(&self) -> String {
        format!("{}_{}", self.server, self.instance)
    }

    /// Compose project name of this instance's deployment unit.
    pub fn unit_id(&self, prefix: &str) -> String {
        format!("{}-{}-{}", prefix, self.server, self.instance)
    }

    /// Filename stem of the persisted record.
    pub(crate) fn file_stem(&self) -> String {
        format!("{}__{}", self.server, self.instance)
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.server, self.instance)
    }
}

/// Everything that makes one instance distinct from all others.
///
/// `Debug` masks both secrets so an identity can be traced safely.
#[derive(Clone, PartialEq, Eq)]
pub struct InstanceIdentity {
    pub database_name: String,
    pub database_user: String,
    pub database_password: String,
    pub cache_namespace_index: u32,
    pub service_port: u16,
    pub encryption_key: String,
    pub created_at: DateTime<Utc>,
}

impl InstanceIdentity {
    fn same_secrets(&self, other: &InstanceIdentity) -> bool {
        self.database_password == other.database_password
            && self.encryption_key == other.encryption_key
    }
}

impl fmt::Debug for InstanceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceIdentity")
            .field("database_name", &self.database_name)
            .field("database_user", &self.database_user)
            .field("database_password", &"<redacted>")
            .field("cache_namespace_index", &self.cache_namespace_index)
            .field("service_port", &self.service_port)
            .field("encryption_key", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Master credential of the shared database tier.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedInfraState {
    pub admin_password: String,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for SharedInfraState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedInfraState")
            .field("admin_password", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Held while allocating; releases the allocation lock on drop.
#[derive(Debug)]
pub struct AllocationGuard {
    file: Option<std::fs::File>,
}

impl AllocationGuard {
    pub(crate) fn noop() -> Self {
        Self { file: None }
    }

    pub(crate) fn locked(file: std::fs::File) -> Self {
        Self { file: Some(file) }
    }
}

impl Drop for AllocationGuard {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            use fs2::FileExt;
            if let Err(e) = file.unlock() {
                tracing::warn!("Failed to release allocation lock: {}", e);
            }
        }
    }
}

/// Persisted identity records.
///
/// A missing record is `Ok(None)`, never an error.
pub trait StateStore: Send + Sync {
    fn get(&self, key: &InstanceKey) -> Result<Option<InstanceIdentity>>;

    /// Persist a record. Readers never observe a partial write.
    ///
    /// Overwriting an existing record with different secrets is refused;
    /// secrets only go away through [`StateStore::delete`].
    fn put(&self, key: &InstanceKey, identity: &InstanceIdentity) -> Result<()>;

    /// Remove a record. Returns whether one existed.
    fn delete(&self, key: &InstanceKey) -> Result<bool>;

    /// All readable records, sorted by key. Unreadable entries are skipped.
    fn list(&self) -> Result<Vec<(InstanceKey, InstanceIdentity)>>;

    fn get_infra(&self) -> Result<Option<SharedInfraState>>;

    fn put_infra(&self, state: &SharedInfraState) -> Result<()>;

    fn delete_infra(&self) -> Result<bool>;

    /// Serialize allocate-then-persist sequences across processes.
    fn lock_allocations(&self) -> Result<AllocationGuard>;
}

/// Refuse a write that would replace persisted secrets.
pub(crate) fn check_write_once(
    key: &InstanceKey,
    existing: Option<&InstanceIdentity>,
    incoming: &InstanceIdentity,
) -> Result<()> {
    match existing {
        Some(current) if !current.same_secrets(incoming) => Err(Error::State(format!(
            "refusing to replace the secrets of '{}'; deprovision it first",
            key
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
pub(crate) fn sample_identity(port: u16, index: u32) -> InstanceIdentity {
    InstanceIdentity {
        database_name: "web_alpha".to_string(),
        database_user: "web_alpha".to_string(),
        database_password: "Pw0123456789abcdefghijklmnopqrst".to_string(),
        cache_namespace_index: index,
        service_port: port,
        encryption_key: "Ek0123456789abcdefghijklmnopqrst".to_string(),
        created_at: DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc),
    }
}
