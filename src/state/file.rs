//! On-disk [`StateStore`]: one owner-only file per record.
//!
//! ```text
//! <state_dir>/
//!   infra.env                  shared tier master credential
//!   .alloc.lock                allocation lock (fs2)
//!   instances/
//!     <server>__<instance>.env one identity per instance
//! ```

use super::record::{check_value, decode_identity, decode_infra, encode_identity, encode_infra};
use super::{
    check_write_once, AllocationGuard, InstanceIdentity, InstanceKey, SharedInfraState,
    StateStore,
};
use crate::error::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const RECORD_EXT: &str = "env";
const INFRA_FILE: &str = "infra.env";
const LOCK_FILE: &str = ".alloc.lock";

#[derive(Debug, Clone)]
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    /// Open a store rooted at `root`, creating the directories (mode 0700) if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let store = Self { root: root.into() };
        create_private_dir(&store.root)?;
        create_private_dir(&store.instances_dir())?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn instances_dir(&self) -> PathBuf {
        self.root.join("instances")
    }

    fn record_path(&self, key: &InstanceKey) -> PathBuf {
        self.instances_dir()
            .join(format!("{}.{}", key.file_stem(), RECORD_EXT))
    }

    fn infra_path(&self) -> PathBuf {
        self.root.join(INFRA_FILE)
    }

    /// Read a file, mapping "does not exist" to `None`.
    fn read_optional(path: &Path) -> Result<Option<String>> {
        // Directly try to read the file - avoid TOCTOU race
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::State(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn remove_optional(path: &Path) -> Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::State(format!(
                "Failed to remove {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

impl StateStore for FileStateStore {
    fn get(&self, key: &InstanceKey) -> Result<Option<InstanceIdentity>> {
        let path = self.record_path(key);
        let Some(contents) = Self::read_optional(&path)? else {
            return Ok(None);
        };
        let (stored_key, identity) =
            decode_identity(&contents).map_err(|e| corrupt(&path, e))?;
        if &stored_key != key {
            return Err(Error::State(format!(
                "Record {} belongs to '{}', not '{}'",
                path.display(),
                stored_key,
                key
            )));
        }
        Ok(Some(identity))
    }

    fn put(&self, key: &InstanceKey, identity: &InstanceIdentity) -> Result<()> {
        let existing = self.get(key)?;
        check_write_once(key, existing.as_ref(), identity)?;
        atomic_write(&self.record_path(key), &encode_identity(key, identity))?;
        tracing::debug!("Persisted identity for '{}'", key);
        Ok(())
    }

    fn delete(&self, key: &InstanceKey) -> Result<bool> {
        Self::remove_optional(&self.record_path(key))
    }

    fn list(&self) -> Result<Vec<(InstanceKey, InstanceIdentity)>> {
        let dir = self.instances_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::State(format!(
                    "Failed to list {}: {}",
                    dir.display(),
                    e
                )))
            }
        };

        let mut records = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if stem.starts_with('.') {
                continue;
            }
            let contents = match fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!("Skipping unreadable record {}: {}", path.display(), e);
                    continue;
                }
            };
            match decode_identity(&contents) {
                Ok((key, identity)) if key.file_stem() == stem => records.push((key, identity)),
                Ok((key, _)) => {
                    tracing::warn!(
                        "Skipping {}: contents belong to '{}'",
                        path.display(),
                        key
                    );
                }
                Err(e) => {
                    tracing::warn!("Skipping malformed record {}: {}", path.display(), e);
                }
            }
        }
        records.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(records)
    }

    fn get_infra(&self) -> Result<Option<SharedInfraState>> {
        let path = self.infra_path();
        match Self::read_optional(&path)? {
            Some(contents) => decode_infra(&contents)
                .map(Some)
                .map_err(|e| corrupt(&path, e)),
            None => Ok(None),
        }
    }

    fn put_infra(&self, state: &SharedInfraState) -> Result<()> {
        check_value("password", &state.admin_password)?;
        if let Some(existing) = self.get_infra()? {
            if existing.admin_password != state.admin_password {
                return Err(Error::State(
                    "refusing to replace the shared infrastructure credential; tear it down first"
                        .to_string(),
                ));
            }
        }
        atomic_write(&self.infra_path(), &encode_infra(state))
    }

    fn delete_infra(&self) -> Result<bool> {
        Self::remove_optional(&self.infra_path())
    }

    fn lock_allocations(&self) -> Result<AllocationGuard> {
        use fs2::FileExt;

        let path = self.root.join(LOCK_FILE);
        let file = fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::State(format!("Cannot open '{}': {}", path.display(), e)))?;

        // Exclusive lock - blocks until any concurrent allocator finishes
        file.lock_exclusive()
            .map_err(|e| Error::State(format!("Cannot lock '{}': {}", path.display(), e)))?;
        Ok(AllocationGuard::locked(file))
    }
}

/// Wrap a decode failure with the offending path, keeping only the inner message.
fn corrupt(path: &Path, err: Error) -> Error {
    let detail = match err {
        Error::State(msg) => msg,
        other => other.to_string(),
    };
    Error::State(format!("Corrupt record {}: {}", path.display(), detail))
}

fn create_private_dir(path: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path).map_err(|e| {
        Error::State(format!("Failed to create {}: {}", path.display(), e))
    })
}

/// Atomic file write using the write-then-rename pattern.
///
/// The temp file lives in the target's directory (same filesystem, so the
/// rename is atomic) and is created owner read/write only.
fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::State(format!("Invalid record path {}", path.display())))?;
    let temp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()));

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let result = (|| -> std::io::Result<()> {
        let mut file = options.open(&temp_path)?;
        file.write_all(contents.as_bytes())?;
        // Ensure data is written to disk before rename
        file.sync_all()?;
        drop(file);
        fs::rename(&temp_path, path)
    })();

    result.map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        Error::State(format!("Failed to write {}: {}", path.display(), e))
    })
}
