//! Credential stores.
//!
//! - [`InMemoryCredentialStore`]: process-local, for tests and ephemeral use
//! - [`FileCredentialStore`]: one JSON file keyed by wallet address, guarded
//!   by an `fs2` exclusive lock during every read-modify-write

use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::domain::{Address, OrchestratorError};
use crate::ports::{CredentialStore, StoredCredential};

// =============================================================================
// IN-MEMORY
// =============================================================================

/// Process-local credential store.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    entries: RwLock<BTreeMap<Address, StoredCredential>>,
}

impl InMemoryCredentialStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored credentials.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn get(&self, wallet: &Address) -> Result<Option<StoredCredential>, OrchestratorError> {
        Ok(self.entries.read().get(wallet).cloned())
    }

    fn put(&self, credential: &StoredCredential) -> Result<(), OrchestratorError> {
        self.entries
            .write()
            .insert(credential.wallet, credential.clone());
        Ok(())
    }

    fn invalidate(&self, wallet: &Address) -> Result<(), OrchestratorError> {
        self.entries.write().remove(wallet);
        Ok(())
    }
}

// =============================================================================
// FILE
// =============================================================================

type Entries = BTreeMap<Address, StoredCredential>;

/// JSON file credential store.
pub struct FileCredentialStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileCredentialStore {
    /// Store backed by `path`; the file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_path = path.clone().into_os_string();
        lock_path.push(".lock");
        Self {
            path,
            lock_path: PathBuf::from(lock_path),
        }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_lock<T>(
        &self,
        f: impl FnOnce(&mut Entries) -> Result<(bool, T), OrchestratorError>,
    ) -> Result<T, OrchestratorError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(store_error)?;
        }
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(store_error)?;
        lock.lock_exclusive().map_err(store_error)?;

        let result = self.read_entries().and_then(|mut entries| {
            let (dirty, value) = f(&mut entries)?;
            if dirty {
                self.write_entries(&entries)?;
            }
            Ok(value)
        });

        // Unlock errors are irrelevant once the file handle is dropped.
        let _ = FileExt::unlock(&lock);
        result
    }

    fn read_entries(&self) -> Result<Entries, OrchestratorError> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Entries::new()),
            Err(e) => return Err(store_error(e)),
        };
        let mut raw = String::new();
        file.read_to_string(&mut raw).map_err(store_error)?;
        if raw.trim().is_empty() {
            return Ok(Entries::new());
        }
        serde_json::from_str(&raw)
            .map_err(|e| OrchestratorError::CredentialStore(format!("corrupt credential file: {e}")))
    }

    fn write_entries(&self, entries: &Entries) -> Result<(), OrchestratorError> {
        let json = serde_json::to_vec_pretty(entries)
            .map_err(|e| OrchestratorError::CredentialStore(e.to_string()))?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = File::create(&tmp).map_err(store_error)?;
        file.write_all(&json).map_err(store_error)?;
        file.sync_all().map_err(store_error)?;
        fs::rename(&tmp, &self.path).map_err(store_error)?;
        debug!(path = %self.path.display(), entries = entries.len(), "[cw-auth] Credentials written");
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, wallet: &Address) -> Result<Option<StoredCredential>, OrchestratorError> {
        self.with_lock(|entries| Ok((false, entries.get(wallet).cloned())))
    }

    fn put(&self, credential: &StoredCredential) -> Result<(), OrchestratorError> {
        self.with_lock(|entries| {
            entries.insert(credential.wallet, credential.clone());
            Ok((true, ()))
        })
    }

    fn invalidate(&self, wallet: &Address) -> Result<(), OrchestratorError> {
        self.with_lock(|entries| Ok((entries.remove(wallet).is_some(), ())))
    }
}

fn store_error(e: std::io::Error) -> OrchestratorError {
    OrchestratorError::CredentialStore(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(wallet: u8) -> StoredCredential {
        StoredCredential {
            wallet: Address([wallet; 20]),
            secret: format!("0x{}", "11".repeat(32)),
            session_key: Address([0x22; 20]),
            fingerprint: "fp".into(),
            expires_at: 4_000_000_000,
            allowances: vec![],
            jwt: Some("token".into()),
        }
    }

    #[test]
    fn test_in_memory_put_get_invalidate() {
        let store = InMemoryCredentialStore::new();
        store.put(&credential(1)).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&Address([1; 20])).unwrap(), Some(credential(1)));

        store.invalidate(&Address([1; 20])).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("credentials.json");

        let store = FileCredentialStore::new(&path);
        assert!(store.get(&Address([1; 20])).unwrap().is_none());
        store.put(&credential(1)).unwrap();
        store.put(&credential(2)).unwrap();

        let reopened = FileCredentialStore::new(&path);
        assert_eq!(reopened.get(&Address([2; 20])).unwrap(), Some(credential(2)));

        reopened.invalidate(&Address([1; 20])).unwrap();
        assert!(store.get(&Address([1; 20])).unwrap().is_none());
        assert!(store.get(&Address([2; 20])).unwrap().is_some());
    }

    #[test]
    fn test_corrupt_file_is_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        fs::write(&path, "{ not json").unwrap();

        let store = FileCredentialStore::new(&path);
        assert!(matches!(
            store.get(&Address([1; 20])),
            Err(OrchestratorError::CredentialStore(_))
        ));
    }
}
