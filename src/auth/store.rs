// Credential persistence

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::AuthError;

use super::types::PersistedCredentialRecord;

/// Durable home of the single credential record
///
/// `load` never fails: an absent or corrupt record is `None` and the caller
/// decides whether to re-authorize.
pub trait CredentialStore: Send + Sync {
    /// Load the record, or `None` if it is absent or unreadable
    fn load(&self) -> Option<PersistedCredentialRecord>;

    /// Replace the record atomically
    fn save(&self, record: &PersistedCredentialRecord) -> Result<(), AuthError>;
}

/// JSON file store using write-to-temp-then-rename
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record, distinguishing an absent file from a corrupt one
    pub fn read_record(&self) -> Result<Option<PersistedCredentialRecord>, AuthError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AuthError::StoreCorrupt(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let record: PersistedCredentialRecord = serde_json::from_str(&content).map_err(|e| {
            AuthError::StoreCorrupt(format!("failed to parse {}: {}", self.path.display(), e))
        })?;

        record
            .validate()
            .map_err(|e| AuthError::StoreCorrupt(format!("{}: {}", self.path.display(), e)))?;

        Ok(Some(record))
    }

    fn write_atomically(&self, bytes: &[u8]) -> std::io::Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "credentials.json".to_string());
        let tmp_path = dir.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

        let result = (|| {
            let mut file = fs::File::create(&tmp_path)?;
            restrict_permissions(&file)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            drop(file);
            fs::rename(&tmp_path, &self.path)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        result
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Option<PersistedCredentialRecord> {
        match self.read_record() {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Ignoring persisted credentials: {}", e);
                None
            }
        }
    }

    fn save(&self, record: &PersistedCredentialRecord) -> Result<(), AuthError> {
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| AuthError::StoreWriteFailed(e.to_string()))?;

        self.write_atomically(&json).map_err(|e| {
            AuthError::StoreWriteFailed(format!("{}: {}", self.path.display(), e))
        })?;

        tracing::debug!("Credentials saved to {}", self.path.display());
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(file: &fs::File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_file: &fs::File) -> std::io::Result<()> {
    Ok(())
}

/// In-memory store, used when no durable location is wanted and in tests
#[derive(Default)]
pub struct MemoryCredentialStore {
    record: Mutex<Option<PersistedCredentialRecord>>,
    fail_writes: Mutex<bool>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: PersistedCredentialRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
            fail_writes: Mutex::new(false),
        }
    }

    /// Make subsequent saves fail with `StoreWriteFailed`
    pub fn set_fail_writes(&self, fail: bool) {
        if let Ok(mut flag) = self.fail_writes.lock() {
            *flag = fail;
        }
    }

    /// Current record, bypassing trait semantics
    pub fn snapshot(&self) -> Option<PersistedCredentialRecord> {
        self.record.lock().ok().and_then(|r| r.clone())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Option<PersistedCredentialRecord> {
        self.snapshot()
    }

    fn save(&self, record: &PersistedCredentialRecord) -> Result<(), AuthError> {
        if self.fail_writes.lock().map(|f| *f).unwrap_or(false) {
            return Err(AuthError::StoreWriteFailed("memory store is read-only".to_string()));
        }
        let mut slot = self
            .record
            .lock()
            .map_err(|_| AuthError::StoreWriteFailed("store lock poisoned".to_string()))?;
        *slot = Some(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::types::CredentialBundle;
    use chrono::{Duration, Utc};

    fn record() -> PersistedCredentialRecord {
        let now = Utc::now();
        PersistedCredentialRecord::new(
            Some("client".to_string()),
            CredentialBundle {
                access_token: "access".to_string(),
                refresh_token: "refresh".to_string(),
                expires_at: now + Duration::hours(1),
                token_type: "Bearer".to_string(),
            },
            now,
        )
    }

    #[test]
    fn test_missing_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("credentials.json"));
        assert!(store.load().is_none());
        assert_eq!(store.read_record(), Ok(None));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("nested/credentials.json"));
        let record = record();

        store.save(&record).unwrap();
        assert_eq!(store.load(), Some(record));

        // No temp files left behind
        let entries: Vec<_> = fs::read_dir(dir.path().join("nested")).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let json = serde_json::to_string(&record()).unwrap();
        fs::write(&path, &json[..json.len() / 2]).unwrap();

        let store = FileCredentialStore::new(path);
        assert!(store.load().is_none());
        assert!(matches!(store.read_record(), Err(AuthError::StoreCorrupt(_))));
    }

    #[test]
    fn test_wrong_shape_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        fs::write(&path, r#"{"access_token": "a"}"#).unwrap();

        let store = FileCredentialStore::new(path);
        assert!(store.load().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let store = FileCredentialStore::new(path.clone());
        store.save(&record()).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_memory_store_write_failure() {
        let store = MemoryCredentialStore::with_record(record());
        store.set_fail_writes(true);
        assert!(matches!(
            store.save(&record()),
            Err(AuthError::StoreWriteFailed(_))
        ));
        assert!(store.load().is_some());
    }
}
