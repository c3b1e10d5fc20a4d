//! Lock-guarded YAML files for the identity and token records.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::{CredentialStore, Secret, StoreError};
use crate::lock::{FileLock, LockSettings};
use crate::model::{Identity, TokenRecord};

/// File name of the identity record, relative to the home directory.
pub const IDENTITY_FILE_NAME: &str = "fleetdir-user.yaml";

/// File name of the token record, relative to the home directory.
pub const TOKEN_FILE_NAME: &str = ".fleetdir-token";

/// Disk-backed credential store.
///
/// Reads take a shared lock on `<record>.lock`, writes take an exclusive one.
/// Records are replaced by renaming a fully written owner-only temp file over
/// them, so readers never see a partial record.
#[derive(Debug, Clone)]
pub struct FileStore {
    identity_path: PathBuf,
    token_path: PathBuf,
    lock_settings: LockSettings,
}

impl FileStore {
    pub fn new(identity_path: impl Into<PathBuf>, token_path: impl Into<PathBuf>) -> Self {
        Self {
            identity_path: identity_path.into(),
            token_path: token_path.into(),
            lock_settings: LockSettings::default(),
        }
    }

    /// Store both records under `dir` using the standard file names.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self::new(dir.join(IDENTITY_FILE_NAME), dir.join(TOKEN_FILE_NAME))
    }

    /// Store both records in the current user's home directory.
    pub fn in_home() -> Result<Self, StoreError> {
        let dirs = directories::BaseDirs::new().ok_or(StoreError::HomeDirUnavailable)?;
        Ok(Self::in_dir(dirs.home_dir()))
    }

    pub fn with_lock_settings(mut self, lock_settings: LockSettings) -> Self {
        self.lock_settings = lock_settings;
        self
    }

    pub fn identity_path(&self) -> &Path {
        &self.identity_path
    }

    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    fn lock_for(&self, path: &Path) -> FileLock {
        FileLock::with_retry_interval(path, self.lock_settings.retry_interval)
    }

    /// Read a record under a shared lock. A missing file yields `None`.
    fn read_locked(&self, path: &Path) -> Result<Option<String>, StoreError> {
        let _guard = self.lock_for(path).acquire_shared(self.lock_settings.timeout)?;

        match fs::read_to_string(path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace a record under an exclusive lock.
    fn write_locked(&self, path: &Path, contents: &str) -> Result<(), StoreError> {
        let _guard = self
            .lock_for(path)
            .acquire_exclusive(self.lock_settings.timeout)?;

        write_private(path, contents.as_bytes())?;
        debug!("Wrote {:?}", path);
        Ok(())
    }
}

impl CredentialStore for FileStore {
    fn read_identity(&self) -> Result<Identity, StoreError> {
        let missing = || StoreError::ConfigMissing {
            path: self.identity_path.clone(),
        };

        if !self.identity_path.exists() {
            return Err(missing());
        }

        let contents = self.read_locked(&self.identity_path)?.ok_or_else(missing)?;
        let identity = if contents.trim().is_empty() {
            Identity::default()
        } else {
            serde_yaml::from_str(&contents)?
        };

        identity.validate()?;
        Ok(identity)
    }

    fn write_identity(&self, identity: &Identity) -> Result<(), StoreError> {
        identity.validate()?;
        let contents = serde_yaml::to_string(identity)?;
        self.write_locked(&self.identity_path, &contents)
    }

    fn read_token(&self, user_name: &str) -> Result<Option<Secret>, StoreError> {
        let contents = match self.read_locked(&self.token_path)? {
            Some(contents) if !contents.trim().is_empty() => contents,
            _ => return Ok(None),
        };

        // An unreadable cache is treated as empty.
        let record: TokenRecord = match serde_yaml::from_str(&contents) {
            Ok(record) => record,
            Err(e) => {
                warn!("Ignoring unreadable token cache {:?}: {}", self.token_path, e);
                return Ok(None);
            }
        };
        match record.token_for(user_name) {
            Some(token) => Ok(Some(token.clone())),
            None => {
                debug!(
                    "Ignoring cached token for {:?}, active user is {:?}",
                    record.user_name, user_name
                );
                Ok(None)
            }
        }
    }

    fn write_token(&self, user_name: &str, token: &Secret) -> Result<(), StoreError> {
        let record = TokenRecord::new(user_name, token.clone());
        let contents = serde_yaml::to_string(&record)?;
        self.write_locked(&self.token_path, &contents)
    }
}

fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut file = NamedTempFile::new_in(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::lock::LockError;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_store() -> (FileStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::in_dir(temp_dir.path()).with_lock_settings(LockSettings {
            timeout: Duration::from_millis(300),
            retry_interval: Duration::from_millis(50),
        });
        (store, temp_dir)
    }

    #[test]
    fn test_token_roundtrip() {
        let (store, _temp) = test_store();

        store.write_token("alice", &Secret::new("JWT abc")).unwrap();

        let token = store.read_token("alice").unwrap().unwrap();
        assert_eq!(token.expose(), "JWT abc");
    }

    #[test]
    fn test_token_for_other_user_is_empty() {
        let (store, _temp) = test_store();

        store.write_token("alice", &Secret::new("JWT abc")).unwrap();

        assert!(store.read_token("bob").unwrap().is_none());
    }

    #[test]
    fn test_stale_user_token_file() {
        let (store, _temp) = test_store();
        fs::write(store.token_path(), "user-name: bob\ntoken: X\n").unwrap();

        assert!(store.read_token("alice").unwrap().is_none());
        assert_eq!(store.read_token("bob").unwrap().unwrap().expose(), "X");
    }

    #[test]
    fn test_missing_token_file() {
        let (store, _temp) = test_store();
        assert!(store.read_token("alice").unwrap().is_none());
    }

    #[test]
    fn test_missing_identity() {
        let (store, _temp) = test_store();

        let result = store.read_identity();
        assert!(matches!(result, Err(StoreError::ConfigMissing { .. })));
    }

    #[test]
    fn test_identity_roundtrip() {
        let (store, _temp) = test_store();
        let identity = Identity::new("https://api.example.org", "alice");

        store.write_identity(&identity).unwrap();

        let contents = fs::read_to_string(store.identity_path()).unwrap();
        assert!(contents.contains("server-url:"));
        assert!(contents.contains("user-name:"));
        assert_eq!(store.read_identity().unwrap(), identity);
    }

    #[test]
    fn test_incomplete_identity() {
        let (store, _temp) = test_store();
        fs::write(store.identity_path(), "server-url: https://api.example.org\n").unwrap();

        let result = store.read_identity();
        assert!(matches!(result, Err(StoreError::InvalidIdentity(_))));
    }

    #[test]
    fn test_records_are_private() {
        use std::os::unix::fs::PermissionsExt;

        let (store, _temp) = test_store();
        store.write_token("alice", &Secret::new("JWT abc")).unwrap();

        let mode = fs::metadata(store.token_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_rewrite_narrows_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let (store, _temp) = test_store();
        fs::write(store.token_path(), "user-name: alice\ntoken: old\n").unwrap();
        fs::set_permissions(store.token_path(), fs::Permissions::from_mode(0o644)).unwrap();

        store.write_token("alice", &Secret::new("JWT abc")).unwrap();

        let mode = fs::metadata(store.token_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(store.read_token("alice").unwrap().unwrap().expose(), "JWT abc");
    }

    #[test]
    fn test_corrupt_token_file_is_ignored() {
        let (store, _temp) = test_store();
        fs::write(store.token_path(), "user-name: alice\ntoken: [unterminated").unwrap();

        assert!(store.read_token("alice").unwrap().is_none());

        store.write_token("alice", &Secret::new("JWT fresh")).unwrap();
        assert_eq!(store.read_token("alice").unwrap().unwrap().expose(), "JWT fresh");
    }

    #[test]
    fn test_write_leaves_no_temp_files() {
        let (store, temp) = test_store();

        store.write_token("alice", &Secret::new("JWT abc")).unwrap();
        store.write_token("alice", &Secret::new("JWT def")).unwrap();

        let mut names: Vec<String> = fs::read_dir(temp.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, [".fleetdir-token", ".fleetdir-token.lock"]);
    }

    #[test]
    fn test_write_times_out_while_locked() {
        let (store, _temp) = test_store();
        let _holder = FileLock::new(store.token_path())
            .acquire_exclusive(Duration::from_millis(100))
            .unwrap();

        let result = store.write_token("alice", &Secret::new("JWT abc"));
        assert!(matches!(
            result,
            Err(StoreError::Lock(LockError::Timeout { .. }))
        ));
    }

    #[test]
    fn test_read_times_out_while_locked() {
        let (store, _temp) = test_store();
        store.write_token("alice", &Secret::new("JWT abc")).unwrap();
        let _holder = FileLock::new(store.token_path())
            .acquire_exclusive(Duration::from_millis(100))
            .unwrap();

        let result = store.read_token("alice");
        assert!(matches!(
            result,
            Err(StoreError::Lock(LockError::Timeout { .. }))
        ));
    }
}
