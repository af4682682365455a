// crates/core/src/storage.rs
//! Durable key/value storage and the typed credential view over it.
//!
//! Values are strings (JSON where structured), the same shape a browser's
//! local storage would hold, so a state file can be inspected by hand.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::StorageError;
use civic_portal_types::{Credential, Role};

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const TOKEN_EXPIRES_AT_KEY: &str = "tokenExpiresAt";
pub const USER_ROLES_KEY: &str = "userRoles";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
pub const NOTIFICATIONS_KEY: &str = "notifications";

/// Synchronous, single-writer key/value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// In-memory store. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().expect("MemoryStore lock poisoned").get(key).cloned()
    }

    fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        self.values
            .lock()
            .expect("MemoryStore lock poisoned")
            .insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.values.lock().expect("MemoryStore lock poisoned").remove(key);
        Ok(())
    }
}

/// JSON-object file store. Every mutation rewrites the whole file through a
/// temp file and rename, so a crash never leaves a half-written state file.
pub struct FileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let values = match std::fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StorageError::Json {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StorageError::io(&path, e)),
        };
        debug!(path = %path.display(), keys = values.len(), "opened state file");
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, values: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;

        let json = serde_json::to_vec_pretty(values).map_err(|source| StorageError::Json {
            path: self.path.clone(),
            source,
        })?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StorageError::io(dir, e))?;
        tmp.write_all(&json).map_err(|e| StorageError::io(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| StorageError::io(&self.path, e.error))?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().expect("FileStore lock poisoned").get(key).cloned()
    }

    fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let mut values = self.values.lock().expect("FileStore lock poisoned");
        values.insert(key.to_string(), value);
        self.flush(&values)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut values = self.values.lock().expect("FileStore lock poisoned");
        if values.remove(key).is_some() {
            self.flush(&values)?;
        }
        Ok(())
    }
}

/// Typed access to the persisted session.
#[derive(Clone)]
pub struct CredentialStore {
    store: Arc<dyn KeyValueStore>,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn access_token(&self) -> Option<String> {
        self.store.get(ACCESS_TOKEN_KEY).filter(|t| !t.is_empty())
    }

    /// Rehydrate the persisted credential. A token without a parseable
    /// expiry is treated as absent; expiry itself is not checked here.
    pub fn load(&self) -> Option<Credential> {
        let access_token = self.access_token()?;
        let raw_expiry = self.store.get(TOKEN_EXPIRES_AT_KEY)?;
        let expires_at = match DateTime::parse_from_rfc3339(&raw_expiry) {
            Ok(t) => t.with_timezone(&Utc),
            Err(e) => {
                warn!(error = %e, value = %raw_expiry, "ignoring stored token with bad expiry");
                return None;
            }
        };
        let roles = self
            .store
            .get(USER_ROLES_KEY)
            .and_then(|raw| serde_json::from_str::<Vec<Role>>(&raw).ok())
            .unwrap_or_default();
        Some(Credential {
            access_token,
            expires_at,
            roles,
        })
    }

    pub fn save(&self, credential: &Credential) -> Result<(), StorageError> {
        let roles = serde_json::to_string(&credential.roles).map_err(|source| {
            StorageError::Encode {
                key: USER_ROLES_KEY.into(),
                source,
            }
        })?;
        self.store
            .set(ACCESS_TOKEN_KEY, credential.access_token.clone())?;
        self.store
            .set(TOKEN_EXPIRES_AT_KEY, credential.expires_at.to_rfc3339())?;
        self.store.set(USER_ROLES_KEY, roles)
    }

    /// The persisted refresh token, whether it came from the cookie jar or
    /// was echoed in a login body.
    pub fn refresh_token(&self) -> Option<String> {
        self.store.get(REFRESH_TOKEN_KEY).filter(|t| !t.is_empty())
    }

    pub fn set_refresh_token(&self, token: &str) -> Result<(), StorageError> {
        self.store.set(REFRESH_TOKEN_KEY, token.to_string())
    }

    pub fn clear_refresh_token(&self) -> Result<(), StorageError> {
        self.store.remove(REFRESH_TOKEN_KEY)
    }

    /// Remove token, expiry, roles and any stored refresh token.
    pub fn clear(&self) -> Result<(), StorageError> {
        for key in [
            ACCESS_TOKEN_KEY,
            TOKEN_EXPIRES_AT_KEY,
            USER_ROLES_KEY,
            REFRESH_TOKEN_KEY,
        ] {
            self.store.remove(key)?;
        }
        Ok(())
    }
}
