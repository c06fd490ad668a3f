//! Durable credential storage.
//!
//! The session manager persists the token pair and a user snapshot so a
//! session survives process restarts. Production embeds use
//! [`FileCredentialStore`]; [`MemoryCredentialStore`] backs tests and
//! short-lived embeds.

use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth_api::UserProfile;

/// Snapshot written on login and read once at startup.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct PersistedCredentials {
    pub access_token: String,
    pub refresh_token: String,
    pub user: UserProfile,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("credential store io error: {0}")]
    Io(#[from] io::Error),

    #[error("credential store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Durable key/value storage for session credentials.
pub trait CredentialStore: Send + Sync {
    /// Returns the persisted snapshot, or `None` when no credentials exist.
    fn load(&self) -> Result<Option<PersistedCredentials>, StoreError>;

    /// Replaces the persisted snapshot.
    fn save(&self, credentials: &PersistedCredentials) -> Result<(), StoreError>;

    /// Removes any persisted snapshot. Idempotent.
    fn clear(&self) -> Result<(), StoreError>;
}

impl<S: CredentialStore + ?Sized> CredentialStore for std::sync::Arc<S> {
    fn load(&self) -> Result<Option<PersistedCredentials>, StoreError> {
        (**self).load()
    }

    fn save(&self, credentials: &PersistedCredentials) -> Result<(), StoreError> {
        (**self).save(credentials)
    }

    fn clear(&self) -> Result<(), StoreError> {
        (**self).clear()
    }
}

/// JSON-file-backed credential store.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<PersistedCredentials>, StoreError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::Io(err)),
        };
        let credentials = serde_json::from_str(&raw)?;
        Ok(Some(credentials))
    }

    fn save(&self, credentials: &PersistedCredentials) -> Result<(), StoreError> {
        let raw = serde_json::to_string_pretty(credentials)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::Io(err)),
        }
    }
}

/// In-memory credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<Option<PersistedCredentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<PersistedCredentials>, StoreError> {
        Ok(self.inner.lock().expect("store lock poisoned").clone())
    }

    fn save(&self, credentials: &PersistedCredentials) -> Result<(), StoreError> {
        *self.inner.lock().expect("store lock poisoned") = Some(credentials.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.inner.lock().expect("store lock poisoned") = None;
        Ok(())
    }
}
