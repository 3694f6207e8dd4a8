use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use super::credential::Credential;
use crate::error::{AuthError, AuthResult};

/// Persisted entry holding the access token
const ACCESS_TOKEN_KEY: &str = "token";

/// Persisted entry holding the expiration instant (epoch millis, string-encoded)
const EXPIRES_AT_KEY: &str = "expirationDate";

/// Persisted entry holding the refresh token (empty string when absent)
const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Key/value persistence primitive backing the credential store.
///
/// Multi-key operations are atomic: a concurrent `get_many` never observes a
/// partially applied `set_many`.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read several keys in one consistent snapshot
    async fn get_many(&self, keys: &[&str]) -> AuthResult<Vec<Option<String>>>;

    /// Write several entries as one atomic update
    async fn set_many(&self, entries: &[(&str, String)]) -> AuthResult<()>;

    /// Remove several keys as one atomic update
    async fn remove_many(&self, keys: &[&str]) -> AuthResult<()>;
}

/// In-memory store for tests and ephemeral sessions
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_many(&self, keys: &[&str]) -> AuthResult<Vec<Option<String>>> {
        let entries = self.entries.read().await;
        Ok(keys.iter().map(|key| entries.get(*key).cloned()).collect())
    }

    async fn set_many(&self, updates: &[(&str, String)]) -> AuthResult<()> {
        let mut entries = self.entries.write().await;
        for (key, value) in updates {
            entries.insert((*key).to_string(), value.clone());
        }
        Ok(())
    }

    async fn remove_many(&self, keys: &[&str]) -> AuthResult<()> {
        let mut entries = self.entries.write().await;
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }
}

/// File-backed store holding a single JSON document.
///
/// Updates rewrite the whole document to a temporary file and rename it into
/// place, so readers see either the old or the new document, never a mix.
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    /// Create a store persisting to the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read_document(&self) -> AuthResult<HashMap<String, String>> {
        match fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(AuthError::storage),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(err) => Err(AuthError::storage(err)),
        }
    }

    async fn write_document(&self, document: &HashMap<String, String>) -> AuthResult<()> {
        let bytes = serde_json::to_vec_pretty(document).map_err(AuthError::storage)?;
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, &bytes).await.map_err(AuthError::storage)?;
        fs::rename(&staging, &self.path).await.map_err(AuthError::storage)?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get_many(&self, keys: &[&str]) -> AuthResult<Vec<Option<String>>> {
        let _guard = self.lock.lock().await;
        let document = self.read_document().await?;
        Ok(keys.iter().map(|key| document.get(*key).cloned()).collect())
    }

    async fn set_many(&self, updates: &[(&str, String)]) -> AuthResult<()> {
        let _guard = self.lock.lock().await;
        let mut document = self.read_document().await?;
        for (key, value) in updates {
            document.insert((*key).to_string(), value.clone());
        }
        self.write_document(&document).await
    }

    async fn remove_many(&self, keys: &[&str]) -> AuthResult<()> {
        let _guard = self.lock.lock().await;
        let mut document = self.read_document().await?;
        let mut changed = false;
        for key in keys {
            changed |= document.remove(*key).is_some();
        }
        if changed {
            self.write_document(&document).await?;
        }
        Ok(())
    }
}

/// Durable persistence of the current credential triple.
///
/// The triple is written as three entries in one atomic update, so a load
/// never pairs an access token with an expiration from a different save.
/// Backend failures surface as [`AuthError::Storage`], which callers treat as
/// "credential unknown" rather than "unauthenticated".
pub struct CredentialStore {
    backend: Arc<dyn KeyValueStore>,
}

impl CredentialStore {
    /// Create a store over the given backend
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    /// Persist a credential, overwriting any previous one.
    ///
    /// A credential without a refresh token is written with an empty
    /// `refreshToken` entry, which [`Self::load`] decodes back to `None`.
    pub async fn save(&self, credential: &Credential) -> AuthResult<()> {
        let entries = [
            (ACCESS_TOKEN_KEY, credential.access_token.clone()),
            (
                EXPIRES_AT_KEY,
                credential.expires_at.timestamp_millis().to_string(),
            ),
            (
                REFRESH_TOKEN_KEY,
                credential.refresh_token.clone().unwrap_or_default(),
            ),
        ];
        self.backend.set_many(&entries).await?;

        info!(expires_at = %credential.expires_at, "credential stored");
        Ok(())
    }

    /// Load the current credential, or `None` when any entry is absent
    pub async fn load(&self) -> AuthResult<Option<Credential>> {
        let values = self
            .backend
            .get_many(&[ACCESS_TOKEN_KEY, EXPIRES_AT_KEY, REFRESH_TOKEN_KEY])
            .await?;

        let (access_token, expires_raw, refresh_raw) = match (&values[0], &values[1], &values[2]) {
            (Some(access), Some(expires), Some(refresh)) => {
                (access.clone(), expires.clone(), refresh.clone())
            }
            _ => {
                debug!("no stored credential");
                return Ok(None);
            }
        };

        let millis: i64 = expires_raw.parse().map_err(|_| {
            AuthError::storage(format!("invalid expiration timestamp: {expires_raw}"))
        })?;
        let expires_at = DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| AuthError::storage("expiration timestamp out of range"))?;

        let refresh_token = if refresh_raw.is_empty() {
            None
        } else {
            Some(refresh_raw)
        };

        Ok(Some(Credential::new(
            access_token,
            refresh_token,
            expires_at,
        )))
    }

    /// Remove the stored credential
    pub async fn clear(&self) -> AuthResult<()> {
        self.backend
            .remove_many(&[ACCESS_TOKEN_KEY, EXPIRES_AT_KEY, REFRESH_TOKEN_KEY])
            .await?;

        info!("credential cleared");
        Ok(())
    }
}
