//! Persistent token storage.

use crate::error::{OAuth2Error, OAuth2Result};
use crate::manager::CacheKey;
use crate::token::OAuth2Token;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Trait for token storage backends (file, keychain, database)
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Load the token stored for a key
    async fn load(&self, key: &CacheKey) -> OAuth2Result<Option<OAuth2Token>>;

    /// Store a token, replacing any previous one
    async fn save(&self, key: &CacheKey, token: &OAuth2Token) -> OAuth2Result<()>;

    /// Remove the token for a key. Removing a missing key is not an error.
    async fn remove(&self, key: &CacheKey) -> OAuth2Result<()>;
}

/// In-memory implementation of TokenStore
#[derive(Default)]
pub struct InMemoryTokenStore {
    tokens: Arc<RwLock<HashMap<String, OAuth2Token>>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tokens.read().await.is_empty()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn load(&self, key: &CacheKey) -> OAuth2Result<Option<OAuth2Token>> {
        let tokens = self.tokens.read().await;
        Ok(tokens.get(&key.storage_key()).cloned())
    }

    async fn save(&self, key: &CacheKey, token: &OAuth2Token) -> OAuth2Result<()> {
        let mut tokens = self.tokens.write().await;
        tokens.insert(key.storage_key(), token.clone());
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> OAuth2Result<()> {
        let mut tokens = self.tokens.write().await;
        tokens.remove(&key.storage_key());
        Ok(())
    }
}

/// Stores each token as a JSON file in a directory, in the persisted token format.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    dir: PathBuf,
}

impl FileTokenStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<provider>-<hash of scope set>.json`
    fn path_for(&self, key: &CacheKey) -> PathBuf {
        let provider: String = key
            .provider()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let digest = Sha256::digest(key.storage_key().as_bytes());
        let hash: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();

        self.dir.join(format!("{provider}-{hash}.json"))
    }
}

fn storage_error(action: &str, path: &Path, err: std::io::Error) -> OAuth2Error {
    OAuth2Error::StorageError(format!("failed to {} {}: {}", action, path.display(), err))
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self, key: &CacheKey) -> OAuth2Result<Option<OAuth2Token>> {
        let path = self.path_for(key);
        let json = match tokio::fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_error("read", &path, e)),
        };

        let token = OAuth2Token::from_json(&json)
            .map_err(|e| OAuth2Error::StorageError(format!("corrupt token file {}: {}", path.display(), e)))?;
        Ok(Some(token))
    }

    async fn save(&self, key: &CacheKey, token: &OAuth2Token) -> OAuth2Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| storage_error("create", &self.dir, e))?;

        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let json = token.to_json()?;

        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| storage_error("write", &tmp, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| storage_error("set permissions on", &tmp, e))?;
        }

        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| storage_error("rename", &tmp, e))?;

        debug!("Persisted token for {} to {}", key, path.display());
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> OAuth2Result<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error("remove", &path, e)),
        }
    }
}
