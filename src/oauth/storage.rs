//! OAuth Token Storage
//!
//! A store holds exactly one token record. The client reads and writes
//! through it and never keeps a copy of its own.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, info};

use super::token::TokenRecord;
use crate::{Error, Result};

/// Persistence of a single token record
pub trait TokenStore: Send + Sync {
    /// Replace the stored record
    fn save(&self, token: &TokenRecord) -> Result<()>;

    /// Load the stored record, `None` if there is none
    fn load(&self) -> Result<Option<TokenRecord>>;

    /// Remove the stored record; a no-op when empty
    fn delete(&self) -> Result<()>;
}

/// Token store that lives as long as the process
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: RwLock<Option<TokenRecord>>,
}

impl MemoryTokenStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with a record
    #[must_use]
    pub fn with_token(token: TokenRecord) -> Self {
        Self {
            token: RwLock::new(Some(token)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn save(&self, token: &TokenRecord) -> Result<()> {
        *self.token.write() = Some(token.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<TokenRecord>> {
        Ok(self.token.read().clone())
    }

    fn delete(&self) -> Result<()> {
        *self.token.write() = None;
        Ok(())
    }
}

/// Token store backed by a JSON file
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    /// Create a store for the given file path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Create a store in the default location (~/.oauth2-client/token.json)
    pub fn default_location() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Storage("Cannot determine home directory".to_string()))?;

        Ok(Self::new(home.join(".oauth2-client").join("token.json")))
    }

    /// Path of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn save(&self, token: &TokenRecord) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("Failed to create token directory: {e}")))?;
        }

        let content = serde_json::to_string_pretty(token)
            .map_err(|e| Error::Storage(format!("Failed to serialize token: {e}")))?;

        fs::write(&self.path, content)
            .map_err(|e| Error::Storage(format!("Failed to write token file: {e}")))?;

        // Owner read/write only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))
                .map_err(|e| Error::Storage(format!("Failed to restrict token file: {e}")))?;
        }

        info!(path = %self.path.display(), "Saved OAuth token");
        Ok(())
    }

    fn load(&self) -> Result<Option<TokenRecord>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No stored token found");
                return Ok(None);
            }
            Err(e) => {
                return Err(Error::Storage(format!("Failed to read token file: {e}")));
            }
        };

        let token = serde_json::from_str::<TokenRecord>(&content)
            .map_err(|e| Error::Storage(format!("Failed to parse token file: {e}")))?;

        debug!(path = %self.path.display(), expired = token.is_expired(), "Loaded stored token");
        Ok(Some(token))
    }

    fn delete(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "Deleted OAuth token");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!("Failed to delete token file: {e}"))),
        }
    }
}
