//! Configuration management

use std::{env, path::Path, path::PathBuf, sync::Arc, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Deserializer, Serialize};

use crate::oauth::{ClientConfig, DEFAULT_TIMEOUT, FileTokenStore, MemoryTokenStore, TokenStore};
use crate::{Error, Result};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "OAUTH2_CLIENT_";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before resolving `env:` references.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Client identity and endpoints
    pub client: ClientSettings,
    /// Token storage
    pub storage: StorageConfig,
}

/// Client identity and endpoints as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Client ID
    #[serde(deserialize_with = "text_or_number")]
    pub client_id: String,
    /// Client secret; supports a literal value or `env:VAR_NAME`
    #[serde(deserialize_with = "optional_text_or_number")]
    pub client_secret: Option<String>,
    /// Token endpoint
    pub token_url: Option<String>,
    /// Authorization endpoint
    pub auth_url: Option<String>,
    /// Redirect URI
    pub redirect_uri: Option<String>,
    /// Scopes, as a list or a space-separated string
    #[serde(deserialize_with = "scope_list")]
    pub scope: Vec<String>,
    /// Token endpoint timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            token_url: None,
            auth_url: None,
            redirect_uri: None,
            scope: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Where tokens are kept
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// JSON file on disk
    #[default]
    File,
    /// Process memory (lost on exit)
    Memory,
}

/// Token storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage backend
    pub backend: StorageBackend,
    /// Token file path (default: ~/.oauth2-client/token.json)
    pub path: Option<String>,
}

/// String value that an environment override may have turned into a number
#[derive(Deserialize)]
#[serde(untagged)]
enum TextOrNumber {
    Text(String),
    Unsigned(u64),
    Signed(i64),
    Float(f64),
}

impl From<TextOrNumber> for String {
    fn from(value: TextOrNumber) -> Self {
        match value {
            TextOrNumber::Text(s) => s,
            TextOrNumber::Unsigned(n) => n.to_string(),
            TextOrNumber::Signed(n) => n.to_string(),
            TextOrNumber::Float(f) => f.to_string(),
        }
    }
}

fn text_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    TextOrNumber::deserialize(deserializer).map(String::from)
}

fn optional_text_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<TextOrNumber>::deserialize(deserializer)?.map(String::from))
}

fn scope_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scope {
        List(Vec<String>),
        Joined(String),
    }

    Ok(match Scope::deserialize(deserializer)? {
        Scope::List(list) => list,
        Scope::Joined(joined) => joined.split_whitespace().map(str::to_string).collect(),
    })
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (OAUTH2_CLIENT_ prefix)
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = expand_home(path_str);
            if expanded.exists() {
                match dotenvy::from_path(&expanded) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {}", expanded.display());
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {}: {e}", expanded.display());
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {}", expanded.display());
            }
        }
    }

    /// Build the immutable client configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no client ID is set or the secret refers
    /// to an unset environment variable.
    pub fn client_config(&self) -> Result<ClientConfig> {
        let settings = &self.client;
        if settings.client_id.trim().is_empty() {
            return Err(Error::Config("client.client_id is required".to_string()));
        }

        let client_secret = settings
            .client_secret
            .as_deref()
            .map(resolve_secret)
            .transpose()?;

        Ok(ClientConfig {
            client_id: settings.client_id.clone(),
            client_secret,
            token_url: settings.token_url.clone(),
            auth_url: settings.auth_url.clone(),
            redirect_uri: settings.redirect_uri.clone(),
            scope: settings.scope.clone(),
            timeout: settings.timeout,
        })
    }

    /// Build the configured token store
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the default location cannot be determined.
    pub fn token_store(&self) -> Result<Arc<dyn TokenStore>> {
        Ok(match self.storage.backend {
            StorageBackend::Memory => Arc::new(MemoryTokenStore::new()),
            StorageBackend::File => match &self.storage.path {
                Some(path) => Arc::new(FileTokenStore::new(expand_home(path))),
                None => Arc::new(FileTokenStore::default_location()?),
            },
        })
    }
}

/// Resolve a secret (expand `env:VAR_NAME`)
fn resolve_secret(value: &str) -> Result<String> {
    match value.strip_prefix("env:") {
        Some(var_name) => env::var(var_name).map_err(|_| {
            Error::Config(format!("Environment variable {var_name} for client secret is not set"))
        }),
        None => Ok(value.to_string()),
    }
}

/// Expand a leading `~` to the home directory
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest.trim_start_matches(['/', '\\']));
        }
    }
    PathBuf::from(path)
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Secs(u64),
            Text(String),
        }

        let s = match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => return Ok(Duration::from_secs(secs)),
            Raw::Text(s) => s,
        };

        // "ms" before "s": "100ms" also ends with 's'
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
