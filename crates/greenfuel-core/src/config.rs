//! Application configuration management.
//!
//! Two sources feed the client:
//! - the runtime `Environment`, which decides the API base URL once per
//!   process (production detection, explicit override, local default)
//! - the persisted `Config` at `~/.config/greenfuel/config.json`, holding
//!   storage backend, refresh behaviour, timeout and last used email

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::transport::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::auth::RefreshMode;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "greenfuel";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// API origin used by production deployments
pub const PRODUCTION_API_ORIGIN: &str = "http://api.sugamgreenfuel.in";

/// Hostnames containing this are production front ends
const PRODUCTION_DOMAIN: &str = "sugamgreenfuel";

/// API origin of a locally running backend
pub const LOCAL_API_ORIGIN: &str = "http://127.0.0.1:8000";

/// `production` marks a production build
pub const ENV_MODE_VAR: &str = "GREENFUEL_ENV";

/// Hostname the front end is served from
pub const HOSTNAME_VAR: &str = "GREENFUEL_HOSTNAME";

/// Explicit backend origin for non-production runs
pub const BACKEND_URL_VAR: &str = "BACKEND_API_URL";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    pub production_build: bool,
    pub hostname: Option<String>,
    pub backend_override: Option<String>,
}

impl Environment {
    pub fn from_env() -> Self {
        let non_empty = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            production_build: non_empty(ENV_MODE_VAR)
                .is_some_and(|mode| mode.eq_ignore_ascii_case("production")),
            hostname: non_empty(HOSTNAME_VAR),
            backend_override: non_empty(BACKEND_URL_VAR),
        }
    }

    pub fn is_production(&self) -> bool {
        self.production_build
            || self
                .hostname
                .as_deref()
                .is_some_and(|host| host.to_ascii_lowercase().contains(PRODUCTION_DOMAIN))
    }
}

/// Pick the API origin for this process. Production always wins over an
/// override.
pub fn resolve_base_url(env: &Environment) -> String {
    let url = if env.is_production() {
        PRODUCTION_API_ORIGIN
    } else {
        env.backend_override.as_deref().unwrap_or(LOCAL_API_ORIGIN)
    };
    url.trim().trim_end_matches('/').to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// JSON file in the cache directory
    #[default]
    File,
    /// OS keychain
    Keyring,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageBackend,
    pub refresh_mode: RefreshMode,
    pub request_timeout_secs: u64,
    /// Used when `BACKEND_API_URL` is not set
    pub backend_url: Option<String>,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageBackend::default(),
            refresh_mode: RefreshMode::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            backend_url: None,
            last_email: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Self::config_path()?)
    }

    pub fn load_from(path: PathBuf) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {:?}", path))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {:?}", path))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(Self::config_path()?)
    }

    pub fn save_to(&self, path: PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// The environment with the configured backend URL filled in when no
    /// override came from the process environment.
    pub fn environment(&self) -> Environment {
        let mut env = Environment::from_env();
        if env.backend_override.is_none() {
            env.backend_override = self.backend_url.clone();
        }
        env
    }
}
