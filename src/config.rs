//! Server configuration.
//!
//! Layered lowest to highest: built-in defaults, an optional JSON file,
//! `THINKRING_*` environment variables, then command-line flags (applied by
//! the binary).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DB_FILE_NAME: &str = ".thinkring.db";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },
    #[error("invalid value for {key}: '{value}'")]
    InvalidEnv { key: &'static str, value: String },
    #[error("failed to create database directory {path}: {source}")]
    CreateDir { path: PathBuf, source: std::io::Error },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// None = discover with [`find_database`]
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    /// None = a random secret per process, so tokens die with a restart
    #[serde(default)]
    pub jwt_secret: Option<String>,
    #[serde(default = "default_access_minutes")]
    pub access_token_minutes: i64,
    #[serde(default = "default_refresh_days")]
    pub refresh_token_days: i64,
    #[serde(default = "default_true")]
    pub cookie_secure: bool,
    #[serde(default = "default_login_per_minute")]
    pub login_per_minute: u32,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
    /// Empty = no CORS layer
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_access_minutes() -> i64 {
    60
}

fn default_refresh_days() -> i64 {
    7
}

fn default_true() -> bool {
    true
}

fn default_login_per_minute() -> u32 {
    10
}

fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            db_path: None,
            jwt_secret: None,
            access_token_minutes: default_access_minutes(),
            refresh_token_days: default_refresh_days(),
            cookie_secure: true,
            login_per_minute: default_login_per_minute(),
            body_limit_bytes: default_body_limit(),
            cors_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Defaults, overlaid with `path` when given. A missing file is an error;
    /// there is no implicit config location.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        serde_json::from_str(&content)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Overlay `THINKRING_*` values from `lookup`. Empty values are ignored.
    pub fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("THINKRING_BIND") {
            self.bind = v;
        }
        if let Some(v) = get("THINKRING_DB") {
            self.db_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("THINKRING_JWT_SECRET") {
            self.jwt_secret = Some(v);
        }
        if let Some(v) = get("THINKRING_ACCESS_TOKEN_MINUTES") {
            self.access_token_minutes = parse_var("THINKRING_ACCESS_TOKEN_MINUTES", v)?;
        }
        if let Some(v) = get("THINKRING_REFRESH_TOKEN_DAYS") {
            self.refresh_token_days = parse_var("THINKRING_REFRESH_TOKEN_DAYS", v)?;
        }
        if let Some(v) = get("THINKRING_COOKIE_SECURE") {
            self.cookie_secure = match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => return Err(ConfigError::InvalidEnv { key: "THINKRING_COOKIE_SECURE", value: v }),
            };
        }
        if let Some(v) = get("THINKRING_LOGIN_PER_MINUTE") {
            self.login_per_minute = parse_var("THINKRING_LOGIN_PER_MINUTE", v)?;
        }
        if let Some(v) = get("THINKRING_CORS_ORIGINS") {
            self.cors_origins = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        Ok(())
    }

    /// The configured secret, or a fresh random one with a warning.
    pub fn resolve_jwt_secret(&self) -> String {
        match &self.jwt_secret {
            Some(secret) => secret.clone(),
            None => {
                tracing::warn!("THINKRING_JWT_SECRET not set; using a random secret, tokens will not survive a restart");
                let bytes: [u8; 32] = rand::random();
                hex::encode(bytes)
            }
        }
    }

    pub fn resolve_db_path(&self) -> PathBuf {
        match &self.db_path {
            Some(path) => path.clone(),
            None => find_database(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv { key, value })
}

/// Walk up from the working directory for `.thinkring.db`, falling back to
/// the platform data directory.
pub fn find_database() -> PathBuf {
    if let Some(found) = std::env::current_dir().ok().and_then(|cwd| find_database_from(&cwd)) {
        return found;
    }
    dirs::data_dir()
        .map(|p| p.join("thinkring").join("thinkring.db"))
        .unwrap_or_else(|| PathBuf::from("thinkring.db"))
}

/// Create the directory that will hold the database file. The data-dir
/// fallback from [`find_database`] does not exist on a fresh machine.
pub fn ensure_database_dir(db_path: &Path) -> Result<(), ConfigError> {
    let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir { path: parent.to_path_buf(), source })
}

pub fn find_database_from(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(DB_FILE_NAME))
        .find(|candidate| candidate.exists())
}
