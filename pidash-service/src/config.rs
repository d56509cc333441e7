//! Dashboard configuration.
//!
//! Loaded from TOML with every section optional, then overlaid with the
//! `DASHBOARD_*` / `PI_*` environment variables. `validate` collects every
//! problem instead of stopping at the first.

use pidash_core::CacheSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::fallback::ResolverSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid environment override {var}={value}")]
    Env { var: &'static str, value: String },

    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub server: ServerConfig,
    pub remote: RemoteConfig,
    pub data: DataConfig,
    pub cache: CacheConfig,
    pub fallback: FallbackConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub auth_enabled: bool,
    pub username: String,
    /// Hex SHA-256 of the dashboard password.
    pub password_hash: String,
    pub rate_limit_per_minute: u32,
    pub rate_limit_burst: u32,
    /// Seconds between expired-entry sweeps.
    pub cleanup_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5001,
            auth_enabled: false,
            username: "admin".into(),
            password_hash: String::new(),
            rate_limit_per_minute: 100,
            rate_limit_burst: 10,
            cleanup_interval_secs: 300,
        }
    }
}

/// The Pi's snapshot API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Host name or address; a leading `user@` is ignored.
    pub host: String,
    pub api_port: u16,
    pub timeout_secs: u64,
    pub probe_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.104".into(),
            api_port: 8080,
            timeout_secs: 10,
            probe_timeout_secs: 3,
        }
    }
}

impl RemoteConfig {
    pub fn base_url(&self) -> String {
        let host = self.host.rsplit_once('@').map_or(self.host.as_str(), |(_, h)| h);
        format!("http://{host}:{}", self.api_port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Directory of synced CSV exports.
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub max_csv_bytes: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            database_path: PathBuf::from("data/trading_bot.db"),
            max_csv_bytes: pidash_core::data::csv_dir::DEFAULT_MAX_FILE_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub max_size: usize,
    pub compression_threshold: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let defaults = CacheSettings::default();
        Self {
            ttl_secs: defaults.default_ttl.as_secs(),
            max_size: defaults.max_size,
            compression_threshold: defaults.compression_threshold,
        }
    }
}

impl CacheConfig {
    pub fn settings(&self) -> CacheSettings {
        CacheSettings {
            default_ttl: Duration::from_secs(self.ttl_secs),
            max_size: self.max_size,
            compression_threshold: self.compression_threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Local exports older than this mean the remote stopped producing.
    pub max_age_hours: u64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            max_age_hours: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "pidash=info,tower_http=info".into(),
            json: false,
        }
    }
}

impl DashboardConfig {
    /// Read a TOML file. A missing file is an error; use `Default` for none.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Optional file, then process environment, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay environment overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DASHBOARD_HOST") {
            self.server.host = v;
        }
        if let Some(v) = parsed(&lookup, "DASHBOARD_PORT")? {
            self.server.port = v;
        }
        if let Some(v) = lookup("DASHBOARD_AUTH_ENABLED") {
            self.server.auth_enabled = parse_bool("DASHBOARD_AUTH_ENABLED", &v)?;
        }
        if let Some(v) = lookup("DASHBOARD_USERNAME") {
            self.server.username = v;
        }
        if let Some(v) = lookup("DASHBOARD_PASSWORD_HASH") {
            self.server.password_hash = v.trim().to_ascii_lowercase();
        }
        if let Some(v) = parsed(&lookup, "DASHBOARD_RATE_LIMIT_PER_MINUTE")? {
            self.server.rate_limit_per_minute = v;
        }
        if let Some(v) = lookup("PI_HOST") {
            self.remote.host = v;
        }
        if let Some(v) = parsed(&lookup, "PI_API_PORT")? {
            self.remote.api_port = v;
        }
        if let Some(v) = parsed(&lookup, "PI_API_TIMEOUT")? {
            self.remote.timeout_secs = v;
        }
        if let Some(v) = parsed(&lookup, "CACHE_TIMEOUT_SECONDS")? {
            self.cache.ttl_secs = v;
        }
        if let Some(v) = lookup("DASHBOARD_DATA_DIR") {
            self.data.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DASHBOARD_DATABASE_PATH") {
            self.data.database_path = PathBuf::from(v);
        }
        if let Some(v) = parsed(&lookup, "FALLBACK_MAX_AGE_HOURS")? {
            self.fallback.max_age_hours = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.server.host.trim().is_empty() {
            problems.push("server.host must not be empty".to_string());
        }
        if self.server.rate_limit_per_minute == 0 {
            problems.push("server.rate_limit_per_minute must be positive".to_string());
        }
        if self.server.cleanup_interval_secs == 0 {
            problems.push("server.cleanup_interval_secs must be positive".to_string());
        }
        if self.server.auth_enabled {
            if self.server.username.is_empty() {
                problems.push("server.username is required when auth is enabled".to_string());
            }
            let hash = &self.server.password_hash;
            if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
                problems.push(
                    "server.password_hash must be a 64-character hex SHA-256 digest when auth is enabled"
                        .to_string(),
                );
            }
        }
        if self.remote.host.trim().is_empty() {
            problems.push("remote.host must not be empty".to_string());
        }
        if self.remote.timeout_secs == 0 || self.remote.timeout_secs > 60 {
            problems.push("remote.timeout_secs must be between 1 and 60".to_string());
        }
        if self.remote.probe_timeout_secs == 0 || self.remote.probe_timeout_secs > 10 {
            problems.push("remote.probe_timeout_secs must be between 1 and 10".to_string());
        }
        if self.cache.max_size == 0 {
            problems.push("cache.max_size must be positive".to_string());
        }
        if self.cache.ttl_secs == 0 {
            problems.push("cache.ttl_secs must be positive".to_string());
        }
        if self.fallback.max_age_hours == 0 {
            problems.push("fallback.max_age_hours must be positive".to_string());
        }
        if self.data.max_csv_bytes == 0 {
            problems.push("data.max_csv_bytes must be positive".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    pub fn resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            freshness_threshold: Duration::from_secs(
                self.fallback.max_age_hours.saturating_mul(3600),
            ),
            live_ttl: Duration::from_secs(self.cache.ttl_secs),
        }
    }
}

fn parsed<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env { var, value }),
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Env {
            var,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var: &str| map.get(var).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = DashboardConfig::default();
        config.validate().unwrap();
        assert_eq!(config.server.port, 5001);
        assert_eq!(config.remote.base_url(), "http://192.168.1.104:8080");
        assert_eq!(
            config.resolver_settings().freshness_threshold,
            Duration::from_secs(2 * 3600)
        );
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = DashboardConfig::from_toml(
            r#"
            [server]
            port = 8000

            [fallback]
            max_age_hours = 6
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.fallback.max_age_hours, 6);
        assert_eq!(config.cache, CacheConfig::default());
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            DashboardConfig::from_toml("[server]\nport = \"many\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = DashboardConfig::default();
        config
            .apply_env(env(&[
                ("DASHBOARD_PORT", "6000"),
                ("PI_HOST", "pi@10.0.0.5"),
                ("PI_API_PORT", "9090"),
                ("CACHE_TIMEOUT_SECONDS", "30"),
                ("DASHBOARD_AUTH_ENABLED", "True"),
                ("DASHBOARD_PASSWORD_HASH", "AB"),
                ("FALLBACK_MAX_AGE_HOURS", "4"),
            ]))
            .unwrap();

        assert_eq!(config.server.port, 6000);
        assert!(config.server.auth_enabled);
        assert_eq!(config.server.password_hash, "ab");
        assert_eq!(config.remote.base_url(), "http://10.0.0.5:9090");
        assert_eq!(config.cache.ttl_secs, 30);
        assert_eq!(config.fallback.max_age_hours, 4);
    }

    #[test]
    fn huge_max_age_saturates() {
        let mut config = DashboardConfig::default();
        config
            .apply_env(env(&[("FALLBACK_MAX_AGE_HOURS", u64::MAX.to_string().as_str())]))
            .unwrap();
        config.validate().unwrap();
        assert_eq!(
            config.resolver_settings().freshness_threshold,
            Duration::from_secs(u64::MAX)
        );
    }

    #[test]
    fn bad_env_value_names_the_variable() {
        let mut config = DashboardConfig::default();
        let err = config.apply_env(env(&[("DASHBOARD_PORT", "lots")])).unwrap_err();
        assert!(err.to_string().contains("DASHBOARD_PORT"));
    }

    #[test]
    fn validate_reports_every_problem() {
        let mut config = DashboardConfig::default();
        config.server.auth_enabled = true;
        config.cache.max_size = 0;
        config.remote.timeout_secs = 0;

        match config.validate() {
            Err(ConfigError::Invalid(problems)) => {
                assert_eq!(problems.len(), 3, "{problems:?}");
                assert!(problems.iter().any(|p| p.contains("password_hash")));
            }
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn auth_with_proper_hash_validates() {
        let mut config = DashboardConfig::default();
        config.server.auth_enabled = true;
        config.server.password_hash = "a".repeat(64);
        config.validate().unwrap();
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dashboard.toml");
        std::fs::write(&path, "[cache]\nmax_size = 42\n").unwrap();
        let config = DashboardConfig::from_file(&path).unwrap();
        assert_eq!(config.cache.max_size, 42);

        assert!(matches!(
            DashboardConfig::from_file(&dir.path().join("absent.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
