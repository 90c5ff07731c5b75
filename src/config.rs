use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CourierConfig {
    pub general: GeneralConfig,
    pub storage: StorageConfig,
    pub sync: SyncConfig,
    pub remote: RemoteConfig,
    pub connectivity: ConnectivityConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConfig {
    /// Attempts before a message is marked `failed`. `0` retries forever.
    pub max_retries: u32,
    pub delivery_timeout_secs: u64,
    pub retry_base_delay_secs: u64,
    pub retry_max_delay_secs: u64,
    /// Idle re-check of the outbox by `courier run`, for messages queued by
    /// other processes. `0` disables it.
    pub poll_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RemoteConfig {
    pub endpoint: String,
    pub auth_token: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// URL probed with `HEAD` to decide online/offline. Unset means "always online".
    pub probe_url: Option<String>,
    pub probe_interval_secs: u64,
    pub probe_timeout_secs: u64,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            storage: StorageConfig::default(),
            sync: SyncConfig::default(),
            remote: RemoteConfig::default(),
            connectivity: ConnectivityConfig::default(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_courier_dir()
            .join("outbox.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            delivery_timeout_secs: 30,
            retry_base_delay_secs: 2,
            retry_max_delay_secs: 300,
            poll_interval_secs: 30,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8000/api/chat".into(),
            auth_token: None,
        }
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_url: None,
            probe_interval_secs: 15,
            probe_timeout_secs: 5,
        }
    }
}

impl SyncConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }
}

impl ConnectivityConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.max(1))
    }
}

/// Returns `~/.courier/`
pub fn default_courier_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".courier")
}

/// Returns the default config file path: `~/.courier/config.toml`
pub fn default_config_path() -> PathBuf {
    default_courier_dir().join("config.toml")
}

impl CourierConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            CourierConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    /// (COURIER_DB, COURIER_LOG_LEVEL, COURIER_ENDPOINT, COURIER_TOKEN).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("COURIER_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("COURIER_LOG_LEVEL") {
            self.general.log_level = val;
        }
        if let Ok(val) = std::env::var("COURIER_ENDPOINT") {
            self.remote.endpoint = val;
        }
        if let Ok(val) = std::env::var("COURIER_TOKEN") {
            self.remote.auth_token = Some(val);
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = CourierConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.sync.max_retries, 5);
        assert_eq!(config.sync.delivery_timeout(), Duration::from_secs(30));
        assert!(config.connectivity.probe_url.is_none());
        assert!(config.storage.db_path.ends_with("outbox.db"));
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[general]
log_level = "debug"

[storage]
db_path = "/tmp/outbox-test.db"

[sync]
max_retries = 0

[connectivity]
probe_url = "https://example.com/health"
"#;
        let config: CourierConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.storage.db_path, "/tmp/outbox-test.db");
        assert_eq!(config.sync.max_retries, 0);
        assert_eq!(
            config.connectivity.probe_url.as_deref(),
            Some("https://example.com/health")
        );
        // defaults still apply for unset fields
        assert_eq!(config.sync.delivery_timeout_secs, 30);
        assert_eq!(config.sync.poll_interval_secs, 30);
        assert_eq!(config.connectivity.probe_interval_secs, 15);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = CourierConfig::default();
        std::env::set_var("COURIER_DB", "/tmp/override.db");
        std::env::set_var("COURIER_LOG_LEVEL", "trace");
        std::env::set_var("COURIER_ENDPOINT", "https://chat.example.com/send");
        std::env::set_var("COURIER_TOKEN", "secret");

        config.apply_env_overrides();

        assert_eq!(config.storage.db_path, "/tmp/override.db");
        assert_eq!(config.general.log_level, "trace");
        assert_eq!(config.remote.endpoint, "https://chat.example.com/send");
        assert_eq!(config.remote.auth_token.as_deref(), Some("secret"));

        // Clean up
        std::env::remove_var("COURIER_DB");
        std::env::remove_var("COURIER_LOG_LEVEL");
        std::env::remove_var("COURIER_ENDPOINT");
        std::env::remove_var("COURIER_TOKEN");
    }

    #[test]
    fn tilde_expands_to_home() {
        let expanded = expand_tilde("~/outbox.db");
        assert!(expanded.ends_with("outbox.db"));
        assert_eq!(expand_tilde("/abs/outbox.db"), PathBuf::from("/abs/outbox.db"));
    }
}
