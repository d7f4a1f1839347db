use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::credentials::CacheSettings;
use crate::mapping::MappingSettings;

/// Config file read when `SWITCHBOARD_CONFIG` is unset and the file exists
pub const DEFAULT_CONFIG_PATH: &str = "switchboard.toml";

/// Env var holding the credential master secret. Never read from the file.
pub const MASTER_KEY_ENV: &str = "SWITCHBOARD_MASTER_KEY";

/// Complete Switchboard configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SwitchboardConfig {
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub field_mapping: FieldMappingConfig,
    #[serde(default)]
    pub pipedrive: PipedriveConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Credential cache and store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsConfig {
    /// How long a decrypted secret is served from memory (seconds)
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    /// SQLite file holding encrypted credentials
    #[serde(default = "default_credentials_db")]
    pub database: String,
    /// Upper bound on one store read (milliseconds)
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

fn default_ttl_seconds() -> u64 {
    300
}

fn default_credentials_db() -> String {
    "credentials.db".to_string()
}

fn default_store_timeout_ms() -> u64 {
    2000
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl_seconds(),
            database: default_credentials_db(),
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl CredentialsConfig {
    /// Fails when `ttl_seconds` is too large to represent.
    pub fn cache_settings(&self) -> Result<CacheSettings> {
        let ttl = i64::try_from(self.ttl_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| anyhow!("credentials.ttl_seconds out of range: {}", self.ttl_seconds))?;

        Ok(CacheSettings {
            ttl,
            store_timeout: Duration::from_millis(self.store_timeout_ms),
        })
    }
}

/// Field mapping cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FieldMappingConfig {
    /// Age after which a discovered mapping is rediscovered (hours)
    #[serde(default = "default_freshness_hours")]
    pub freshness_hours: u64,
    /// SQLite file holding mapping snapshots
    #[serde(default = "default_field_mappings_db")]
    pub database: String,
    /// Upper bound on one schema discovery call (milliseconds)
    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,
}

fn default_freshness_hours() -> u64 {
    24
}

fn default_field_mappings_db() -> String {
    "field_mappings.db".to_string()
}

fn default_discovery_timeout_ms() -> u64 {
    5000
}

impl Default for FieldMappingConfig {
    fn default() -> Self {
        Self {
            freshness_hours: default_freshness_hours(),
            database: default_field_mappings_db(),
            discovery_timeout_ms: default_discovery_timeout_ms(),
        }
    }
}

impl FieldMappingConfig {
    /// Fails when `freshness_hours` is too large to represent.
    pub fn mapping_settings(&self) -> Result<MappingSettings> {
        let freshness = i64::try_from(self.freshness_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .ok_or_else(|| {
                anyhow!(
                    "field_mapping.freshness_hours out of range: {}",
                    self.freshness_hours
                )
            })?;

        Ok(MappingSettings {
            freshness,
            discovery_timeout: Duration::from_millis(self.discovery_timeout_ms),
        })
    }
}

/// Pipedrive API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipedriveConfig {
    #[serde(default = "default_pipedrive_base_url")]
    pub base_url: String,
    /// Upper bound on one record call (milliseconds)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_pipedrive_base_url() -> String {
    crate::pipedrive::api::BASE_URL.to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for PipedriveConfig {
    fn default() -> Self {
        Self {
            base_url: default_pipedrive_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl PipedriveConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Settings API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_api_port() -> u16 {
    3000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
        }
    }
}

impl SwitchboardConfig {
    /// Load from `SWITCHBOARD_CONFIG`, else `switchboard.toml` if present,
    /// else defaults; then apply env overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("SWITCHBOARD_CONFIG") {
            Ok(path) => load_config(&path)?,
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => load_config(DEFAULT_CONFIG_PATH)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Apply `SWITCHBOARD_*` overrides looked up through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SWITCHBOARD_API_PORT") {
            self.api.port = v
                .parse()
                .context("SWITCHBOARD_API_PORT must be a valid port number")?;
        }
        if let Some(v) = lookup("SWITCHBOARD_CREDENTIALS_DB") {
            self.credentials.database = v;
        }
        if let Some(v) = lookup("SWITCHBOARD_FIELD_MAPPINGS_DB") {
            self.field_mapping.database = v;
        }
        Ok(())
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<SwitchboardConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: SwitchboardConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config file {}", path))?;
    Ok(config)
}

/// Reads the credential master secret from the environment.
pub fn master_key_from_env() -> Result<String> {
    let key = std::env::var(MASTER_KEY_ENV)
        .with_context(|| format!("{} is required", MASTER_KEY_ENV))?;
    if key.is_empty() {
        return Err(anyhow!("{} must not be empty", MASTER_KEY_ENV));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::Mutex;

    // Serializes tests that touch the process-wide env
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_config() {
        let config = SwitchboardConfig::default();
        assert_eq!(config.credentials.ttl_seconds, 300);
        assert_eq!(config.credentials.database, "credentials.db");
        assert_eq!(config.credentials.store_timeout_ms, 2000);
        assert_eq!(config.field_mapping.freshness_hours, 24);
        assert_eq!(config.field_mapping.database, "field_mappings.db");
        assert_eq!(config.pipedrive.base_url, "https://api.pipedrive.com");
        assert_eq!(config.pipedrive.request_timeout_ms, 10_000);
        assert_eq!(config.api.port, 3000);
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [credentials]
            ttl_seconds = 60
            database = "/var/lib/switchboard/credentials.db"
            store_timeout_ms = 500

            [field_mapping]
            freshness_hours = 12
            database = "/var/lib/switchboard/field_mappings.db"
            discovery_timeout_ms = 3000

            [pipedrive]
            base_url = "https://sandbox.pipedrive.example"
            request_timeout_ms = 4000

            [api]
            port = 8080
        "#;

        let config: SwitchboardConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.credentials.ttl_seconds, 60);
        assert_eq!(config.field_mapping.freshness_hours, 12);
        assert_eq!(config.pipedrive.base_url, "https://sandbox.pipedrive.example");
        assert_eq!(config.api.port, 8080);

        let cache = config.credentials.cache_settings().unwrap();
        assert_eq!(cache.ttl, chrono::Duration::seconds(60));
        assert_eq!(cache.store_timeout, Duration::from_millis(500));

        let mapping = config.field_mapping.mapping_settings().unwrap();
        assert_eq!(mapping.freshness, chrono::Duration::hours(12));
        assert_eq!(mapping.discovery_timeout, Duration::from_millis(3000));
        assert_eq!(config.pipedrive.request_timeout(), Duration::from_secs(4));
    }

    #[test]
    fn test_out_of_range_durations_are_rejected() {
        let toml = r#"
            [field_mapping]
            freshness_hours = 9223372036854775807
        "#;
        let config: SwitchboardConfig = toml::from_str(toml).unwrap();
        let err = config.field_mapping.mapping_settings().unwrap_err();
        assert!(err.to_string().contains("freshness_hours"));

        // Would wrap negative as i64
        let credentials = CredentialsConfig {
            ttl_seconds: u64::MAX,
            ..CredentialsConfig::default()
        };
        let err = credentials.cache_settings().unwrap_err();
        assert!(err.to_string().contains("ttl_seconds"));

        // Fits in i64 but not in a chrono duration
        let credentials = CredentialsConfig {
            ttl_seconds: i64::MAX as u64,
            ..CredentialsConfig::default()
        };
        assert!(credentials.cache_settings().is_err());
    }

    #[test]
    fn test_partial_config() {
        // Missing sections and fields use defaults
        let toml = r#"
            [credentials]
            ttl_seconds = 120
        "#;

        let config: SwitchboardConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.credentials.ttl_seconds, 120);
        assert_eq!(config.credentials.database, "credentials.db");
        assert_eq!(config.field_mapping.freshness_hours, 24);
        assert_eq!(config.api.port, 3000);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("SWITCHBOARD_API_PORT", "4000"),
            ("SWITCHBOARD_CREDENTIALS_DB", "/tmp/c.db"),
        ]
        .into_iter()
        .collect();

        let mut config = SwitchboardConfig::default();
        config
            .apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.api.port, 4000);
        assert_eq!(config.credentials.database, "/tmp/c.db");
        assert_eq!(config.field_mapping.database, "field_mappings.db");
    }

    #[test]
    fn test_invalid_port_override() {
        let mut config = SwitchboardConfig::default();
        let result = config.apply_overrides(|name| {
            (name == "SWITCHBOARD_API_PORT").then(|| "not-a-port".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[api]\nport = 9090").unwrap();

        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.api.port, 9090);

        assert!(load_config("/nonexistent/switchboard.toml").is_err());
    }

    #[test]
    fn test_master_key_from_env() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        std::env::remove_var(MASTER_KEY_ENV);
        assert!(master_key_from_env().is_err());

        std::env::set_var(MASTER_KEY_ENV, "");
        assert!(master_key_from_env().is_err());

        std::env::set_var(MASTER_KEY_ENV, "correct horse battery staple");
        assert_eq!(master_key_from_env().unwrap(), "correct horse battery staple");

        std::env::remove_var(MASTER_KEY_ENV);
    }
}
