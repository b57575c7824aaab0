use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use blake3::Hasher as Blake3;
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::errors::{WalletError, WalletResult};

const KEY_LOG_LEVEL: &str = "LOG_LEVEL";
const KEY_RPC_ENDPOINT: &str = "RPC_ENDPOINT";
const KEY_TEST_RPC_ENDPOINT: &str = "TEST_RPC_ENDPOINT";
const KEY_RELAY_PROJECT_ID: &str = "RELAY_PROJECT_ID";
const KEY_AUTO_LOCK_MINUTES: &str = "AUTO_LOCK_MINUTES";
const KEY_MAX_FAILED_ATTEMPTS: &str = "MAX_FAILED_ATTEMPTS";

const CONFIG_VERSION: u16 = 1;

/// Environment types for different security configurations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Production,
    Test,
}

/// Security configuration manager
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    environment: Environment,
    config_map: HashMap<String, String>,
}

impl SecurityConfig {
    /// Create a new security configuration
    pub fn new(environment: Environment) -> Self {
        let mut config = SecurityConfig {
            environment,
            config_map: HashMap::new(),
        };
        config.load_defaults();
        config
    }

    /// Load configuration from environment variables
    pub fn from_env() -> WalletResult<Self> {
        let env_str =
            std::env::var("BASALT_WALLET_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = match env_str.to_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "test" | "testing" => Environment::Test,
            _ => Environment::Development,
        };

        Self::from_environment(environment)
    }

    /// Construct a configuration for the provided environment and apply overrides.
    pub fn from_environment(environment: Environment) -> WalletResult<Self> {
        let mut config = Self::new(environment);
        config.load_from_env_vars()?;
        Ok(config)
    }

    /// Get a configuration value
    pub fn get(&self, key: &str) -> Option<&String> {
        self.config_map.get(key)
    }

    /// Get a configuration value or return default
    pub fn get_or_default(&self, key: &str, default: &str) -> String {
        self.config_map
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    /// Get a required configuration value
    pub fn get_required(&self, key: &str) -> WalletResult<&String> {
        self.config_map.get(key).ok_or_else(|| {
            WalletError::ValidationError(format!("Required config key '{}' not found", key))
        })
    }

    /// Retrieve an unsigned 32-bit value with a default fallback.
    pub fn get_u32_with_default(&self, key: &str, default: u32) -> WalletResult<u32> {
        match self.config_map.get(key) {
            Some(value) => value.trim().parse::<u32>().map_err(|_| {
                WalletError::ValidationError(format!(
                    "Invalid numeric value '{}' for key '{}'",
                    value, key
                ))
            }),
            None => Ok(default),
        }
    }

    /// Minutes of inactivity before the session auto-locks.
    pub fn auto_lock_minutes(&self) -> WalletResult<u32> {
        self.get_u32_with_default(KEY_AUTO_LOCK_MINUTES, 15)
    }

    /// Failed unlock attempts tolerated before further attempts are refused.
    pub fn max_failed_attempts(&self) -> WalletResult<u32> {
        self.get_u32_with_default(KEY_MAX_FAILED_ATTEMPTS, 5)
    }

    /// Relay project identifier advertised during pairing initialization.
    pub fn relay_project_id(&self) -> String {
        self.get_or_default(KEY_RELAY_PROJECT_ID, "")
    }

    /// RPC endpoint override, if the embedder set one.
    pub fn rpc_endpoint_override(&self) -> Option<&String> {
        let key = match self.environment {
            Environment::Test => KEY_TEST_RPC_ENDPOINT,
            _ => KEY_RPC_ENDPOINT,
        };
        self.config_map.get(key)
    }

    /// Set a configuration value (for testing purposes)
    pub fn set(&mut self, key: String, value: String) {
        self.config_map.insert(key, value);
    }

    /// Check if we're in production mode
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Check if we're in development mode
    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    /// Get the current environment
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Validate that all required keys are present
    pub fn validate_required_configs(&self) -> WalletResult<()> {
        let required_keys = [
            KEY_LOG_LEVEL,
            KEY_AUTO_LOCK_MINUTES,
            KEY_MAX_FAILED_ATTEMPTS,
        ];

        for key in required_keys {
            if !self.config_map.contains_key(key) {
                return Err(WalletError::ValidationError(format!(
                    "Required configuration key '{}' is missing for {} environment",
                    key,
                    format!("{:?}", self.environment).to_lowercase()
                )));
            }
        }

        Ok(())
    }

    /// Load default configuration values
    fn load_defaults(&mut self) {
        match self.environment {
            Environment::Production => {
                self.config_map
                    .insert(KEY_LOG_LEVEL.to_string(), "INFO".to_string());
                self.config_map
                    .insert(KEY_AUTO_LOCK_MINUTES.to_string(), "15".to_string());
                self.config_map
                    .insert(KEY_MAX_FAILED_ATTEMPTS.to_string(), "5".to_string());
            }
            Environment::Development => {
                self.config_map
                    .insert(KEY_LOG_LEVEL.to_string(), "DEBUG".to_string());
                self.config_map
                    .insert(KEY_AUTO_LOCK_MINUTES.to_string(), "30".to_string());
                self.config_map
                    .insert(KEY_MAX_FAILED_ATTEMPTS.to_string(), "10".to_string());
            }
            Environment::Test => {
                self.config_map
                    .insert(KEY_LOG_LEVEL.to_string(), "WARN".to_string());
                self.config_map
                    .insert(KEY_AUTO_LOCK_MINUTES.to_string(), "2".to_string());
                self.config_map
                    .insert(KEY_MAX_FAILED_ATTEMPTS.to_string(), "3".to_string());
            }
        }
    }

    /// Load configuration from environment variables
    fn load_from_env_vars(&mut self) -> WalletResult<()> {
        let env_mappings = [
            ("BASALT_LOG_LEVEL", KEY_LOG_LEVEL),
            ("BASALT_RPC_ENDPOINT", KEY_RPC_ENDPOINT),
            ("BASALT_TEST_RPC_ENDPOINT", KEY_TEST_RPC_ENDPOINT),
            ("BASALT_RELAY_PROJECT_ID", KEY_RELAY_PROJECT_ID),
            ("BASALT_AUTO_LOCK_MINUTES", KEY_AUTO_LOCK_MINUTES),
            ("BASALT_MAX_FAILED_ATTEMPTS", KEY_MAX_FAILED_ATTEMPTS),
        ];

        for (env_var, config_key) in &env_mappings {
            if let Ok(value) = std::env::var(env_var) {
                if value.trim().is_empty() {
                    log::warn!("Environment variable {} is empty", env_var);
                    continue;
                }

                // No newlines or control characters
                if value.chars().any(|c| c.is_control()) {
                    log::warn!(
                        "Environment variable {} contains control characters, ignoring",
                        env_var
                    );
                    continue;
                }

                self.config_map.insert(config_key.to_string(), value);
                log::debug!(
                    "Loaded configuration {} from environment variable {}",
                    config_key,
                    env_var
                );
            }
        }

        Ok(())
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self::new(Environment::Development)
    }
}

/// Global security configuration instance
static SECURITY_CONFIG: OnceCell<SecurityConfig> = OnceCell::new();

fn init_security_config_internal(
    environment: Option<Environment>,
) -> WalletResult<&'static SecurityConfig> {
    SECURITY_CONFIG.get_or_try_init(|| {
        let config = match environment {
            Some(explicit) => SecurityConfig::from_environment(explicit)?,
            None => SecurityConfig::from_env()?,
        };

        config.validate_required_configs()?;
        log::info!(
            "Security configuration initialized for {:?} environment",
            config.environment
        );
        Ok(config)
    })
}

/// Initialize security configuration for a specific environment.
pub fn init_security_config(environment: Environment) -> WalletResult<&'static SecurityConfig> {
    init_security_config_internal(Some(environment))
}

/// Initialize security configuration using the environment selection logic.
pub fn init_security_config_from_env() -> WalletResult<&'static SecurityConfig> {
    init_security_config_internal(None)
}

/// Get global security configuration
pub fn get_security_config() -> WalletResult<&'static SecurityConfig> {
    SECURITY_CONFIG.get().ok_or(WalletError::NotInitialized)
}

/// Session-policy knobs the engine enforces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionPolicy {
    pub auto_lock_minutes: u32,
    pub max_failed_attempts: u32,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            auto_lock_minutes: 15,
            max_failed_attempts: 5,
        }
    }
}

/// Durable engine configuration persisted between runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    pub selected_network: String,
    pub session: SessionPolicy,
    pub environment: String,
    pub last_updated: DateTime<Utc>,
    pub version: u16,
}

impl EngineConfig {
    pub fn new(environment: impl Into<String>, selected_network: impl Into<String>) -> Self {
        Self {
            selected_network: selected_network.into(),
            session: SessionPolicy::default(),
            environment: environment.into(),
            last_updated: Utc::now(),
            version: CONFIG_VERSION,
        }
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigEnvelope {
    version: u16,
    checksum: [u8; 32],
    payload: EngineConfig,
    modified_at_unix: i64,
}

/// Handles persistence of engine configuration with integrity checks.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn load_or_default(
        &self,
        environment: impl Into<String>,
        default_network: &str,
    ) -> WalletResult<EngineConfig> {
        if !self.path.exists() {
            let config = EngineConfig::new(environment, default_network);
            self.save(&config)?;
            return Ok(config);
        }

        let bytes = fs::read(&self.path)?;
        let envelope: ConfigEnvelope = serde_json::from_slice(&bytes)?;
        if envelope.version != CONFIG_VERSION {
            return Err(WalletError::ValidationError(format!(
                "Unsupported config version {}",
                envelope.version
            )));
        }

        if checksum(&envelope.payload)? != envelope.checksum {
            return Err(WalletError::ValidationError(
                "Config integrity verification failed".to_string(),
            ));
        }

        Ok(envelope.payload)
    }

    pub fn save(&self, config: &EngineConfig) -> WalletResult<()> {
        let mut payload = config.clone();
        payload.touch();

        let envelope = ConfigEnvelope {
            version: CONFIG_VERSION,
            checksum: checksum(&payload)?,
            modified_at_unix: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map_err(|e| WalletError::StorageError(e.to_string()))?
                .as_secs() as i64,
            payload,
        };

        let serialized = serde_json::to_vec_pretty(&envelope)?;
        let tmp_path = self.path.with_extension("new");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&serialized)?;
            file.sync_all()?;
        }
        fs::rename(tmp_path, &self.path)?;
        Ok(())
    }

    pub fn update<F>(
        &self,
        environment: impl Into<String>,
        default_network: &str,
        updater: F,
    ) -> WalletResult<EngineConfig>
    where
        F: FnOnce(&mut EngineConfig) -> WalletResult<()>,
    {
        let mut config = self.load_or_default(environment, default_network)?;
        updater(&mut config)?;
        config.touch();
        self.save(&config)?;
        Ok(config)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn checksum(config: &EngineConfig) -> WalletResult<[u8; 32]> {
    let mut hasher = Blake3::new();
    let encoded = serde_json::to_vec(config)
        .map_err(|e| WalletError::StorageError(format!("Config serialization failed: {}", e)))?;
    hasher.update(&encoded);
    let mut output = [0u8; 32];
    output.copy_from_slice(hasher.finalize().as_bytes());
    Ok(output)
}
