use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub cleaner: CleanerConfig,
    pub cookie: CookieConfig,
    pub store: StoreConfig,
}

/// Which login-store backend to run. There is no default: picking a backend
/// is a deployment decision.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreBackend {
    Memory,
    Persistent,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Directory for the persistent backend's database file
    pub data_dir: Option<String>,
    /// Per-request timeout for store calls (milliseconds)
    pub op_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct CookieConfig {
    /// Auth-cookie max-age in seconds
    pub max_age_seconds: u64,
    /// Identity field holding the username at registration
    pub username_field: String,
}

#[derive(Debug, Clone)]
pub struct CleanerConfig {
    /// Logins idle longer than this are expired (seconds)
    pub max_age_seconds: u64,
    /// How often the cleaner sweeps (seconds)
    pub period_seconds: u64,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            max_age_seconds: 7_776_000, // 90 days
            username_field: "username".to_string(),
        }
    }
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            max_age_seconds: 7_776_000, // 90 days
            period_seconds: 86_400,     // 24 hours
        }
    }
}

impl CleanerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.period_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "CLEANER_PERIOD must be positive".to_string(),
            ));
        }
        if self.max_age_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "COOKIE_MAX_AGE must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let backend = match std::env::var("STORE_BACKEND") {
            Ok(v) => match v.to_lowercase().as_str() {
                "memory" => StoreBackend::Memory,
                "persistent" => StoreBackend::Persistent,
                other => {
                    return Err(ConfigError::ValidationError(format!(
                        "unknown STORE_BACKEND: {other}"
                    )))
                }
            },
            Err(_) => {
                return Err(ConfigError::ValidationError(
                    "STORE_BACKEND is required (memory or persistent)".to_string(),
                ))
            }
        };

        let data_dir = std::env::var("DATA_DIR").ok();

        let op_timeout_ms = std::env::var("STORE_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5_000);

        let max_age_seconds = std::env::var("COOKIE_MAX_AGE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(7_776_000);

        let username_field =
            std::env::var("USERNAME_FIELD").unwrap_or_else(|_| "username".to_string());

        let period_seconds = std::env::var("CLEANER_PERIOD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(86_400);

        let config = Config {
            cleaner: CleanerConfig {
                max_age_seconds,
                period_seconds,
            },
            cookie: CookieConfig {
                max_age_seconds,
                username_field,
            },
            store: StoreConfig {
                backend,
                data_dir,
                op_timeout_ms,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cleaner.validate()?;

        if self.cookie.max_age_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "COOKIE_MAX_AGE must be positive".to_string(),
            ));
        }
        if self.cookie.username_field.is_empty() {
            return Err(ConfigError::ValidationError(
                "USERNAME_FIELD cannot be empty".to_string(),
            ));
        }
        if self.store.op_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "STORE_TIMEOUT_MS must be positive".to_string(),
            ));
        }
        if self.store.backend == StoreBackend::Persistent && self.store.data_dir.is_none() {
            return Err(ConfigError::ValidationError(
                "DATA_DIR is required for the persistent backend".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            cleaner: CleanerConfig::default(),
            cookie: CookieConfig::default(),
            store: StoreConfig {
                backend: StoreBackend::Memory,
                data_dir: None,
                op_timeout_ms: 5_000,
            },
        }
    }

    #[test]
    fn test_defaults_validate() {
        base_config().validate().unwrap();
    }

    #[test]
    fn test_zero_cleaner_period_is_rejected() {
        let mut config = base_config();
        config.cleaner.period_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_max_age_is_rejected() {
        let mut config = base_config();
        config.cleaner.max_age_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_persistent_backend_requires_data_dir() {
        let mut config = base_config();
        config.store.backend = StoreBackend::Persistent;
        assert!(config.validate().is_err());

        config.store.data_dir = Some("/var/lib/remember-me".to_string());
        config.validate().unwrap();
    }
}
