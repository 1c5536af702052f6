use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::{error, info};

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Comma separated list of origins allowed to open conference sockets
    pub cors_origins: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Database URL
    pub db_url: Option<String>,

    /// HS256 secret used to validate client tokens
    pub auth_jwt_secret: Option<String>,

    /// Key expected from execution workers posting results
    pub api_key: Option<String>,

    // Message bus
    pub pubsub_project_id: Option<String>,
    #[serde(default = "default_pubsub_base_url")]
    pub pubsub_base_url: String,
    pub pubsub_access_token: Option<String>,

    // Document store mirror
    pub firestore_project_id: Option<String>,
    #[serde(default = "default_firestore_base_url")]
    pub firestore_base_url: String,
    pub firestore_access_token: Option<String>,

    // Language to topic bindings
    #[serde(default = "default_javascript_topic")]
    pub javascript_topic: String,
    #[serde(default = "default_python_topic")]
    pub python_topic: String,
    #[serde(default = "default_go_lang_topic")]
    pub go_lang_topic: String,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        match envy::from_env::<Config>() {
            Ok(config) => {
                info!("Configuration loaded successfully");
                Ok(config)
            }
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                Err(ConfigError::EnvError(e))
            }
        }
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "dev" || self.environment.to_lowercase() == "development"
    }

    /// Origins allowed to open a conference socket. Empty means any origin.
    pub fn allowed_origins(&self) -> Vec<String> {
        self.cors_origins
            .as_deref()
            .map(|origins| {
                origins
                    .split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            cors_origins: None,
            db_url: None,
            auth_jwt_secret: None,
            api_key: None,
            pubsub_project_id: None,
            pubsub_base_url: default_pubsub_base_url(),
            pubsub_access_token: None,
            firestore_project_id: None,
            firestore_base_url: default_firestore_base_url(),
            firestore_access_token: None,
            javascript_topic: default_javascript_topic(),
            python_topic: default_python_topic(),
            go_lang_topic: default_go_lang_topic(),
        }
    }
}

/// Store the configuration for the lifetime of the process.
pub fn init_config(config: Config) -> &'static Config {
    CONFIG.get_or_init(|| config)
}

/// Get the global configuration, falling back to defaults if it was never initialized.
pub fn get_config() -> &'static Config {
    CONFIG.get_or_init(fallback_config)
}

#[cfg(not(test))]
fn fallback_config() -> Config {
    Config::default()
}

#[cfg(test)]
pub const TEST_JWT_SECRET: &str = "test-jwt-secret";
#[cfg(test)]
pub const TEST_API_KEY: &str = "test-api-key";

#[cfg(test)]
fn fallback_config() -> Config {
    Config {
        auth_jwt_secret: Some(TEST_JWT_SECRET.to_string()),
        api_key: Some(TEST_API_KEY.to_string()),
        ..Config::default()
    }
}

#[derive(Debug)]
pub enum ConfigError {
    EnvError(envy::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EnvError(e) => write!(f, "Environment variable error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8010
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_pubsub_base_url() -> String {
    "https://pubsub.googleapis.com/v1".to_string()
}

fn default_firestore_base_url() -> String {
    "https://firestore.googleapis.com/v1".to_string()
}

fn default_javascript_topic() -> String {
    "javascript_topic".to_string()
}

fn default_python_topic() -> String {
    "python_topic".to_string()
}

fn default_go_lang_topic() -> String {
    "go_lang_topic".to_string()
}
