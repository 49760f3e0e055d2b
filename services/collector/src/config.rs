use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to load configuration: {0}")]
    LoadError(String),
}

/// Main configuration for the collector service
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// S3 configuration
    #[serde(default)]
    pub s3: S3Config,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Image processing configuration
    #[serde(default)]
    pub image: ImageConfig,
    /// Session configuration
    #[serde(default)]
    pub session: SessionConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Which storage backends the service talks to
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// S3 for blobs, PostgreSQL for metadata
    #[default]
    Cloud,
    /// Process-local stores, nothing leaves the process
    Memory,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// Storage backend selection
    #[serde(default)]
    pub backend: BackendKind,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket name for apple images
    #[serde(default)]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Base URL that public objects are served from, e.g. a CDN
    pub public_base_url: Option<String>,
    /// Key prefix for uploaded images
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    #[serde(default)]
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Image processing configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    /// JPEG quality used when re-encoding rotated images (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

/// Collection session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Sessions untouched for this long are evicted
    #[serde(default = "default_max_idle_secs")]
    pub max_idle_secs: u64,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Maximum accepted image upload size in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

// Default value functions
fn default_service_name() -> String {
    "apple-collector".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_key_prefix() -> String {
    "apples".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_jpeg_quality() -> u8 {
    75
}

fn default_max_idle_secs() -> u64 {
    3600
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024 // 20MB
}

impl Config {
    /// Load configuration from config files and environment
    pub fn load() -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            // Add config file if present
            .add_source(config::File::with_name("config/collector").required(false))
            .add_source(config::File::with_name("/etc/apple-collector/collector").required(false))
            // Override with environment variables
            // COLLECTOR__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("COLLECTOR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::LoadError(e.to_string()))?;

        let config: Config = config
            .try_deserialize()
            .map_err(|e| ConfigError::LoadError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate that the selected backend has what it needs
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.backend == BackendKind::Cloud {
            if self.s3.bucket.trim().is_empty() {
                return Err(ConfigError::MissingRequired("s3.bucket".to_string()));
            }
            if self.database.url.trim().is_empty() {
                return Err(ConfigError::MissingRequired("database.url".to_string()));
            }
        }

        if self.s3.key_prefix.trim_matches('/').is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "s3.key_prefix".to_string(),
                message: "must not be empty".to_string(),
            });
        }

        if !(1..=100).contains(&self.image.jpeg_quality) {
            return Err(ConfigError::InvalidValue {
                key: "image.jpeg_quality".to_string(),
                message: format!("{} is outside 1-100", self.image.jpeg_quality),
            });
        }

        if self.api.max_upload_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "api.max_upload_bytes".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    /// Get session idle limit as Duration
    pub fn session_max_idle(&self) -> Duration {
        Duration::from_secs(self.session.max_idle_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
            backend: BackendKind::default(),
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            public_base_url: None,
            key_prefix: default_key_prefix(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            run_migrations: true,
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_idle_secs: default_max_idle_secs(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> Config {
        let mut config = Config::default();
        config.service.backend = BackendKind::Memory;
        config
    }

    #[test]
    fn test_load_layers_env_over_file() {
        // Tests run from the crate root, so config/collector.toml is picked up
        std::env::set_var("COLLECTOR__S3__BUCKET", "apple-dataset-staging");
        std::env::set_var("COLLECTOR__IMAGE__JPEG_QUALITY", "90");

        let config = Config::load().unwrap();

        std::env::remove_var("COLLECTOR__S3__BUCKET");
        std::env::remove_var("COLLECTOR__IMAGE__JPEG_QUALITY");

        // Environment wins over the file
        assert_eq!(config.s3.bucket, "apple-dataset-staging");
        assert_eq!(config.image.jpeg_quality, 90);
        // File wins over built-in defaults
        assert_eq!(config.s3.region, "ap-south-1");
        // Unset keys keep their defaults
        assert_eq!(config.s3.endpoint_url, None);
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.s3.key_prefix, "apples");
        assert_eq!(config.image.jpeg_quality, 75);
        assert_eq!(config.api.max_upload_bytes, 20 * 1024 * 1024);
        assert_eq!(config.service.backend, BackendKind::Cloud);
    }

    #[test]
    fn test_cloud_backend_requires_credentials() {
        let config = Config::default();
        match config.validate() {
            Err(ConfigError::MissingRequired(key)) => assert_eq!(key, "s3.bucket"),
            other => panic!("Expected MissingRequired, got {:?}", other),
        }

        let mut config = Config::default();
        config.s3.bucket = "apple-store".to_string();
        match config.validate() {
            Err(ConfigError::MissingRequired(key)) => assert_eq!(key, "database.url"),
            other => panic!("Expected MissingRequired, got {:?}", other),
        }

        config.database.url = "postgres://localhost/apples".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_memory_backend_needs_no_credentials() {
        assert!(memory_config().validate().is_ok());
    }

    #[test]
    fn test_invalid_jpeg_quality() {
        let mut config = memory_config();
        config.image.jpeg_quality = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_deserialize_backend_kind() {
        let kind: BackendKind = serde_json::from_str("\"memory\"").unwrap();
        assert_eq!(kind, BackendKind::Memory);
    }
}
