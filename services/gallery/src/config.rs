use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the gallery service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// S3 configuration
    pub s3: S3Config,
    /// Image classifier configuration
    pub classifier: ClassifierConfig,
    /// Identity provider configuration
    pub identity: IdentityConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
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
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection URL
    #[serde(default = "default_database_url")]
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

/// S3 storage configuration for uploaded images
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket name for image storage
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Prefix prepended to every storage key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Presigned URL expiration in seconds
    #[serde(default = "default_presigned_url_expiry_secs")]
    pub presigned_url_expiry_secs: u64,
    /// Multipart upload threshold in bytes (5MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (5MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

/// Remote image classification service
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    /// Base URL of the inference API
    #[serde(default = "default_classifier_endpoint")]
    pub endpoint: String,
    /// Model identifier sent with every request
    #[serde(default = "default_classifier_model")]
    pub model: String,
    /// Bearer token for the inference API
    pub api_token: String,
    /// Request timeout in seconds; unset leaves the transport default
    pub request_timeout_secs: Option<u64>,
}

/// External identity provider (OAuth 2.0 / OpenID Connect)
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    /// Provider tenant domain, e.g. `realist.eu.auth0.com`
    pub domain: String,
    /// OAuth client identifier
    pub client_id: String,
    /// OAuth client secret (omit for public clients using PKCE only)
    pub client_secret: Option<String>,
    /// Where the provider redirects after login
    pub callback_url: String,
    /// Where the provider redirects after logout
    pub post_logout_return_url: String,
    /// Mark the session cookie `Secure`
    #[serde(default = "default_true")]
    pub secure_cookies: bool,
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
    /// Maximum accepted upload body size in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

// Default value functions
fn default_service_name() -> String {
    "gallery-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_database_url() -> String {
    "sqlite://data/photos.db".to_string()
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

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_key_prefix() -> String {
    "photos".to_string()
}

fn default_presigned_url_expiry_secs() -> u64 {
    3600
}

fn default_multipart_threshold() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_part_size() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_classifier_endpoint() -> String {
    "https://api-inference.huggingface.co".to_string()
}

fn default_classifier_model() -> String {
    "microsoft/resnet-50".to_string()
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
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "gallery-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/gallery").required(false))
            .add_source(config::File::with_name("/etc/realist/gallery").required(false))
            // Override with environment variables
            // GALLERY__IDENTITY__CLIENT_ID -> identity.client_id
            .add_source(
                config::Environment::with_prefix("GALLERY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Check required fields and value ranges
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.s3.bucket.is_empty() {
            return Err(ConfigValidationError::MissingField("s3.bucket".to_string()));
        }
        if self.s3.part_size_bytes < 5 * 1024 * 1024 {
            return Err(ConfigValidationError::InvalidValue {
                field: "s3.part_size_bytes".to_string(),
                message: "S3 multipart parts must be at least 5MB".to_string(),
            });
        }

        if self.classifier.api_token.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "classifier.api_token".to_string(),
            ));
        }
        if !self.classifier.endpoint.starts_with("http://")
            && !self.classifier.endpoint.starts_with("https://")
        {
            return Err(ConfigValidationError::InvalidValue {
                field: "classifier.endpoint".to_string(),
                message: "Endpoint must be an http(s) URL".to_string(),
            });
        }

        if self.identity.domain.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "identity.domain".to_string(),
            ));
        }
        if self.identity.client_id.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "identity.client_id".to_string(),
            ));
        }
        if self.identity.callback_url.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "identity.callback_url".to_string(),
            ));
        }

        if self.api.max_upload_bytes == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "api.max_upload_bytes".to_string(),
                message: "Upload limit must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// Get classifier request timeout, if one is configured
    pub fn classifier_timeout(&self) -> Option<Duration> {
        self.classifier.request_timeout_secs.map(Duration::from_secs)
    }
}

impl S3Config {
    /// Get presigned URL expiry as Duration
    pub fn presigned_url_expiry(&self) -> Duration {
        Duration::from_secs(self.presigned_url_expiry_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            run_migrations: true,
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

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
