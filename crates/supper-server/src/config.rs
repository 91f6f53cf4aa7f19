//! The configuration document. TOML or JSON by file extension; every field
//! has a default, so an empty document is a working development setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use supper_api::{ApiConfig, AuthConfig, UploadManager};
use supper_api::session::PLACEHOLDER_JWT_SECRET;
use supper_db::DbConfig;
use supper_events::BrokerConfig;
use supper_workers::{ConsumerConfig, WorkerConfig};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("parsing {path}: {detail}")]
    Parse { path: PathBuf, detail: String },
    #[error("unsupported config format {0:?}; use .toml or .json")]
    Format(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub routing: RoutingConfig,
    pub meta: MetaConfig,
    pub encoding: EncodingConfig,
    pub events: EventsConfig,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub observability: ObservabilityConfig,
    pub uploads: UploadsConfig,
    pub services: ServicesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub prefix: String,
    pub cors_origins: Vec<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self { prefix: supper_api::DEFAULT_PREFIX.into(), cors_origins: Vec::new() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetaConfig {
    /// Allows the placeholder JWT secret.
    pub debug: bool,
    pub run_mode: String,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self { debug: false, run_mode: "development".into() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    pub content_type: String,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self { content_type: "application/json".into() }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub publish_timeout_secs: u64,
    pub queue_capacity: usize,
    pub scan_interval_secs: u64,
    pub worker_concurrency: usize,
    pub webhook_signing_secret: Option<String>,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            publish_timeout_secs: 5,
            queue_capacity: supper_events::broker::DEFAULT_QUEUE_CAPACITY,
            scan_interval_secs: supper_workers::DEFAULT_SCAN_INTERVAL.as_secs(),
            worker_concurrency: 16,
            webhook_signing_secret: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub body_limit: usize,
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            request_timeout_secs: 30,
            body_limit: supper_api::DEFAULT_BODY_LIMIT,
            shutdown_grace_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub reader_pool_size: usize,
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "supper.db".into(),
            reader_pool_size: supper_db::DEFAULT_READER_POOL_SIZE,
            run_migrations: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Filter directives; `RUST_LOG` wins when set.
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { log_level: "supper=info,tower_http=info".into(), log_format: LogFormat::Text }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadsConfig {
    pub provider: String,
    pub bucket: String,
    pub base_dir: PathBuf,
    pub max_size: usize,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            provider: "filesystem".into(),
            bucket: supper_api::uploads::DEFAULT_BUCKET.into(),
            base_dir: "./uploads".into(),
            max_size: supper_api::uploads::DEFAULT_MAX_UPLOAD_SIZE,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub auth: AuthSection,
    pub workers: WorkersSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub jwt_secret: String,
    pub token_lifetime_secs: u64,
    pub cookie_name: String,
    pub session_lifetime_secs: u64,
    pub secure_cookies: bool,
    pub enable_signup: bool,
    pub minimum_username_length: usize,
    pub minimum_password_length: usize,
}

impl Default for AuthSection {
    fn default() -> Self {
        let auth = AuthConfig::default();
        Self {
            jwt_secret: auth.jwt_secret,
            token_lifetime_secs: auth.token_lifetime.as_secs(),
            cookie_name: auth.cookie_name,
            session_lifetime_secs: auth.session_lifetime.as_secs(),
            secure_cookies: auth.secure_cookies,
            enable_signup: auth.enable_signup,
            minimum_username_length: auth.minimum_username_length,
            minimum_password_length: auth.minimum_password_length,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkersSection {
    pub enabled: bool,
}

impl Default for WorkersSection {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.into(), source })?;
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        Self::parse(&text, extension).map_err(|e| match e {
            ConfigError::Parse { detail, .. } => ConfigError::Parse { path: path.into(), detail },
            other => other,
        })
    }

    pub fn parse(text: &str, extension: &str) -> Result<Self, ConfigError> {
        let parse_error = |detail: String| ConfigError::Parse { path: PathBuf::new(), detail };
        match extension.to_ascii_lowercase().as_str() {
            "toml" => toml::from_str(text).map_err(|e| parse_error(e.to_string())),
            "json" => serde_json::from_str(text).map_err(|e| parse_error(e.to_string())),
            other => Err(ConfigError::Format(other.to_string())),
        }
    }

    /// Secrets and paths that may come from the environment instead of the
    /// document.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("SUPPER_DATABASE_PATH") {
            self.database.path = path.into();
        }
        if let Some(secret) = lookup("SUPPER_JWT_SECRET") {
            self.services.auth.jwt_secret = secret;
        }
        if let Some(secret) = lookup("SUPPER_WEBHOOK_SIGNING_SECRET") {
            self.events.webhook_signing_secret = Some(secret);
        }
        if let Some(dir) = lookup("SUPPER_UPLOADS_DIR") {
            self.uploads.base_dir = dir.into();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let secret = &self.services.auth.jwt_secret;
        if !self.meta.debug && (secret.is_empty() || secret == PLACEHOLDER_JWT_SECRET) {
            return Err(ConfigError::Invalid(
                "services.auth.jwt_secret is unset or still the placeholder; set SUPPER_JWT_SECRET".into(),
            ));
        }
        if self.encoding.content_type != "application/json" {
            return Err(ConfigError::Invalid(format!(
                "encoding.content_type {:?} is not supported",
                self.encoding.content_type
            )));
        }
        if self.uploads.provider != "filesystem" {
            return Err(ConfigError::Invalid(format!("uploads.provider {:?} is not supported", self.uploads.provider)));
        }
        if !self.routing.prefix.starts_with('/') {
            return Err(ConfigError::Invalid("routing.prefix must start with '/'".into()));
        }
        Ok(())
    }

    pub fn api(&self) -> ApiConfig {
        let auth = &self.services.auth;
        ApiConfig {
            prefix: self.routing.prefix.trim_end_matches('/').to_string(),
            cors_origins: self.routing.cors_origins.clone(),
            request_timeout: Duration::from_secs(self.server.request_timeout_secs),
            body_limit: self.server.body_limit,
            auth: AuthConfig {
                jwt_secret: auth.jwt_secret.clone(),
                token_lifetime: Duration::from_secs(auth.token_lifetime_secs),
                cookie_name: auth.cookie_name.clone(),
                session_lifetime: Duration::from_secs(auth.session_lifetime_secs),
                secure_cookies: auth.secure_cookies,
                enable_signup: auth.enable_signup,
                minimum_username_length: auth.minimum_username_length,
                minimum_password_length: auth.minimum_password_length,
            },
        }
    }

    pub fn database(&self) -> DbConfig {
        DbConfig {
            reader_pool_size: self.database.reader_pool_size,
            run_migrations: self.database.run_migrations,
        }
    }

    pub fn broker(&self) -> BrokerConfig {
        BrokerConfig { publish_timeout: Duration::from_secs(self.events.publish_timeout_secs) }
    }

    pub fn workers(&self) -> WorkerConfig {
        WorkerConfig {
            consumer: ConsumerConfig { concurrency: self.events.worker_concurrency, ..Default::default() },
            queue_capacity: self.events.queue_capacity,
            scan_interval: Duration::from_secs(self.events.scan_interval_secs.max(1)),
            webhook_signing_secret: self.events.webhook_signing_secret.clone(),
            ..Default::default()
        }
    }

    pub fn uploads(&self) -> UploadManager {
        UploadManager::new(&self.uploads.base_dir, &self.uploads.bucket, self.uploads.max_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_documents_use_defaults() {
        let config = Config::parse("", "toml").unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.routing.prefix, "/api/v1");
        assert_eq!(config.api().request_timeout, Duration::from_secs(30));
        assert!(config.services.workers.enabled);

        let json = Config::parse("{}", "json").unwrap();
        assert_eq!(json.database.path, PathBuf::from("supper.db"));
    }

    #[test]
    fn sections_override_defaults() {
        let config = Config::parse(
            r#"
            [server]
            port = 9000

            [events]
            scan_interval_secs = 5
            worker_concurrency = 2

            [observability]
            log_format = "json"

            [services.auth]
            jwt_secret = "a-real-secret"
            enable_signup = false
            "#,
            "toml",
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert_eq!(config.workers().scan_interval, Duration::from_secs(5));
        assert_eq!(config.workers().consumer.concurrency, 2);
        assert!(!config.api().auth.enable_signup);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn placeholder_secret_needs_debug_mode() {
        let mut config = Config::default();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        config.meta.debug = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn environment_supplies_secrets() {
        let mut config = Config::default();
        config.apply_env(|key| match key {
            "SUPPER_JWT_SECRET" => Some("from-env".into()),
            "SUPPER_DATABASE_PATH" => Some("/var/lib/supper.db".into()),
            _ => None,
        });
        assert_eq!(config.services.auth.jwt_secret, "from-env");
        assert_eq!(config.database.path, PathBuf::from("/var/lib/supper.db"));
        assert!(config.events.webhook_signing_secret.is_none());
    }

    #[test]
    fn unknown_formats_are_rejected() {
        assert!(matches!(Config::parse("a: 1", "yaml"), Err(ConfigError::Format(_))));
        assert!(matches!(Config::parse("[server", "toml"), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("supper.json");
        std::fs::write(&path, r#"{"server": {"host": "127.0.0.1"}}"#).unwrap();
        assert_eq!(Config::load(&path).unwrap().server.host, "127.0.0.1");
    }
}
