//! YAML configuration.
//!
//! Everything the process reads at startup lives here; components get
//! their own resolved config values injected and there is no mutable
//! global. `jwt.secret` is the one key without a default: the process
//! refuses to start without it.

use std::time::Duration;

use moon_common::{MoonError, Result};
use moon_db::{DbConfig, Dialect, RecoveryConfig};
use moon_schema::Limits;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub jwt: JwtConfig,
    pub apikey: ApiKeyConfig,
    pub auth: AuthConfig,
    pub recovery: RecoverySection,
    pub cors: CorsConfig,
    pub pagination: PaginationConfig,
    pub limits: LimitsConfig,
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    /// URL prefix all routes are nested under, e.g. `/api`.
    pub prefix: String,
    /// Seconds to wait for in-flight requests on shutdown.
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8030,
            host: "127.0.0.1".to_string(),
            prefix: String::new(),
            shutdown_timeout: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `sqlite`, `postgres` or `mysql`.
    pub connection: String,
    /// File path for sqlite, database name otherwise.
    pub database: String,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: Option<u16>,
    pub max_connections: u32,
    /// Per-statement timeout in seconds.
    pub query_timeout: u64,
    /// Slow-query WARN threshold in milliseconds.
    pub slow_query_threshold: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            connection: "sqlite".to_string(),
            database: "moon.db".to_string(),
            user: String::new(),
            password: String::new(),
            host: "localhost".to_string(),
            port: None,
            max_connections: 10,
            query_timeout: 30,
            slow_query_threshold: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log file path; stderr when unset.
    pub path: Option<String>,
    pub redact_sensitive: bool,
    pub additional_sensitive_fields: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            path: None,
            redact_sensitive: true,
            additional_sensitive_fields: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JwtConfig {
    /// HS256 signing secret. Required; empty means "not configured".
    pub secret: String,
    /// Access token lifetime in seconds.
    pub access_expiry: u64,
    /// Refresh token lifetime in seconds.
    pub refresh_expiry: u64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            access_expiry: 3600,
            refresh_expiry: 7 * 24 * 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiKeyConfig {
    pub enabled: bool,
}

impl Default for ApiKeyConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    pub bootstrap_admin: Option<BootstrapAdmin>,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BootstrapAdmin {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests per minute for user tokens.
    pub user_rpm: u32,
    /// Requests per minute for API keys.
    pub apikey_rpm: u32,
    /// Failed logins allowed per (ip, username) window.
    pub login_attempts: u32,
    /// Login window in seconds.
    pub login_window: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            user_rpm: 100,
            apikey_rpm: 1000,
            login_attempts: 5,
            login_window: 15 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RecoverySection {
    pub auto_repair: bool,
    pub drop_orphans: bool,
    /// Seconds the startup consistency check may take.
    pub check_timeout: u64,
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            auto_repair: true,
            drop_orphans: false,
            check_timeout: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    pub enabled: bool,
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub allow_credentials: bool,
    pub max_age: u32,
    pub endpoints: Vec<CorsEndpointConfig>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_origins: vec!["*".to_string()],
            allowed_methods: vec![
                "GET".to_string(),
                "POST".to_string(),
                "OPTIONS".to_string(),
            ],
            allowed_headers: vec![
                "Authorization".to_string(),
                "Content-Type".to_string(),
                "Idempotency-Key".to_string(),
            ],
            allow_credentials: false,
            max_age: 86400,
            endpoints: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorsEndpointConfig {
    pub path: String,
    /// `exact`, `prefix`, `suffix` or `contains`.
    #[serde(default = "default_pattern_type")]
    pub pattern_type: String,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default)]
    pub allowed_methods: Vec<String>,
    #[serde(default)]
    pub allowed_headers: Vec<String>,
    #[serde(default)]
    pub allow_credentials: bool,
    #[serde(default)]
    pub bypass_auth: bool,
}

fn default_pattern_type() -> String {
    "exact".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PaginationConfig {
    pub default_page_size: i64,
    pub max_page_size: i64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self { default_page_size: 50, max_page_size: 1000 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_collections: usize,
    pub max_columns_per_collection: usize,
    pub max_filters_per_request: usize,
    pub max_sort_fields_per_request: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_collections: 1000,
            max_columns_per_collection: 100,
            max_filters_per_request: 20,
            max_sort_fields_per_request: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchConfig {
    pub max_size: usize,
    pub max_payload_bytes: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: 50,
            max_payload_bytes: 2 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Parses a YAML document and validates it.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(text)
            .map_err(|e| MoonError::Validation(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Startup validation of cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.jwt.secret.is_empty() {
            return Err(MoonError::Validation(
                "jwt.secret is required and must not be empty".into(),
            ));
        }
        Dialect::parse(&self.database.connection)?;

        let check_origins = |origins: &[String], context: &str| -> Result<()> {
            if origins.iter().any(|o| o == "*") && origins.len() > 1 {
                return Err(MoonError::Validation(format!(
                    "{}: wildcard origin cannot be mixed with specific origins",
                    context
                )));
            }
            Ok(())
        };
        check_origins(&self.cors.allowed_origins, "cors.allowed_origins")?;
        for endpoint in &self.cors.endpoints {
            check_origins(
                &endpoint.allowed_origins,
                &format!("cors.endpoints[{}]", endpoint.path),
            )?;
            match endpoint.pattern_type.as_str() {
                "exact" | "prefix" | "suffix" | "contains" => {}
                other => {
                    return Err(MoonError::Validation(format!(
                        "cors.endpoints[{}]: unknown pattern_type '{}'",
                        endpoint.path, other
                    )))
                }
            }
        }

        if self.pagination.max_page_size < 1 || self.pagination.default_page_size < 1 {
            return Err(MoonError::Validation(
                "pagination sizes must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Resolved database configuration.
    pub fn db_config(&self) -> Result<DbConfig> {
        Ok(DbConfig {
            dialect: Dialect::parse(&self.database.connection)?,
            database: self.database.database.clone(),
            host: self.database.host.clone(),
            port: self.database.port,
            user: self.database.user.clone(),
            password: self.database.password.clone(),
            max_connections: self.database.max_connections,
            query_timeout: Duration::from_secs(self.database.query_timeout),
            slow_query_threshold: Duration::from_millis(self.database.slow_query_threshold),
            retry: Default::default(),
        })
    }

    /// Resolved request and schema limits.
    pub fn request_limits(&self) -> Limits {
        Limits {
            max_filters: self.limits.max_filters_per_request,
            max_sort_fields: self.limits.max_sort_fields_per_request,
            max_fields_per_collection: self.limits.max_columns_per_collection,
            max_collections: self.limits.max_collections,
            max_batch_size: self.batch.max_size,
            max_payload_bytes: self.batch.max_payload_bytes,
            default_page_size: self.pagination.default_page_size,
            max_page_size: self.pagination.max_page_size,
        }
    }

    /// Resolved recovery configuration.
    pub fn recovery_config(&self) -> RecoveryConfig {
        RecoveryConfig {
            auto_repair: self.recovery.auto_repair,
            drop_orphans: self.recovery.drop_orphans,
            check_timeout: Duration::from_secs(self.recovery.check_timeout),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Normalized prefix: empty, or `/something` without trailing slash.
    pub fn normalized_prefix(&self) -> String {
        let prefix = self.server.prefix.trim_matches('/');
        if prefix.is_empty() {
            String::new()
        } else {
            format!("/{}", prefix)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "jwt:\n  secret: test-secret\n";

    #[test]
    fn test_minimal_config_with_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.server.port, 8030);
        assert_eq!(config.database.connection, "sqlite");
        assert_eq!(config.jwt.access_expiry, 3600);
        assert_eq!(config.jwt.refresh_expiry, 604800);
        assert_eq!(config.auth.rate_limit.user_rpm, 100);
        assert_eq!(config.auth.rate_limit.apikey_rpm, 1000);
        assert_eq!(config.auth.rate_limit.login_attempts, 5);
        assert_eq!(config.batch.max_size, 50);
        assert_eq!(config.batch.max_payload_bytes, 2 * 1024 * 1024);
        assert!(config.logging.redact_sensitive);
        assert!(config.recovery.auto_repair);
        assert!(!config.recovery.drop_orphans);
    }

    #[test]
    fn test_missing_jwt_secret_refuses() {
        assert!(Config::from_yaml("server:\n  port: 9000\n").is_err());
        assert!(Config::from_yaml("jwt:\n  secret: \"\"\n").is_err());
    }

    #[test]
    fn test_full_config_round_trip() {
        let yaml = r#"
server:
  port: 9000
  host: 0.0.0.0
  prefix: /api
database:
  connection: postgres
  database: moon
  user: moon
  password: hunter2
  host: db.internal
  query_timeout: 10
  slow_query_threshold: 250
logging:
  path: /var/log/moon.log
  additional_sensitive_fields: [ssn]
jwt:
  secret: super-secret
  access_expiry: 600
auth:
  bootstrap_admin:
    username: root
    email: root@example.com
    password: bootstrap-pass
  rate_limit:
    user_rpm: 10
cors:
  enabled: true
  allowed_origins: ["https://app.example.com"]
  endpoints:
    - path: /health
      pattern_type: exact
      bypass_auth: true
limits:
  max_collections: 10
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.normalized_prefix(), "/api");
        assert_eq!(config.database.connection, "postgres");
        assert_eq!(config.jwt.access_expiry, 600);
        assert_eq!(config.auth.rate_limit.user_rpm, 10);
        // Unset keys keep their defaults.
        assert_eq!(config.auth.rate_limit.apikey_rpm, 1000);
        assert_eq!(config.cors.endpoints.len(), 1);
        assert!(config.cors.endpoints[0].bypass_auth);
        assert_eq!(config.limits.max_collections, 10);
        assert_eq!(config.request_limits().max_collections, 10);

        let db = config.db_config().unwrap();
        assert_eq!(db.query_timeout, Duration::from_secs(10));
        assert_eq!(db.slow_query_threshold, Duration::from_millis(250));
    }

    #[test]
    fn test_unknown_dialect_rejected() {
        let yaml = "jwt:\n  secret: s\ndatabase:\n  connection: oracle\n";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_wildcard_origin_mix_rejected() {
        let yaml = "jwt:\n  secret: s\ncors:\n  allowed_origins: [\"*\", \"https://x\"]\n";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_bad_pattern_type_rejected() {
        let yaml = "jwt:\n  secret: s\ncors:\n  endpoints:\n    - path: /x\n      pattern_type: regex\n";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_prefix_normalization() {
        for (raw, expected) in [("", ""), ("/", ""), ("api", "/api"), ("/api/", "/api")] {
            let mut config = Config::default();
            config.server.prefix = raw.to_string();
            assert_eq!(config.normalized_prefix(), expected, "prefix {:?}", raw);
        }
    }
}
