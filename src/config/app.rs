//! Process configuration read from the environment.

use crate::error::ConfigError;
use serde::Serialize;
use std::str::FromStr;

const DEV_JWT_SECRET: &str = "dev-secret-change-me";

/// Deployment environment. Verification codes are echoed back to the caller outside production.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(ConfigError::InvalidValue {
                key: "APP_ENV",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    S3 { bucket: String, endpoint: Option<String> },
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub environment: Environment,
    pub bind_addr: String,
    /// Postgres URL. `None` selects the in-memory data client.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub jwt_secret: String,
    pub jwt_ttl_secs: i64,
    pub bcrypt_cost: u32,
    pub code_ttl_secs: i64,
    /// Minimum spacing between two sends for the same (purpose, mobile). 0 disables the check.
    pub code_resend_interval_secs: i64,
    pub sms_signature: String,
    pub storage: StorageBackend,
    pub upload_base_path: String,
    pub upload_public_domain: String,
    pub upload_max_file_bytes: usize,
    pub max_request_bytes: usize,
    /// Mobiles promoted to `admin` when they log in or register.
    pub admin_mobiles: Vec<String>,
    /// Site created at startup when the sites table is empty.
    pub default_site_name: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            environment: Environment::Development,
            bind_addr: "0.0.0.0:3000".into(),
            database_url: None,
            database_max_connections: 5,
            jwt_secret: DEV_JWT_SECRET.into(),
            jwt_ttl_secs: 7 * 24 * 60 * 60,
            bcrypt_cost: 10,
            code_ttl_secs: 5 * 60,
            code_resend_interval_secs: 60,
            sms_signature: "【Zeelink】".into(),
            storage: StorageBackend::Memory,
            upload_base_path: "uploads".into(),
            upload_public_domain: "http://localhost:3000/files".into(),
            upload_max_file_bytes: 10 * 1024 * 1024,
            max_request_bytes: 64 * 1024 * 1024,
            admin_mobiles: Vec::new(),
            default_site_name: None,
        }
    }
}

impl AppConfig {
    /// Read configuration from the process environment. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup (the environment in production, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut cfg = AppConfig::default();

        if let Some(v) = get("APP_ENV") {
            cfg.environment = v.parse()?;
        }
        if let Some(v) = get("BIND_ADDR") {
            cfg.bind_addr = v;
        }
        cfg.database_url = get("DATABASE_URL");
        if let Some(v) = get("DATABASE_MAX_CONNECTIONS") {
            cfg.database_max_connections = parse_num("DATABASE_MAX_CONNECTIONS", &v)?;
        }
        if let Some(v) = get("JWT_SECRET") {
            cfg.jwt_secret = v;
        }
        if let Some(v) = get("JWT_TTL_SECS") {
            cfg.jwt_ttl_secs = parse_num("JWT_TTL_SECS", &v)?;
        }
        if let Some(v) = get("BCRYPT_COST") {
            cfg.bcrypt_cost = parse_num("BCRYPT_COST", &v)?;
        }
        if let Some(v) = get("CODE_TTL_SECS") {
            cfg.code_ttl_secs = parse_num("CODE_TTL_SECS", &v)?;
        }
        if let Some(v) = get("CODE_RESEND_INTERVAL_SECS") {
            cfg.code_resend_interval_secs = parse_num("CODE_RESEND_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("SMS_SIGNATURE") {
            cfg.sms_signature = v;
        }
        match get("STORAGE_BACKEND").as_deref().map(str::to_lowercase).as_deref() {
            None | Some("memory") => {}
            Some("s3") => {
                let bucket = get("S3_BUCKET").ok_or(ConfigError::InvalidValue {
                    key: "S3_BUCKET",
                    value: String::new(),
                })?;
                cfg.storage = StorageBackend::S3 {
                    bucket,
                    endpoint: get("S3_ENDPOINT"),
                };
            }
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "STORAGE_BACKEND",
                    value: other.to_string(),
                })
            }
        }
        if let Some(v) = get("UPLOAD_BASE_PATH") {
            cfg.upload_base_path = v.trim_matches('/').to_string();
        }
        if let Some(v) = get("UPLOAD_PUBLIC_DOMAIN") {
            cfg.upload_public_domain = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("UPLOAD_MAX_FILE_BYTES") {
            cfg.upload_max_file_bytes = parse_num("UPLOAD_MAX_FILE_BYTES", &v)?;
        }
        if let Some(v) = get("MAX_REQUEST_BYTES") {
            cfg.max_request_bytes = parse_num("MAX_REQUEST_BYTES", &v)?;
        }
        if let Some(v) = get("ADMIN_MOBILES") {
            cfg.admin_mobiles = v
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect();
        }
        cfg.default_site_name = get("DEFAULT_SITE_NAME");

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.environment.is_production() && self.jwt_secret == DEV_JWT_SECRET {
            return Err(ConfigError::Validation("JWT_SECRET must be set in production".into()));
        }
        if !(4..=31).contains(&self.bcrypt_cost) {
            return Err(ConfigError::InvalidValue {
                key: "BCRYPT_COST",
                value: self.bcrypt_cost.to_string(),
            });
        }
        if self.code_ttl_secs <= 0 || self.jwt_ttl_secs <= 0 {
            return Err(ConfigError::Validation("ttl values must be positive".into()));
        }
        if self.max_request_bytes < self.upload_max_file_bytes {
            return Err(ConfigError::Validation(
                "MAX_REQUEST_BYTES must not be smaller than UPLOAD_MAX_FILE_BYTES".into(),
            ));
        }
        Ok(())
    }

    pub fn is_admin_mobile(&self, mobile: &str) -> bool {
        self.admin_mobiles.iter().any(|m| m == mobile)
    }

    /// Config suited to in-process tests: cheap hashing, no resend spacing.
    pub fn for_tests() -> Self {
        AppConfig {
            environment: Environment::Test,
            bcrypt_cost: 4,
            code_resend_interval_secs: 0,
            ..AppConfig::default()
        }
    }
}

fn parse_num<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}
