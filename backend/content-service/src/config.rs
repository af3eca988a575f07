/// Configuration management for the content core
///
/// Loaded from environment variables (a `.env` file is read by the binary
/// before this runs). Development gets working defaults; production refuses
/// to start without real identity credentials.
use crate::media::DEFAULT_MEDIA_BUCKET;
use s3_utils::S3Config;
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application settings
    pub app: AppConfig,
    /// Relational store
    pub database: DatabaseConfig,
    /// Media storage
    pub storage: StorageConfig,
    /// Identity provider
    pub identity: IdentityConfig,
    /// Comment posting policy
    pub comments: CommentsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application environment (development, staging, production)
    pub env: String,
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.env.eq_ignore_ascii_case("production")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Bucket recipe media is uploaded to
    pub bucket: String,
    pub s3: S3Config,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Base URL of the GoTrue-compatible auth server (without `/auth/v1`)
    pub url: String,
    /// Public API key sent with every request
    pub anon_key: String,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommentsConfig {
    /// Refuse comments whose content is blank
    pub reject_blank: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, String> {
        let app = AppConfig {
            env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        };

        let identity = {
            let url = match std::env::var("IDENTITY_URL") {
                Ok(value) => value,
                Err(_) if app.is_production() => {
                    return Err("IDENTITY_URL must be set in production".to_string())
                }
                Err(_) => "http://localhost:9999".to_string(),
            };
            let anon_key = std::env::var("IDENTITY_ANON_KEY").unwrap_or_default();
            if app.is_production() && anon_key.trim().is_empty() {
                return Err("IDENTITY_ANON_KEY must be set in production".to_string());
            }

            IdentityConfig {
                url,
                anon_key,
                request_timeout_ms: parse_env_or_default("IDENTITY_REQUEST_TIMEOUT_MS", 10_000)?,
            }
        };

        Ok(Config {
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "postgresql://localhost/sizzle".to_string()),
                max_connections: parse_env_or_default("DATABASE_MAX_CONNECTIONS", 10)?,
                acquire_timeout_secs: parse_env_or_default("DATABASE_ACQUIRE_TIMEOUT_SECS", 5)?,
            },
            storage: StorageConfig {
                bucket: std::env::var("MEDIA_BUCKET")
                    .unwrap_or_else(|_| DEFAULT_MEDIA_BUCKET.to_string()),
                s3: S3Config::from_env(),
            },
            identity,
            comments: CommentsConfig {
                reject_blank: parse_env_or_default("COMMENTS_REJECT_BLANK", false)?,
            },
            app,
        })
    }
}

fn parse_env_or_default<T>(key: &str, default: T) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .trim()
            .parse()
            .map_err(|e| format!("Failed to parse {}='{}': {}", key, val, e)),
        Err(_) => Ok(default),
    }
}
