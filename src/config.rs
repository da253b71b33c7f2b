/// Configuration management for the Toolshub gateway
use crate::error::{GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub quota: QuotaConfig,
    pub email: Option<EmailConfig>,
    pub upstream: Option<UpstreamConfig>,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub gateway_db: PathBuf,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// Bearer token lifetime in days
    pub token_ttl_days: i64,
}

/// Quota configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Default per-account allowance for newly created accounts
    pub default_hit_limit: i64,
    /// OTP validity window in minutes
    pub otp_ttl_minutes: i64,
}

/// Email configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_url: String,
    pub from_address: String,
}

/// Upstream call executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub url: String,
    pub api_key: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> GatewayResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("GATEWAY_HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let port = env::var("GATEWAY_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| GatewayError::Validation("Invalid port number".to_string()))?;
        let version = env::var("GATEWAY_VERSION").unwrap_or_else(|_| "0.1.0".to_string());

        let data_directory: PathBuf = env::var("GATEWAY_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let gateway_db = env::var("GATEWAY_DB_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("gateway.sqlite"));

        let jwt_secret = env::var("GATEWAY_JWT_SECRET")
            .map_err(|_| GatewayError::Validation("JWT secret required".to_string()))?;
        let token_ttl_days = env::var("GATEWAY_TOKEN_TTL_DAYS")
            .unwrap_or_else(|_| "7".to_string())
            .parse()
            .unwrap_or(7);

        let default_hit_limit = env::var("GATEWAY_DEFAULT_HIT_LIMIT")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .unwrap_or(1000);
        let otp_ttl_minutes = env::var("GATEWAY_OTP_TTL_MINUTES")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);

        let email = if let Ok(smtp_url) = env::var("GATEWAY_EMAIL_SMTP_URL") {
            Some(EmailConfig {
                smtp_url,
                from_address: env::var("GATEWAY_EMAIL_FROM_ADDRESS")
                    .unwrap_or_else(|_| format!("noreply@{}", hostname)),
            })
        } else {
            None
        };

        let upstream = if let Ok(url) = env::var("GATEWAY_UPSTREAM_URL") {
            Some(UpstreamConfig {
                url,
                api_key: env::var("GATEWAY_UPSTREAM_API_KEY").ok(),
            })
        } else {
            None
        };

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
            },
            storage: StorageConfig {
                data_directory,
                gateway_db,
            },
            authentication: AuthConfig {
                jwt_secret,
                token_ttl_days,
            },
            quota: QuotaConfig {
                default_hit_limit,
                otp_ttl_minutes,
            },
            email,
            upstream,
            logging: LoggingConfig { level: log_level },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> GatewayResult<()> {
        if self.service.hostname.is_empty() {
            return Err(GatewayError::Validation(
                "Hostname cannot be empty".to_string(),
            ));
        }

        if self.authentication.jwt_secret.len() < 32 {
            return Err(GatewayError::Validation(
                "JWT secret must be at least 32 characters".to_string(),
            ));
        }

        if self.quota.default_hit_limit <= 0 {
            return Err(GatewayError::Validation(
                "Default hit limit must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> ServerConfig {
    ServerConfig {
        service: ServiceConfig {
            hostname: "localhost".to_string(),
            port: 3000,
            version: "0.1.0".to_string(),
        },
        storage: StorageConfig {
            data_directory: PathBuf::from("./data"),
            gateway_db: PathBuf::from(":memory:"),
        },
        authentication: AuthConfig {
            jwt_secret: "test-secret-key-for-testing-only-0123456789".to_string(),
            token_ttl_days: 7,
        },
        quota: QuotaConfig {
            default_hit_limit: 1000,
            otp_ttl_minutes: 10,
        },
        email: None,
        upstream: None,
        logging: LoggingConfig {
            level: "info".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_short_jwt_secret() {
        let mut config = test_config();
        config.authentication.jwt_secret = "short".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_non_positive_hit_limit() {
        let mut config = test_config();
        config.quota.default_hit_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_test_config() {
        assert!(test_config().validate().is_ok());
    }
}
