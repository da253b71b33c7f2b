/// Account and usage ledger database models
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Account record in the database
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    /// Stored lowercased; unique across all accounts
    pub email: String,
    pub password_hash: String,
    pub is_verified: bool,
    /// Outstanding one-time code; present if and only if `otp_expires_at` is
    pub otp_code: Option<String>,
    pub otp_expires_at: Option<DateTime<Utc>>,
    /// At most one non-null key per account, globally unique
    pub api_key: Option<String>,
    pub hit_count: i64,
    pub hit_limit: i64,
    pub last_reset: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn hits_remaining(&self) -> i64 {
        (self.hit_limit - self.hit_count).max(0)
    }
}

/// One day bucket of the usage ledger
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UsageDay {
    /// Calendar date, YYYY-MM-DD
    pub date: String,
    pub total_hits: i64,
    pub last_updated: DateTime<Utc>,
}

/// Per-endpoint count within a day bucket
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UsageEndpoint {
    pub date: String,
    pub endpoint: String,
    pub hits: i64,
}
