/// Account management system
///
/// Handles account registration, OTP verification, login, API key issuance
/// and per-account quota counters.

mod manager;

pub use manager::AccountManager;

use crate::db::account::Account;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Registration request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 50, message = "Name must be 1-50 characters"))]
    pub name: String,
    #[validate(email(message = "Please enter a valid email"))]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
}

/// OTP verification request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct VerifyOtpRequest {
    #[validate(email(message = "Please enter a valid email"))]
    pub email: String,
    #[validate(length(equal = 6, message = "OTP must be 6 digits"))]
    pub otp: String,
}

/// OTP resend request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ResendOtpRequest {
    #[validate(email(message = "Please enter a valid email"))]
    pub email: String,
}

/// Login request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Please enter a valid email"))]
    pub email: String,
    pub password: String,
}

/// Registration response (no token yet - account is unverified)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub email: String,
    pub is_verified: bool,
}

/// Public account snapshot returned by auth and dashboard endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub id: String,
    pub name: String,
    pub email: String,
    pub is_verified: bool,
    pub api_key: Option<String>,
    pub hit_count: i64,
    pub hit_limit: i64,
    pub hits_remaining: i64,
    pub created_at: DateTime<Utc>,
}

impl From<&Account> for AccountSummary {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id.clone(),
            name: account.name.clone(),
            email: account.email.clone(),
            is_verified: account.is_verified,
            api_key: account.api_key.clone(),
            hit_count: account.hit_count,
            hit_limit: account.hit_limit,
            hits_remaining: account.hits_remaining(),
            created_at: account.created_at,
        }
    }
}

/// Successful verification or login response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub token: String,
    pub user: AccountSummary,
}
