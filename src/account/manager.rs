/// Account manager implementation using runtime queries
///
/// Owns every mutation of the account table: registration, the OTP
/// verification state machine, login, API key issuance and the atomic
/// quota compare-and-increment the quota guard relies on.

use crate::{
    clock::Clock,
    config::ServerConfig,
    db::account::Account,
    error::{GatewayError, GatewayResult},
    mailer::Notifier,
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, SaltString},
    Argon2, PasswordHasher, PasswordVerifier,
};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

/// Prefix tagging every issued API key
const API_KEY_PREFIX: &str = "key_toolshub_";

/// Account manager service
pub struct AccountManager {
    db: SqlitePool,
    config: Arc<ServerConfig>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
}

impl AccountManager {
    /// Create a new account manager
    pub fn new(
        db: SqlitePool,
        config: Arc<ServerConfig>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            db,
            config,
            clock,
            notifier,
        }
    }

    /// Register a new account, or refresh an existing unverified one
    ///
    /// A verified account with the same email is a conflict. An unverified
    /// one gets its name, password and OTP overwritten in place so the
    /// operation can be retried. A brand-new account whose code cannot be
    /// delivered is rolled back rather than left orphaned.
    pub async fn register(&self, name: &str, email: &str, password: &str) -> GatewayResult<Account> {
        self.validate_name(name)?;
        self.validate_email(email)?;
        self.validate_password(password)?;

        let email = normalize_email(email);
        let now = self.clock.now();
        let (otp, otp_expires_at) = self.generate_otp(now);
        let password_hash = hash_password(password)?;

        if let Some(existing) = self.get_account_by_email(&email).await? {
            if existing.is_verified {
                return Err(GatewayError::Conflict(
                    "Account already exists and is verified".to_string(),
                ));
            }

            // Unverified re-registration: overwrite in place and resend
            sqlx::query(
                "UPDATE account SET name = ?1, password_hash = ?2, otp_code = ?3,
                        otp_expires_at = ?4, updated_at = ?5
                 WHERE id = ?6",
            )
            .bind(name)
            .bind(&password_hash)
            .bind(&otp)
            .bind(otp_expires_at)
            .bind(now)
            .bind(&existing.id)
            .execute(&self.db)
            .await
            .map_err(GatewayError::Database)?;

            self.notifier
                .send_verification_code(&email, name, &otp)
                .await?;

            tracing::info!("Refreshed unverified registration for {}", email);
            return self
                .get_account_by_email(&email)
                .await?
                .ok_or_else(|| GatewayError::NotFound("Account not found".to_string()));
        }

        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO account (id, name, email, password_hash, is_verified, otp_code,
                                  otp_expires_at, api_key, hit_count, hit_limit, last_reset,
                                  created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, NULL, 0, ?7, ?8, ?8, ?8)",
        )
        .bind(&id)
        .bind(name)
        .bind(&email)
        .bind(&password_hash)
        .bind(&otp)
        .bind(otp_expires_at)
        .bind(self.config.quota.default_hit_limit)
        .bind(now)
        .execute(&self.db)
        .await
        .map_err(GatewayError::Database)?;

        if let Err(e) = self
            .notifier
            .send_verification_code(&email, name, &otp)
            .await
        {
            // Never leave an unverified account that was never sent a code
            sqlx::query("DELETE FROM account WHERE id = ?1")
                .bind(&id)
                .execute(&self.db)
                .await
                .map_err(GatewayError::Database)?;

            tracing::warn!("Rolled back registration of {}: {}", email, e);
            return Err(e);
        }

        crate::metrics::record_registration();
        tracing::info!("Registered account {} ({})", id, email);

        self.get_account(&id).await
    }

    /// Verify an OTP and activate the account
    ///
    /// On success the code is cleared, the verified flag is set, an API key
    /// is issued and a bearer token is returned. Succeeds at most once per
    /// issued code.
    pub async fn verify_otp(&self, email: &str, otp: &str) -> GatewayResult<(Account, String)> {
        let email = normalize_email(email);
        let now = self.clock.now();

        // Guarded update: exact code match, strictly unexpired, not yet
        // verified. Concurrent attempts race on this single statement, so
        // only one of them flips the account.
        let result = sqlx::query(
            "UPDATE account SET is_verified = 1, otp_code = NULL, otp_expires_at = NULL,
                    updated_at = ?1
             WHERE email = ?2 AND otp_code = ?3 AND otp_expires_at > ?4",
        )
        .bind(now)
        .bind(&email)
        .bind(otp)
        .bind(now)
        .execute(&self.db)
        .await
        .map_err(GatewayError::Database)?;

        if result.rows_affected() == 0 {
            return Err(GatewayError::Authentication(
                "Invalid or expired verification code".to_string(),
            ));
        }

        let account = self
            .get_account_by_email(&email)
            .await?
            .ok_or_else(|| GatewayError::NotFound("Account not found".to_string()))?;

        // Automatic one-time key issuance on verification
        let api_key = self.generate_api_key(&account.id).await?;

        // Welcome mail carries the key; its failure never undoes verification
        if let Err(e) = self
            .notifier
            .send_key_issued(&email, &account.name, &api_key)
            .await
        {
            tracing::warn!("Failed to send welcome email to {}: {}", email, e);
        }

        let token = self.generate_access_token(&account.id)?;
        crate::metrics::record_verification();
        tracing::info!("Account {} verified", account.id);

        let account = self.get_account(&account.id).await?;
        Ok((account, token))
    }

    /// Issue a fresh OTP for an unverified account
    pub async fn resend_otp(&self, email: &str) -> GatewayResult<()> {
        let email = normalize_email(email);
        let account = self
            .get_account_by_email(&email)
            .await?
            .ok_or_else(|| GatewayError::NotFound("Account not found".to_string()))?;

        if account.is_verified {
            return Err(GatewayError::Conflict(
                "Account is already verified".to_string(),
            ));
        }

        let now = self.clock.now();
        let (otp, otp_expires_at) = self.generate_otp(now);

        // Overwrites any outstanding code, invalidating it
        sqlx::query(
            "UPDATE account SET otp_code = ?1, otp_expires_at = ?2, updated_at = ?3 WHERE id = ?4",
        )
        .bind(&otp)
        .bind(otp_expires_at)
        .bind(now)
        .bind(&account.id)
        .execute(&self.db)
        .await
        .map_err(GatewayError::Database)?;

        self.notifier
            .send_verification_code(&email, &account.name, &otp)
            .await?;

        tracing::info!("Resent verification code to {}", email);
        Ok(())
    }

    /// Authenticate a verified account and return a bearer token
    pub async fn login(&self, email: &str, password: &str) -> GatewayResult<(Account, String)> {
        let email = normalize_email(email);

        // Unknown email gets the same answer as a bad password
        let account = self
            .get_account_by_email(&email)
            .await?
            .ok_or_else(|| GatewayError::Authentication("Invalid credentials".to_string()))?;

        if !account.is_verified {
            return Err(GatewayError::Authentication(
                "Please verify your email before logging in".to_string(),
            ));
        }

        if !verify_password(password, &account.password_hash)? {
            return Err(GatewayError::Authentication(
                "Invalid credentials".to_string(),
            ));
        }

        let token = self.generate_access_token(&account.id)?;
        Ok((account, token))
    }

    /// Issue an API key for an account that does not hold one
    ///
    /// Single-key-per-account is enforced in the update guard, so a
    /// concurrent duplicate issuance loses the race and conflicts.
    pub async fn generate_api_key(&self, account_id: &str) -> GatewayResult<String> {
        // Distinguish "no such account" from "already has a key"
        let account = self.get_account(account_id).await?;
        if account.api_key.is_some() {
            return Err(GatewayError::Conflict(
                "Account already holds an API key".to_string(),
            ));
        }

        let api_key = generate_api_key_string();
        let result = sqlx::query(
            "UPDATE account SET api_key = ?1, updated_at = ?2 WHERE id = ?3 AND api_key IS NULL",
        )
        .bind(&api_key)
        .bind(self.clock.now())
        .bind(account_id)
        .execute(&self.db)
        .await
        .map_err(GatewayError::Database)?;

        if result.rows_affected() == 0 {
            return Err(GatewayError::Conflict(
                "Account already holds an API key".to_string(),
            ));
        }

        tracing::info!("Issued API key for account {}", account_id);
        Ok(api_key)
    }

    /// Replace the account's key; the old key is invalid the moment this
    /// update is persisted
    pub async fn regenerate_api_key(&self, account_id: &str) -> GatewayResult<String> {
        // Ensure the account exists before replacing anything
        self.get_account(account_id).await?;

        let api_key = generate_api_key_string();
        sqlx::query("UPDATE account SET api_key = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(&api_key)
            .bind(self.clock.now())
            .bind(account_id)
            .execute(&self.db)
            .await
            .map_err(GatewayError::Database)?;

        tracing::info!("Regenerated API key for account {}", account_id);
        Ok(api_key)
    }

    /// Atomically consume one unit of quota
    ///
    /// Returns the post-increment (hit_count, hit_limit) on a grant, or
    /// `None` when the account is at its limit. The compare and the
    /// increment are one statement, so concurrent calls on the last
    /// remaining unit produce exactly one grant.
    pub async fn try_consume_hit(&self, account_id: &str) -> GatewayResult<Option<(i64, i64)>> {
        let row: Option<(i64, i64)> = sqlx::query_as(
            "UPDATE account SET hit_count = hit_count + 1, updated_at = ?1
             WHERE id = ?2 AND hit_count < hit_limit
             RETURNING hit_count, hit_limit",
        )
        .bind(self.clock.now())
        .bind(account_id)
        .fetch_optional(&self.db)
        .await
        .map_err(GatewayError::Database)?;

        Ok(row)
    }

    /// Reset the account's usage counter; historical ledger entries stand
    pub async fn reset_usage(&self, account_id: &str) -> GatewayResult<Account> {
        let now = self.clock.now();
        let result = sqlx::query(
            "UPDATE account SET hit_count = 0, last_reset = ?1, updated_at = ?1 WHERE id = ?2",
        )
        .bind(now)
        .bind(account_id)
        .execute(&self.db)
        .await
        .map_err(GatewayError::Database)?;

        if result.rows_affected() == 0 {
            return Err(GatewayError::NotFound("Account not found".to_string()));
        }

        tracing::info!("Reset usage counter for account {}", account_id);
        self.get_account(account_id).await
    }

    /// Get account by id
    pub async fn get_account(&self, account_id: &str) -> GatewayResult<Account> {
        sqlx::query_as::<_, Account>(
            "SELECT id, name, email, password_hash, is_verified, otp_code, otp_expires_at,
                    api_key, hit_count, hit_limit, last_reset, created_at, updated_at
             FROM account WHERE id = ?1",
        )
        .bind(account_id)
        .fetch_optional(&self.db)
        .await
        .map_err(GatewayError::Database)?
        .ok_or_else(|| GatewayError::NotFound("Account not found".to_string()))
    }

    /// Get account by email (normalized), if any
    pub async fn get_account_by_email(&self, email: &str) -> GatewayResult<Option<Account>> {
        sqlx::query_as::<_, Account>(
            "SELECT id, name, email, password_hash, is_verified, otp_code, otp_expires_at,
                    api_key, hit_count, hit_limit, last_reset, created_at, updated_at
             FROM account WHERE email = ?1",
        )
        .bind(normalize_email(email))
        .fetch_optional(&self.db)
        .await
        .map_err(GatewayError::Database)
    }

    /// Find the account holding an API key, if any
    pub async fn find_by_api_key(&self, api_key: &str) -> GatewayResult<Option<Account>> {
        sqlx::query_as::<_, Account>(
            "SELECT id, name, email, password_hash, is_verified, otp_code, otp_expires_at,
                    api_key, hit_count, hit_limit, last_reset, created_at, updated_at
             FROM account WHERE api_key = ?1",
        )
        .bind(api_key)
        .fetch_optional(&self.db)
        .await
        .map_err(GatewayError::Database)
    }

    /// Generate access JWT token (bearer credential, sub = account id)
    pub fn generate_access_token(&self, account_id: &str) -> GatewayResult<String> {
        use jsonwebtoken::{encode, EncodingKey, Header};

        let now = self.clock.now().timestamp();
        let claims = AccessClaims {
            sub: account_id.to_string(),
            iat: now,
            exp: now + self.config.authentication.token_ttl_days * 24 * 3600,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.authentication.jwt_secret.as_bytes()),
        )
        .map_err(|e| GatewayError::Jwt(format!("Failed to generate token: {}", e)))
    }

    /// Fresh 6-digit code and its expiry
    fn generate_otp(&self, now: DateTime<Utc>) -> (String, DateTime<Utc>) {
        let code = rand::thread_rng().gen_range(100_000..1_000_000).to_string();
        let expires_at = now + Duration::minutes(self.config.quota.otp_ttl_minutes);
        (code, expires_at)
    }

    fn validate_name(&self, name: &str) -> GatewayResult<()> {
        if name.trim().is_empty() {
            return Err(GatewayError::Validation("Name cannot be empty".to_string()));
        }
        if name.len() > 50 {
            return Err(GatewayError::Validation(
                "Name cannot exceed 50 characters".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_email(&self, email: &str) -> GatewayResult<()> {
        if !email.contains('@') {
            return Err(GatewayError::Validation("Invalid email format".to_string()));
        }
        Ok(())
    }

    fn validate_password(&self, password: &str) -> GatewayResult<()> {
        if password.len() < 6 {
            return Err(GatewayError::Validation(
                "Password must be at least 6 characters".to_string(),
            ));
        }
        Ok(())
    }
}

/// JWT claims carried by the bearer credential
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Emails compare case-insensitively everywhere
pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

/// Hash a password using Argon2id
fn hash_password(password: &str) -> GatewayResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| GatewayError::Internal(format!("Password hashing failed: {}", e)))
}

/// Verify a password against a stored hash
fn verify_password(password: &str, hash: &str) -> GatewayResult<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| GatewayError::Internal(format!("Invalid password hash: {}", e)))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// New API key: fixed prefix plus 32 alphanumeric chars from a CSPRNG
fn generate_api_key_string() -> String {
    use rand::distributions::Alphanumeric;

    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();

    format!("{}{}", API_KEY_PREFIX, random)
}
