/// Quota enforcement for metered API calls
///
/// Front door for every key-authenticated request: validates the API key,
/// requires a verified account, and consumes exactly one hit against the
/// account's limit before the call is allowed to proceed. The consume step
/// is a single guarded UPDATE, so concurrent calls near the limit are
/// granted at most the remaining headroom.

use crate::{
    account::AccountManager,
    clock::Clock,
    error::{GatewayError, GatewayResult},
    usage::UsageLedger,
};
use std::sync::Arc;

/// Proof that a metered call was admitted, with post-grant usage numbers
#[derive(Debug, Clone)]
pub struct AuthorizedCall {
    pub account_id: String,
    pub name: String,
    pub email: String,
    pub hit_count: i64,
    pub hit_limit: i64,
}

impl AuthorizedCall {
    pub fn hits_remaining(&self) -> i64 {
        (self.hit_limit - self.hit_count).max(0)
    }
}

/// Quota guard service
pub struct QuotaGuard {
    accounts: Arc<AccountManager>,
    ledger: Arc<UsageLedger>,
    clock: Arc<dyn Clock>,
}

impl QuotaGuard {
    pub fn new(
        accounts: Arc<AccountManager>,
        ledger: Arc<UsageLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            accounts,
            ledger,
            clock,
        }
    }

    /// Admit one metered call for the given API key
    ///
    /// Rejections are checked in order: missing key, unknown key, unverified
    /// account, exhausted quota. A granted call has already been counted by
    /// the time this returns, and the ledger write is queued.
    pub async fn authorize(
        &self,
        api_key: Option<&str>,
        endpoint: &str,
    ) -> GatewayResult<AuthorizedCall> {
        let api_key = api_key
            .ok_or_else(|| GatewayError::Authentication("API key required".to_string()))?;

        let account = self
            .accounts
            .find_by_api_key(api_key)
            .await?
            .ok_or_else(|| GatewayError::Authentication("Invalid API key".to_string()))?;

        if !account.is_verified {
            return Err(GatewayError::Authentication(
                "Account is not verified".to_string(),
            ));
        }

        match self.accounts.try_consume_hit(&account.id).await? {
            Some((hit_count, hit_limit)) => {
                self.ledger.record_hit(endpoint, self.clock.now());
                crate::metrics::record_quota_grant();

                tracing::debug!(
                    account = %account.id,
                    endpoint = %endpoint,
                    hit_count,
                    hit_limit,
                    "Metered call admitted"
                );

                Ok(AuthorizedCall {
                    account_id: account.id,
                    name: account.name,
                    email: account.email,
                    hit_count,
                    hit_limit,
                })
            }
            None => {
                crate::metrics::record_quota_rejection();
                Err(GatewayError::QuotaExceeded {
                    hit_count: account.hit_count,
                    hit_limit: account.hit_limit,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::ManualClock;
    use crate::mailer::test_support::FakeNotifier;
    use chrono::{TimeZone, Utc};
    use sqlx::SqlitePool;

    struct Harness {
        guard: QuotaGuard,
        accounts: Arc<AccountManager>,
        db: SqlitePool,
        notifier: Arc<FakeNotifier>,
    }

    async fn setup_with(db: SqlitePool) -> Harness {
        let config = Arc::new(crate::config::test_config());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        ));
        let notifier = Arc::new(FakeNotifier::default());
        let accounts = Arc::new(AccountManager::new(
            db.clone(),
            config,
            clock.clone(),
            notifier.clone(),
        ));
        let ledger = UsageLedger::start(db.clone(), clock.clone())
            .await
            .unwrap();
        let guard = QuotaGuard::new(accounts.clone(), ledger, clock);

        Harness {
            guard,
            accounts,
            db,
            notifier,
        }
    }

    async fn setup() -> Harness {
        setup_with(crate::db::test_pool().await).await
    }

    /// Register, verify, and return the issued API key
    async fn provision_account(h: &Harness, email: &str) -> String {
        h.accounts
            .register("Quota Tester", email, "hunter22")
            .await
            .unwrap();
        let otp = h.notifier.last_code_for(email).unwrap();
        let (account, _token) = h.accounts.verify_otp(email, &otp).await.unwrap();
        account.api_key.unwrap()
    }

    #[tokio::test]
    async fn missing_key_is_rejected() {
        let h = setup().await;
        let err = h.guard.authorize(None, "/tools/x").await.unwrap_err();
        assert!(matches!(err, GatewayError::Authentication(_)));
    }

    #[tokio::test]
    async fn unknown_key_is_rejected() {
        let h = setup().await;
        let err = h
            .guard
            .authorize(Some("key_toolshub_nope"), "/tools/x")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Authentication(_)));
    }

    #[tokio::test]
    async fn unverified_account_is_rejected() {
        let h = setup().await;
        let key = provision_account(&h, "quota@example.com").await;

        // Simulate a key surviving while verification is revoked
        sqlx::query("UPDATE account SET is_verified = 0")
            .execute(&h.db)
            .await
            .unwrap();

        let err = h.guard.authorize(Some(&key), "/tools/x").await.unwrap_err();
        assert!(matches!(err, GatewayError::Authentication(_)));
    }

    #[tokio::test]
    async fn grant_increments_and_reports_usage() {
        let h = setup().await;
        let key = provision_account(&h, "quota@example.com").await;

        let call = h.guard.authorize(Some(&key), "/tools/x").await.unwrap();
        assert_eq!(call.hit_count, 1);
        assert_eq!(call.hit_limit, 1000);
        assert_eq!(call.hits_remaining(), 999);

        let call = h.guard.authorize(Some(&key), "/tools/x").await.unwrap();
        assert_eq!(call.hit_count, 2);
    }

    #[tokio::test]
    async fn exhausted_quota_is_rejected_with_usage_numbers() {
        let h = setup().await;
        let key = provision_account(&h, "quota@example.com").await;

        sqlx::query("UPDATE account SET hit_limit = 2")
            .execute(&h.db)
            .await
            .unwrap();

        h.guard.authorize(Some(&key), "/tools/x").await.unwrap();
        h.guard.authorize(Some(&key), "/tools/x").await.unwrap();

        let err = h.guard.authorize(Some(&key), "/tools/x").await.unwrap_err();
        match err {
            GatewayError::QuotaExceeded {
                hit_count,
                hit_limit,
            } => {
                assert_eq!(hit_count, 2);
                assert_eq!(hit_limit, 2);
            }
            other => panic!("expected QuotaExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reset_restores_headroom() {
        let h = setup().await;
        let key = provision_account(&h, "quota@example.com").await;

        sqlx::query("UPDATE account SET hit_limit = 1")
            .execute(&h.db)
            .await
            .unwrap();

        let first = h.guard.authorize(Some(&key), "/tools/x").await.unwrap();
        h.guard.authorize(Some(&key), "/tools/x").await.unwrap_err();

        h.accounts.reset_usage(&first.account_id).await.unwrap();
        let again = h.guard.authorize(Some(&key), "/tools/x").await.unwrap();
        assert_eq!(again.hit_count, 1);
    }

    #[tokio::test]
    async fn concurrent_calls_near_the_limit_grant_exactly_the_headroom() {
        // File-backed pool: concurrent connections must observe one database
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quota.sqlite");
        let db = crate::db::create_pool(&path, crate::db::DatabaseOptions::default())
            .await
            .unwrap();
        crate::db::run_migrations(&db).await.unwrap();

        let h = setup_with(db).await;
        let key = provision_account(&h, "quota@example.com").await;

        sqlx::query("UPDATE account SET hit_limit = 5")
            .execute(&h.db)
            .await
            .unwrap();

        let guard = Arc::new(h.guard);
        let mut handles = Vec::new();
        for _ in 0..20 {
            let guard = Arc::clone(&guard);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                guard.authorize(Some(&key), "/tools/x").await
            }));
        }

        let mut granted = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => granted += 1,
                Err(GatewayError::QuotaExceeded { .. }) => rejected += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        assert_eq!(granted, 5);
        assert_eq!(rejected, 15);
    }
}
