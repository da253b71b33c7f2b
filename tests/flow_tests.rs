/// End-to-end account lifecycle: register, verify, login, key management,
/// and metered calls against a real file-backed database.
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use toolshub_gateway::{
    account::AccountManager,
    auth::verify_access_token,
    clock::{Clock, SystemClock},
    config::{
        AuthConfig, LoggingConfig, QuotaConfig, ServerConfig, ServiceConfig, StorageConfig,
    },
    db,
    error::{GatewayError, GatewayResult},
    mailer::Notifier,
    quota::QuotaGuard,
    usage::{AggregateScope, UsageLedger},
};

/// Captures verification codes instead of sending email
#[derive(Default)]
struct CapturingNotifier {
    codes: Mutex<Vec<(String, String)>>,
}

impl CapturingNotifier {
    fn code_for(&self, email: &str) -> Option<String> {
        self.codes
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(e, _)| e == email)
            .map(|(_, code)| code.clone())
    }
}

#[async_trait]
impl Notifier for CapturingNotifier {
    async fn send_verification_code(
        &self,
        email: &str,
        _name: &str,
        code: &str,
    ) -> GatewayResult<()> {
        self.codes
            .lock()
            .unwrap()
            .push((email.to_string(), code.to_string()));
        Ok(())
    }

    async fn send_key_issued(&self, _email: &str, _name: &str, _api_key: &str) -> GatewayResult<()> {
        Ok(())
    }
}

struct TestEnv {
    accounts: Arc<AccountManager>,
    guard: QuotaGuard,
    ledger: Arc<UsageLedger>,
    notifier: Arc<CapturingNotifier>,
    db: sqlx::SqlitePool,
    config: Arc<ServerConfig>,
    _dir: tempfile::TempDir,
}

fn config_for(dir: &tempfile::TempDir) -> ServerConfig {
    ServerConfig {
        service: ServiceConfig {
            hostname: "localhost".to_string(),
            port: 3000,
            version: "0.1.0".to_string(),
        },
        storage: StorageConfig {
            data_directory: dir.path().to_path_buf(),
            gateway_db: dir.path().join("gateway.sqlite"),
        },
        authentication: AuthConfig {
            jwt_secret: "integration-test-secret-0123456789abcdef".to_string(),
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

async fn setup() -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(config_for(&dir));

    let pool = db::create_pool(&config.storage.gateway_db, db::DatabaseOptions::default())
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let notifier = Arc::new(CapturingNotifier::default());

    let accounts = Arc::new(AccountManager::new(
        pool.clone(),
        config.clone(),
        clock.clone(),
        notifier.clone(),
    ));
    let ledger = UsageLedger::start(pool.clone(), clock.clone()).await.unwrap();
    let guard = QuotaGuard::new(accounts.clone(), ledger.clone(), clock);

    TestEnv {
        accounts,
        guard,
        ledger,
        notifier,
        db: pool,
        config,
        _dir: dir,
    }
}

#[tokio::test]
async fn full_account_lifecycle() {
    let env = setup().await;
    let email = "flow@example.com";

    // Register: account exists but cannot log in yet
    let account = env
        .accounts
        .register("Flow Tester", email, "hunter22")
        .await
        .unwrap();
    assert!(!account.is_verified);
    assert!(account.api_key.is_none());

    let err = env.accounts.login(email, "hunter22").await.unwrap_err();
    assert!(matches!(err, GatewayError::Authentication(_)));

    // Verify: one-shot, issues a key and a usable token
    let code = env.notifier.code_for(email).unwrap();
    let (account, token) = env.accounts.verify_otp(email, &code).await.unwrap();
    assert!(account.is_verified);
    let api_key = account.api_key.clone().unwrap();
    assert!(api_key.starts_with("key_toolshub_"));

    let subject =
        verify_access_token(&token, &env.config.authentication.jwt_secret).unwrap();
    assert_eq!(subject, account.id);

    // The same code cannot be replayed
    assert!(env.accounts.verify_otp(email, &code).await.is_err());

    // Login works now and names the same account
    let (logged_in, login_token) = env.accounts.login(email, "hunter22").await.unwrap();
    assert_eq!(logged_in.id, account.id);
    assert!(!login_token.is_empty());

    // Key was auto-issued, so explicit generation conflicts
    let err = env.accounts.generate_api_key(&account.id).await.unwrap_err();
    assert!(matches!(err, GatewayError::Conflict(_)));

    // Metered call through the quota guard
    let call = env
        .guard
        .authorize(Some(&api_key), "/api/tools/test")
        .await
        .unwrap();
    assert_eq!(call.hit_count, 1);
    assert_eq!(call.hits_remaining(), 999);

    // Rotation invalidates the old key immediately
    let new_key = env.accounts.regenerate_api_key(&account.id).await.unwrap();
    assert_ne!(new_key, api_key);
    assert!(env
        .guard
        .authorize(Some(&api_key), "/api/tools/test")
        .await
        .is_err());
    let call = env
        .guard
        .authorize(Some(&new_key), "/api/tools/test")
        .await
        .unwrap();
    assert_eq!(call.hit_count, 2);
}

#[tokio::test]
async fn quota_exhaustion_and_reset() {
    let env = setup().await;
    let email = "limits@example.com";

    env.accounts
        .register("Limit Tester", email, "hunter22")
        .await
        .unwrap();
    let code = env.notifier.code_for(email).unwrap();
    let (account, _token) = env.accounts.verify_otp(email, &code).await.unwrap();
    let api_key = account.api_key.unwrap();

    sqlx::query("UPDATE account SET hit_limit = 3 WHERE id = ?1")
        .bind(&account.id)
        .execute(&env.db)
        .await
        .unwrap();

    for _ in 0..3 {
        env.guard
            .authorize(Some(&api_key), "/api/tools/test")
            .await
            .unwrap();
    }

    let err = env
        .guard
        .authorize(Some(&api_key), "/api/tools/test")
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::QuotaExceeded { .. }));

    env.accounts.reset_usage(&account.id).await.unwrap();
    let call = env
        .guard
        .authorize(Some(&api_key), "/api/tools/test")
        .await
        .unwrap();
    assert_eq!(call.hit_count, 1);
}

#[tokio::test]
async fn metered_calls_land_in_the_usage_ledger() {
    let env = setup().await;
    let email = "ledger@example.com";

    env.accounts
        .register("Ledger Tester", email, "hunter22")
        .await
        .unwrap();
    let code = env.notifier.code_for(email).unwrap();
    let (account, _token) = env.accounts.verify_otp(email, &code).await.unwrap();
    let api_key = account.api_key.unwrap();

    for _ in 0..4 {
        env.guard
            .authorize(Some(&api_key), "/api/tools/test")
            .await
            .unwrap();
    }

    // Ledger writes are queued; wait for the writer to drain
    let mut all_time = Default::default();
    for _ in 0..100 {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        all_time = env.ledger.load_aggregate(AggregateScope::AllTime).await.unwrap();
        if all_time.total_hits == 4 {
            break;
        }
    }
    assert_eq!(all_time.total_hits, 4);
    assert_eq!(all_time.per_endpoint.get("/api/tools/test"), Some(&4));
}
