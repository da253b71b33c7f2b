/// Application context and dependency injection
use crate::{
    account::AccountManager,
    clock::{Clock, SystemClock},
    config::ServerConfig,
    db,
    error::{GatewayError, GatewayResult},
    executor::{CallExecutor, EchoExecutor, UpstreamExecutor},
    mailer::{Mailer, Notifier},
    quota::QuotaGuard,
    usage::UsageLedger,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub account_manager: Arc<AccountManager>,
    pub quota_guard: Arc<QuotaGuard>,
    pub usage_ledger: Arc<UsageLedger>,
    pub executor: Arc<dyn CallExecutor>,
    pub clock: Arc<dyn Clock>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> GatewayResult<Self> {
        config.validate()?;

        Self::ensure_directories(&config).await?;

        let db = db::create_pool(&config.storage.gateway_db, db::DatabaseOptions::default())
            .await?;
        db::run_migrations(&db).await?;
        db::test_connection(&db).await?;

        let config = Arc::new(config);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let notifier: Arc<dyn Notifier> = Arc::new(Mailer::new(config.email.clone())?);

        let account_manager = Arc::new(AccountManager::new(
            db.clone(),
            config.clone(),
            clock.clone(),
            notifier,
        ));

        let usage_ledger = UsageLedger::start(db.clone(), clock.clone()).await?;

        let quota_guard = Arc::new(QuotaGuard::new(
            account_manager.clone(),
            usage_ledger.clone(),
            clock.clone(),
        ));

        let executor: Arc<dyn CallExecutor> = match &config.upstream {
            Some(upstream) => {
                tracing::info!(url = %upstream.url, "Upstream executor configured");
                Arc::new(UpstreamExecutor::new(upstream.clone()))
            }
            None => {
                tracing::info!("No upstream configured, using echo executor");
                Arc::new(EchoExecutor)
            }
        };

        Ok(Self {
            config,
            db,
            account_manager,
            quota_guard,
            usage_ledger,
            executor,
            clock,
        })
    }

    /// Ensure required directories exist
    async fn ensure_directories(config: &ServerConfig) -> GatewayResult<()> {
        let dir = &config.storage.data_directory;
        if !dir.exists() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                GatewayError::Internal(format!("Failed to create directory {:?}: {}", dir, e))
            })?;
        }

        Ok(())
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}
