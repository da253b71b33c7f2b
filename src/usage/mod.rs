/// Usage ledger: durable, date-bucketed call accounting
///
/// Records every metered call into a per-day bucket with a per-endpoint
/// breakdown. Writes go through a single background task fed by a channel,
/// so the request path never blocks on the ledger and a ledger failure
/// never fails a request. The ledger is advisory; quota enforcement lives
/// in the account store.

use crate::{
    clock::Clock,
    db::account::{UsageDay, UsageEndpoint},
    error::{GatewayError, GatewayResult},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Aggregation scope for ledger reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateScope {
    AllTime,
    Today,
}

/// Summed totals for a scope
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageAggregate {
    pub total_hits: i64,
    pub per_endpoint: BTreeMap<String, i64>,
}

/// Combined view reported by the metrics endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub all_time: UsageAggregate,
    pub today: UsageAggregate,
    pub instance_hits: u64,
    pub instance_started_at: DateTime<Utc>,
}

struct HitRecord {
    endpoint: String,
    at: DateTime<Utc>,
}

/// Usage ledger service
pub struct UsageLedger {
    db: SqlitePool,
    clock: Arc<dyn Clock>,
    tx: mpsc::UnboundedSender<HitRecord>,
    /// All-time totals as of the last cache refresh
    all_time: RwLock<UsageAggregate>,
    /// Hits recorded by this instance since its own start
    instance_hits: AtomicU64,
    started_at: DateTime<Utc>,
}

impl UsageLedger {
    /// Start the ledger: preload the all-time cache and spawn the writer
    pub async fn start(db: SqlitePool, clock: Arc<dyn Clock>) -> GatewayResult<Arc<Self>> {
        let (tx, rx) = mpsc::unbounded_channel();

        // Startup reconciliation: combined totals are reportable without
        // re-scanning every bucket on each read
        let totals = Self::load_all_time(&db).await?;
        tracing::info!(
            total_hits = totals.total_hits,
            "Usage ledger loaded persisted totals"
        );

        let started_at = clock.now();
        let ledger = Arc::new(Self {
            db,
            clock,
            tx,
            all_time: RwLock::new(totals),
            instance_hits: AtomicU64::new(0),
            started_at,
        });

        tokio::spawn(Self::writer_loop(Arc::clone(&ledger), rx));

        Ok(ledger)
    }

    /// Record one metered call
    ///
    /// Queues the write and returns immediately; the caller's response never
    /// waits on the ledger.
    pub fn record_hit(&self, endpoint: &str, at: DateTime<Utc>) {
        self.instance_hits.fetch_add(1, Ordering::Relaxed);
        let record = HitRecord {
            endpoint: normalize_endpoint(endpoint),
            at,
        };
        if self.tx.send(record).is_err() {
            tracing::warn!("Usage ledger writer is gone, dropping hit record");
        }
    }

    /// Summed totals for a scope
    pub async fn load_aggregate(&self, scope: AggregateScope) -> GatewayResult<UsageAggregate> {
        match scope {
            AggregateScope::AllTime => self.load_all_time_fresh().await,
            AggregateScope::Today => {
                let today = day_key(self.clock.now());
                self.load_day(&today).await
            }
        }
    }

    /// Today's bucket for an explicit timestamp (testable day boundary)
    pub async fn load_day_of(&self, at: DateTime<Utc>) -> GatewayResult<UsageAggregate> {
        self.load_day(&day_key(at)).await
    }

    /// Combined report: cached all-time view, today's bucket, this instance
    pub async fn summary(&self, now: DateTime<Utc>) -> GatewayResult<UsageSummary> {
        let all_time = self.all_time.read().await.clone();
        let today = self.load_day(&day_key(now)).await?;

        Ok(UsageSummary {
            all_time,
            today,
            instance_hits: self.instance_hits.load(Ordering::Relaxed),
            instance_started_at: self.started_at,
        })
    }

    async fn writer_loop(ledger: Arc<Self>, mut rx: mpsc::UnboundedReceiver<HitRecord>) {
        while let Some(record) = rx.recv().await {
            // Advisory sink: a failed write is logged and dropped, never
            // surfaced to the request that triggered it
            if let Err(e) = ledger.persist_hit(&record.endpoint, record.at).await {
                tracing::warn!("Usage ledger write failed: {}", e);
            }
        }
    }

    /// Durably record one hit and refresh the all-time cache
    ///
    /// Day total and endpoint count move in one transaction, preserving
    /// sum(per-endpoint) <= total_hits within every bucket.
    async fn persist_hit(&self, endpoint: &str, at: DateTime<Utc>) -> GatewayResult<()> {
        let date = day_key(at);
        let mut txn = self.db.begin().await.map_err(GatewayError::Database)?;

        sqlx::query(
            "INSERT INTO usage_day (date, total_hits, last_updated) VALUES (?1, 1, ?2)
             ON CONFLICT(date) DO UPDATE SET total_hits = total_hits + 1, last_updated = ?2",
        )
        .bind(&date)
        .bind(at)
        .execute(&mut *txn)
        .await
        .map_err(GatewayError::Database)?;

        sqlx::query(
            "INSERT INTO usage_endpoint (date, endpoint, hits) VALUES (?1, ?2, 1)
             ON CONFLICT(date, endpoint) DO UPDATE SET hits = hits + 1",
        )
        .bind(&date)
        .bind(endpoint)
        .execute(&mut *txn)
        .await
        .map_err(GatewayError::Database)?;

        txn.commit().await.map_err(GatewayError::Database)?;

        let totals = Self::load_all_time(&self.db).await?;
        *self.all_time.write().await = totals;

        crate::metrics::record_metered_call(endpoint);
        Ok(())
    }

    async fn load_day(&self, date: &str) -> GatewayResult<UsageAggregate> {
        let day: Option<UsageDay> = sqlx::query_as(
            "SELECT date, total_hits, last_updated FROM usage_day WHERE date = ?1",
        )
        .bind(date)
        .fetch_optional(&self.db)
        .await
        .map_err(GatewayError::Database)?;

        let rows: Vec<UsageEndpoint> =
            sqlx::query_as("SELECT date, endpoint, hits FROM usage_endpoint WHERE date = ?1")
                .bind(date)
                .fetch_all(&self.db)
                .await
                .map_err(GatewayError::Database)?;

        let mut per_endpoint = BTreeMap::new();
        for row in rows {
            per_endpoint.insert(row.endpoint, row.hits);
        }

        Ok(UsageAggregate {
            total_hits: day.map(|d| d.total_hits).unwrap_or(0),
            per_endpoint,
        })
    }

    async fn load_all_time_fresh(&self) -> GatewayResult<UsageAggregate> {
        Self::load_all_time(&self.db).await
    }

    async fn load_all_time(db: &SqlitePool) -> GatewayResult<UsageAggregate> {
        let total_hits: i64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(total_hits), 0) FROM usage_day")
                .fetch_one(db)
                .await
                .map_err(GatewayError::Database)?;

        let rows = sqlx::query(
            "SELECT endpoint, SUM(hits) AS hits FROM usage_endpoint GROUP BY endpoint",
        )
        .fetch_all(db)
        .await
        .map_err(GatewayError::Database)?;

        let mut per_endpoint = BTreeMap::new();
        for row in rows {
            per_endpoint.insert(row.get::<String, _>("endpoint"), row.get::<i64, _>("hits"));
        }

        Ok(UsageAggregate {
            total_hits,
            per_endpoint,
        })
    }
}

/// Calendar-day bucket key, YYYY-MM-DD
fn day_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

/// Normalize an endpoint path for use as a ledger map key
///
/// Query strings are stripped, trailing slashes trimmed (except the root),
/// and `.`/`$` replaced since the original store reserved them in map keys.
pub fn normalize_endpoint(path: &str) -> String {
    let path = path.split('?').next().unwrap_or(path);
    let path = if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    };
    let path = if path.is_empty() { "/" } else { path };
    path.replace(['.', '$'], "_")
}
