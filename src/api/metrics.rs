/// Usage reporting endpoints
use crate::{context::AppContext, error::GatewayResult, usage::UsageSummary};
use axum::{extract::State, routing::get, Json, Router};

/// Build metrics routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/metrics", get(usage_summary))
        .route("/metrics", get(prometheus_metrics))
}

/// Ledger summary: all-time totals, today's bucket, this instance
async fn usage_summary(State(ctx): State<AppContext>) -> GatewayResult<Json<UsageSummary>> {
    let summary = ctx.usage_ledger.summary(ctx.clock.now()).await?;
    Ok(Json(summary))
}

/// Prometheus text exposition
async fn prometheus_metrics() -> String {
    crate::metrics::render_metrics()
}
