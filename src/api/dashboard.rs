/// Dashboard endpoints for key management and usage review
///
/// All routes require a bearer token from verify-otp or login.
use crate::{
    account::AccountSummary,
    auth::AuthContext,
    context::AppContext,
    error::GatewayResult,
};
use axum::{
    extract::State,
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;

/// Build dashboard routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/dashboard", get(dashboard))
        .route("/api/dashboard/usage", get(usage))
        .route("/api/dashboard/generate-key", post(generate_key))
        .route("/api/dashboard/regenerate-key", put(regenerate_key))
        .route("/api/dashboard/reset-usage", post(reset_usage))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UsageResponse {
    hit_count: i64,
    hit_limit: i64,
    hits_remaining: i64,
    last_reset: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiKeyResponse {
    api_key: String,
}

/// Account overview
async fn dashboard(auth: AuthContext) -> Json<AccountSummary> {
    Json((&auth.account).into())
}

/// Current quota counters
async fn usage(auth: AuthContext) -> Json<UsageResponse> {
    Json(UsageResponse {
        hit_count: auth.account.hit_count,
        hit_limit: auth.account.hit_limit,
        hits_remaining: auth.account.hits_remaining(),
        last_reset: auth.account.last_reset,
    })
}

/// First-time key issuance
///
/// Fails with a conflict if the account already holds a key; the existing
/// key is never replaced by this route.
async fn generate_key(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> GatewayResult<Json<ApiKeyResponse>> {
    let api_key = ctx.account_manager.generate_api_key(&auth.account.id).await?;
    Ok(Json(ApiKeyResponse { api_key }))
}

/// Key rotation
///
/// Unconditionally replaces the key; the old key stops working immediately.
async fn regenerate_key(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> GatewayResult<Json<ApiKeyResponse>> {
    let api_key = ctx
        .account_manager
        .regenerate_api_key(&auth.account.id)
        .await?;

    tracing::info!(account = %auth.account.id, "API key rotated");

    Ok(Json(ApiKeyResponse { api_key }))
}

/// Zero the quota counter
async fn reset_usage(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> GatewayResult<Json<UsageResponse>> {
    let account = ctx.account_manager.reset_usage(&auth.account.id).await?;

    Ok(Json(UsageResponse {
        hit_count: account.hit_count,
        hit_limit: account.hit_limit,
        hits_remaining: account.hits_remaining(),
        last_reset: account.last_reset,
    }))
}
