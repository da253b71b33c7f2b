/// Metered tool endpoints
///
/// Every route here sits behind the quota guard: by the time a handler
/// runs, one hit has been consumed and the response carries the account's
/// post-grant usage numbers.
use crate::{
    auth::ApiKeyContext,
    context::AppContext,
    error::GatewayResult,
};
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

/// Build tool routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/tools/test", get(test_call))
        .route("/api/tools/chat", post(chat))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiUsage {
    hit_count: i64,
    hit_limit: i64,
    hits_remaining: i64,
}

impl From<&crate::quota::AuthorizedCall> for ApiUsage {
    fn from(call: &crate::quota::AuthorizedCall) -> Self {
        Self {
            hit_count: call.hit_count,
            hit_limit: call.hit_limit,
            hits_remaining: call.hits_remaining(),
        }
    }
}

/// Key validation probe
///
/// Counts as a metered call, so a successful response doubles as proof
/// that quota enforcement saw the key.
async fn test_call(ctx: ApiKeyContext) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": format!("Hello {}, your API key works", ctx.call.name),
        "apiUsage": ApiUsage::from(&ctx.call),
    }))
}

/// Proxied chat call
async fn chat(
    State(state): State<AppContext>,
    ctx: ApiKeyContext,
    Json(payload): Json<serde_json::Value>,
) -> GatewayResult<Json<serde_json::Value>> {
    let result = state.executor.execute(payload).await?;

    Ok(Json(serde_json::json!({
        "result": result,
        "apiUsage": ApiUsage::from(&ctx.call),
    })))
}
