/// Account registration, verification and login endpoints
use crate::{
    account::{
        AuthResponse, LoginRequest, RegisterRequest, RegisterResponse, ResendOtpRequest,
        VerifyOtpRequest,
    },
    context::AppContext,
    error::{GatewayError, GatewayResult},
};
use axum::{
    extract::State,
    http::StatusCode,
    routing::post,
    Json, Router,
};
use validator::Validate;

/// Build auth routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/verify-otp", post(verify_otp))
        .route("/api/auth/resend-otp", post(resend_otp))
        .route("/api/auth/login", post(login))
}

/// Register endpoint
///
/// Creates an unverified account and sends a one-time code. Registering
/// again with an unverified email refreshes the code instead of failing.
async fn register(
    State(ctx): State<AppContext>,
    Json(req): Json<RegisterRequest>,
) -> GatewayResult<(StatusCode, Json<RegisterResponse>)> {
    req.validate()
        .map_err(|e| GatewayError::Validation(e.to_string()))?;

    let account = ctx
        .account_manager
        .register(&req.name, &req.email, &req.password)
        .await?;

    tracing::info!(email = %account.email, "Registration accepted, verification code sent");

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            email: account.email,
            is_verified: account.is_verified,
        }),
    ))
}

/// OTP verification endpoint
///
/// One-shot: a matching, unexpired code flips the account to verified,
/// issues its API key, and returns a bearer token.
async fn verify_otp(
    State(ctx): State<AppContext>,
    Json(req): Json<VerifyOtpRequest>,
) -> GatewayResult<Json<AuthResponse>> {
    req.validate()
        .map_err(|e| GatewayError::Validation(e.to_string()))?;

    let (account, token) = ctx.account_manager.verify_otp(&req.email, &req.otp).await?;

    Ok(Json(AuthResponse {
        token,
        user: (&account).into(),
    }))
}

/// OTP resend endpoint
async fn resend_otp(
    State(ctx): State<AppContext>,
    Json(req): Json<ResendOtpRequest>,
) -> GatewayResult<Json<serde_json::Value>> {
    req.validate()
        .map_err(|e| GatewayError::Validation(e.to_string()))?;

    ctx.account_manager.resend_otp(&req.email).await?;

    Ok(Json(serde_json::json!({
        "message": "Verification code sent"
    })))
}

/// Login endpoint
async fn login(
    State(ctx): State<AppContext>,
    Json(req): Json<LoginRequest>,
) -> GatewayResult<Json<AuthResponse>> {
    req.validate()
        .map_err(|e| GatewayError::Validation(e.to_string()))?;

    let (account, token) = ctx.account_manager.login(&req.email, &req.password).await?;

    Ok(Json(AuthResponse {
        token,
        user: (&account).into(),
    }))
}
