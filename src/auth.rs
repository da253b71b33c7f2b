/// Authentication extractors and utilities
use crate::{
    api::middleware::extract_bearer_token,
    context::AppContext,
    db::account::Account,
    error::GatewayError,
    quota::AuthorizedCall,
};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Authenticated dashboard context - validates the bearer token and loads
/// the account it names
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub account: Account,
}

#[async_trait]
impl FromRequestParts<AppContext> for AuthContext {
    type Rejection = GatewayError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers).ok_or_else(|| {
            GatewayError::Authentication("Missing authorization header".to_string())
        })?;

        let account_id =
            verify_access_token(&token, &state.config.authentication.jwt_secret)?;

        let account = state.account_manager.get_account(&account_id).await?;
        if !account.is_verified {
            return Err(GatewayError::Authentication(
                "Account is not verified".to_string(),
            ));
        }

        Ok(AuthContext { account })
    }
}

/// Metered call context - admits the request through the quota guard
///
/// The key is read from the `x-api-key` header or, failing that, the
/// `apiKey` query parameter. By the time a handler sees this extractor the
/// hit has already been counted.
#[derive(Debug, Clone)]
pub struct ApiKeyContext {
    pub call: AuthorizedCall,
}

#[async_trait]
impl FromRequestParts<AppContext> for ApiKeyContext {
    type Rejection = GatewayError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let api_key = extract_api_key(parts);

        let call = state
            .quota_guard
            .authorize(api_key.as_deref(), parts.uri.path())
            .await?;

        Ok(ApiKeyContext { call })
    }
}

/// Extract an API key from the `x-api-key` header or `apiKey` query parameter
fn extract_api_key(parts: &Parts) -> Option<String> {
    if let Some(key) = parts
        .headers
        .get("x-api-key")
        .and_then(|h| h.to_str().ok())
    {
        return Some(key.to_string());
    }

    parts.uri.query().and_then(|query| {
        query.split('&').find_map(|pair| {
            pair.strip_prefix("apiKey=").map(|v| v.to_string())
        })
    })
}

/// Verify a bearer token and return the account id it names
///
/// This performs:
/// 1. JWT signature verification
/// 2. Expiration checking
/// 3. Claims validation
pub fn verify_access_token(token: &str, jwt_secret: &str) -> Result<String, GatewayError> {
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

    let decoding_key = DecodingKey::from_secret(jwt_secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    // Allow some clock skew (5 minutes)
    validation.leeway = 300;

    let token_data = decode::<serde_json::Value>(token, &decoding_key, &validation)
        .map_err(|e| {
            tracing::warn!("JWT verification failed: {}", e);
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    GatewayError::Authentication("Token has expired".to_string())
                }
                jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                    GatewayError::Authentication("Invalid token signature".to_string())
                }
                _ => GatewayError::Authentication(format!("Invalid token: {}", e)),
            }
        })?;

    token_data
        .claims
        .get("sub")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| GatewayError::Authentication("Invalid token: missing 'sub' claim".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_for(uri: &str, api_key_header: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri(uri);
        if let Some(key) = api_key_header {
            builder = builder.header("x-api-key", key);
        }
        let (parts, _body) = builder.body(()).unwrap().into_parts();
        parts
    }

    #[test]
    fn api_key_read_from_header() {
        let parts = parts_for("/api/tools/test", Some("key_toolshub_abc"));
        assert_eq!(extract_api_key(&parts).as_deref(), Some("key_toolshub_abc"));
    }

    #[test]
    fn api_key_read_from_query_parameter() {
        let parts = parts_for("/api/tools/test?apiKey=key_toolshub_abc&x=1", None);
        assert_eq!(extract_api_key(&parts).as_deref(), Some("key_toolshub_abc"));
    }

    #[test]
    fn header_wins_over_query_parameter() {
        let parts = parts_for("/api/tools/test?apiKey=from_query", Some("from_header"));
        assert_eq!(extract_api_key(&parts).as_deref(), Some("from_header"));
    }

    #[test]
    fn missing_key_is_none() {
        let parts = parts_for("/api/tools/test", None);
        assert_eq!(extract_api_key(&parts), None);
    }

    #[test]
    fn verify_round_trips_generated_token() {
        use jsonwebtoken::{encode, EncodingKey, Header};

        let secret = "test-secret-key-for-testing-only-0123456789";
        let now = chrono::Utc::now().timestamp();
        let claims = serde_json::json!({
            "sub": "account-123",
            "iat": now,
            "exp": now + 3600,
        });
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap();

        assert_eq!(verify_access_token(&token, secret).unwrap(), "account-123");
        assert!(verify_access_token(&token, "wrong-secret-that-is-long-enough-123").is_err());
    }
}
