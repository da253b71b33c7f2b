/// Upstream call execution for metered tool endpoints
///
/// The gateway meters calls and then hands the payload to an executor.
/// With an upstream configured, calls are proxied over HTTP; without one,
/// the echo executor answers locally so the metering path stays usable in
/// development.

use crate::config::UpstreamConfig;
use crate::error::{GatewayError, GatewayResult};
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait CallExecutor: Send + Sync {
    async fn execute(&self, payload: serde_json::Value) -> GatewayResult<serde_json::Value>;
}

/// Proxies payloads to a configured upstream service
pub struct UpstreamExecutor {
    config: UpstreamConfig,
    client: reqwest::Client,
}

impl UpstreamExecutor {
    pub fn new(config: UpstreamConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self { config, client }
    }
}

#[async_trait]
impl CallExecutor for UpstreamExecutor {
    async fn execute(&self, payload: serde_json::Value) -> GatewayResult<serde_json::Value> {
        let mut request = self.client.post(&self.config.url).json(&payload);
        if let Some(api_key) = &self.config.api_key {
            request = request.header("authorization", format!("Bearer {}", api_key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Internal(format!("Upstream request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(GatewayError::Internal(format!(
                "Upstream returned status {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::Internal(format!("Upstream response unreadable: {}", e)))
    }
}

/// Local fallback when no upstream is configured
pub struct EchoExecutor;

#[async_trait]
impl CallExecutor for EchoExecutor {
    async fn execute(&self, payload: serde_json::Value) -> GatewayResult<serde_json::Value> {
        Ok(serde_json::json!({
            "echo": payload,
            "note": "No upstream configured, echoing request payload",
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_executor_wraps_payload() {
        let executor = EchoExecutor;
        let result = executor
            .execute(serde_json::json!({"message": "hello"}))
            .await
            .unwrap();
        assert_eq!(result["echo"]["message"], "hello");
    }
}
