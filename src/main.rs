/// Toolshub Gateway - metered API gateway
///
/// Accounts register with email verification, receive a single API key,
/// and every tool call is counted against a per-account quota.

use toolshub_gateway::{config::ServerConfig, context::AppContext, error::GatewayResult, server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> GatewayResult<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "toolshub_gateway=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    print_banner();

    // Load configuration
    let config = ServerConfig::from_env()?;

    // Create application context
    let ctx = AppContext::new(config).await?;

    // Start server
    server::serve(ctx).await?;

    Ok(())
}

fn print_banner() {
    println!(
        r#"
  ______            __     __          __
 /_  __/___  ____  / /____/ /_  __  __/ /_
  / / / __ \/ __ \/ / ___/ __ \/ / / / __ \
 / / / /_/ / /_/ / (__  ) / / / /_/ / /_/ /
/_/  \____/\____/_/____/_/ /_/\__,_/_.___/

        Toolshub API Gateway v{}
        "#,
        env!("CARGO_PKG_VERSION")
    );
}
