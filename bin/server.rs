// Skin Exchange - Web Server
// JSON API for the web app, backed by the same exchange as the CLI

use anyhow::{Context, Result};
use skin_exchange::{api, logging, Exchange, ExchangeConfig};
use tracing::info;

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    logging::init("skin-server");

    println!("🌐 Skin Exchange - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = ExchangeConfig::from_env();
    let db_path = config.db_path.clone();
    let addr = config.server_addr.clone();

    if config.bot_token.is_none() {
        println!("⚠️  BOT_TOKEN not set: callers are identified by X-Account-Id (development mode)");
    }

    // Open (or create) database
    let exchange = Exchange::open(config)
        .with_context(|| format!("failed to open database {}", db_path.display()))?;
    println!("✓ Database opened: {:?}", db_path);

    let app = api::router(exchange);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    info!(%addr, "server listening");
    println!("\n🚀 Server running on http://{}", addr);
    println!("   API: http://{}/api/listings", addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app)
        .await
        .context("server error")?;

    Ok(())
}
