//! Demo forum host for the OAuth2 single-sign-on flow
//!
//! Serves the sign-in, callback and connect entry points for every provider
//! listed in the configuration, backed by in-memory users and session stash.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod app;
mod settings;

use app::{AppState, router};
use settings::Settings;

/// Demo forum host for OAuth2 single-sign-on
#[derive(Parser)]
#[command(name = "forum-sso-server")]
#[command(about = "Demo forum host for OAuth2 single-sign-on")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "forum_sso_server=debug,forum_identity_oauth2=info,sso_logging=info,tower_http=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let settings = Settings::load(&args.config)?;

    let state = AppState::from_settings(&settings)
        .await
        .context("Failed to initialize SSO state")?;
    let app = router(state).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::new(settings.server.host, settings.server.port);
    info!("Forum SSO server listening on {}", addr);
    info!("Public base URL: {}", settings.server.base_url);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
