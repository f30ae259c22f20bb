use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use llm_sse_relay::config::{Cli, Config, CorsOrigins};
use llm_sse_relay::provider::gemini::GeminiClient;
use llm_sse_relay::server::api::{build_router, AppState};
use llm_sse_relay::telemetry::reporter_from_config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "llm_sse_relay=debug,tower_http=debug"
    } else {
        "llm_sse_relay=info,tower_http=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter.into());

    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }

    info!("llm-sse-relay v{}", env!("CARGO_PKG_VERSION"));

    // Load the dotenv file, if any, before reading the environment.
    match dotenvy::from_path(&cli.env_file) {
        Ok(()) => info!(path = %cli.env_file.display(), "Loaded environment file"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!(path = %cli.env_file.display(), "Could not load environment file: {e}"),
    }

    // Load configuration.
    let config = Arc::new(Config::from_env()?);

    info!(
        model = config.provider.model,
        base_url = config.provider.base_url,
        idle_timeout_secs = config.server.stream_idle_timeout.as_secs(),
        trace_reporting = config.tracing.is_some(),
        "Configuration loaded"
    );
    match &config.server.cors_origins {
        CorsOrigins::Any => info!("CORS: any origin"),
        CorsOrigins::List(origins) => info!(origins = ?origins, "CORS: allow-list"),
    }

    // Build the provider client and trace reporter.
    let provider = Arc::new(GeminiClient::new(&config.provider)?);
    let reporter = reporter_from_config(config.tracing.as_ref());

    let state = Arc::new(AppState {
        config: config.clone(),
        provider,
        reporter,
    });

    // Build the HTTP router.
    let app = build_router(state);

    // Start the server.
    let listen_addr = cli.listen_addr();
    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
