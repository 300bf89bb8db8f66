use clap::Parser;
use responses_bridge::auth::provider_from_config;
use responses_bridge::config::{config_search_paths, AuthSource};
use responses_bridge::{
    build_router, AppState, BackendClient, GatewayConfig, ModelCatalog, SharedLogger,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "responses-bridge",
    about = "OpenAI- and Anthropic-compatible gateway in front of the ChatGPT codex responses backend",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Upstream responses endpoint (overrides config)
    #[arg(long)]
    backend_url: Option<String>,

    /// Credential source: codex, opencode, env or auto
    #[arg(long)]
    auth_source: Option<String>,

    /// Log file path
    #[arg(long, default_value = "responses-bridge.log")]
    log_file: PathBuf,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "responses_bridge=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = GatewayConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(url) = cli.backend_url {
        config.backend_url = url;
    }
    if let Some(ref source) = cli.auth_source {
        config.auth.source = AuthSource::parse(source)?;
    }
    config.validate()?;

    let logger = SharedLogger::new(&cli.log_file)?;
    let auth = provider_from_config(&config.auth);

    // Credentials are re-read on every request.
    if let Err(e) = auth.credentials() {
        tracing::warn!(error = %e, "credentials not available yet");
    }

    let backend = BackendClient::new(&config, auth)?;
    let catalog = ModelCatalog::new(config.models.clone());

    info!("responses-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("  Backend:   {}", config.backend_url);
    info!("  Auth:      {:?}", config.auth.source);
    info!(
        "  Models:    {} presets, default {}",
        config.models.presets.len(),
        catalog.default_model()
    );
    info!("  Log file:  {}", cli.log_file.display());

    logger.info(
        "startup",
        format!(
            "Starting responses-bridge backend={} host={} port={}",
            config.backend_url, config.host, config.port
        ),
    );

    let bind_addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState {
        config,
        backend,
        catalog,
        logger,
    });

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  OpenAI clients:    OPENAI_BASE_URL=http://{}/v1", bind_addr);
    info!("  Anthropic clients: ANTHROPIC_BASE_URL=http://{}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
