use anyhow::Context;
use booru_relay::persistence::snapshots::{self, RelayState};
use booru_relay::{
    FetchConfig, Fetcher, JsonFileStore, MiddlewareCatalog, MiddlewareRegistry, Persistence, Personas,
    ProviderCatalog, Providers, Router, Serializer, WebhookEndpoints,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(about = "Relays new booru posts to webhook destinations")]
struct Args {
    /// JSON state file holding providers, mappings and cursors
    #[arg(short, long, env = "BOORU_RELAY_STATE", default_value = "relay-state.json")]
    state: PathBuf,

    /// Optional `[{name, id, token}]` file of extra webhook endpoints
    #[arg(short, long, env = "BOORU_RELAY_ENDPOINTS")]
    endpoints: Option<PathBuf>,

    #[arg(long, env = "BOORU_RELAY_LOG_LEVEL", default_value = "info")]
    log_level: tracing::Level,

    #[arg(long, env = "BOORU_RELAY_BASE_URL")]
    base_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt().with_max_level(args.log_level).init();

    info!("Starting booru relay (state file {})", args.state.display());

    let mut fetch_config = FetchConfig::default();
    if let Some(base_url) = args.base_url {
        fetch_config.base_url = base_url;
    }
    let fetcher = Fetcher::new(fetch_config).context("failed to build HTTP client")?;

    let store = Arc::new(
        JsonFileStore::open(&args.state)
            .await
            .with_context(|| format!("failed to open {}", args.state.display()))?,
    );
    let persistence: Arc<dyn Persistence> = store.clone();

    let serializer = Serializer::new(
        MiddlewareCatalog::standard(),
        ProviderCatalog::standard(Arc::new(fetcher), Arc::clone(&persistence)),
    );

    let personas = Arc::new(Personas::new());
    let endpoints = Arc::new(WebhookEndpoints::new(reqwest::Client::new()));
    let registry = Arc::new(MiddlewareRegistry::new());
    let providers = Arc::new(Providers::new());
    let router = Arc::new(Router::new(
        Arc::clone(&providers),
        endpoints.clone(),
        Arc::clone(&personas),
        Arc::clone(&registry),
    ));
    let state = RelayState {
        personas,
        endpoints,
        registry,
        providers,
        router,
    };

    if let Some(path) = &args.endpoints {
        let count = state
            .endpoints
            .load_from_file(path)
            .await
            .with_context(|| format!("failed to load endpoints from {}", path.display()))?;
        info!("Loaded {} endpoints from {}", count, path.display());
    }

    snapshots::load_all(persistence.as_ref(), &serializer, &state)
        .await
        .context("failed to restore state")?;

    let failures = state.providers.init_all().await;
    if failures > 0 {
        warn!("{} providers failed to initialize", failures);
    }
    state.providers.start_all().await;
    info!("Relay running with providers {:?}", state.providers.names());

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("Shutting down");

    state.providers.stop_all().await;
    if let Err(e) = snapshots::save_all(persistence.as_ref(), &serializer, &state).await {
        error!("Failed to save state to {}: {}", store.path().display(), e);
        return Err(e.into());
    }

    info!("Booru relay finished");
    Ok(())
}
