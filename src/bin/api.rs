use caishen_chat::{
    api::{start_server, ApiState},
    config::ChatConfig,
    fetcher::HttpContentFetcher,
    llm::ModelClients,
    media::{MediaClient, OpenAiMediaClient},
    store::open_price_store,
    tools::create_default_registry,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load .env and the process environment
    let config = ChatConfig::from_env()?;

    info!("CaishenAI stock chat - API Server");
    info!("Port: {}", config.api_port);

    if config.providers.is_empty() {
        warn!("No model provider key set; chat requests will fail until OPENAI_API_KEY, ANTHROPIC_API_KEY or GOOGLE_API_KEY is configured");
    }

    // Create components
    let store = open_price_store(&config).await;
    let registry = create_default_registry(store.clone(), &config)?;
    let clients = ModelClients::from_config(&config)?;

    let media: Option<Arc<dyn MediaClient>> = match config.media_provider() {
        Some(provider) => Some(Arc::new(OpenAiMediaClient::new(
            provider,
            config.model_timeout,
        )?)),
        None => {
            info!("Media enrichment disabled");
            None
        }
    };

    if config.basic_auth.is_some() {
        info!("HTTP basic auth enabled");
    }

    let state = ApiState {
        clients: Arc::new(clients),
        registry: Arc::new(registry),
        store,
        fetcher: Arc::new(HttpContentFetcher::new()?),
        media,
        max_tool_iterations: config.max_tool_iterations,
        basic_auth: config.basic_auth.clone(),
    };

    info!("Starting API server...");
    start_server(state, config.api_port).await?;

    Ok(())
}
