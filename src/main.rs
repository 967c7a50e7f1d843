use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use chatverse::ai::{AiResponder, HttpResponder, KeywordResponder};
use chatverse::bus::{MemoryStore, MessageStore};
use chatverse::{ChatCore, Config};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            Config::default()
        }
    };

    // Initialize logging
    if let Err(e) = chatverse::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        chatverse::logging::init_console_only(&config.logging.level);
    }

    info!("Chatverse - real-time room and messaging core");

    let store = match open_store(&config).await {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Failed to open message store: {e}");
            std::process::exit(1);
        }
    };

    let responder: Option<Arc<dyn AiResponder>> = if config.ai.enabled {
        match &config.ai.endpoint {
            Some(endpoint) => {
                info!(endpoint = %endpoint, "AI responder: http");
                Some(Arc::new(HttpResponder::new(
                    endpoint.clone(),
                    Duration::from_secs(config.ai.timeout_secs),
                )))
            }
            None => {
                info!("AI responder: keyword");
                Some(Arc::new(KeywordResponder::new()))
            }
        }
    } else {
        None
    };

    let core = ChatCore::new(&config, store, responder);
    core.start_maintenance(&config);

    let router = chatverse::create_router(core, &config.server.cors_origins);
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };
    info!("Listening on {addr}");

    if let Err(e) = axum::serve(listener, router).await {
        eprintln!("Server error: {e}");
        std::process::exit(1);
    }
}

async fn open_store(config: &Config) -> chatverse::Result<Arc<dyn MessageStore>> {
    match config.history.backend.as_str() {
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            info!(path = %config.history.path, "Message store: sqlite");
            if let Some(parent) = std::path::Path::new(&config.history.path).parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let store = chatverse::SqliteStore::open(&config.history.path).await?;
            Ok(Arc::new(store))
        }
        _ => {
            info!("Message store: memory");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
