mod bot;
mod config;
mod webhook;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::prelude::*;

use bot::assistant;
use bot::catalog::Catalog;
use bot::whatsapp::WhatsAppClient;
use bot::{ConversationRouter, RouterSettings, Store};
use config::Config;
use webhook::AppState;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "citabot.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("citabot.log"))
        .expect("Failed to open log file");
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .init();

    info!("🚀 Starting citabot...");
    info!("Loaded config from {config_path}");
    if config.operator_number.is_none() {
        info!("No operator number configured; booking alerts disabled");
    }

    let store = match Store::open(&config.data_dir.join("citabot.db")) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let catalog = Catalog::load_or_default(&config.catalog_path);
    let outbound = Arc::new(WhatsAppClient::new(
        config.whatsapp_token.clone(),
        config.phone_number_id.clone(),
    ));
    let assistant = Arc::new(assistant::Client::new(config.anthropic_api_key.clone()));

    let router = Arc::new(ConversationRouter::new(
        store,
        catalog,
        outbound,
        assistant,
        RouterSettings {
            persona: config.personality.clone(),
            context_window: config.context_window,
            operator_number: config.operator_number.clone(),
            capture_service: config.capture_service,
        },
    ));

    let state = AppState {
        verify_token: config.verify_token.clone(),
        router,
    };

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };
    info!("Listening on {addr}");

    if let Err(e) = axum::serve(listener, webhook::app(state)).await {
        eprintln!("Server error: {e}");
        std::process::exit(1);
    }
}
