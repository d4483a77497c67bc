use clap::Parser;
use r2d2::Pool;
use std::sync::Arc;
use tracing::{error, info};

mod config;
mod db;
mod error;
mod llm;
mod pipeline;
mod session;
mod util;
mod web;
mod whatsapp;

use crate::config::{AppConfig, CliArgs};
use crate::db::pool::SqliteConnectionManager;
use crate::db::Database;
use crate::llm::{ChatModel, LlmManager};
use crate::pipeline::{SqlAgent, Workflow};
use crate::session::SessionStore;
use crate::util::logging::init_tracing;
use crate::web::state::AppState;
use crate::whatsapp::WhatsAppClient;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    init_tracing();

    // Parse command line arguments
    let args = CliArgs::parse();

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    info!(
        "Opening restaurant database at {}",
        config.database.connection_string
    );
    let manager = SqliteConnectionManager::new(config.database.connection_string.clone());
    let pool = Pool::builder()
        .max_size(config.database.pool_size as u32)
        .build(manager)?;
    let database = Database::new(pool);

    // Probe the schema once so a misconfigured database shows up at startup
    match database.schema_text().await {
        Ok(schema) => info!("Database schema:\n{}", schema),
        Err(e) => error!("Schema probe failed (continuing anyway): {}", e),
    }

    info!("Initializing LLM manager with backend: {}", config.llm.backend);
    let llm_manager = LlmManager::new(&config.llm)?;
    let llm: Arc<dyn ChatModel> = Arc::new(llm_manager);

    let agent = SqlAgent::new(llm, database.clone());
    let workflow = Workflow::new(agent);

    let whatsapp = WhatsAppClient::new(&config.whatsapp)?;
    let sessions = SessionStore::new(config.sessions_path.clone());

    let app_state = Arc::new(AppState::new(
        config.clone(),
        database,
        workflow,
        whatsapp,
        sessions,
    ));

    // Start the web server
    info!(
        "Starting mesa-bot server on {}:{}",
        config.web.host, config.web.port
    );
    match web::run_server(config.web, app_state).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(std::io::Error::other(e.to_string()).into());
        }
    }

    Ok(())
}
