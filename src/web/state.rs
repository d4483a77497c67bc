use crate::config::AppConfig;
use crate::db::Database;
use crate::pipeline::Workflow;
use crate::session::SessionStore;
use crate::whatsapp::WhatsAppClient;

/// Shared application state for the web server.
pub struct AppState {
    pub config: AppConfig,
    pub db: Database,
    pub workflow: Workflow,
    pub whatsapp: WhatsAppClient,
    pub sessions: SessionStore,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        db: Database,
        workflow: Workflow,
        whatsapp: WhatsAppClient,
        sessions: SessionStore,
    ) -> Self {
        Self {
            config,
            db,
            workflow,
            whatsapp,
            sessions,
            startup_time: chrono::Utc::now(),
        }
    }
}
