use serde_json::{Map, Value};
use std::path::PathBuf;
use tracing::{info, warn};
use uuid::Uuid;

/// Flat sender-id -> thread-id mapping persisted as a JSON file. The file is
/// re-read on every access and written back whole; there is no TTL, no
/// eviction and no cross-process locking. Concurrent first messages from the
/// same sender can race on thread creation (accepted limitation).
#[derive(Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the sender's thread id, creating and persisting one on first
    /// contact.
    pub fn thread_for(&self, wa_id: &str) -> std::io::Result<String> {
        let mut threads = self.load();

        if let Some(Value::String(thread_id)) = threads.get(wa_id) {
            return Ok(thread_id.clone());
        }

        let thread_id = Uuid::new_v4().to_string();
        info!("Creating new thread {} for sender {}", thread_id, wa_id);
        threads.insert(wa_id.to_string(), Value::String(thread_id.clone()));
        self.save(&threads)?;

        Ok(thread_id)
    }

    fn load(&self) -> Map<String, Value> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => match serde_json::from_str::<Value>(&contents) {
                Ok(Value::Object(map)) => map,
                _ => {
                    warn!("Session store {} is not a JSON object, starting fresh", self.path.display());
                    Map::new()
                }
            },
            Err(_) => Map::new(),
        }
    }

    fn save(&self, threads: &Map<String, Value>) -> std::io::Result<()> {
        let contents = serde_json::to_string_pretty(&Value::Object(threads.clone()))?;
        std::fs::write(&self.path, contents)
    }
}
