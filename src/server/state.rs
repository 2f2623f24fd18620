//! Server state and configuration.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::editor::EditorHandle;

/// Idle editor sessions are dropped after this long.
pub const SESSION_EXPIRATION_SECS: u64 = 30 * 60;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "0.0.0.0:8080")
    pub listen_addr: String,
    pub engine: EngineConfig,
}

/// One uploaded image being edited.
pub struct EditorSession {
    pub editor: EditorHandle,
    pub file_name: String,
    pub last_accessed: Instant,
}

impl EditorSession {
    pub fn new(editor: EditorHandle, file_name: String) -> Self {
        Self {
            editor,
            file_name,
            last_accessed: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_accessed = Instant::now();
    }
}

/// Application state shared across handlers.
pub struct AppState {
    pub config: ServerConfig,
    pub sessions: RwLock<HashMap<Uuid, EditorSession>>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }
}
