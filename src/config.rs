//! # Engine Configuration
//!
//! Runtime settings shared by the workflow, the HTTP collaborators and the
//! image editor. The CLI fills this from flags or `FOLIO_*` environment
//! variables; tests use [`EngineConfig::default`].

use serde::Deserialize;
use std::time::Duration;

fn default_api_base_url() -> String {
    "http://localhost:3000/api".to_string()
}

fn default_geo_base_url() -> String {
    "http://localhost:3000/geo".to_string()
}

fn default_autosave_ms() -> u64 {
    500
}

fn default_max_dimension() -> u32 {
    2048
}

fn default_undo_limit() -> usize {
    50
}

fn default_timeout_secs() -> u64 {
    30
}

/// Engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Base URL of the template/report/user-template/upload REST API.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Base URL of the geography feature service.
    #[serde(default = "default_geo_base_url")]
    pub geo_base_url: String,
    /// Quiet period before buffered value edits are saved.
    #[serde(default = "default_autosave_ms")]
    pub autosave_delay_ms: u64,
    /// Longest edge the image editor keeps in its working surface.
    #[serde(default = "default_max_dimension")]
    pub editor_max_dimension: u32,
    /// Maximum number of undo snapshots kept by the image editor.
    #[serde(default = "default_undo_limit")]
    pub undo_limit: usize,
    /// Timeout applied to every collaborator HTTP request.
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl EngineConfig {
    pub fn autosave_delay(&self) -> Duration {
        Duration::from_millis(self.autosave_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            geo_base_url: default_geo_base_url(),
            autosave_delay_ms: default_autosave_ms(),
            editor_max_dimension: default_max_dimension(),
            undo_limit: default_undo_limit(),
            request_timeout_secs: default_timeout_secs(),
        }
    }
}
