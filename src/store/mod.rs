//! # Collaborator Stores
//!
//! Everything the engine persists or fetches goes through these traits.
//! Storage itself is not the engine's business: it only issues calls and
//! tolerates their failures and latency.
//!
//! ## Available Implementations
//!
//! - [`http`]: REST/JSON backend over reqwest
//! - [`memory`]: in-process stores with call recording and fault injection,
//!   used by tests and offline demos

pub mod http;
pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::geo::GeographyService;
use crate::report::{AppendixItem, ExportFormat, NewReport, Report, ReportPatch};
use crate::template::Template;
use crate::user_template::{UserTemplate, UserTemplatePatch};

/// Failure of a single collaborator call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The record does not exist (HTTP 404).
    #[error("{0} not found")]
    NotFound(String),

    /// The backend answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The request never completed (connection, timeout).
    #[error("transport failure: {0}")]
    Transport(String),

    /// The response body could not be decoded.
    #[error("invalid response: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn fetch_all(&self, active_only: bool) -> Result<Vec<Template>, StoreError>;

    async fn fetch(&self, id: &str) -> Result<Template, StoreError>;

    /// Detect variable names in an uploaded document.
    async fn analyze_document(&self, file_name: &str, bytes: Vec<u8>)
    -> Result<Vec<String>, StoreError>;
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn create(&self, new: &NewReport) -> Result<Report, StoreError>;

    async fn fetch(&self, id: &str) -> Result<Report, StoreError>;

    async fn update(&self, id: &str, patch: &ReportPatch) -> Result<(), StoreError>;

    /// Render the report (with its appendix) to a document.
    async fn generate(&self, id: &str, format: ExportFormat) -> Result<Vec<u8>, StoreError>;

    async fn list_appendix(&self, id: &str) -> Result<Vec<AppendixItem>, StoreError>;

    async fn upload_appendix(
        &self,
        id: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<AppendixItem, StoreError>;

    /// Persist a new appendix order given as item ids.
    async fn reorder_appendix(&self, id: &str, order: &[String]) -> Result<(), StoreError>;

    async fn delete_appendix(&self, id: &str, item_id: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait UserTemplateStore: Send + Sync {
    /// Returns [`StoreError::NotFound`] when the user has no settings for the template yet.
    async fn fetch_by_template(&self, template_id: &str) -> Result<UserTemplate, StoreError>;

    async fn create(&self, template_id: &str) -> Result<UserTemplate, StoreError>;

    async fn patch(&self, id: &str, patch: &UserTemplatePatch) -> Result<(), StoreError>;
}

#[async_trait]
pub trait UploadStore: Send + Sync {
    /// Upload an image, returning the URL to reference it by.
    async fn upload_image(
        &self,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, StoreError>;
}

/// Pulls variable values out of an uploaded PDF.
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract_values(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<BTreeMap<String, String>, StoreError>;
}

/// The full set of collaborators a workflow talks to.
#[derive(Clone)]
pub struct Stores {
    pub templates: Arc<dyn TemplateStore>,
    pub reports: Arc<dyn ReportStore>,
    pub user_templates: Arc<dyn UserTemplateStore>,
    pub uploads: Arc<dyn UploadStore>,
    pub extractor: Arc<dyn DocumentExtractor>,
    pub geography: Arc<dyn GeographyService>,
}
