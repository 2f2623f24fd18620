//! Per-user template settings: saved text snippets, saved dropdown values and
//! the checklist definition.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::FolioError;
use crate::checklist::ChecklistItem;
use crate::store::UserTemplateStore;

/// Canonical variable key → saved entries.
pub type SavedEntries = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTemplate {
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    pub template_id: String,
    #[serde(default)]
    pub variable_text_templates: SavedEntries,
    #[serde(default)]
    pub variable_select_options: SavedEntries,
    #[serde(default)]
    pub checklist: Vec<ChecklistItem>,
}

impl UserTemplate {
    /// Fresh settings with empty collections.
    pub fn empty(id: impl Into<String>, user_id: impl Into<String>, template_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            template_id: template_id.into(),
            ..Default::default()
        }
    }
}

/// Partial update of a user template. Present fields replace the stored value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTemplatePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable_text_templates: Option<SavedEntries>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable_select_options: Option<SavedEntries>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checklist: Option<Vec<ChecklistItem>>,
}

/// Fetch the user's settings for a template, creating empty ones on first access.
///
/// A not-found answer is expected for new users and is not an error.
pub async fn load_or_create(
    store: &dyn UserTemplateStore,
    template_id: &str,
) -> Result<UserTemplate, FolioError> {
    match store.fetch_by_template(template_id).await {
        Ok(ut) => {
            debug!(template_id, user_template = %ut.id, "loaded user template");
            Ok(ut)
        }
        Err(e) if e.is_not_found() => {
            info!(template_id, "no user template yet, creating one");
            Ok(store.create(template_id).await?)
        }
        Err(e) => Err(e.into()),
    }
}
