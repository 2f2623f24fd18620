//! # Checklist Aggregator
//!
//! Reduces per-item completion flags into a tri-state summary. The summary
//! is always recomputed from scratch against the current checklist
//! definition; it is never patched incrementally.
//!
//! | Checked | Status |
//! |---------|--------|
//! | checklist empty | `empty` |
//! | none | `empty` |
//! | some | `partial` |
//! | all | `complete` |

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::FolioError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChecklistStatus {
    #[default]
    Empty,
    Partial,
    Complete,
}

/// One checklist item definition, owned by the user's template settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub required: bool,
}

/// Completion flag for one item, stored on the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistEntry {
    pub item_id: String,
    pub checked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecklistSummary {
    pub progress: Vec<ChecklistEntry>,
    pub status: ChecklistStatus,
}

/// Aggregate completion for `items`. Ids missing from `checked` count as unchecked;
/// ids in `checked` that are not in the checklist are ignored.
pub fn aggregate(items: &[ChecklistItem], checked: &HashMap<String, bool>) -> ChecklistSummary {
    let progress: Vec<ChecklistEntry> = items
        .iter()
        .map(|item| ChecklistEntry {
            item_id: item.id.clone(),
            checked: checked.get(&item.id).copied().unwrap_or(false),
        })
        .collect();

    let done = progress.iter().filter(|e| e.checked).count();
    let status = if progress.is_empty() || done == 0 {
        ChecklistStatus::Empty
    } else if done == progress.len() {
        ChecklistStatus::Complete
    } else {
        ChecklistStatus::Partial
    };

    ChecklistSummary { progress, status }
}

/// Flag map from a stored progress list.
pub fn checked_map(progress: &[ChecklistEntry]) -> HashMap<String, bool> {
    progress
        .iter()
        .map(|e| (e.item_id.clone(), e.checked))
        .collect()
}

// ============================================================================
// DEFINITION EDITS
// ============================================================================

/// Append a new item. The id is derived from the label and made unique.
pub fn add_item(items: &mut Vec<ChecklistItem>, label: &str, required: bool) -> Result<String, FolioError> {
    let label = label.trim();
    if label.is_empty() {
        return Err(FolioError::Validation("checklist item label is empty".into()));
    }
    let base: String = label
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();
    let base = base.trim_matches('-').to_string();
    let base = if base.is_empty() { "item".to_string() } else { base };

    let mut id = base.clone();
    let mut n = 2;
    while items.iter().any(|i| i.id == id) {
        id = format!("{}-{}", base, n);
        n += 1;
    }

    items.push(ChecklistItem {
        id: id.clone(),
        label: label.to_string(),
        required,
    });
    Ok(id)
}

/// Remove an item by id. Returns whether anything was removed.
pub fn remove_item(items: &mut Vec<ChecklistItem>, id: &str) -> bool {
    let before = items.len();
    items.retain(|i| i.id != id);
    items.len() != before
}

pub fn rename_item(items: &mut [ChecklistItem], id: &str, label: &str) -> Result<(), FolioError> {
    let label = label.trim();
    if label.is_empty() {
        return Err(FolioError::Validation("checklist item label is empty".into()));
    }
    let item = items
        .iter_mut()
        .find(|i| i.id == id)
        .ok_or_else(|| FolioError::Validation(format!("unknown checklist item '{}'", id)))?;
    item.label = label.to_string();
    Ok(())
}
