//! # Report Model
//!
//! A report is one filled-in instance of a template. It carries the values
//! mapping, the geography snapshot, checklist progress and appendix items,
//! and moves through a fixed review lifecycle:
//!
//! ```text
//! Draft ──▶ Initial Review ──▶ Final Review ──▶ Submitted
//! ```
//!
//! The engine only ever moves a report forward along that line. Export is
//! allowed from Final Review and Submitted.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checklist::{ChecklistEntry, ChecklistStatus};

/// Geography snapshot: attribute name → value (province, region, sheet, ...).
pub type KmlSnapshot = BTreeMap<String, String>;

// ============================================================================
// STATUS LIFECYCLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    #[default]
    Draft,
    InitialReview,
    FinalReview,
    Submitted,
    /// Set by an administrator outside the engine. Terminal, never exportable.
    Withdrawn,
}

impl ReportStatus {
    /// The forward-only review order.
    pub const LIFECYCLE: [ReportStatus; 4] = [
        ReportStatus::Draft,
        ReportStatus::InitialReview,
        ReportStatus::FinalReview,
        ReportStatus::Submitted,
    ];

    /// Next status in the lifecycle, or `None` at the end (and for `Withdrawn`).
    pub fn next(self) -> Option<Self> {
        let i = self.rank()?;
        Self::LIFECYCLE.get(i + 1).copied()
    }

    /// Position in [`Self::LIFECYCLE`].
    pub fn rank(self) -> Option<usize> {
        Self::LIFECYCLE.iter().position(|s| *s == self)
    }

    pub fn allows_export(self) -> bool {
        matches!(self, ReportStatus::FinalReview | ReportStatus::Submitted)
    }

    /// Whether moving to `to` goes strictly forward in the lifecycle.
    pub fn can_move_to(self, to: ReportStatus) -> bool {
        match (self.rank(), to.rank()) {
            (Some(from), Some(to)) => to > from,
            _ => false,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ReportStatus::Draft => "Draft",
            ReportStatus::InitialReview => "Initial Review",
            ReportStatus::FinalReview => "Final Review",
            ReportStatus::Submitted => "Submitted",
            ReportStatus::Withdrawn => "Withdrawn",
        }
    }
}

// ============================================================================
// APPENDIX
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppendixKind {
    Image,
    Pdf,
}

impl AppendixKind {
    /// Classify an upload by file name. Returns `None` for unsupported types.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let mime = mime_guess::from_path(name).first()?;
        if mime.type_() == mime_guess::mime::IMAGE {
            Some(AppendixKind::Image)
        } else if mime.subtype() == mime_guess::mime::PDF {
            Some(AppendixKind::Pdf)
        } else {
            None
        }
    }
}

/// An image or PDF attached after the rendered body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendixItem {
    pub id: String,
    pub file_name: String,
    pub kind: AppendixKind,
    /// Stored location of the original file.
    pub path: String,
    /// Pages in a PDF; images count as one page.
    #[serde(default)]
    pub page_count: Option<u32>,
    #[serde(default)]
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl AppendixItem {
    pub fn pages(&self) -> u32 {
        match self.kind {
            AppendixKind::Image => 1,
            AppendixKind::Pdf => self.page_count.unwrap_or(1).max(1),
        }
    }

    /// Paths of the page previews shown in the appendix list.
    ///
    /// Images preview as themselves. A PDF at `dir/scan.pdf` with three pages
    /// previews as `dir/scan-page-1.png` .. `dir/scan-page-3.png`.
    pub fn preview_paths(&self) -> Vec<PathBuf> {
        let path = Path::new(&self.path);
        match self.kind {
            AppendixKind::Image => vec![path.to_path_buf()],
            AppendixKind::Pdf => {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| self.id.clone());
                let dir = path.parent().unwrap_or_else(|| Path::new(""));
                (1..=self.pages())
                    .map(|n| dir.join(format!("{}-page-{}.png", stem, n)))
                    .collect()
            }
        }
    }
}

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub template_id: String,
    pub title: String,
    #[serde(default)]
    pub status: ReportStatus,
    #[serde(default)]
    pub values: BTreeMap<String, String>,
    #[serde(default)]
    pub kml_data: Option<KmlSnapshot>,
    #[serde(default)]
    pub checklist_progress: Vec<ChecklistEntry>,
    #[serde(default)]
    pub checklist_status: ChecklistStatus,
    #[serde(default)]
    pub appendix: Vec<AppendixItem>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Report {
    /// Copy every field present in `patch` onto this report.
    pub fn apply(&mut self, patch: &ReportPatch) {
        if let Some(values) = &patch.values {
            self.values = values.clone();
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(kml) = &patch.kml_data {
            self.kml_data = Some(kml.clone());
        }
        if let Some(progress) = &patch.checklist_progress {
            self.checklist_progress = progress.clone();
        }
        if let Some(status) = patch.checklist_status {
            self.checklist_status = status;
        }
    }
}

/// Fields needed to create a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReport {
    pub template_id: String,
    pub title: String,
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

/// Partial update. Absent fields are left untouched by the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ReportStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kml_data: Option<KmlSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checklist_progress: Option<Vec<ChecklistEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checklist_status: Option<ChecklistStatus>,
}

impl ReportPatch {
    pub fn values(values: BTreeMap<String, String>) -> Self {
        Self {
            values: Some(values),
            ..Default::default()
        }
    }

    pub fn status(status: ReportStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

/// Output formats the report store can render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Pdf,
    Docx,
}

impl ExportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Pdf => "pdf",
            ExportFormat::Docx => "docx",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pdf" => Some(ExportFormat::Pdf),
            "docx" => Some(ExportFormat::Docx),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_walks_lifecycle() {
        assert_eq!(ReportStatus::Draft.next(), Some(ReportStatus::InitialReview));
        assert_eq!(ReportStatus::InitialReview.next(), Some(ReportStatus::FinalReview));
        assert_eq!(ReportStatus::FinalReview.next(), Some(ReportStatus::Submitted));
        assert_eq!(ReportStatus::Submitted.next(), None);
        assert_eq!(ReportStatus::Withdrawn.next(), None);
    }

    #[test]
    fn test_export_gate() {
        let allowed: Vec<ReportStatus> = ReportStatus::LIFECYCLE
            .iter()
            .copied()
            .filter(|s| s.allows_export())
            .collect();
        assert_eq!(allowed, vec![ReportStatus::FinalReview, ReportStatus::Submitted]);
        assert!(!ReportStatus::Withdrawn.allows_export());
    }

    #[test]
    fn test_never_moves_backwards() {
        assert!(ReportStatus::Draft.can_move_to(ReportStatus::Submitted));
        assert!(!ReportStatus::FinalReview.can_move_to(ReportStatus::InitialReview));
        assert!(!ReportStatus::Submitted.can_move_to(ReportStatus::Submitted));
        assert!(!ReportStatus::Withdrawn.can_move_to(ReportStatus::Submitted));
    }

    #[test]
    fn test_status_wire_names() {
        let json = serde_json::to_string(&ReportStatus::FinalReview).unwrap();
        assert_eq!(json, "\"final_review\"");
    }

    #[test]
    fn test_pdf_preview_paths() {
        let item = AppendixItem {
            id: "a1".into(),
            file_name: "scan.pdf".into(),
            kind: AppendixKind::Pdf,
            path: "uploads/r1/scan.pdf".into(),
            page_count: Some(3),
            uploaded_at: None,
        };
        let paths = item.preview_paths();
        assert_eq!(paths.len(), 3);
        assert_eq!(paths[2], PathBuf::from("uploads/r1/scan-page-3.png"));
    }

    #[test]
    fn test_appendix_kind_from_name() {
        assert_eq!(AppendixKind::from_file_name("photo.JPG"), Some(AppendixKind::Image));
        assert_eq!(AppendixKind::from_file_name("plan.pdf"), Some(AppendixKind::Pdf));
        assert_eq!(AppendixKind::from_file_name("notes.txt"), None);
    }

    #[test]
    fn test_patch_skips_absent_fields() {
        let patch = ReportPatch::status(ReportStatus::Submitted);
        let json = serde_json::to_string(&patch).unwrap();
        assert_eq!(json, r#"{"status":"submitted"}"#);
    }
}
