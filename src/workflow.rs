//! # Report Workflow
//!
//! Drives one editing session of one report through its steps:
//!
//! ```text
//! TemplateSelect ─▶ [GeoEntry] ─▶ VariableFill ─▶ Preview
//! ```
//!
//! `GeoEntry` exists only for templates that require geography. Every
//! transition is all-or-nothing: when a collaborator call fails the error
//! is returned and the step, values and report stay as they were, so the
//! caller can simply retry.
//!
//! Alongside the steps the workflow owns the report's status lifecycle
//! (explicit advance, export gating), the debounced autosave of values, the
//! checklist, saved snippets through [`VariableLibrary`], the geography
//! cascade and image commits from the raster editor.
//!
//! Background failures that have no caller to return to (autosave, a
//! geography lookup, the status update after a download) are pushed onto
//! [`Notices`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use image::ImageFormat;
use tracing::{debug, error, info, warn};

use crate::FolioError;
use crate::checklist::{self, ChecklistItem, ChecklistStatus, ChecklistSummary};
use crate::config::EngineConfig;
use crate::debounce::Debouncer;
use crate::editor::{EditorHandle, EditorOptions, RasterEditor};
use crate::geo::{GeoCascade, GeoResolver};
use crate::notice::{Notice, Notices};
use crate::report::{
    AppendixItem, AppendixKind, ExportFormat, KmlSnapshot, NewReport, Report, ReportPatch,
    ReportStatus,
};
use crate::session::SessionContext;
use crate::store::{ReportStore, StoreError, Stores};
use crate::template::{ImportedVariable, Template, VariableType, imported_from_names};
use crate::user_template::{UserTemplatePatch, load_or_create};
use crate::variables::{SavedKind, VariableLibrary, canonical_key, resolve_value};

// ============================================================================
// STEPS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    TemplateSelect,
    GeoEntry,
    VariableFill,
    Preview,
}

impl Step {
    /// 1-based position shown to the user. Geography shifts the later steps by one.
    pub fn number(self, requires_kml: bool) -> u8 {
        let shift = u8::from(requires_kml);
        match self {
            Step::TemplateSelect => 1,
            Step::GeoEntry => 2,
            Step::VariableFill => 2 + shift,
            Step::Preview => 3 + shift,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Step::TemplateSelect => "template",
            Step::GeoEntry => "geography",
            Step::VariableFill => "variables",
            Step::Preview => "preview",
        }
    }
}

// ============================================================================
// PREVIEW GATE
// ============================================================================

/// Allows at most one preview render at a time. Clones share the gate.
#[derive(Debug, Clone, Default)]
pub struct PreviewGate {
    busy: Arc<AtomicBool>,
}

impl PreviewGate {
    /// Claim the gate, or `None` if a render is already in flight.
    pub fn try_begin(&self) -> Option<PreviewTicket> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PreviewTicket {
                busy: self.busy.clone(),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the gate when dropped.
#[derive(Debug)]
pub struct PreviewTicket {
    busy: Arc<AtomicBool>,
}

impl Drop for PreviewTicket {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone)]
pub struct RenderedPreview {
    pub report_id: String,
    pub bytes: Vec<u8>,
    pub rendered_at: DateTime<Utc>,
}

// ============================================================================
// AUTOSAVE
// ============================================================================

struct AutosaveJob {
    report_id: String,
    patch: ReportPatch,
}

fn autosave_writer(
    reports: Arc<dyn ReportStore>,
    notices: Notices,
    delay: Duration,
) -> Debouncer<AutosaveJob> {
    Debouncer::new(delay, move |job: AutosaveJob| {
        let reports = reports.clone();
        let notices = notices.clone();
        async move {
            match reports.update(&job.report_id, &job.patch).await {
                Ok(()) => debug!(report = %job.report_id, "autosaved values"),
                Err(e) => {
                    error!(report = %job.report_id, error = %e, "autosave failed");
                    notices.push(Notice::error(format!("Autosave failed: {}", e)));
                }
            }
        }
    })
}

// ============================================================================
// WORKFLOW
// ============================================================================

pub struct Workflow {
    session: SessionContext,
    stores: Stores,
    config: EngineConfig,
    notices: Notices,
    step: Step,
    title: String,
    template: Option<Template>,
    report: Option<Report>,
    /// Live values; the report record holds what was last persisted.
    values: BTreeMap<String, String>,
    checked: HashMap<String, bool>,
    library: Option<VariableLibrary>,
    geo: GeoResolver,
    extracting: bool,
    autosave: Debouncer<AutosaveJob>,
    preview_gate: PreviewGate,
    preview: Option<RenderedPreview>,
}

fn no_template() -> FolioError {
    FolioError::Validation("select a template first".into())
}

fn no_report() -> FolioError {
    FolioError::Validation("no report has been created yet".into())
}

fn no_settings() -> FolioError {
    FolioError::Validation("template settings are not loaded yet".into())
}

impl Workflow {
    /// Start a new session on the template-selection step.
    ///
    /// Spawns the autosave task, so this must run inside a tokio runtime.
    pub fn new(session: SessionContext, stores: Stores, config: EngineConfig) -> Self {
        let notices = Notices::new();
        let autosave = autosave_writer(stores.reports.clone(), notices.clone(), config.autosave_delay());
        Self {
            geo: GeoResolver::new(stores.geography.clone()),
            session,
            stores,
            config,
            notices,
            step: Step::TemplateSelect,
            title: String::new(),
            template: None,
            report: None,
            values: BTreeMap::new(),
            checked: HashMap::new(),
            library: None,
            extracting: false,
            autosave,
            preview_gate: PreviewGate::default(),
            preview: None,
        }
    }

    // ── accessors ───────────────────────────────────────────────────────

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn step_number(&self) -> u8 {
        self.step.number(self.requires_kml())
    }

    pub fn requires_kml(&self) -> bool {
        self.template.as_ref().is_some_and(|t| t.requires_kml)
    }

    pub fn template(&self) -> Option<&Template> {
        self.template.as_ref()
    }

    pub fn report(&self) -> Option<&Report> {
        self.report.as_ref()
    }

    pub fn status(&self) -> Option<ReportStatus> {
        self.report.as_ref().map(|r| r.status)
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    pub fn notices(&self) -> &Notices {
        &self.notices
    }

    pub fn drain_notices(&self) -> Vec<Notice> {
        self.notices.drain()
    }

    pub fn geo(&self) -> &GeoCascade {
        self.geo.cascade()
    }

    pub fn library(&self) -> Option<&VariableLibrary> {
        self.library.as_ref()
    }

    pub fn is_extracting(&self) -> bool {
        self.extracting
    }

    pub fn preview(&self) -> Option<&RenderedPreview> {
        self.preview.as_ref()
    }

    // ── template selection ──────────────────────────────────────────────

    pub async fn available_templates(&self) -> Result<Vec<Template>, FolioError> {
        Ok(self.stores.templates.fetch_all(true).await?)
    }

    /// Choose the template. Not allowed once the report exists.
    pub async fn select_template(&mut self, template_id: &str) -> Result<(), FolioError> {
        if self.report.is_some() {
            return Err(FolioError::Conflict(
                "the template of an existing report cannot be changed".into(),
            ));
        }
        let template = self.stores.templates.fetch(template_id).await?;
        info!(template = %template.id, requires_kml = template.requires_kml, "template selected");
        self.template = Some(template);
        self.library = None;
        Ok(())
    }

    pub fn set_title(&mut self, title: &str) {
        self.title = title.to_string();
    }

    /// Detect variables in an uploaded template document.
    pub async fn analyze_document(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<Vec<ImportedVariable>, FolioError> {
        let names = self.stores.templates.analyze_document(file_name, bytes).await?;
        debug!(file_name, detected = names.len(), "analyzed template document");
        Ok(imported_from_names(&names))
    }

    // ── transitions ─────────────────────────────────────────────────────

    /// Move to the following step, persisting what the current step collected.
    pub async fn next(&mut self) -> Result<Step, FolioError> {
        let next = match self.step {
            Step::TemplateSelect => self.leave_template_select().await?,
            Step::GeoEntry => self.leave_geo_entry().await?,
            Step::VariableFill => self.enter_preview().await?,
            Step::Preview => Step::Preview,
        };
        if next != self.step {
            info!(from = self.step.label(), to = next.label(), "workflow step");
            self.step = next;
        }
        Ok(next)
    }

    /// Move to the previous step. Never returns to template selection once
    /// the report exists.
    pub fn back(&mut self) -> Step {
        let previous = match self.step {
            Step::Preview => Step::VariableFill,
            Step::VariableFill if self.requires_kml() => Step::GeoEntry,
            Step::VariableFill | Step::GeoEntry | Step::TemplateSelect => Step::TemplateSelect,
        };
        if previous == Step::TemplateSelect && self.report.is_some() {
            debug!(step = self.step.label(), "report exists, staying put");
            return self.step;
        }
        self.step = previous;
        previous
    }

    async fn leave_template_select(&mut self) -> Result<Step, FolioError> {
        if self.title.trim().is_empty() {
            return Err(FolioError::Validation("a report title is required".into()));
        }
        let template = self.template.as_ref().ok_or_else(no_template)?;
        let template_id = template.id.clone();
        let requires_kml = template.requires_kml;

        // Settings first: once the report exists the template is fixed.
        self.ensure_library(&template_id).await?;
        self.ensure_report().await?;

        Ok(if requires_kml {
            Step::GeoEntry
        } else {
            Step::VariableFill
        })
    }

    async fn leave_geo_entry(&mut self) -> Result<Step, FolioError> {
        if self.extracting {
            return Err(FolioError::Validation(
                "wait for the PDF extraction to finish".into(),
            ));
        }
        let report_id = self.ensure_report().await?;
        let snapshot = self.geo.cascade().snapshot();
        let mut values = self.values.clone();
        if let Some(template) = &self.template {
            apply_geography(&mut values, template, &snapshot);
        }

        self.autosave.flush().await;
        let patch = ReportPatch {
            values: Some(values.clone()),
            kml_data: Some(snapshot),
            ..Default::default()
        };
        self.stores.reports.update(&report_id, &patch).await?;
        debug!(report = %report_id, complete = self.geo.cascade().is_complete(), "saved geography");

        self.values = values;
        if let Some(report) = &mut self.report {
            report.apply(&patch);
        }
        Ok(Step::VariableFill)
    }

    async fn enter_preview(&mut self) -> Result<Step, FolioError> {
        self.autosave.flush().await;
        let report_id = self.ensure_report().await?;
        self.save_values(&report_id).await?;
        self.render_preview(&report_id).await?;
        Ok(Step::Preview)
    }

    /// Create the report unless this session already has one.
    async fn ensure_report(&mut self) -> Result<String, FolioError> {
        if let Some(report) = &self.report {
            return Ok(report.id.clone());
        }
        let template = self.template.as_ref().ok_or_else(no_template)?;
        let title = self.title.trim();
        if title.is_empty() {
            return Err(FolioError::Validation("a report title is required".into()));
        }
        let new = NewReport {
            template_id: template.id.clone(),
            title: title.to_string(),
            values: self.values.clone(),
        };
        let report = self.stores.reports.create(&new).await?;
        info!(
            report = %report.id,
            template = %report.template_id,
            user = %self.session.user_id,
            role = ?self.session.role,
            "report created"
        );
        let id = report.id.clone();
        self.report = Some(report);
        Ok(id)
    }

    async fn ensure_library(&mut self, template_id: &str) -> Result<(), FolioError> {
        if self
            .library
            .as_ref()
            .is_some_and(|l| l.user_template().template_id == template_id)
        {
            return Ok(());
        }
        let user_template = load_or_create(self.stores.user_templates.as_ref(), template_id).await?;
        self.library = Some(VariableLibrary::new(
            user_template,
            self.stores.user_templates.clone(),
        ));
        Ok(())
    }

    /// Persist values together with the checklist they were edited alongside.
    async fn save_values(&mut self, report_id: &str) -> Result<(), FolioError> {
        let summary = self.checklist_summary();
        let patch = ReportPatch {
            values: Some(self.values.clone()),
            checklist_progress: Some(summary.progress),
            checklist_status: Some(summary.status),
            ..Default::default()
        };
        self.stores.reports.update(report_id, &patch).await?;
        if let Some(report) = &mut self.report {
            report.apply(&patch);
        }
        Ok(())
    }

    // ── loading ─────────────────────────────────────────────────────────

    /// Open an existing report straight on the variables step.
    pub async fn load_report(&mut self, report_id: &str) -> Result<(), FolioError> {
        self.autosave.flush().await;
        let report = self.stores.reports.fetch(report_id).await?;
        let template = self.stores.templates.fetch(&report.template_id).await?;
        let user_template = load_or_create(self.stores.user_templates.as_ref(), &template.id).await?;
        info!(report = %report.id, status = report.status.label(), "report loaded");

        self.title = report.title.clone();
        self.values = report.values.clone();
        self.checked = checklist::checked_map(&report.checklist_progress);
        self.library = Some(VariableLibrary::new(
            user_template,
            self.stores.user_templates.clone(),
        ));
        self.preview = None;
        self.step = Step::VariableFill;
        self.geo = GeoResolver::new(self.stores.geography.clone());
        let kml = report.kml_data.clone();
        self.template = Some(template);
        self.report = Some(report);

        if let Some(snapshot) = kml {
            self.geo.restore(&snapshot).await;
            self.surface_geo_error();
        }
        Ok(())
    }

    // ── values ──────────────────────────────────────────────────────────

    /// Set a value by key and schedule an autosave.
    pub fn set_value(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
        if let Some(report) = &self.report {
            self.autosave.push(AutosaveJob {
                report_id: report.id.clone(),
                patch: ReportPatch::values(self.values.clone()),
            });
        }
    }

    /// Set the value of a template variable under its canonical key.
    pub fn set_variable(&mut self, var_id: &str, value: impl Into<String>) -> Result<(), FolioError> {
        let key = self.variable_key(var_id)?;
        self.set_value(&key, value);
        Ok(())
    }

    /// Current value of a template variable, honouring legacy keys.
    pub fn variable_value(&self, var_id: &str) -> Option<&str> {
        let template = self.template.as_ref()?;
        let var = template.variable_by_id(var_id)?;
        resolve_value(&self.values, template, &var)
    }

    fn variable_key(&self, var_id: &str) -> Result<String, FolioError> {
        let template = self.template.as_ref().ok_or_else(no_template)?;
        template
            .variable_by_id(var_id)
            .map(|var| canonical_key(&var))
            .ok_or_else(|| FolioError::Validation(format!("unknown variable {}", var_id)))
    }

    /// Names of required variables that are still blank. Informational only.
    pub fn missing_required(&self) -> Vec<String> {
        let Some(template) = &self.template else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut missing = Vec::new();
        for var in template.variables() {
            if !var.required || !seen.insert(canonical_key(&var)) {
                continue;
            }
            if resolve_value(&self.values, template, &var).is_none_or(|v| v.trim().is_empty()) {
                missing.push(var.name.to_string());
            }
        }
        missing
    }

    // ── saved snippets and dropdown values ──────────────────────────────

    pub fn saved_entries(&self, kind: SavedKind, var_id: &str) -> Vec<String> {
        match (&self.library, &self.template) {
            (Some(library), Some(template)) => library.entries(kind, template, var_id),
            _ => Vec::new(),
        }
    }

    pub fn dropdown_choices(&self, var_id: &str) -> Vec<String> {
        match (&self.library, &self.template) {
            (Some(library), Some(template)) => library.dropdown_choices(template, var_id),
            (None, Some(template)) => template
                .variable_by_id(var_id)
                .map(|v| v.options.to_vec())
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    pub async fn add_saved_entry(
        &mut self,
        kind: SavedKind,
        var_id: &str,
        text: &str,
    ) -> Result<(), FolioError> {
        let template = self.template.as_ref().ok_or_else(no_template)?;
        let library = self.library.as_mut().ok_or_else(no_settings)?;
        library.add(kind, template, var_id, text).await
    }

    pub async fn delete_saved_entry(
        &mut self,
        kind: SavedKind,
        var_id: &str,
        index: usize,
    ) -> Result<(), FolioError> {
        let template = self.template.as_ref().ok_or_else(no_template)?;
        let library = self.library.as_mut().ok_or_else(no_settings)?;
        library.delete(kind, template, var_id, index).await
    }

    // ── checklist ───────────────────────────────────────────────────────

    pub fn checklist(&self) -> &[ChecklistItem] {
        self.library
            .as_ref()
            .map(|l| l.user_template().checklist.as_slice())
            .unwrap_or(&[])
    }

    pub fn checklist_summary(&self) -> ChecklistSummary {
        checklist::aggregate(self.checklist(), &self.checked)
    }

    /// Tick or untick an item. Values, progress and status are saved in one call.
    pub async fn set_checked(
        &mut self,
        item_id: &str,
        checked: bool,
    ) -> Result<ChecklistStatus, FolioError> {
        if !self.checklist().iter().any(|item| item.id == item_id) {
            return Err(FolioError::Validation(format!(
                "unknown checklist item {}",
                item_id
            )));
        }
        let mut flags = self.checked.clone();
        flags.insert(item_id.to_string(), checked);
        let summary = checklist::aggregate(self.checklist(), &flags);

        if let Some(report_id) = self.report.as_ref().map(|r| r.id.clone()) {
            self.autosave.flush().await;
            let patch = ReportPatch {
                values: Some(self.values.clone()),
                checklist_progress: Some(summary.progress.clone()),
                checklist_status: Some(summary.status),
                ..Default::default()
            };
            self.stores.reports.update(&report_id, &patch).await?;
            if let Some(report) = &mut self.report {
                report.apply(&patch);
            }
        }
        self.checked = flags;
        Ok(summary.status)
    }

    pub async fn add_checklist_item(&mut self, label: &str, required: bool) -> Result<String, FolioError> {
        let mut items = self.checklist().to_vec();
        let id = checklist::add_item(&mut items, label, required)?;
        self.save_checklist(items).await?;
        Ok(id)
    }

    pub async fn remove_checklist_item(&mut self, item_id: &str) -> Result<(), FolioError> {
        let mut items = self.checklist().to_vec();
        if !checklist::remove_item(&mut items, item_id) {
            return Err(FolioError::Validation(format!(
                "unknown checklist item {}",
                item_id
            )));
        }
        self.save_checklist(items).await?;
        self.checked.remove(item_id);
        Ok(())
    }

    pub async fn rename_checklist_item(&mut self, item_id: &str, label: &str) -> Result<(), FolioError> {
        let mut items = self.checklist().to_vec();
        checklist::rename_item(&mut items, item_id, label)?;
        self.save_checklist(items).await
    }

    /// Persist a new checklist definition, then the report's recomputed progress.
    async fn save_checklist(&mut self, items: Vec<ChecklistItem>) -> Result<(), FolioError> {
        let library = self.library.as_mut().ok_or_else(no_settings)?;
        let id = library.user_template().id.clone();
        let patch = UserTemplatePatch {
            checklist: Some(items.clone()),
            ..Default::default()
        };
        library.store().patch(&id, &patch).await?;
        library.user_template_mut().checklist = items;
        self.sync_checklist_progress().await;
        Ok(())
    }

    /// The definition is already saved at this point, so a failure here is
    /// reported without undoing it.
    async fn sync_checklist_progress(&mut self) {
        let Some(report_id) = self.report.as_ref().map(|r| r.id.clone()) else {
            return;
        };
        let summary = self.checklist_summary();
        let patch = ReportPatch {
            checklist_progress: Some(summary.progress),
            checklist_status: Some(summary.status),
            ..Default::default()
        };
        match self.stores.reports.update(&report_id, &patch).await {
            Ok(()) => {
                if let Some(report) = &mut self.report {
                    report.apply(&patch);
                }
            }
            Err(e) => {
                warn!(report = %report_id, error = %e, "checklist progress not saved");
                self.notices.push(Notice::error(format!(
                    "Checklist saved, but report progress was not updated: {}",
                    e
                )));
            }
        }
    }

    // ── geography ───────────────────────────────────────────────────────

    pub async fn select_province(&mut self, province: &str) {
        self.geo.select_province(province).await;
        self.surface_geo_error();
    }

    pub async fn select_region(&mut self, village_code: &str) {
        self.geo.select_region(village_code).await;
        self.surface_geo_error();
    }

    pub async fn select_parish(&mut self, parish: &str) {
        self.geo.select_parish(parish).await;
        self.surface_geo_error();
    }

    pub async fn select_sheet(&mut self, sheet: &str) {
        self.geo.select_sheet(sheet).await;
        self.surface_geo_error();
    }

    pub fn select_plan(&mut self, plan: &str) {
        self.geo.select_plan(plan);
    }

    pub fn select_section(&mut self, section: &str) {
        self.geo.select_section(section);
    }

    /// Report a failed lookup once. The form stays usable.
    fn surface_geo_error(&mut self) {
        if let Some(e) = self.geo.take_error() {
            self.notices.push(Notice::warning(e.to_string()));
        }
    }

    // ── PDF extraction ──────────────────────────────────────────────────

    /// Mark an extraction as running. Leaving geography entry waits for it.
    pub fn begin_extraction(&mut self) -> Result<(), FolioError> {
        if self.extracting {
            return Err(FolioError::Conflict("an extraction is already running".into()));
        }
        self.extracting = true;
        Ok(())
    }

    /// Merge an extraction result into the values. Returns how many values
    /// were taken. On failure the values are left alone.
    pub fn finish_extraction(
        &mut self,
        result: Result<BTreeMap<String, String>, StoreError>,
    ) -> Result<usize, FolioError> {
        self.extracting = false;
        match result {
            Ok(extracted) => {
                let mut taken = 0;
                for (key, value) in extracted {
                    if value.trim().is_empty() {
                        continue;
                    }
                    self.values.insert(key, value);
                    taken += 1;
                }
                info!(taken, "merged extracted values");
                Ok(taken)
            }
            Err(e) => {
                warn!(error = %e, "PDF extraction failed");
                Err(FolioError::Extraction(e.to_string()))
            }
        }
    }

    pub async fn extract_pdf_values(&mut self, file_name: &str, bytes: Vec<u8>) -> Result<usize, FolioError> {
        self.begin_extraction()?;
        let result = self.stores.extractor.extract_values(file_name, bytes).await;
        self.finish_extraction(result)
    }

    // ── status lifecycle ────────────────────────────────────────────────

    /// Move the report one status forward. `Ok(None)` at a terminal status.
    pub async fn advance_status(&mut self) -> Result<Option<ReportStatus>, FolioError> {
        let report = self.report.as_ref().ok_or_else(no_report)?;
        let Some(next) = report.status.next() else {
            debug!(status = report.status.label(), "status is terminal");
            return Ok(None);
        };
        let id = report.id.clone();
        self.stores.reports.update(&id, &ReportPatch::status(next)).await?;
        info!(report = %id, status = next.label(), "report status advanced");
        if let Some(report) = &mut self.report {
            report.status = next;
        }
        Ok(Some(next))
    }

    /// Download the rendered report.
    ///
    /// Refused with [`FolioError::Conflict`] before Final Review; no request
    /// is made in that case. A download from Final Review marks the report
    /// Submitted. If that update fails the bytes are still returned and the
    /// failure becomes a notice.
    pub async fn export(&mut self, format: ExportFormat) -> Result<Vec<u8>, FolioError> {
        let report = self.report.as_ref().ok_or_else(no_report)?;
        if !report.status.allows_export() {
            return Err(FolioError::Conflict(format!(
                "download is available from {} onwards, this report is in {}",
                ReportStatus::FinalReview.label(),
                report.status.label()
            )));
        }
        let id = report.id.clone();
        let status = report.status;

        self.autosave.flush().await;
        let bytes = self.stores.reports.generate(&id, format).await?;
        info!(report = %id, format = format.as_str(), bytes = bytes.len(), "report exported");

        if status != ReportStatus::Submitted {
            let submitted = ReportStatus::Submitted;
            match self.stores.reports.update(&id, &ReportPatch::status(submitted)).await {
                Ok(()) => {
                    if let Some(report) = &mut self.report {
                        report.status = submitted;
                    }
                }
                Err(e) => {
                    warn!(report = %id, error = %e, "could not mark report submitted");
                    self.notices.push(Notice::error(format!(
                        "Downloaded, but the report could not be marked {}: {}",
                        submitted.label(),
                        e
                    )));
                }
            }
        }
        Ok(bytes)
    }

    // ── preview ─────────────────────────────────────────────────────────

    /// Re-render the preview on request. `Ok(false)` if a render is already running.
    pub async fn refresh_preview(&mut self) -> Result<bool, FolioError> {
        self.autosave.flush().await;
        let report_id = self.ensure_report().await?;
        self.render_preview(&report_id).await
    }

    async fn render_preview(&mut self, report_id: &str) -> Result<bool, FolioError> {
        let Some(_ticket) = self.preview_gate.try_begin() else {
            debug!(report = report_id, "preview already rendering");
            return Ok(false);
        };
        let bytes = self.stores.reports.generate(report_id, ExportFormat::Pdf).await?;
        debug!(report = report_id, bytes = bytes.len(), "preview rendered");
        self.preview = Some(RenderedPreview {
            report_id: report_id.to_string(),
            bytes,
            rendered_at: Utc::now(),
        });
        Ok(true)
    }

    // ── images ──────────────────────────────────────────────────────────

    /// Open an editor on an image for an image-typed variable.
    pub fn open_image_editor(
        &self,
        bytes: &[u8],
        container: Option<(u32, u32)>,
    ) -> Result<EditorHandle, FolioError> {
        let mut editor = RasterEditor::new(EditorOptions::from(&self.config));
        editor.load_bytes(bytes, container)?;
        Ok(EditorHandle::new(editor))
    }

    /// Upload the editor's current picture and make its URL the variable's value.
    pub async fn commit_image(&mut self, var_id: &str, editor: &EditorHandle) -> Result<String, FolioError> {
        let template = self.template.as_ref().ok_or_else(no_template)?;
        let var = template
            .variable_by_id(var_id)
            .ok_or_else(|| FolioError::Validation(format!("unknown variable {}", var_id)))?;
        if var.var_type != VariableType::Image {
            return Err(FolioError::Validation(format!(
                "{} is a {} variable, not an image",
                var.name,
                var.var_type.label()
            )));
        }
        let key = canonical_key(&var);

        let bytes = editor.export_snapshot(ImageFormat::Png).await?;
        let file_name = format!("{}.png", file_stem(&key));
        let url = self
            .stores
            .uploads
            .upload_image(&file_name, "image/png", bytes)
            .await?;
        info!(variable = %key, %url, "image committed");
        self.set_value(&key, url.clone());
        Ok(url)
    }

    // ── appendix ────────────────────────────────────────────────────────

    pub fn appendix(&self) -> &[AppendixItem] {
        self.report
            .as_ref()
            .map(|r| r.appendix.as_slice())
            .unwrap_or(&[])
    }

    pub async fn refresh_appendix(&mut self) -> Result<(), FolioError> {
        let id = self.report.as_ref().ok_or_else(no_report)?.id.clone();
        let items = self.stores.reports.list_appendix(&id).await?;
        if let Some(report) = &mut self.report {
            report.appendix = items;
        }
        Ok(())
    }

    pub async fn upload_appendix(&mut self, file_name: &str, bytes: Vec<u8>) -> Result<AppendixItem, FolioError> {
        let id = self.report.as_ref().ok_or_else(no_report)?.id.clone();
        if AppendixKind::from_file_name(file_name).is_none() {
            return Err(FolioError::Validation(format!(
                "{} is neither an image nor a PDF",
                file_name
            )));
        }
        let item = self.stores.reports.upload_appendix(&id, file_name, bytes).await?;
        info!(report = %id, item = %item.id, pages = item.pages(), "appendix uploaded");
        if let Some(report) = &mut self.report {
            report.appendix.push(item.clone());
        }
        self.preview = None;
        Ok(item)
    }

    /// Reorder the appendix. `order` must list every current item id once.
    pub async fn reorder_appendix(&mut self, order: &[String]) -> Result<(), FolioError> {
        let report = self.report.as_ref().ok_or_else(no_report)?;
        let current: HashSet<&str> = report.appendix.iter().map(|i| i.id.as_str()).collect();
        let requested: HashSet<&str> = order.iter().map(String::as_str).collect();
        if order.len() != report.appendix.len() || current != requested {
            return Err(FolioError::Validation(
                "the new order must list every appendix item exactly once".into(),
            ));
        }
        let id = report.id.clone();
        self.stores.reports.reorder_appendix(&id, order).await?;
        if let Some(report) = &mut self.report {
            report
                .appendix
                .sort_by_key(|item| order.iter().position(|o| *o == item.id));
        }
        self.preview = None;
        Ok(())
    }

    pub async fn delete_appendix(&mut self, item_id: &str) -> Result<(), FolioError> {
        let id = self.report.as_ref().ok_or_else(no_report)?.id.clone();
        self.stores.reports.delete_appendix(&id, item_id).await?;
        if let Some(report) = &mut self.report {
            report.appendix.retain(|i| i.id != item_id);
        }
        self.preview = None;
        Ok(())
    }

    // ── teardown ────────────────────────────────────────────────────────

    /// Write any pending autosave and end the session.
    pub async fn close(self) {
        self.autosave.flush().await;
        debug!(user = %self.session.user_id, "workflow closed");
    }
}

/// Copy geography attributes into the values of KML-typed variables.
fn apply_geography(values: &mut BTreeMap<String, String>, template: &Template, snapshot: &KmlSnapshot) {
    for var in template.variables() {
        if var.var_type != VariableType::Kml {
            continue;
        }
        if let Some(value) = var.kml_field.and_then(|field| snapshot.get(field)) {
            values.insert(canonical_key(&var), value.clone());
        }
    }
}

fn file_stem(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
