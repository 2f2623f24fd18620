//! In-process collaborators.
//!
//! Each store keeps its records behind a mutex, records the calls it
//! receives, and can be armed to fail the next call of a given operation
//! with a 503. Tests drive the workflow against these.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::{
    DocumentExtractor, ReportStore, StoreError, Stores, TemplateStore, UploadStore,
    UserTemplateStore,
};
use crate::geo::{GeographyService, PlanQuery, QuarterQuery, RegionOption, SheetQuery};
use crate::report::{AppendixItem, AppendixKind, ExportFormat, NewReport, Report, ReportPatch};
use crate::template::Template;
use crate::user_template::{UserTemplate, UserTemplatePatch};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One-shot failure switches keyed by operation name.
#[derive(Debug, Default)]
struct Faults {
    armed: Mutex<HashSet<&'static str>>,
}

impl Faults {
    fn arm(&self, op: &'static str) {
        lock(&self.armed).insert(op);
    }

    fn check(&self, op: &'static str) -> Result<(), StoreError> {
        if lock(&self.armed).remove(op) {
            Err(StoreError::Status {
                status: 503,
                message: format!("injected failure in {}", op),
            })
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// TEMPLATES
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryTemplates {
    templates: Mutex<Vec<Template>>,
    analysis: Mutex<Vec<String>>,
    faults: Faults,
}

impl MemoryTemplates {
    pub fn new(templates: Vec<Template>) -> Self {
        Self {
            templates: Mutex::new(templates),
            ..Default::default()
        }
    }

    /// Names returned by the next `analyze_document` calls.
    pub fn set_analysis(&self, names: Vec<String>) {
        *lock(&self.analysis) = names;
    }

    pub fn fail_next(&self, op: &'static str) {
        self.faults.arm(op);
    }
}

#[async_trait]
impl TemplateStore for MemoryTemplates {
    async fn fetch_all(&self, active_only: bool) -> Result<Vec<Template>, StoreError> {
        self.faults.check("fetch_all")?;
        Ok(lock(&self.templates)
            .iter()
            .filter(|t| !active_only || t.active)
            .cloned()
            .collect())
    }

    async fn fetch(&self, id: &str) -> Result<Template, StoreError> {
        self.faults.check("fetch")?;
        lock(&self.templates)
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("template {}", id)))
    }

    async fn analyze_document(
        &self,
        _file_name: &str,
        _bytes: Vec<u8>,
    ) -> Result<Vec<String>, StoreError> {
        self.faults.check("analyze_document")?;
        Ok(lock(&self.analysis).clone())
    }
}

// ============================================================================
// REPORTS
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryReports {
    reports: Mutex<BTreeMap<String, Report>>,
    updates: Mutex<Vec<(String, ReportPatch)>>,
    generated: Mutex<Vec<(String, ExportFormat)>>,
    creates: AtomicU64,
    next_id: AtomicU64,
    faults: Faults,
}

impl MemoryReports {
    pub fn insert(&self, report: Report) {
        lock(&self.reports).insert(report.id.clone(), report);
    }

    pub fn get(&self, id: &str) -> Option<Report> {
        lock(&self.reports).get(id).cloned()
    }

    /// Every `update` call received, in order.
    pub fn updates(&self) -> Vec<(String, ReportPatch)> {
        lock(&self.updates).clone()
    }

    pub fn generated(&self) -> Vec<(String, ExportFormat)> {
        lock(&self.generated).clone()
    }

    pub fn create_count(&self) -> u64 {
        self.creates.load(Ordering::SeqCst)
    }

    /// Fail the next call of `op` (`create`, `fetch`, `update`, `generate`, ...).
    pub fn fail_next(&self, op: &'static str) {
        self.faults.arm(op);
    }

    fn with_report<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Report) -> T,
    ) -> Result<T, StoreError> {
        let mut reports = lock(&self.reports);
        let report = reports
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("report {}", id)))?;
        Ok(f(report))
    }
}

#[async_trait]
impl ReportStore for MemoryReports {
    async fn create(&self, new: &NewReport) -> Result<Report, StoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.faults.check("create")?;
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let report = Report {
            id: format!("report-{}", n),
            template_id: new.template_id.clone(),
            title: new.title.clone(),
            status: Default::default(),
            values: new.values.clone(),
            kml_data: None,
            checklist_progress: Vec::new(),
            checklist_status: Default::default(),
            appendix: Vec::new(),
            updated_at: Some(Utc::now()),
        };
        self.insert(report.clone());
        Ok(report)
    }

    async fn fetch(&self, id: &str) -> Result<Report, StoreError> {
        self.faults.check("fetch")?;
        self.get(id)
            .ok_or_else(|| StoreError::NotFound(format!("report {}", id)))
    }

    async fn update(&self, id: &str, patch: &ReportPatch) -> Result<(), StoreError> {
        lock(&self.updates).push((id.to_string(), patch.clone()));
        self.faults.check("update")?;
        self.with_report(id, |r| {
            r.apply(patch);
            r.updated_at = Some(Utc::now());
        })
    }

    async fn generate(&self, id: &str, format: ExportFormat) -> Result<Vec<u8>, StoreError> {
        lock(&self.generated).push((id.to_string(), format));
        self.faults.check("generate")?;
        self.with_report(id, |r| {
            format!("{}:{}:{}", format.as_str(), r.id, r.appendix.len()).into_bytes()
        })
    }

    async fn list_appendix(&self, id: &str) -> Result<Vec<AppendixItem>, StoreError> {
        self.faults.check("list_appendix")?;
        self.with_report(id, |r| r.appendix.clone())
    }

    async fn upload_appendix(
        &self,
        id: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<AppendixItem, StoreError> {
        self.faults.check("upload_appendix")?;
        let kind = AppendixKind::from_file_name(file_name).ok_or_else(|| StoreError::Status {
            status: 415,
            message: format!("unsupported appendix file {}", file_name),
        })?;
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let item = AppendixItem {
            id: format!("appendix-{}", n),
            file_name: file_name.to_string(),
            kind,
            path: format!("uploads/{}/{}", id, file_name),
            page_count: match kind {
                AppendixKind::Image => None,
                AppendixKind::Pdf => Some(count_pdf_pages(&bytes)),
            },
            uploaded_at: Some(Utc::now()),
        };
        self.with_report(id, |r| r.appendix.push(item.clone()))?;
        Ok(item)
    }

    async fn reorder_appendix(&self, id: &str, order: &[String]) -> Result<(), StoreError> {
        self.faults.check("reorder_appendix")?;
        self.with_report(id, |r| {
            r.appendix
                .sort_by_key(|item| order.iter().position(|o| *o == item.id).unwrap_or(usize::MAX));
        })
    }

    async fn delete_appendix(&self, id: &str, item_id: &str) -> Result<(), StoreError> {
        self.faults.check("delete_appendix")?;
        self.with_report(id, |r| r.appendix.retain(|i| i.id != item_id))
    }
}

/// Rough page count: number of `/Type /Page` objects, at least one.
fn count_pdf_pages(bytes: &[u8]) -> u32 {
    let needle = b"/Type /Page";
    let count = bytes
        .windows(needle.len() + 1)
        .filter(|w| &w[..needle.len()] == needle && w[needle.len()] != b's')
        .count();
    count.max(1) as u32
}

// ============================================================================
// USER TEMPLATES
// ============================================================================

#[derive(Debug)]
pub struct MemoryUserTemplates {
    user_id: String,
    records: Mutex<HashMap<String, UserTemplate>>,
    patches: Mutex<Vec<(String, UserTemplatePatch)>>,
    creates: AtomicU64,
    faults: Faults,
}

impl Default for MemoryUserTemplates {
    fn default() -> Self {
        Self::new("local")
    }
}

impl MemoryUserTemplates {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            records: Mutex::new(HashMap::new()),
            patches: Mutex::new(Vec::new()),
            creates: AtomicU64::new(0),
            faults: Faults::default(),
        }
    }

    pub fn insert(&self, ut: UserTemplate) {
        lock(&self.records).insert(ut.template_id.clone(), ut);
    }

    /// Synchronously create and store empty settings for `template_id`.
    pub fn create_empty(&self, template_id: &str) -> UserTemplate {
        let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
        let ut = UserTemplate::empty(format!("ut-{}", n), self.user_id.clone(), template_id);
        self.insert(ut.clone());
        ut
    }

    pub fn get_by_template(&self, template_id: &str) -> Option<UserTemplate> {
        lock(&self.records).get(template_id).cloned()
    }

    pub fn patches(&self) -> Vec<(String, UserTemplatePatch)> {
        lock(&self.patches).clone()
    }

    pub fn create_count(&self) -> u64 {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn fail_next_patch(&self) {
        self.faults.arm("patch");
    }

    pub fn fail_next(&self, op: &'static str) {
        self.faults.arm(op);
    }
}

#[async_trait]
impl UserTemplateStore for MemoryUserTemplates {
    async fn fetch_by_template(&self, template_id: &str) -> Result<UserTemplate, StoreError> {
        self.faults.check("fetch_by_template")?;
        self.get_by_template(template_id)
            .ok_or_else(|| StoreError::NotFound(format!("user template for {}", template_id)))
    }

    async fn create(&self, template_id: &str) -> Result<UserTemplate, StoreError> {
        self.faults.check("create")?;
        Ok(self.create_empty(template_id))
    }

    async fn patch(&self, id: &str, patch: &UserTemplatePatch) -> Result<(), StoreError> {
        lock(&self.patches).push((id.to_string(), patch.clone()));
        self.faults.check("patch")?;
        let mut records = lock(&self.records);
        let ut = records
            .values_mut()
            .find(|ut| ut.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("user template {}", id)))?;
        if let Some(v) = &patch.variable_text_templates {
            ut.variable_text_templates = v.clone();
        }
        if let Some(v) = &patch.variable_select_options {
            ut.variable_select_options = v.clone();
        }
        if let Some(v) = &patch.checklist {
            ut.checklist = v.clone();
        }
        Ok(())
    }
}

// ============================================================================
// UPLOADS AND EXTRACTION
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryUploads {
    uploads: Mutex<Vec<(String, String, Vec<u8>)>>,
    faults: Faults,
}

impl MemoryUploads {
    /// `(file_name, content_type, bytes)` of every successful upload.
    pub fn uploads(&self) -> Vec<(String, String, Vec<u8>)> {
        lock(&self.uploads).clone()
    }

    pub fn fail_next(&self) {
        self.faults.arm("upload_image");
    }
}

#[async_trait]
impl UploadStore for MemoryUploads {
    async fn upload_image(
        &self,
        file_name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, StoreError> {
        self.faults.check("upload_image")?;
        let mut uploads = lock(&self.uploads);
        uploads.push((file_name.to_string(), content_type.to_string(), bytes));
        Ok(format!("memory://uploads/{}/{}", uploads.len(), file_name))
    }
}

#[derive(Debug, Default)]
pub struct MemoryExtractor {
    values: Mutex<BTreeMap<String, String>>,
    faults: Faults,
}

impl MemoryExtractor {
    pub fn set_values(&self, values: BTreeMap<String, String>) {
        *lock(&self.values) = values;
    }

    pub fn fail_next(&self) {
        self.faults.arm("extract_values");
    }
}

#[async_trait]
impl DocumentExtractor for MemoryExtractor {
    async fn extract_values(
        &self,
        _file_name: &str,
        _bytes: Vec<u8>,
    ) -> Result<BTreeMap<String, String>, StoreError> {
        self.faults.check("extract_values")?;
        Ok(lock(&self.values).clone())
    }
}

// ============================================================================
// GEOGRAPHY
// ============================================================================

/// Canned geography answers keyed by query.
#[derive(Debug, Default)]
pub struct MemoryGeography {
    pub regions: Mutex<HashMap<String, Vec<RegionOption>>>,
    pub quarters: Mutex<HashMap<QuarterQuery, String>>,
    pub sheets: Mutex<HashMap<SheetQuery, Vec<String>>>,
    pub plans: Mutex<HashMap<PlanQuery, Vec<String>>>,
    faults: Faults,
}

impl MemoryGeography {
    pub fn fail_next(&self, op: &'static str) {
        self.faults.arm(op);
    }
}

#[async_trait]
impl GeographyService for MemoryGeography {
    async fn regions(&self, province: &str) -> Result<Vec<RegionOption>, StoreError> {
        self.faults.check("regions")?;
        Ok(lock(&self.regions).get(province).cloned().unwrap_or_default())
    }

    async fn quarter(&self, query: &QuarterQuery) -> Result<Option<String>, StoreError> {
        self.faults.check("quarter")?;
        Ok(lock(&self.quarters).get(query).cloned())
    }

    async fn sheets(&self, query: &SheetQuery) -> Result<Vec<String>, StoreError> {
        self.faults.check("sheets")?;
        Ok(lock(&self.sheets).get(query).cloned().unwrap_or_default())
    }

    async fn plans(&self, query: &PlanQuery) -> Result<Vec<String>, StoreError> {
        self.faults.check("plans")?;
        Ok(lock(&self.plans).get(query).cloned().unwrap_or_default())
    }
}

// ============================================================================
// BUNDLE
// ============================================================================

/// All memory stores, with typed handles kept for assertions.
#[derive(Clone)]
pub struct MemoryStores {
    pub templates: Arc<MemoryTemplates>,
    pub reports: Arc<MemoryReports>,
    pub user_templates: Arc<MemoryUserTemplates>,
    pub uploads: Arc<MemoryUploads>,
    pub extractor: Arc<MemoryExtractor>,
    pub geography: Arc<MemoryGeography>,
}

impl MemoryStores {
    pub fn new(templates: Vec<Template>) -> Self {
        Self {
            templates: Arc::new(MemoryTemplates::new(templates)),
            reports: Arc::new(MemoryReports::default()),
            user_templates: Arc::new(MemoryUserTemplates::default()),
            uploads: Arc::new(MemoryUploads::default()),
            extractor: Arc::new(MemoryExtractor::default()),
            geography: Arc::new(MemoryGeography::default()),
        }
    }

    pub fn stores(&self) -> Stores {
        Stores {
            templates: self.templates.clone(),
            reports: self.reports.clone(),
            user_templates: self.user_templates.clone(),
            uploads: self.uploads.clone(),
            extractor: self.extractor.clone(),
            geography: self.geography.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdf_page_count_ignores_pages_tree() {
        let pdf = b"%PDF-1.4 /Type /Pages /Type /Page /Type /Page ";
        assert_eq!(count_pdf_pages(pdf), 2);
        assert_eq!(count_pdf_pages(b"not a pdf"), 1);
    }

    #[tokio::test]
    async fn test_fault_is_one_shot() {
        let reports = MemoryReports::default();
        reports.fail_next("create");
        let new = NewReport {
            template_id: "t".into(),
            title: "x".into(),
            values: BTreeMap::new(),
        };
        assert!(reports.create(&new).await.is_err());
        let report = reports.create(&new).await.unwrap();
        assert_eq!(report.id, "report-1");
        assert_eq!(reports.create_count(), 2);
    }

    #[tokio::test]
    async fn test_reorder_appendix() {
        let reports = MemoryReports::default();
        let new = NewReport {
            template_id: "t".into(),
            title: "x".into(),
            values: BTreeMap::new(),
        };
        let report = reports.create(&new).await.unwrap();
        let a = reports.upload_appendix(&report.id, "a.png", vec![]).await.unwrap();
        let b = reports.upload_appendix(&report.id, "b.pdf", vec![]).await.unwrap();
        reports
            .reorder_appendix(&report.id, &[b.id.clone(), a.id.clone()])
            .await
            .unwrap();
        let ids: Vec<String> = reports
            .list_appendix(&report.id)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec![b.id, a.id]);
    }
}
