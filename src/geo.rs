//! # Cascading Geography Lookup
//!
//! A chain of dependent remote queries:
//!
//! ```text
//! Province ─▶ Region list ─▶ (Parish fixed to "0") ─▶ Quarter code
//!          ─▶ Sheet list ─▶ Plan list ─▶ (Section fixed to "0")
//! ```
//!
//! [`GeoCascade`] is the state machine. It never performs I/O: selecting a
//! stage clears everything downstream synchronously and hands back the
//! [`FetchRequest`] to issue, and [`GeoCascade::apply`] takes the response
//! back. Requests double as dependency keys. A response is applied only if
//! its key is still the one in flight for that stage; anything else is
//! a superseded answer and is dropped, whatever order responses arrive in.
//!
//! [`GeoResolver`] is the async driver that pairs the cascade with a
//! [`GeographyService`] and runs follow-up fetches to completion.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::error::FolioError;
use crate::report::KmlSnapshot;
use crate::store::StoreError;

/// Value the parish stage takes once a region is chosen.
pub const FIXED_PARISH: &str = "0";
/// Value the section stage takes once a plan is chosen.
pub const FIXED_SECTION: &str = "0";

// ============================================================================
// QUERIES
// ============================================================================

/// A region returned for a province.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionOption {
    pub village_code: String,
    pub district_code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuarterQuery {
    pub district_code: String,
    pub village_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SheetQuery {
    pub district_code: String,
    pub village_code: String,
    pub quarter_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlanQuery {
    pub district_code: String,
    pub village_code: String,
    pub quarter_code: String,
    pub sheet: String,
}

/// Read-only geography feature service.
#[async_trait]
pub trait GeographyService: Send + Sync {
    async fn regions(&self, province: &str) -> Result<Vec<RegionOption>, StoreError>;

    /// Quarter code for a region, `None` if the service has no match.
    async fn quarter(&self, query: &QuarterQuery) -> Result<Option<String>, StoreError>;

    async fn sheets(&self, query: &SheetQuery) -> Result<Vec<String>, StoreError>;

    async fn plans(&self, query: &PlanQuery) -> Result<Vec<String>, StoreError>;
}

/// Stages of the cascade in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Province,
    Region,
    Parish,
    Quarter,
    Sheet,
    Plan,
    Section,
}

/// A fetch to issue, identified by the upstream values that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FetchRequest {
    Regions { province: String },
    Quarter(QuarterQuery),
    Sheets(SheetQuery),
    Plans(PlanQuery),
}

impl FetchRequest {
    /// The stage whose options (or value) this fetch fills.
    pub fn stage(&self) -> Stage {
        match self {
            FetchRequest::Regions { .. } => Stage::Region,
            FetchRequest::Quarter(_) => Stage::Quarter,
            FetchRequest::Sheets(_) => Stage::Sheet,
            FetchRequest::Plans(_) => Stage::Plan,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult {
    Regions(Vec<RegionOption>),
    Quarter(Option<String>),
    Sheets(Vec<String>),
    Plans(Vec<String>),
}

/// Issue `request` against `service`.
pub async fn fetch(
    service: &dyn GeographyService,
    request: &FetchRequest,
) -> Result<FetchResult, StoreError> {
    Ok(match request {
        FetchRequest::Regions { province } => FetchResult::Regions(service.regions(province).await?),
        FetchRequest::Quarter(q) => FetchResult::Quarter(service.quarter(q).await?),
        FetchRequest::Sheets(q) => FetchResult::Sheets(service.sheets(q).await?),
        FetchRequest::Plans(q) => FetchResult::Plans(service.plans(q).await?),
    })
}

// ============================================================================
// ORDERING
// ============================================================================

/// Sheet/plan ordering: numeric values first in numeric order, then the
/// rest lexicographically.
pub fn compare_codes(a: &str, b: &str) -> Ordering {
    let num = |s: &str| s.trim().parse::<f64>().ok().filter(|v| v.is_finite());
    match (num(a), num(b)) {
        (Some(x), Some(y)) => x.total_cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Drop blanks and repeats, then order with [`compare_codes`].
pub fn sort_codes(mut codes: Vec<String>) -> Vec<String> {
    codes.retain(|c| !c.trim().is_empty());
    codes.sort_by(|a, b| compare_codes(a, b));
    codes.dedup();
    codes
}

fn collation_key(s: &str) -> String {
    s.nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| if c == 'ı' { 'i' } else { c })
        .flat_map(char::to_lowercase)
        .collect()
}

/// Locale-aware name comparison: case and accents are secondary to the base
/// letters, so "Çamlık" files beside "Camii" rather than after "Zeytin".
pub fn compare_names(a: &str, b: &str) -> Ordering {
    collation_key(a)
        .cmp(&collation_key(b))
        .then_with(|| a.cmp(b))
}

pub fn sort_regions(mut regions: Vec<RegionOption>) -> Vec<RegionOption> {
    regions.sort_by(|a, b| compare_names(&a.name, &b.name));
    regions
}

// ============================================================================
// CASCADE STATE
// ============================================================================

/// Selections and option lists of the geography form.
#[derive(Debug, Clone, Default)]
pub struct GeoCascade {
    province: String,
    region: Option<RegionOption>,
    parish: String,
    quarter: String,
    sheet: String,
    plan: String,
    section: String,

    region_options: Vec<RegionOption>,
    parish_options: Vec<String>,
    sheet_options: Vec<String>,
    plan_options: Vec<String>,

    in_flight: HashMap<Stage, FetchRequest>,
    last_error: Option<String>,
}

impl GeoCascade {
    pub fn new() -> Self {
        Self::default()
    }

    // ── accessors ───────────────────────────────────────────────────────

    pub fn province(&self) -> &str {
        &self.province
    }

    pub fn region(&self) -> Option<&RegionOption> {
        self.region.as_ref()
    }

    pub fn parish(&self) -> &str {
        &self.parish
    }

    pub fn quarter(&self) -> &str {
        &self.quarter
    }

    pub fn sheet(&self) -> &str {
        &self.sheet
    }

    pub fn plan(&self) -> &str {
        &self.plan
    }

    pub fn section(&self) -> &str {
        &self.section
    }

    pub fn region_options(&self) -> &[RegionOption] {
        &self.region_options
    }

    pub fn parish_options(&self) -> &[String] {
        &self.parish_options
    }

    pub fn sheet_options(&self) -> &[String] {
        &self.sheet_options
    }

    pub fn plan_options(&self) -> &[String] {
        &self.plan_options
    }

    pub fn is_loading(&self, stage: Stage) -> bool {
        self.in_flight.contains_key(&stage)
    }

    pub fn is_busy(&self) -> bool {
        !self.in_flight.is_empty()
    }

    /// Message of the most recent failed fetch, cleared by the next success.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Hand out the pending failure once, as a [`FolioError::Lookup`].
    pub fn take_error(&mut self) -> Option<FolioError> {
        self.last_error.take().map(FolioError::Lookup)
    }

    /// Every stage down to the section has a value.
    pub fn is_complete(&self) -> bool {
        !self.province.is_empty()
            && self.region.is_some()
            && !self.parish.is_empty()
            && !self.quarter.is_empty()
            && !self.sheet.is_empty()
            && !self.plan.is_empty()
            && !self.section.is_empty()
    }

    // ── selections ──────────────────────────────────────────────────────

    pub fn select_province(&mut self, province: &str) -> Option<FetchRequest> {
        self.clear_below(Stage::Province);
        self.province = province.trim().to_string();
        if self.province.is_empty() {
            return None;
        }
        Some(self.issue(FetchRequest::Regions {
            province: self.province.clone(),
        }))
    }

    /// Select a region by village code; an empty or unknown code clears it.
    pub fn select_region(&mut self, village_code: &str) -> Option<FetchRequest> {
        self.clear_below(Stage::Region);
        self.region = self
            .region_options
            .iter()
            .find(|r| r.village_code == village_code)
            .cloned();
        self.region.as_ref()?;
        self.parish = FIXED_PARISH.to_string();
        self.parish_options = vec![FIXED_PARISH.to_string()];
        self.quarter_request().map(|r| self.issue(r))
    }

    /// Select or clear the parish.
    pub fn select_parish(&mut self, parish: &str) -> Option<FetchRequest> {
        self.clear_below(Stage::Parish);
        self.parish = parish.trim().to_string();
        self.quarter_request().map(|r| self.issue(r))
    }

    pub fn select_sheet(&mut self, sheet: &str) -> Option<FetchRequest> {
        self.clear_below(Stage::Sheet);
        self.sheet = sheet.trim().to_string();
        self.plan_request().map(|r| self.issue(r))
    }

    pub fn select_plan(&mut self, plan: &str) {
        self.clear_below(Stage::Plan);
        self.plan = plan.trim().to_string();
        if !self.plan.is_empty() {
            self.section = FIXED_SECTION.to_string();
        }
    }

    pub fn select_section(&mut self, section: &str) {
        self.section = section.trim().to_string();
    }

    // ── responses ───────────────────────────────────────────────────────

    /// Take a fetch response. Returns the follow-up fetch, if the response
    /// unlocks one.
    ///
    /// Responses whose request is no longer the one in flight for its stage
    /// are discarded. Failures clear the stage's options and are recorded in
    /// [`Self::last_error`]; they never propagate.
    pub fn apply(
        &mut self,
        request: &FetchRequest,
        result: Result<FetchResult, StoreError>,
    ) -> Option<FetchRequest> {
        let stage = request.stage();
        if self.in_flight.get(&stage) != Some(request) {
            debug!(?request, "discarding superseded geography response");
            return None;
        }
        self.in_flight.remove(&stage);

        match (request, result) {
            (FetchRequest::Regions { .. }, Ok(FetchResult::Regions(regions))) => {
                self.last_error = None;
                self.region_options = sort_regions(regions);
                None
            }
            (FetchRequest::Quarter(_), Ok(FetchResult::Quarter(code))) => {
                self.last_error = None;
                match code.filter(|c| !c.trim().is_empty()) {
                    Some(code) => {
                        if code != self.quarter {
                            self.clear_below(Stage::Quarter);
                        }
                        self.quarter = code;
                        self.sheet_request().map(|r| self.issue(r))
                    }
                    None => {
                        warn!(?request, "no quarter code for region");
                        self.clear_below(Stage::Parish);
                        None
                    }
                }
            }
            (FetchRequest::Sheets(_), Ok(FetchResult::Sheets(sheets))) => {
                self.last_error = None;
                self.sheet_options = sort_codes(sheets);
                None
            }
            (FetchRequest::Plans(_), Ok(FetchResult::Plans(plans))) => {
                self.last_error = None;
                self.plan_options = sort_codes(plans);
                None
            }
            (_, Ok(other)) => {
                self.fail(stage, format!("unexpected response {:?} for {:?}", other, request));
                None
            }
            (_, Err(e)) => {
                self.fail(stage, e.to_string());
                None
            }
        }
    }

    fn fail(&mut self, stage: Stage, message: String) {
        warn!(?stage, error = %message, "geography lookup failed");
        match stage {
            Stage::Region => self.region_options.clear(),
            Stage::Quarter => self.quarter.clear(),
            Stage::Sheet => self.sheet_options.clear(),
            Stage::Plan => self.plan_options.clear(),
            _ => {}
        }
        self.clear_below(stage);
        self.last_error = Some(message);
    }

    // ── snapshot ────────────────────────────────────────────────────────

    /// Current selections as a flat attribute map (blank stages omitted).
    pub fn snapshot(&self) -> KmlSnapshot {
        let mut snap = KmlSnapshot::new();
        let mut put = |k: &str, v: &str| {
            if !v.is_empty() {
                snap.insert(k.to_string(), v.to_string());
            }
        };
        put("province", &self.province);
        if let Some(r) = &self.region {
            put("region", &r.name);
            put("villageCode", &r.village_code);
            put("districtCode", &r.district_code);
        }
        put("parish", &self.parish);
        put("quarter", &self.quarter);
        put("sheet", &self.sheet);
        put("plan", &self.plan);
        put("section", &self.section);
        snap
    }

    /// Rebuild selections from a stored snapshot. Returns the fetches that
    /// repopulate option lists; selections are not cleared when they land.
    pub fn restore(&mut self, snap: &KmlSnapshot) -> Vec<FetchRequest> {
        *self = Self::default();
        let get = |k: &str| snap.get(k).cloned().unwrap_or_default();

        self.province = get("province");
        let village_code = get("villageCode");
        if !village_code.is_empty() {
            self.region = Some(RegionOption {
                village_code,
                district_code: get("districtCode"),
                name: get("region"),
            });
        }
        self.parish = get("parish");
        if !self.parish.is_empty() {
            self.parish_options = vec![self.parish.clone()];
        }
        self.quarter = get("quarter");
        self.sheet = get("sheet");
        self.plan = get("plan");
        self.section = get("section");

        let mut requests = Vec::new();
        if !self.province.is_empty() {
            requests.push(self.issue(FetchRequest::Regions {
                province: self.province.clone(),
            }));
        }
        if let Some(r) = self.sheet_request() {
            requests.push(self.issue(r));
        }
        if let Some(r) = self.plan_request() {
            requests.push(self.issue(r));
        }
        requests
    }

    // ── internals ───────────────────────────────────────────────────────

    fn issue(&mut self, request: FetchRequest) -> FetchRequest {
        debug!(?request, "geography fetch");
        self.in_flight.insert(request.stage(), request.clone());
        request
    }

    fn quarter_request(&self) -> Option<FetchRequest> {
        let region = self.region.as_ref()?;
        if self.parish.is_empty() {
            return None;
        }
        Some(FetchRequest::Quarter(QuarterQuery {
            district_code: region.district_code.clone(),
            village_code: region.village_code.clone(),
        }))
    }

    fn sheet_request(&self) -> Option<FetchRequest> {
        let region = self.region.as_ref()?;
        if self.parish.is_empty() || self.quarter.is_empty() {
            return None;
        }
        Some(FetchRequest::Sheets(SheetQuery {
            district_code: region.district_code.clone(),
            village_code: region.village_code.clone(),
            quarter_code: self.quarter.clone(),
        }))
    }

    fn plan_request(&self) -> Option<FetchRequest> {
        let FetchRequest::Sheets(q) = self.sheet_request()? else {
            return None;
        };
        if self.sheet.is_empty() {
            return None;
        }
        Some(FetchRequest::Plans(PlanQuery {
            district_code: q.district_code,
            village_code: q.village_code,
            quarter_code: q.quarter_code,
            sheet: self.sheet.clone(),
        }))
    }

    /// Clear the selections, options and pending fetches of every stage after `stage`.
    fn clear_below(&mut self, stage: Stage) {
        if stage < Stage::Region {
            self.region = None;
            self.region_options.clear();
        }
        if stage < Stage::Parish {
            self.parish.clear();
            self.parish_options.clear();
        }
        if stage < Stage::Quarter {
            self.quarter.clear();
        }
        if stage < Stage::Sheet {
            self.sheet.clear();
            self.sheet_options.clear();
        }
        if stage < Stage::Plan {
            self.plan.clear();
            self.plan_options.clear();
        }
        if stage < Stage::Section {
            self.section.clear();
        }
        self.in_flight.retain(|s, _| *s <= stage);
    }
}

// ============================================================================
// ASYNC DRIVER
// ============================================================================

/// Runs cascade fetches against a service, following each response's
/// follow-up fetch until the chain settles.
pub struct GeoResolver {
    cascade: GeoCascade,
    service: Arc<dyn GeographyService>,
}

impl GeoResolver {
    pub fn new(service: Arc<dyn GeographyService>) -> Self {
        Self {
            cascade: GeoCascade::new(),
            service,
        }
    }

    pub fn cascade(&self) -> &GeoCascade {
        &self.cascade
    }

    pub fn take_error(&mut self) -> Option<FolioError> {
        self.cascade.take_error()
    }

    pub async fn select_province(&mut self, province: &str) {
        let request = self.cascade.select_province(province);
        self.run(request).await;
    }

    pub async fn select_region(&mut self, village_code: &str) {
        let request = self.cascade.select_region(village_code);
        self.run(request).await;
    }

    pub async fn select_parish(&mut self, parish: &str) {
        let request = self.cascade.select_parish(parish);
        self.run(request).await;
    }

    pub async fn select_sheet(&mut self, sheet: &str) {
        let request = self.cascade.select_sheet(sheet);
        self.run(request).await;
    }

    pub fn select_plan(&mut self, plan: &str) {
        self.cascade.select_plan(plan);
    }

    pub fn select_section(&mut self, section: &str) {
        self.cascade.select_section(section);
    }

    pub async fn restore(&mut self, snap: &KmlSnapshot) {
        for request in self.cascade.restore(snap) {
            self.run(Some(request)).await;
        }
    }

    async fn run(&mut self, mut next: Option<FetchRequest>) {
        while let Some(request) = next {
            let result = fetch(self.service.as_ref(), &request).await;
            next = self.cascade.apply(&request, result);
        }
    }
}
