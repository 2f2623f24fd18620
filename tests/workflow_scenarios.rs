//! End-to-end workflow scenarios against the in-memory collaborators.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::time::Duration;

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use pretty_assertions::assert_eq;

use folio::checklist::{ChecklistItem, ChecklistStatus};
use folio::geo::{PlanQuery, QuarterQuery, RegionOption, SheetQuery};
use folio::notice::NoticeLevel;
use folio::report::{ExportFormat, KmlSnapshot, Report, ReportStatus};
use folio::session::SessionContext;
use folio::store::memory::{MemoryGeography, MemoryStores};
use folio::template::{
    ContentBlock, ImportedVariable, Section, Template, TemplateBody, VariableType,
};
use folio::user_template::UserTemplate;
use folio::variables::SavedKind;
use folio::workflow::{Step, Workflow};
use folio::{EngineConfig, FolioError};

// ============================================================================
// FIXTURES
// ============================================================================

fn imported(id: &str, name: &str, var_type: VariableType) -> ImportedVariable {
    ImportedVariable {
        id: id.into(),
        name: name.into(),
        var_type,
        required: false,
        options: Vec::new(),
        description: None,
        group_id: None,
        kml_field: None,
    }
}

/// Requires geography; one KML field, a required text field and a photo.
fn survey_template() -> Template {
    let mut sheet = imported("v1", "Sheet", VariableType::Kml);
    sheet.kml_field = Some("sheet".into());
    let mut owner = imported("v2", "Owner", VariableType::Text);
    owner.required = true;
    Template {
        id: "survey".into(),
        name: "Site survey".into(),
        active: true,
        requires_kml: true,
        body: TemplateBody::Imported {
            variables: vec![sheet, owner, imported("v3", "Photo", VariableType::Image)],
            groups: Vec::new(),
        },
    }
}

/// Legacy sections; "Notes" appears twice under different block ids.
fn letter_template() -> Template {
    let variable = |id: &str, name: &str| ContentBlock::Variable {
        id: id.into(),
        name: name.into(),
        var_type: VariableType::Text,
        required: false,
        options: Vec::new(),
    };
    Template {
        id: "letter".into(),
        name: "Cover letter".into(),
        active: true,
        requires_kml: false,
        body: TemplateBody::Legacy {
            sections: vec![
                Section {
                    id: "s1".into(),
                    title: "Intro".into(),
                    blocks: vec![
                        ContentBlock::Text {
                            content: "Dear reader".into(),
                        },
                        variable("b1", "Notes"),
                    ],
                },
                Section {
                    id: "s2".into(),
                    title: "Closing".into(),
                    blocks: vec![variable("b2", "Notes")],
                },
            ],
        },
    }
}

fn memory_stores() -> MemoryStores {
    let stores = MemoryStores::new(vec![survey_template(), letter_template()]);
    seed_geography(&stores.geography);
    stores
}

fn region(name: &str, vil: &str, dist: &str) -> RegionOption {
    RegionOption {
        village_code: vil.into(),
        district_code: dist.into(),
        name: name.into(),
    }
}

fn strings(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

fn seed_geography(geo: &MemoryGeography) {
    geo.regions.lock().unwrap().insert(
        "3D1".into(),
        vec![region("X", "10", "1"), region("Ábaco", "11", "1")],
    );
    geo.quarters.lock().unwrap().insert(
        QuarterQuery {
            district_code: "1".into(),
            village_code: "10".into(),
        },
        "5".into(),
    );
    geo.sheets.lock().unwrap().insert(
        SheetQuery {
            district_code: "1".into(),
            village_code: "10".into(),
            quarter_code: "5".into(),
        },
        strings(&["2", "1", "2"]),
    );
    geo.plans.lock().unwrap().insert(
        PlanQuery {
            district_code: "1".into(),
            village_code: "10".into(),
            quarter_code: "5".into(),
            sheet: "2".into(),
        },
        strings(&["12", "7"]),
    );
}

fn workflow(stores: &MemoryStores) -> Workflow {
    Workflow::new(
        SessionContext::new("alice"),
        stores.stores(),
        EngineConfig::default(),
    )
}

/// A workflow past template selection.
async fn started(stores: &MemoryStores, template_id: &str) -> Workflow {
    let mut wf = workflow(stores);
    wf.select_template(template_id).await.unwrap();
    wf.set_title("Site report");
    wf.next().await.unwrap();
    wf
}

fn png(w: u32, h: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([10, 20, 30, 255])))
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

// ============================================================================
// STEPS
// ============================================================================

#[tokio::test]
async fn test_title_and_template_required() {
    let stores = memory_stores();
    let mut wf = workflow(&stores);

    wf.set_title("Report");
    assert!(matches!(wf.next().await, Err(FolioError::Validation(_))));

    wf.select_template("letter").await.unwrap();
    wf.set_title("   ");
    assert!(matches!(wf.next().await, Err(FolioError::Validation(_))));
    assert_eq!(wf.step(), Step::TemplateSelect);
    assert_eq!(stores.reports.create_count(), 0);
}

#[tokio::test]
async fn test_template_without_geography_skips_to_variables() {
    let stores = memory_stores();
    let wf = started(&stores, "letter").await;
    assert_eq!(wf.step(), Step::VariableFill);
    assert_eq!(wf.step_number(), 2);
    assert_eq!(wf.report().map(|r| r.status), Some(ReportStatus::Draft));
}

#[tokio::test]
async fn test_user_template_is_created_silently() {
    let stores = memory_stores();
    let wf = started(&stores, "letter").await;

    assert_eq!(stores.user_templates.create_count(), 1);
    let created = stores.user_templates.get_by_template("letter").unwrap();
    assert!(created.checklist.is_empty());
    assert!(created.variable_text_templates.is_empty());
    assert!(wf.drain_notices().is_empty());
    assert_eq!(wf.checklist_summary().status, ChecklistStatus::Empty);
}

#[tokio::test]
async fn test_failed_create_keeps_template_step_and_retry_reuses_nothing() {
    let stores = memory_stores();
    let mut wf = workflow(&stores);
    wf.select_template("letter").await.unwrap();
    wf.set_title("Site report");

    stores.reports.fail_next("create");
    assert!(matches!(wf.next().await, Err(FolioError::Persistence(_))));
    assert_eq!(wf.step(), Step::TemplateSelect);
    assert!(wf.report().is_none());

    assert_eq!(wf.next().await.unwrap(), Step::VariableFill);
    assert_eq!(wf.report().unwrap().id, "report-1");
    assert_eq!(stores.reports.create_count(), 2);
}

#[tokio::test]
async fn test_settings_failure_leaves_template_changeable() {
    let stores = memory_stores();
    let mut wf = workflow(&stores);
    wf.select_template("survey").await.unwrap();
    wf.set_title("Site report");

    stores.user_templates.fail_next("fetch_by_template");
    assert!(matches!(wf.next().await, Err(FolioError::Persistence(_))));
    assert_eq!(wf.step(), Step::TemplateSelect);
    assert!(wf.report().is_none());
    assert_eq!(stores.reports.create_count(), 0);

    wf.select_template("letter").await.unwrap();
    assert_eq!(wf.next().await.unwrap(), Step::VariableFill);
    assert_eq!(wf.report().unwrap().template_id, "letter");
    assert_eq!(stores.reports.create_count(), 1);
}

#[tokio::test]
async fn test_report_created_once_per_session() {
    let stores = memory_stores();
    let mut wf = started(&stores, "letter").await;

    // Back never reaches template selection once the report exists.
    assert_eq!(wf.back(), Step::VariableFill);
    assert!(matches!(
        wf.select_template("survey").await,
        Err(FolioError::Conflict(_))
    ));

    assert_eq!(wf.next().await.unwrap(), Step::Preview);
    assert_eq!(wf.back(), Step::VariableFill);
    assert_eq!(wf.next().await.unwrap(), Step::Preview);
    wf.refresh_preview().await.unwrap();

    assert_eq!(stores.reports.create_count(), 1);
}

#[tokio::test]
async fn test_preview_failure_stays_on_variables() {
    let stores = memory_stores();
    let mut wf = started(&stores, "letter").await;
    wf.set_variable("b1", "Checked on site").unwrap();

    stores.reports.fail_next("generate");
    assert!(wf.next().await.is_err());
    assert_eq!(wf.step(), Step::VariableFill);
    assert!(wf.preview().is_none());

    stores.reports.fail_next("update");
    assert!(wf.next().await.is_err());
    assert_eq!(wf.step(), Step::VariableFill);

    assert_eq!(wf.next().await.unwrap(), Step::Preview);
    let preview = wf.preview().unwrap();
    assert_eq!(preview.bytes, b"pdf:report-1:0".to_vec());
    assert_eq!(
        stores.reports.get("report-1").unwrap().values.get("Notes").map(String::as_str),
        Some("Checked on site")
    );

    // Back from preview keeps the data.
    assert_eq!(wf.back(), Step::VariableFill);
    assert_eq!(wf.variable_value("b2"), Some("Checked on site"));
}

// ============================================================================
// GEOGRAPHY
// ============================================================================

#[tokio::test]
async fn test_kml_cascade_to_section() {
    let stores = memory_stores();
    let mut wf = started(&stores, "survey").await;
    assert_eq!(wf.step(), Step::GeoEntry);
    assert_eq!(wf.step_number(), 2);

    wf.select_province("3D1").await;
    let names: Vec<&str> = wf.geo().region_options().iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["Ábaco", "X"]);

    wf.select_region("10").await;
    assert_eq!(wf.geo().parish(), "0");
    assert_eq!(wf.geo().quarter(), "5");
    assert_eq!(wf.geo().sheet_options(), strings(&["1", "2"]).as_slice());

    wf.select_sheet("2").await;
    assert_eq!(wf.geo().plan_options(), strings(&["7", "12"]).as_slice());

    wf.select_plan("12");
    assert_eq!(wf.geo().section(), "0");
    assert!(wf.geo().is_complete());

    assert_eq!(wf.next().await.unwrap(), Step::VariableFill);
    assert_eq!(wf.step_number(), 3);

    let saved = stores.reports.get("report-1").unwrap();
    let kml = saved.kml_data.unwrap();
    assert_eq!(kml.get("villageCode").map(String::as_str), Some("10"));
    assert_eq!(kml.get("districtCode").map(String::as_str), Some("1"));
    assert_eq!(kml.get("plan").map(String::as_str), Some("12"));
    assert_eq!(kml.get("section").map(String::as_str), Some("0"));
    assert_eq!(saved.values.get("kml:sheet").map(String::as_str), Some("2"));
}

#[tokio::test]
async fn test_changing_province_clears_downstream() {
    let stores = memory_stores();
    let mut wf = started(&stores, "survey").await;
    wf.select_province("3D1").await;
    wf.select_region("10").await;
    wf.select_sheet("2").await;
    wf.select_plan("7");

    wf.select_province("4A2").await;
    let geo = wf.geo();
    assert_eq!(geo.province(), "4A2");
    assert!(geo.region().is_none());
    assert!(geo.region_options().is_empty());
    assert_eq!(geo.parish(), "");
    assert!(geo.sheet_options().is_empty());
    assert_eq!(geo.plan(), "");
    assert_eq!(geo.section(), "");
}

#[tokio::test]
async fn test_geography_failure_becomes_notice() {
    let stores = memory_stores();
    let mut wf = started(&stores, "survey").await;
    wf.select_province("3D1").await;

    stores.geography.fail_next("quarter");
    wf.select_region("10").await;
    assert_eq!(wf.geo().quarter(), "");
    assert!(wf.geo().sheet_options().is_empty());

    let notices = wf.drain_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NoticeLevel::Warning);

    // The rest of the form still works.
    assert_eq!(wf.next().await.unwrap(), Step::VariableFill);
}

#[tokio::test]
async fn test_geography_failure_reported_once() {
    let stores = memory_stores();
    let mut wf = started(&stores, "survey").await;

    stores.geography.fail_next("regions");
    wf.select_province("3D1").await;
    wf.select_province("").await;
    wf.select_sheet("").await;
    wf.select_region("99").await;

    let notices = wf.drain_notices();
    assert_eq!(notices.len(), 1);
    assert!(notices[0].message.contains("injected failure in regions"));
    assert!(wf.drain_notices().is_empty());
}

#[tokio::test]
async fn test_geography_step_saves_incomplete_cascade() {
    let stores = memory_stores();
    let mut wf = started(&stores, "survey").await;
    wf.select_province("3D1").await;

    assert_eq!(wf.next().await.unwrap(), Step::VariableFill);
    let kml = stores.reports.get("report-1").unwrap().kml_data.unwrap();
    assert_eq!(kml.get("province").map(String::as_str), Some("3D1"));
    assert!(!kml.contains_key("villageCode"));
}

#[tokio::test]
async fn test_load_report_restores_geography_on_variables_step() {
    let stores = memory_stores();
    let kml: KmlSnapshot = [
        ("province", "3D1"),
        ("region", "X"),
        ("villageCode", "10"),
        ("districtCode", "1"),
        ("parish", "0"),
        ("quarter", "5"),
        ("sheet", "2"),
        ("plan", "12"),
        ("section", "0"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    stores.reports.insert(Report {
        id: "r-7".into(),
        template_id: "survey".into(),
        title: "Parcel 7".into(),
        status: ReportStatus::InitialReview,
        values: [("Owner".to_string(), "J. Doe".to_string())].into(),
        kml_data: Some(kml),
        checklist_progress: Vec::new(),
        checklist_status: ChecklistStatus::Empty,
        appendix: Vec::new(),
        updated_at: None,
    });

    let mut wf = workflow(&stores);
    wf.load_report("r-7").await.unwrap();

    assert_eq!(wf.step(), Step::VariableFill);
    assert_eq!(wf.title(), "Parcel 7");
    assert_eq!(wf.variable_value("v2"), Some("J. Doe"));
    assert_eq!(wf.geo().plan(), "12");
    assert_eq!(wf.geo().section(), "0");
    assert_eq!(wf.geo().region_options().len(), 2);
    assert_eq!(wf.geo().plan_options(), strings(&["7", "12"]).as_slice());

    // Geography is still reachable, template selection is not.
    assert_eq!(wf.back(), Step::GeoEntry);
    assert_eq!(wf.back(), Step::GeoEntry);
}

// ============================================================================
// AUTOSAVE
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_autosave_coalesces_burst() {
    let stores = memory_stores();
    let mut wf = started(&stores, "letter").await;
    let before = stores.reports.updates().len();

    for text in ["a", "ab", "abc", "abcd", "abcde"] {
        wf.set_value("Notes", text);
        tokio::time::sleep(Duration::from_millis(40)).await;
    }
    assert_eq!(stores.reports.updates().len(), before);

    tokio::time::sleep(Duration::from_millis(600)).await;
    let updates = stores.reports.updates();
    assert_eq!(updates.len(), before + 1);

    let (id, patch) = updates.last().unwrap();
    assert_eq!(id, "report-1");
    let expected: BTreeMap<String, String> = [("Notes".to_string(), "abcde".to_string())].into();
    assert_eq!(patch.values.as_ref(), Some(&expected));
    assert_eq!(patch.status, None);
}

#[tokio::test(start_paused = true)]
async fn test_close_flushes_pending_autosave() {
    let stores = memory_stores();
    let mut wf = started(&stores, "letter").await;
    wf.set_value("Notes", "last words");
    wf.close().await;

    let saved = stores.reports.get("report-1").unwrap();
    assert_eq!(saved.values.get("Notes").map(String::as_str), Some("last words"));
}

#[tokio::test(start_paused = true)]
async fn test_autosave_failure_is_reported() {
    let stores = memory_stores();
    let mut wf = started(&stores, "letter").await;

    stores.reports.fail_next("update");
    wf.set_value("Notes", "lost?");
    tokio::time::sleep(Duration::from_secs(1)).await;

    let notices = wf.drain_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NoticeLevel::Error);
    // The local value survives for the next save.
    assert_eq!(wf.values().get("Notes").map(String::as_str), Some("lost?"));
}

// ============================================================================
// STATUS AND EXPORT
// ============================================================================

#[tokio::test]
async fn test_export_gated_until_final_review() {
    let stores = memory_stores();
    let mut wf = started(&stores, "letter").await;

    assert!(matches!(
        wf.export(ExportFormat::Pdf).await,
        Err(FolioError::Conflict(_))
    ));
    assert_eq!(wf.advance_status().await.unwrap(), Some(ReportStatus::InitialReview));
    assert!(matches!(
        wf.export(ExportFormat::Docx).await,
        Err(FolioError::Conflict(_))
    ));
    assert!(stores.reports.generated().is_empty());

    assert_eq!(wf.advance_status().await.unwrap(), Some(ReportStatus::FinalReview));
    let bytes = wf.export(ExportFormat::Docx).await.unwrap();
    assert_eq!(bytes, b"docx:report-1:0".to_vec());
    assert_eq!(wf.status(), Some(ReportStatus::Submitted));
    assert_eq!(
        stores.reports.get("report-1").unwrap().status,
        ReportStatus::Submitted
    );

    // Downloading again leaves the status alone.
    let status_writes = |stores: &MemoryStores| {
        stores
            .reports
            .updates()
            .iter()
            .filter(|(_, p)| p.status.is_some())
            .count()
    };
    let writes = status_writes(&stores);
    wf.export(ExportFormat::Pdf).await.unwrap();
    assert_eq!(status_writes(&stores), writes);
}

#[tokio::test]
async fn test_export_returns_bytes_when_submit_mark_fails() {
    let stores = memory_stores();
    let mut wf = started(&stores, "letter").await;
    wf.advance_status().await.unwrap();
    wf.advance_status().await.unwrap();

    stores.reports.fail_next("update");
    let bytes = wf.export(ExportFormat::Pdf).await.unwrap();
    assert!(!bytes.is_empty());
    assert_eq!(wf.status(), Some(ReportStatus::FinalReview));

    let notices = wf.drain_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NoticeLevel::Error);
}

#[tokio::test]
async fn test_advance_is_noop_when_submitted() {
    let stores = memory_stores();
    let mut wf = started(&stores, "letter").await;
    for _ in 0..3 {
        wf.advance_status().await.unwrap();
    }
    assert_eq!(wf.status(), Some(ReportStatus::Submitted));
    let writes = stores.reports.updates().len();

    assert_eq!(wf.advance_status().await.unwrap(), None);
    assert_eq!(wf.advance_status().await.unwrap(), None);
    assert_eq!(stores.reports.updates().len(), writes);
}

#[tokio::test]
async fn test_failed_advance_keeps_status() {
    let stores = memory_stores();
    let mut wf = started(&stores, "letter").await;
    stores.reports.fail_next("update");
    assert!(wf.advance_status().await.is_err());
    assert_eq!(wf.status(), Some(ReportStatus::Draft));
}

// ============================================================================
// VARIABLES, CHECKLIST, EXTRACTION, IMAGES
// ============================================================================

#[tokio::test]
async fn test_snippet_shared_across_occurrences() {
    let stores = memory_stores();
    let mut existing = UserTemplate::empty("ut-9", "alice", "letter");
    existing
        .variable_text_templates
        .insert("b2".into(), strings(&["legacy text"]));
    stores.user_templates.insert(existing);

    let mut wf = started(&stores, "letter").await;
    assert_eq!(stores.user_templates.create_count(), 0);
    assert_eq!(wf.saved_entries(SavedKind::Snippets, "b1"), strings(&["legacy text"]));

    wf.add_saved_entry(SavedKind::Snippets, "b1", "Looks fine").await.unwrap();
    let expected = strings(&["legacy text", "Looks fine"]);
    assert_eq!(wf.saved_entries(SavedKind::Snippets, "b1"), expected);
    assert_eq!(wf.saved_entries(SavedKind::Snippets, "b2"), expected);

    let stored = stores.user_templates.get_by_template("letter").unwrap();
    assert_eq!(stored.variable_text_templates.get("Notes"), Some(&expected));
    assert!(!stored.variable_text_templates.contains_key("b2"));

    stores.user_templates.fail_next_patch();
    assert!(wf.add_saved_entry(SavedKind::Snippets, "b2", "Nope").await.is_err());
    assert_eq!(wf.saved_entries(SavedKind::Snippets, "b2"), expected);
}

#[tokio::test]
async fn test_checklist_saved_with_values() {
    let stores = memory_stores();
    let mut settings = UserTemplate::empty("ut-9", "alice", "letter");
    settings.checklist = ["Photos", "Signature", "Map"]
        .iter()
        .map(|label| ChecklistItem {
            id: label.to_lowercase(),
            label: label.to_string(),
            required: false,
        })
        .collect();
    stores.user_templates.insert(settings);

    let mut wf = started(&stores, "letter").await;
    wf.set_value("Notes", "done");

    assert_eq!(wf.set_checked("photos", true).await.unwrap(), ChecklistStatus::Partial);
    let (_, patch) = stores.reports.updates().last().cloned().unwrap();
    assert_eq!(patch.checklist_status, Some(ChecklistStatus::Partial));
    assert_eq!(patch.checklist_progress.map(|p| p.len()), Some(3));
    assert_eq!(
        patch.values.and_then(|v| v.get("Notes").cloned()).as_deref(),
        Some("done")
    );

    wf.set_checked("signature", true).await.unwrap();
    assert_eq!(wf.set_checked("map", true).await.unwrap(), ChecklistStatus::Complete);

    stores.reports.fail_next("update");
    assert!(wf.set_checked("map", false).await.is_err());
    assert_eq!(wf.checklist_summary().status, ChecklistStatus::Complete);

    assert!(matches!(
        wf.set_checked("unknown", true).await,
        Err(FolioError::Validation(_))
    ));
}

#[tokio::test]
async fn test_checklist_definition_edits_recompute_progress() {
    let stores = memory_stores();
    let mut wf = started(&stores, "letter").await;

    let photos = wf.add_checklist_item("Photos", true).await.unwrap();
    let map = wf.add_checklist_item("Map", false).await.unwrap();
    wf.set_checked(&photos, true).await.unwrap();
    assert_eq!(wf.checklist_summary().status, ChecklistStatus::Partial);

    wf.remove_checklist_item(&map).await.unwrap();
    assert_eq!(wf.checklist_summary().status, ChecklistStatus::Complete);
    assert_eq!(
        stores.reports.get("report-1").unwrap().checklist_status,
        ChecklistStatus::Complete
    );

    stores.user_templates.fail_next_patch();
    assert!(wf.rename_checklist_item(&photos, "Site photos").await.is_err());
    assert_eq!(wf.checklist()[0].label, "Photos");
}

#[tokio::test]
async fn test_pdf_extraction() {
    let stores = memory_stores();
    let mut wf = started(&stores, "survey").await;

    stores.extractor.set_values(
        [("Owner", "J. Doe"), ("Blank", " ")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    );
    assert_eq!(wf.extract_pdf_values("deed.pdf", vec![1, 2, 3]).await.unwrap(), 1);
    assert_eq!(wf.variable_value("v2"), Some("J. Doe"));

    stores.extractor.fail_next();
    assert!(matches!(
        wf.extract_pdf_values("deed.pdf", Vec::new()).await,
        Err(FolioError::Extraction(_))
    ));
    assert_eq!(wf.variable_value("v2"), Some("J. Doe"));
    assert!(!wf.is_extracting());

    // Leaving geography waits for a running extraction.
    wf.begin_extraction().unwrap();
    assert!(matches!(wf.next().await, Err(FolioError::Validation(_))));
    wf.finish_extraction(Ok(BTreeMap::new())).unwrap();
    assert_eq!(wf.next().await.unwrap(), Step::VariableFill);
    assert_eq!(
        stores.reports.get("report-1").unwrap().values.get("Owner").map(String::as_str),
        Some("J. Doe")
    );
    assert!(wf.missing_required().is_empty());
}

#[tokio::test]
async fn test_missing_required_lists_blank_variables() {
    let stores = memory_stores();
    let mut wf = started(&stores, "survey").await;
    assert_eq!(wf.missing_required(), vec!["Owner".to_string()]);
    wf.set_variable("v2", "  ").unwrap();
    assert_eq!(wf.missing_required(), vec!["Owner".to_string()]);
    wf.set_variable("v2", "Ann").unwrap();
    assert!(wf.missing_required().is_empty());
}

#[tokio::test]
async fn test_commit_image_uploads_edited_surface() {
    let stores = memory_stores();
    let mut wf = started(&stores, "survey").await;
    wf.next().await.unwrap();

    let editor = wf.open_image_editor(&png(20, 10), None).unwrap();
    assert!(editor.lock().await.crop(folio::editor::Rect::new(0, 0, 5, 5)));

    let url = wf.commit_image("v3", &editor).await.unwrap();
    assert_eq!(url, "memory://uploads/1/Photo.png");
    assert_eq!(wf.variable_value("v3"), Some(url.as_str()));

    let uploads = stores.uploads.uploads();
    assert_eq!(uploads[0].0, "Photo.png");
    assert_eq!(uploads[0].1, "image/png");
    let uploaded = image::load_from_memory(&uploads[0].2).unwrap();
    assert_eq!((uploaded.width(), uploaded.height()), (5, 5));

    assert!(matches!(
        wf.commit_image("v2", &editor).await,
        Err(FolioError::Validation(_))
    ));
}

#[tokio::test]
async fn test_appendix_changes_reach_render() {
    let stores = memory_stores();
    let mut wf = started(&stores, "letter").await;

    let a = wf.upload_appendix("site.png", png(4, 4)).await.unwrap();
    let b = wf
        .upload_appendix("deed.pdf", b"%PDF-1.4 /Type /Page\n/Type /Page\n/Type /Pages".to_vec())
        .await
        .unwrap();
    assert_eq!(b.pages(), 2);
    assert!(matches!(
        wf.upload_appendix("notes.txt", Vec::new()).await,
        Err(FolioError::Validation(_))
    ));

    wf.reorder_appendix(&[b.id.clone(), a.id.clone()]).await.unwrap();
    let order: Vec<&str> = wf.appendix().iter().map(|i| i.id.as_str()).collect();
    assert_eq!(order, vec![b.id.as_str(), a.id.as_str()]);
    assert!(wf.reorder_appendix(&[a.id.clone()]).await.is_err());

    assert_eq!(wf.next().await.unwrap(), Step::Preview);
    assert_eq!(wf.preview().unwrap().bytes, b"pdf:report-1:2".to_vec());

    wf.delete_appendix(&a.id).await.unwrap();
    wf.refresh_appendix().await.unwrap();
    assert_eq!(wf.appendix().len(), 1);
    assert!(wf.preview().is_none());
}
