//! # Template Model
//!
//! A template is either built from legacy *sections* of content blocks, or
//! from a flat list of *imported variables* with named groups. Exactly one
//! shape is active for a template; [`TemplateBody`] makes that explicit and
//! every consumer switches on it once.
//!
//! ## Wire format
//!
//! Stores return camelCase JSON with both `sections` and `importedVariables`
//! optional. A non-empty `importedVariables` list selects the imported
//! shape, anything else is read as sections.
//!
//! ```
//! use folio::template::{Template, TemplateBody};
//!
//! let json = r#"{
//!     "id": "t1",
//!     "name": "Site survey",
//!     "requiresKml": true,
//!     "importedVariables": [{"id": "v1", "name": "owner", "type": "text"}]
//! }"#;
//! let template: Template = serde_json::from_str(json).unwrap();
//! assert!(matches!(template.body, TemplateBody::Imported { .. }));
//! ```

use serde::{Deserialize, Serialize};

/// Declared type of a template variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    #[default]
    Text,
    Kml,
    Image,
    Select,
    Date,
    Calculated,
}

impl VariableType {
    pub fn label(&self) -> &'static str {
        match self {
            VariableType::Text => "Text",
            VariableType::Kml => "Geography field",
            VariableType::Image => "Image",
            VariableType::Select => "Dropdown",
            VariableType::Date => "Date",
            VariableType::Calculated => "Calculated",
        }
    }
}

// ============================================================================
// IMPORTED SHAPE
// ============================================================================

/// A variable from the flat imported schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedVariable {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub var_type: VariableType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    /// Geography attribute this variable is filled from (kml type only).
    #[serde(default)]
    pub kml_field: Option<String>,
}

/// Named section grouping imported variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableGroup {
    pub id: String,
    pub name: String,
}

// ============================================================================
// LEGACY SHAPE
// ============================================================================

/// Ordered section of content blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub blocks: Vec<ContentBlock>,
}

/// One block inside a legacy section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        content: String,
    },
    Variable {
        id: String,
        name: String,
        #[serde(rename = "type", default)]
        var_type: VariableType,
        #[serde(default)]
        required: bool,
        #[serde(default)]
        options: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    KmlField {
        id: String,
        kml_field: String,
        #[serde(default)]
        label: Option<String>,
    },
}

// ============================================================================
// TEMPLATE
// ============================================================================

/// The active representation of a template's variables.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateBody {
    Legacy {
        sections: Vec<Section>,
    },
    Imported {
        variables: Vec<ImportedVariable>,
        groups: Vec<VariableGroup>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TemplateRecord", into = "TemplateRecord")]
pub struct Template {
    pub id: String,
    pub name: String,
    pub active: bool,
    /// Adds the mandatory geography-entry step.
    pub requires_kml: bool,
    pub body: TemplateBody,
}

/// Borrowed view of one variable occurrence, independent of template shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariableRef<'a> {
    /// Raw per-occurrence identifier.
    pub id: &'a str,
    pub name: &'a str,
    pub var_type: VariableType,
    pub kml_field: Option<&'a str>,
    pub required: bool,
    pub options: &'a [String],
}

/// Variables of one group (imported) or section (legacy), in display order.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableGroupView<'a> {
    pub id: Option<&'a str>,
    pub title: &'a str,
    pub variables: Vec<VariableRef<'a>>,
}

impl Template {
    /// Every variable occurrence in template order.
    pub fn variables(&self) -> Vec<VariableRef<'_>> {
        match &self.body {
            TemplateBody::Legacy { sections } => sections
                .iter()
                .flat_map(|s| s.blocks.iter().filter_map(block_variable))
                .collect(),
            TemplateBody::Imported { variables, .. } => {
                variables.iter().map(imported_variable).collect()
            }
        }
    }

    /// Variables bucketed for the fill form.
    ///
    /// Imported templates follow group order with ungrouped variables (and
    /// variables pointing at an unknown group) in a trailing untitled bucket.
    /// Legacy templates produce one bucket per section that has variables.
    pub fn grouped_variables(&self) -> Vec<VariableGroupView<'_>> {
        match &self.body {
            TemplateBody::Legacy { sections } => sections
                .iter()
                .map(|s| VariableGroupView {
                    id: Some(s.id.as_str()),
                    title: s.title.as_str(),
                    variables: s.blocks.iter().filter_map(block_variable).collect(),
                })
                .filter(|g| !g.variables.is_empty())
                .collect(),
            TemplateBody::Imported { variables, groups } => {
                let mut views: Vec<VariableGroupView<'_>> = groups
                    .iter()
                    .map(|g| VariableGroupView {
                        id: Some(g.id.as_str()),
                        title: g.name.as_str(),
                        variables: Vec::new(),
                    })
                    .collect();
                let mut ungrouped = Vec::new();

                for var in variables {
                    let slot = var
                        .group_id
                        .as_deref()
                        .and_then(|gid| groups.iter().position(|g| g.id == gid));
                    match slot {
                        Some(i) => views[i].variables.push(imported_variable(var)),
                        None => ungrouped.push(imported_variable(var)),
                    }
                }

                views.retain(|g| !g.variables.is_empty());
                if !ungrouped.is_empty() {
                    views.push(VariableGroupView {
                        id: None,
                        title: "",
                        variables: ungrouped,
                    });
                }
                views
            }
        }
    }

    /// Find an occurrence by its raw identifier.
    pub fn variable_by_id(&self, id: &str) -> Option<VariableRef<'_>> {
        self.variables().into_iter().find(|v| v.id == id)
    }

    pub fn is_imported(&self) -> bool {
        matches!(self.body, TemplateBody::Imported { .. })
    }
}

fn block_variable(block: &ContentBlock) -> Option<VariableRef<'_>> {
    match block {
        ContentBlock::Text { .. } => None,
        ContentBlock::Variable {
            id,
            name,
            var_type,
            required,
            options,
        } => Some(VariableRef {
            id,
            name,
            var_type: *var_type,
            kml_field: None,
            required: *required,
            options,
        }),
        ContentBlock::KmlField {
            id,
            kml_field,
            label,
        } => Some(VariableRef {
            id,
            name: label.as_deref().unwrap_or(kml_field),
            var_type: VariableType::Kml,
            kml_field: Some(kml_field),
            required: false,
            options: &[],
        }),
    }
}

fn imported_variable(var: &ImportedVariable) -> VariableRef<'_> {
    VariableRef {
        id: &var.id,
        name: &var.name,
        var_type: var.var_type,
        kml_field: var.kml_field.as_deref(),
        required: var.required,
        options: &var.options,
    }
}

/// Build a flat text-typed variable list from names detected in an uploaded
/// document. Blank names are skipped and repeated names kept once.
pub fn imported_from_names(names: &[String]) -> Vec<ImportedVariable> {
    let mut out: Vec<ImportedVariable> = Vec::new();
    for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        if out.iter().any(|v| v.name == name) {
            continue;
        }
        out.push(ImportedVariable {
            id: format!("var_{}", out.len() + 1),
            name: name.to_string(),
            var_type: VariableType::Text,
            required: false,
            options: Vec::new(),
            description: None,
            group_id: None,
            kml_field: None,
        });
    }
    out
}

// ============================================================================
// WIRE RECORD
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TemplateRecord {
    id: String,
    name: String,
    #[serde(default = "default_active")]
    is_active: bool,
    #[serde(default)]
    requires_kml: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sections: Option<Vec<Section>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    imported_variables: Option<Vec<ImportedVariable>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    variable_groups: Option<Vec<VariableGroup>>,
}

fn default_active() -> bool {
    true
}

impl From<TemplateRecord> for Template {
    fn from(r: TemplateRecord) -> Self {
        let body = match r.imported_variables {
            Some(variables) if !variables.is_empty() => TemplateBody::Imported {
                variables,
                groups: r.variable_groups.unwrap_or_default(),
            },
            _ => TemplateBody::Legacy {
                sections: r.sections.unwrap_or_default(),
            },
        };
        Template {
            id: r.id,
            name: r.name,
            active: r.is_active,
            requires_kml: r.requires_kml,
            body,
        }
    }
}

impl From<Template> for TemplateRecord {
    fn from(t: Template) -> Self {
        let (sections, imported_variables, variable_groups) = match t.body {
            TemplateBody::Legacy { sections } => (Some(sections), None, None),
            TemplateBody::Imported { variables, groups } => (None, Some(variables), Some(groups)),
        };
        TemplateRecord {
            id: t.id,
            name: t.name,
            is_active: t.active,
            requires_kml: t.requires_kml,
            sections,
            imported_variables,
            variable_groups,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy_template() -> Template {
        serde_json::from_str(
            r#"{
                "id": "legacy",
                "name": "Legacy",
                "sections": [
                    {"id": "s1", "title": "Intro", "blocks": [
                        {"kind": "text", "content": "Dear"},
                        {"kind": "variable", "id": "a1", "name": "owner"}
                    ]},
                    {"id": "s2", "title": "Empty", "blocks": [{"kind": "text", "content": "x"}]},
                    {"id": "s3", "title": "Site", "blocks": [
                        {"kind": "kml_field", "id": "k1", "kmlField": "parcel", "label": "Parcel"}
                    ]}
                ],
                "importedVariables": []
            }"#,
        )
        .unwrap()
    }

    fn imported_template() -> Template {
        Template {
            id: "imp".into(),
            name: "Imported".into(),
            active: true,
            requires_kml: false,
            body: TemplateBody::Imported {
                variables: vec![
                    var("v1", "owner", Some("g2")),
                    var("v2", "date", None),
                    var("v3", "plot", Some("g1")),
                    var("v4", "stray", Some("missing")),
                ],
                groups: vec![
                    VariableGroup { id: "g1".into(), name: "Site".into() },
                    VariableGroup { id: "g2".into(), name: "People".into() },
                    VariableGroup { id: "g3".into(), name: "Unused".into() },
                ],
            },
        }
    }

    fn var(id: &str, name: &str, group: Option<&str>) -> ImportedVariable {
        ImportedVariable {
            id: id.into(),
            name: name.into(),
            var_type: VariableType::Text,
            required: false,
            options: vec![],
            description: None,
            group_id: group.map(String::from),
            kml_field: None,
        }
    }

    #[test]
    fn test_empty_imported_list_reads_as_legacy() {
        let t = legacy_template();
        assert!(!t.is_imported());
        let vars = t.variables();
        assert_eq!(vars.len(), 2);
        assert_eq!(vars[1].var_type, VariableType::Kml);
        assert_eq!(vars[1].kml_field, Some("parcel"));
        assert_eq!(vars[1].name, "Parcel");
    }

    #[test]
    fn test_legacy_groups_skip_sections_without_variables() {
        let t = legacy_template();
        let titles: Vec<&str> = t.grouped_variables().iter().map(|g| g.title).collect();
        assert_eq!(titles, vec!["Intro", "Site"]);
    }

    #[test]
    fn test_imported_groups_follow_group_order() {
        let t = imported_template();
        let groups = t.grouped_variables();
        let shape: Vec<(Option<&str>, Vec<&str>)> = groups
            .iter()
            .map(|g| (g.id, g.variables.iter().map(|v| v.name).collect()))
            .collect();
        assert_eq!(
            shape,
            vec![
                (Some("g1"), vec!["plot"]),
                (Some("g2"), vec!["owner"]),
                (None, vec!["date", "stray"]),
            ]
        );
    }

    #[test]
    fn test_roundtrip_keeps_active_shape() {
        let t = imported_template();
        let json = serde_json::to_string(&t).unwrap();
        assert!(!json.contains("sections"));
        let back: Template = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_imported_from_names_dedupes_and_trims() {
        let names = vec![" owner ".to_string(), "".to_string(), "owner".to_string(), "date".to_string()];
        let vars = imported_from_names(&names);
        let got: Vec<(&str, &str)> = vars.iter().map(|v| (v.id.as_str(), v.name.as_str())).collect();
        assert_eq!(got, vec![("var_1", "owner"), ("var_2", "date")]);
    }
}
