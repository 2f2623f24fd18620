//! # Canonical Variable Resolver
//!
//! A variable can appear in a template several times, and older data keyed
//! saved snippets and dropdown values by each occurrence's raw id. Reads
//! merge every bucket that belongs to the same logical variable; writes go
//! to the canonical key only and drop the legacy buckets, so the stored
//! data converges while old data stays readable.
//!
//! ## Canonical key
//!
//! | Variable | Key |
//! |----------|-----|
//! | kml type with a field | `kml:<field>` |
//! | anything else | declared name |

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::FolioError;
use crate::store::UserTemplateStore;
use crate::template::{Template, VariableRef, VariableType};
use crate::user_template::{SavedEntries, UserTemplate, UserTemplatePatch};

/// Prefix of canonical keys for geography-derived variables.
pub const KML_PREFIX: &str = "kml:";

/// Stable identity of a variable occurrence.
pub fn canonical_key(var: &VariableRef<'_>) -> String {
    match (var.var_type, var.kml_field) {
        (VariableType::Kml, Some(field)) if !field.is_empty() => format!("{}{}", KML_PREFIX, field),
        _ => var.name.to_string(),
    }
}

/// Raw ids of every occurrence in `template` that resolves to `canonical`,
/// in template order, without repeats and without `canonical` itself.
pub fn legacy_keys_for(canonical: &str, template: &Template) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for var in template.variables() {
        if var.id != canonical
            && canonical_key(&var) == canonical
            && !keys.iter().any(|k| k == var.id)
        {
            keys.push(var.id.to_string());
        }
    }
    keys
}

/// Concatenate the canonical bucket and every legacy bucket, first-seen order,
/// duplicates kept.
pub fn merged_entries(entries: &SavedEntries, canonical: &str, template: &Template) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(list) = entries.get(canonical) {
        out.extend(list.iter().cloned());
    }
    for key in legacy_keys_for(canonical, template) {
        if let Some(list) = entries.get(&key) {
            out.extend(list.iter().cloned());
        }
    }
    out
}

/// Store `list` under `canonical` and remove the legacy buckets of the same variable.
pub fn converge_entries(
    entries: &mut SavedEntries,
    canonical: &str,
    template: &Template,
    list: Vec<String>,
) {
    for key in legacy_keys_for(canonical, template) {
        entries.remove(&key);
    }
    entries.insert(canonical.to_string(), list);
}

/// Look up a report value for a variable, falling back to values stored under
/// legacy occurrence ids.
pub fn resolve_value<'v>(
    values: &'v BTreeMap<String, String>,
    template: &Template,
    var: &VariableRef<'_>,
) -> Option<&'v str> {
    let canonical = canonical_key(var);
    if let Some(v) = values.get(&canonical) {
        return Some(v.as_str());
    }
    legacy_keys_for(&canonical, template)
        .iter()
        .find_map(|k| values.get(k))
        .map(String::as_str)
}

/// Which saved collection an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavedKind {
    /// Reusable text snippets for free-text variables.
    Snippets,
    /// Extra dropdown values for select variables.
    SelectOptions,
}

impl SavedKind {
    fn label(self) -> &'static str {
        match self {
            SavedKind::Snippets => "snippet",
            SavedKind::SelectOptions => "dropdown option",
        }
    }
}

// ============================================================================
// VARIABLE LIBRARY
// ============================================================================

/// A user's saved snippets and dropdown values for one template, with
/// write-through persistence.
///
/// Every write patches the store with the whole collection. If the store
/// call fails the in-memory copy is restored to its pre-write snapshot.
pub struct VariableLibrary {
    user_template: UserTemplate,
    store: Arc<dyn UserTemplateStore>,
}

impl VariableLibrary {
    pub fn new(user_template: UserTemplate, store: Arc<dyn UserTemplateStore>) -> Self {
        Self {
            user_template,
            store,
        }
    }

    pub fn user_template(&self) -> &UserTemplate {
        &self.user_template
    }

    pub fn user_template_mut(&mut self) -> &mut UserTemplate {
        &mut self.user_template
    }

    pub fn store(&self) -> &Arc<dyn UserTemplateStore> {
        &self.store
    }

    fn collection(&self, kind: SavedKind) -> &SavedEntries {
        match kind {
            SavedKind::Snippets => &self.user_template.variable_text_templates,
            SavedKind::SelectOptions => &self.user_template.variable_select_options,
        }
    }

    fn collection_mut(&mut self, kind: SavedKind) -> &mut SavedEntries {
        match kind {
            SavedKind::Snippets => &mut self.user_template.variable_text_templates,
            SavedKind::SelectOptions => &mut self.user_template.variable_select_options,
        }
    }

    /// Merged saved entries for the variable with raw id `var_id`.
    pub fn entries(&self, kind: SavedKind, template: &Template, var_id: &str) -> Vec<String> {
        match template.variable_by_id(var_id) {
            Some(var) => merged_entries(self.collection(kind), &canonical_key(&var), template),
            None => Vec::new(),
        }
    }

    /// Dropdown choices: template-declared options followed by saved ones.
    pub fn dropdown_choices(&self, template: &Template, var_id: &str) -> Vec<String> {
        let Some(var) = template.variable_by_id(var_id) else {
            return Vec::new();
        };
        let mut choices: Vec<String> = var.options.to_vec();
        choices.extend(merged_entries(
            &self.user_template.variable_select_options,
            &canonical_key(&var),
            template,
        ));
        choices
    }

    pub async fn add(
        &mut self,
        kind: SavedKind,
        template: &Template,
        var_id: &str,
        text: &str,
    ) -> Result<(), FolioError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(FolioError::Validation(format!("{} is empty", kind.label())));
        }
        let canonical = self.canonical_for(template, var_id)?;
        let mut list = merged_entries(self.collection(kind), &canonical, template);
        list.push(text.to_string());
        self.write(kind, template, &canonical, list).await
    }

    /// Delete the entry at `index` of the merged list.
    pub async fn delete(
        &mut self,
        kind: SavedKind,
        template: &Template,
        var_id: &str,
        index: usize,
    ) -> Result<(), FolioError> {
        let canonical = self.canonical_for(template, var_id)?;
        let mut list = merged_entries(self.collection(kind), &canonical, template);
        if index >= list.len() {
            return Err(FolioError::Validation(format!(
                "no {} at position {}",
                kind.label(),
                index
            )));
        }
        list.remove(index);
        self.write(kind, template, &canonical, list).await
    }

    fn canonical_for(&self, template: &Template, var_id: &str) -> Result<String, FolioError> {
        template
            .variable_by_id(var_id)
            .map(|v| canonical_key(&v))
            .ok_or_else(|| FolioError::Validation(format!("unknown variable '{}'", var_id)))
    }

    async fn write(
        &mut self,
        kind: SavedKind,
        template: &Template,
        canonical: &str,
        list: Vec<String>,
    ) -> Result<(), FolioError> {
        let snapshot = self.user_template.clone();
        converge_entries(self.collection_mut(kind), canonical, template, list);

        let collection = self.collection(kind).clone();
        let patch = match kind {
            SavedKind::Snippets => UserTemplatePatch {
                variable_text_templates: Some(collection),
                ..Default::default()
            },
            SavedKind::SelectOptions => UserTemplatePatch {
                variable_select_options: Some(collection),
                ..Default::default()
            },
        };

        match self.store.patch(&self.user_template.id, &patch).await {
            Ok(()) => {
                debug!(canonical, kind = kind.label(), "saved variable entries");
                Ok(())
            }
            Err(e) => {
                warn!(canonical, error = %e, "saving variable entries failed, reverting");
                self.user_template = snapshot;
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryUserTemplates;
    use crate::template::{ImportedVariable, TemplateBody};

    fn var(id: &str, name: &str, var_type: VariableType, kml_field: Option<&str>) -> ImportedVariable {
        ImportedVariable {
            id: id.into(),
            name: name.into(),
            var_type,
            required: false,
            options: vec![],
            description: None,
            group_id: None,
            kml_field: kml_field.map(String::from),
        }
    }

    fn template() -> Template {
        Template {
            id: "t1".into(),
            name: "Survey".into(),
            active: true,
            requires_kml: true,
            body: TemplateBody::Imported {
                variables: vec![
                    var("id-a", "owner", VariableType::Text, None),
                    var("id-b", "owner", VariableType::Text, None),
                    var("id-c", "Parcel", VariableType::Kml, Some("parcel")),
                    var("id-d", "Parcel no", VariableType::Kml, Some("parcel")),
                    var("id-e", "kind", VariableType::Select, None),
                ],
                groups: vec![],
            },
        }
    }

    #[test]
    fn test_canonical_key_kinds() {
        let t = template();
        let keys: Vec<String> = t.variables().iter().map(canonical_key).collect();
        assert_eq!(keys, vec!["owner", "owner", "kml:parcel", "kml:parcel", "kind"]);
    }

    #[test]
    fn test_legacy_keys_for_collects_raw_ids() {
        let t = template();
        assert_eq!(legacy_keys_for("owner", &t), vec!["id-a", "id-b"]);
        assert_eq!(legacy_keys_for("kml:parcel", &t), vec!["id-c", "id-d"]);
        assert!(legacy_keys_for("nobody", &t).is_empty());
    }

    #[test]
    fn test_merge_keeps_order_and_duplicates() {
        let t = template();
        let mut entries = SavedEntries::new();
        entries.insert("id-b".into(), vec!["b1".into(), "dup".into()]);
        entries.insert("owner".into(), vec!["c1".into()]);
        entries.insert("id-a".into(), vec!["dup".into()]);
        entries.insert("kind".into(), vec!["other".into()]);
        assert_eq!(
            merged_entries(&entries, "owner", &t),
            vec!["c1", "dup", "b1", "dup"]
        );
    }

    #[test]
    fn test_converge_drops_legacy_buckets() {
        let t = template();
        let mut entries = SavedEntries::new();
        entries.insert("id-a".into(), vec!["x".into()]);
        entries.insert("id-e".into(), vec!["keep".into()]);
        converge_entries(&mut entries, "owner", &t, vec!["x".into(), "y".into()]);
        assert!(!entries.contains_key("id-a"));
        assert_eq!(entries["owner"], vec!["x", "y"]);
        assert_eq!(entries["id-e"], vec!["keep"]);
    }

    #[test]
    fn test_resolve_value_falls_back_to_legacy_id() {
        let t = template();
        let vars = t.variables();
        let mut values = BTreeMap::new();
        values.insert("id-d".to_string(), "P-17".to_string());
        assert_eq!(resolve_value(&values, &t, &vars[2]), Some("P-17"));
        values.insert("kml:parcel".to_string(), "P-18".to_string());
        assert_eq!(resolve_value(&values, &t, &vars[2]), Some("P-18"));
    }

    #[tokio::test]
    async fn test_snippet_added_under_one_occurrence_visible_from_other() {
        let t = template();
        let store = Arc::new(MemoryUserTemplates::default());
        let ut = store.create_empty("t1");
        let mut library = VariableLibrary::new(ut, store.clone());

        library.add(SavedKind::Snippets, &t, "id-a", "Ministry of Works").await.unwrap();

        assert_eq!(
            library.entries(SavedKind::Snippets, &t, "id-b"),
            vec!["Ministry of Works"]
        );
        let stored = store.get_by_template("t1").unwrap();
        assert_eq!(stored.variable_text_templates["owner"], vec!["Ministry of Works"]);
    }

    #[tokio::test]
    async fn test_failed_write_reverts() {
        let t = template();
        let store = Arc::new(MemoryUserTemplates::default());
        let mut ut = store.create_empty("t1");
        ut.variable_select_options.insert("id-e".into(), vec!["old".into()]);
        let mut library = VariableLibrary::new(ut.clone(), store.clone());

        store.fail_next_patch();
        let err = library
            .add(SavedKind::SelectOptions, &t, "id-e", "new")
            .await
            .unwrap_err();
        assert!(matches!(err, FolioError::Persistence(_)));
        assert_eq!(library.user_template(), &ut);
        assert_eq!(library.dropdown_choices(&t, "id-e"), vec!["old"]);
    }

    #[tokio::test]
    async fn test_delete_by_merged_index_converges() {
        let t = template();
        let store = Arc::new(MemoryUserTemplates::default());
        let mut ut = store.create_empty("t1");
        ut.variable_text_templates.insert("id-c".into(), vec!["a".into(), "b".into()]);
        ut.variable_text_templates.insert("id-d".into(), vec!["c".into()]);
        let mut library = VariableLibrary::new(ut, store.clone());

        library.delete(SavedKind::Snippets, &t, "id-d", 1).await.unwrap();

        let saved = &library.user_template().variable_text_templates;
        assert_eq!(saved.len(), 1);
        assert_eq!(saved["kml:parcel"], vec!["a", "c"]);
        assert!(library.delete(SavedKind::Snippets, &t, "id-d", 5).await.is_err());
    }
}
