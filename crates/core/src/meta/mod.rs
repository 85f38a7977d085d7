// Metadata cache: per-doctype schemas plus per-document working copies of fields.
//
// The canonical schema is shared by every document of a doctype. Runtime
// overrides (hidden, read_only, options narrowed by a dependency) go to a
// working copy keyed by `(doctype, name)` so they never leak into the
// canonical descriptors.

pub mod persist;

use std::collections::HashMap;

use docmirror_common::schema::DOCTYPE_DOCTYPE;
use docmirror_common::{DocKey, DocTypeSchema, Document, FieldDescriptor, PayloadError};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{MirrorError, Result};

/// A child-table field of a parent doctype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableField {
    pub fieldname: String,
    pub child_doctype: String,
}

#[derive(Debug, Default)]
pub struct MetaCache {
    schemas: HashMap<String, DocTypeSchema>,
    working_copies: HashMap<DocKey, HashMap<String, FieldDescriptor>>,
}

impl MetaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, schema: DocTypeSchema) {
        info!(doctype = %schema.name, fields = schema.fields.len(), "schema loaded");
        self.schemas.insert(schema.name.clone(), schema);
    }

    /// Feed a `DocType` record from a sync payload into the cache.
    pub fn sync_record(&mut self, record: &Document) -> std::result::Result<(), PayloadError> {
        debug_assert_eq!(record.doctype, DOCTYPE_DOCTYPE);
        let schema = DocTypeSchema::from_record(record)?;
        self.insert(schema);
        Ok(())
    }

    pub fn get(&self, doctype: &str) -> Option<&DocTypeSchema> {
        self.schemas.get(doctype)
    }

    /// Schema for `doctype`, or `SchemaNotLoaded`.
    pub fn require(&self, doctype: &str) -> Result<&DocTypeSchema> {
        self.schemas.get(doctype).ok_or_else(|| MirrorError::schema_not_loaded(doctype))
    }

    pub fn is_loaded(&self, doctype: &str) -> bool {
        self.schemas.contains_key(doctype)
    }

    pub fn doctypes(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.schemas.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Whether `doctype` is a child-table doctype. `None` when not loaded.
    pub fn is_table_doctype(&self, doctype: &str) -> Option<bool> {
        self.schemas.get(doctype).map(|schema| schema.istable)
    }

    /// Child-table fields of `doctype` in schema order. `None` when not loaded.
    pub fn table_fields(&self, doctype: &str) -> Option<Vec<TableField>> {
        let schema = self.schemas.get(doctype)?;
        Some(
            schema
                .table_fields()
                .filter_map(|field| {
                    Some(TableField {
                        fieldname: field.fieldname.clone(),
                        child_doctype: field.link_target()?.to_string(),
                    })
                })
                .collect(),
        )
    }

    pub fn field(&self, doctype: &str, fieldname: &str) -> Option<&FieldDescriptor> {
        self.schemas.get(doctype)?.field(fieldname)
    }

    /// Descriptor as seen by one document: its working copy when one exists,
    /// else the canonical descriptor.
    pub fn docfield(
        &self,
        doctype: &str,
        fieldname: &str,
        docname: Option<&str>,
    ) -> Option<&FieldDescriptor> {
        if let Some(docname) = docname {
            let key = DocKey::new(doctype, docname);
            if let Some(copy) = self.working_copies.get(&key).and_then(|copies| copies.get(fieldname)) {
                return Some(copy);
            }
        }
        self.field(doctype, fieldname)
    }

    /// Apply a runtime override to one document's copy of a field, creating
    /// the copy from the canonical descriptor on first use.
    pub fn update_docfield<F>(&mut self, key: &DocKey, fieldname: &str, update: F) -> Result<()>
    where
        F: FnOnce(&mut FieldDescriptor),
    {
        let canonical = self
            .require(&key.doctype)?
            .field(fieldname)
            .cloned()
            .ok_or_else(|| MirrorError::schema_not_loaded(format!("{}.{fieldname}", key.doctype)))?;

        let copy = self
            .working_copies
            .entry(key.clone())
            .or_default()
            .entry(fieldname.to_string())
            .or_insert(canonical);
        update(copy);
        Ok(())
    }

    pub fn has_working_copies(&self, key: &DocKey) -> bool {
        self.working_copies.contains_key(key)
    }

    pub fn rename_working_copies(&mut self, from: &DocKey, to: &DocKey) {
        if let Some(copies) = self.working_copies.remove(from) {
            self.working_copies.insert(to.clone(), copies);
        }
    }

    pub fn drop_working_copies(&mut self, key: &DocKey) {
        self.working_copies.remove(key);
    }

    /// Record the value default resolution produced for a canonical field.
    pub fn note_resolved_default(&mut self, doctype: &str, fieldname: &str, value: Option<Value>) {
        if let Some(field) = self.schemas.get_mut(doctype).and_then(|schema| schema.field_mut(fieldname)) {
            debug!(doctype, fieldname, ?value, "recorded resolved default");
            field.resolved_default = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use docmirror_common::FieldType;

    use super::*;

    fn invoice_schema() -> DocTypeSchema {
        DocTypeSchema::new(
            "Sales Invoice",
            vec![
                FieldDescriptor::new("customer", FieldType::Link).with_options("Customer"),
                FieldDescriptor::new("items", FieldType::Table).with_options("Sales Invoice Item"),
                FieldDescriptor::new("taxes", FieldType::Table).with_options("Sales Taxes"),
            ],
        )
    }

    #[test]
    fn require_reports_missing_schema() {
        let cache = MetaCache::new();
        assert!(matches!(cache.require("Task"), Err(MirrorError::SchemaNotLoaded(name)) if name == "Task"));
    }

    #[test]
    fn table_fields_follow_schema_order() {
        let mut cache = MetaCache::new();
        cache.insert(invoice_schema());

        let tables = cache.table_fields("Sales Invoice").unwrap();
        assert_eq!(
            tables,
            vec![
                TableField { fieldname: "items".into(), child_doctype: "Sales Invoice Item".into() },
                TableField { fieldname: "taxes".into(), child_doctype: "Sales Taxes".into() },
            ]
        );
        assert!(cache.table_fields("Unknown").is_none());
    }

    #[test]
    fn working_copy_isolated_from_canonical_schema() {
        let mut cache = MetaCache::new();
        cache.insert(invoice_schema());
        let key = DocKey::new("Sales Invoice", "SINV-1");

        cache.update_docfield(&key, "customer", |field| field.hidden = true).unwrap();

        assert!(cache.docfield("Sales Invoice", "customer", Some("SINV-1")).unwrap().hidden);
        assert!(!cache.docfield("Sales Invoice", "customer", Some("SINV-2")).unwrap().hidden);
        assert!(!cache.field("Sales Invoice", "customer").unwrap().hidden);
    }

    #[test]
    fn working_copies_follow_renames() {
        let mut cache = MetaCache::new();
        cache.insert(invoice_schema());
        let local = DocKey::new("Sales Invoice", "new-sales-invoice-1");
        let saved = DocKey::new("Sales Invoice", "SINV-1");

        cache.update_docfield(&local, "customer", |field| field.read_only = true).unwrap();
        cache.rename_working_copies(&local, &saved);

        assert!(!cache.has_working_copies(&local));
        assert!(cache.docfield("Sales Invoice", "customer", Some("SINV-1")).unwrap().read_only);
    }

    #[test]
    fn update_docfield_requires_schema_and_field() {
        let mut cache = MetaCache::new();
        let key = DocKey::new("Task", "T-1");
        assert!(cache.update_docfield(&key, "status", |_| {}).is_err());

        cache.insert(invoice_schema());
        let key = DocKey::new("Sales Invoice", "SINV-1");
        assert!(cache.update_docfield(&key, "missing", |_| {}).is_err());
    }

    #[test]
    fn sync_record_parses_doctype_documents() {
        let mut cache = MetaCache::new();
        let record = Document::from_value(serde_json::json!({
            "doctype": "DocType",
            "name": "Task Depends On",
            "istable": 1,
            "fields": [{"fieldname": "task", "fieldtype": "Link", "options": "Task"}]
        }))
        .unwrap();

        cache.sync_record(&record).unwrap();
        assert_eq!(cache.is_table_doctype("Task Depends On"), Some(true));
        assert_eq!(cache.doctypes(), vec!["Task Depends On"]);
    }
}
