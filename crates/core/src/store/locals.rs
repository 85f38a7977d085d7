// Document registry: doctype → name → document.
//
// Parents do not embed their child rows. `Document::children` holds the
// ordered row names per table field and each row lives in the registry under
// its own key. Callers keep `DocKey` handles and re-query after merges.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use docmirror_common::naming::new_local_name;
use docmirror_common::types::{KEY_DOCTYPE, KEY_IDX, KEY_PARENT, KEY_PARENTFIELD, KEY_PARENTTYPE};
use docmirror_common::{DocKey, Document};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{MirrorError, Result};
use crate::meta::{MetaCache, TableField};
use crate::store::filters::Filters;

/// What a merge did besides writing the document itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    pub key: DocKey,
    /// Child rows the incoming table no longer references.
    pub removed: Vec<DocKey>,
    /// Child rows matched by position that arrived under a new name.
    pub rekeyed: Vec<(DocKey, DocKey)>,
}

impl MergeOutcome {
    fn new(key: DocKey) -> Self {
        Self { key, ..Self::default() }
    }
}

#[derive(Debug, Default)]
pub struct Locals {
    docs: BTreeMap<String, BTreeMap<String, Document>>,
    new_names: HashMap<String, String>,
}

impl Locals {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Lookup ─────────────────────────────────────────────────────

    pub fn get(&self, key: &DocKey) -> Option<&Document> {
        self.get_by(&key.doctype, &key.name)
    }

    pub fn get_by(&self, doctype: &str, name: &str) -> Option<&Document> {
        self.docs.get(doctype)?.get(name)
    }

    pub fn get_mut(&mut self, key: &DocKey) -> Option<&mut Document> {
        self.docs.get_mut(&key.doctype)?.get_mut(&key.name)
    }

    pub fn require(&self, key: &DocKey) -> Result<&Document> {
        self.get(key).ok_or_else(|| MirrorError::NotFound(key.clone()))
    }

    pub fn contains(&self, key: &DocKey) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.docs.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn doctypes(&self) -> impl Iterator<Item = &str> {
        self.docs.iter().filter(|(_, docs)| !docs.is_empty()).map(|(doctype, _)| doctype.as_str())
    }

    /// Documents of `doctype` matching `filters`, in name order. When nothing
    /// is registered under `doctype`, boot records under `:doctype` are used.
    pub fn list(&self, doctype: &str, filters: &Filters) -> Vec<&Document> {
        let docs = match self.docs.get(doctype).filter(|docs| !docs.is_empty()) {
            Some(docs) => Some(docs),
            None => self.docs.get(&format!(":{doctype}")),
        };
        docs.map(|docs| docs.values().filter(|doc| filters.matches(doc)).collect())
            .unwrap_or_default()
    }

    /// Rows of a table field, in table order.
    pub fn children(&self, parent: &DocKey, fieldname: &str, meta: &MetaCache) -> Vec<&Document> {
        let Some(doc) = self.get(parent) else {
            return Vec::new();
        };
        let Some(child_doctype) = child_doctype_of(meta, &parent.doctype, fieldname) else {
            return Vec::new();
        };
        doc.table_rows(fieldname)
            .iter()
            .filter_map(|name| self.get_by(&child_doctype, name))
            .collect()
    }

    /// Permanent name a local draft was renamed to, if a sync reported one.
    pub fn new_name_for(&self, localname: &str) -> Option<&str> {
        self.new_names.get(localname).map(String::as_str)
    }

    /// Flat JSON of a document with child rows re-nested as arrays.
    pub fn to_value(&self, key: &DocKey, meta: &MetaCache) -> Option<Value> {
        let doc = self.get(key)?;
        let mut value = doc.to_value();
        if let (Value::Object(object), Some(tables)) = (&mut value, meta.table_fields(&doc.doctype)) {
            for table in tables {
                let rows: Vec<Value> = doc
                    .table_rows(&table.fieldname)
                    .iter()
                    .filter_map(|name| self.get_by(&table.child_doctype, name))
                    .map(Document::to_value)
                    .collect();
                object.insert(table.fieldname, Value::Array(rows));
            }
        }
        Some(value)
    }

    pub fn mark_synced(&mut self, key: &DocKey, at: DateTime<Utc>) {
        if let Some(doc) = self.get_mut(key) {
            doc.last_sync_on = Some(at);
        }
    }

    /// Synced within `window` of `now`.
    pub fn is_fresh(&self, key: &DocKey, now: DateTime<Utc>, window: Duration) -> bool {
        self.get(key)
            .and_then(|doc| doc.last_sync_on)
            .is_some_and(|synced| now.signed_duration_since(synced) < window)
    }

    // ── Add / update ───────────────────────────────────────────────

    /// Register a document, synthesizing a name when it has none and
    /// splitting embedded table rows into their own entries. An existing
    /// entry under the same key is replaced.
    pub fn add(&mut self, mut doc: Document, meta: &MetaCache) -> MergeOutcome {
        if !doc.has_name() {
            doc.name = new_local_name(&doc.doctype);
            debug!(doctype = %doc.doctype, name = %doc.name, "synthesized local name");
        }
        let mut outcome = MergeOutcome::new(doc.key());

        for table in parent_tables(meta, &doc.doctype) {
            let rows = take_rows(&mut doc, &table.fieldname);
            let mut names = Vec::with_capacity(rows.len());
            for (position, row) in rows.into_iter().enumerate() {
                if let Some(row) = build_row(row, &doc, &table, position) {
                    names.push(row.name.clone());
                    self.insert(row);
                }
            }
            doc.children.insert(table.fieldname, names);
        }

        if let Some(previous) = self.take(&outcome.key) {
            outcome.removed = self.prune_orphans(&previous, &doc, meta);
        }
        self.insert(doc);
        outcome
    }

    /// Merge `incoming` into the registered document with the same key, or
    /// add it when there is none.
    pub fn upsert(&mut self, incoming: Document, meta: &MetaCache) -> MergeOutcome {
        if incoming.has_name() && self.contains(&incoming.key()) {
            self.update(incoming, meta)
        } else {
            self.add(incoming, meta)
        }
    }

    /// Merge in place. Literal fields are assigned; fields the incoming doc
    /// does not mention are kept. Table fields are diffed by position.
    fn update(&mut self, mut incoming: Document, meta: &MetaCache) -> MergeOutcome {
        let key = incoming.key();
        let mut outcome = MergeOutcome::new(key.clone());
        let Some(mut local) = self.take(&key) else {
            return self.add(incoming, meta);
        };

        for table in parent_tables(meta, &key.doctype) {
            if !incoming.fields.contains_key(&table.fieldname) {
                continue;
            }
            let rows = take_rows(&mut incoming, &table.fieldname);
            self.merge_table(&mut local, &table, rows, &mut outcome);
        }

        for (fieldname, value) in incoming.fields {
            local.fields.insert(fieldname, value);
        }
        self.insert(local);
        outcome
    }

    /// Diff a table by position. Every local row is detached first so that
    /// rows returned in a different order never evict one another. An incoming
    /// row reuses the local row of the same name; failing that, the local row
    /// at its position when that row's name is absent from the incoming table.
    fn merge_table(
        &mut self,
        parent: &mut Document,
        table: &TableField,
        rows: Vec<Value>,
        outcome: &mut MergeOutcome,
    ) {
        parent.remove(&table.fieldname);
        let local_names = parent.children.remove(&table.fieldname).unwrap_or_default();
        let mut detached: HashMap<String, Document> = local_names
            .iter()
            .filter_map(|name| {
                self.take(&DocKey::new(table.child_doctype.clone(), name.clone()))
                    .map(|row| (name.clone(), row))
            })
            .collect();

        let incoming: Vec<Document> = rows
            .into_iter()
            .enumerate()
            .filter_map(|(position, row)| build_row(row, parent, table, position))
            .collect();
        let incoming_names: HashSet<&str> = incoming.iter().map(|row| row.name.as_str()).collect();
        let positional: Vec<Option<String>> = (0..incoming.len())
            .map(|position| {
                local_names
                    .get(position)
                    .filter(|name| !incoming_names.contains(name.as_str()))
                    .cloned()
            })
            .collect();

        let mut merged_names = Vec::with_capacity(incoming.len());
        for (mut row, positional) in incoming.into_iter().zip(positional) {
            row.fields.retain(|_, value| !value.is_null());

            let existing = match detached.remove(&row.name) {
                Some(same) => Some(same),
                None => positional.and_then(|name| detached.remove(&name)),
            };
            if let Some(existing) = existing {
                if existing.name != row.name {
                    debug!(
                        doctype = %row.doctype,
                        from = %existing.name,
                        to = %row.name,
                        "child row re-keyed"
                    );
                    outcome.rekeyed.push((existing.key(), row.key()));
                }
                row.last_sync_on = existing.last_sync_on;
            }
            merged_names.push(row.name.clone());
            self.insert(row);
        }

        for name in &local_names {
            let Some(stale) = detached.remove(name) else {
                continue;
            };
            let key = stale.key();
            self.insert(stale);
            outcome.removed.extend(self.remove_tree(&key));
        }

        parent.children.insert(table.fieldname.clone(), merged_names);
    }

    // ── Rename / remove ────────────────────────────────────────────

    /// Drop the entry under a draft's local name after its saved copy has been
    /// registered under `name`. Rows of the draft that the saved copy does not
    /// reference are dropped too. Returns every key removed.
    pub fn rename(&mut self, doctype: &str, localname: &str, name: &str, meta: &MetaCache) -> Vec<DocKey> {
        self.new_names.insert(localname.to_string(), name.to_string());
        if localname == name {
            return Vec::new();
        }

        let old_key = DocKey::new(doctype, localname);
        let Some(old) = self.take(&old_key) else {
            return Vec::new();
        };
        let mut removed = vec![old_key];
        let empty = Document::new(doctype, name);
        let keep = self.get(&DocKey::new(doctype, name)).cloned().unwrap_or(empty);
        removed.extend(self.prune_orphans(&old, &keep, meta));
        removed
    }

    /// Remove a document and its rows. A removed child row is spliced out of
    /// its parent's table and the remaining rows renumbered from 1. Returns
    /// every key removed, the requested one first.
    pub fn remove(&mut self, key: &DocKey, meta: &MetaCache) -> Vec<DocKey> {
        let (parent_key, parentfield) = match self.get(key) {
            Some(doc) => (doc.parent_key(), doc.parentfield().map(str::to_string)),
            None => return Vec::new(),
        };
        let removed = self.remove_tree(key);

        if let (Some(parent_key), Some(parentfield)) = (parent_key, parentfield) {
            if let Some(parent) = self.get_mut(&parent_key) {
                if let Some(rows) = parent.children.get_mut(&parentfield) {
                    rows.retain(|name| name != &key.name);
                }
                self.renumber(&parent_key, &parentfield, meta);
            }
        }
        removed
    }

    // ── Child rows ─────────────────────────────────────────────────

    /// Attach a new row to a parent's table. Without a position the row is
    /// appended. With `at` (1-based) it gets a fractional idx just below `at`
    /// and the table is renumbered so the row ends up at `at`.
    pub fn insert_child(
        &mut self,
        parent: &DocKey,
        fieldname: &str,
        mut row: Document,
        at: Option<usize>,
        meta: &MetaCache,
    ) -> Result<DocKey> {
        let child_doctype = child_doctype_of(meta, &parent.doctype, fieldname).ok_or_else(|| {
            MirrorError::NotATableField { doctype: parent.doctype.clone(), fieldname: fieldname.into() }
        })?;
        let siblings = self.require(parent)?.table_rows(fieldname).len();

        if !row.has_name() {
            row.name = new_local_name(&child_doctype);
        }
        row.doctype = child_doctype;
        row.set(KEY_PARENT, Value::String(parent.name.clone()));
        row.set(KEY_PARENTTYPE, Value::String(parent.doctype.clone()));
        row.set(KEY_PARENTFIELD, Value::String(fieldname.to_string()));
        let idx = match at {
            Some(at) => Value::from(at as f64 - 0.5),
            None => Value::from(siblings + 1),
        };
        row.set(KEY_IDX, idx);

        let key = row.key();
        self.insert(row);
        if let Some(parent_doc) = self.get_mut(parent) {
            parent_doc.children.entry(fieldname.to_string()).or_default().push(key.name.clone());
        }
        if at.is_some() {
            self.renumber(parent, fieldname, meta);
        }
        Ok(key)
    }

    /// Sort a table by idx (stable; rows without idx last) and rewrite idx as
    /// 1..=n.
    pub fn renumber(&mut self, parent: &DocKey, fieldname: &str, meta: &MetaCache) {
        let Some(child_doctype) = child_doctype_of(meta, &parent.doctype, fieldname) else {
            return;
        };
        let Some(names) = self.get(parent).map(|doc| doc.table_rows(fieldname).to_vec()) else {
            return;
        };

        let mut ordered: Vec<(f64, String)> = names
            .into_iter()
            .map(|name| {
                let idx = self
                    .get_by(&child_doctype, &name)
                    .and_then(Document::idx)
                    .unwrap_or(f64::INFINITY);
                (idx, name)
            })
            .collect();
        ordered.sort_by(|a, b| a.0.total_cmp(&b.0));

        let names: Vec<String> = ordered.into_iter().map(|(_, name)| name).collect();
        for (position, name) in names.iter().enumerate() {
            if let Some(row) = self.get_mut(&DocKey::new(child_doctype.clone(), name.clone())) {
                row.set(KEY_IDX, Value::from(position + 1));
            }
        }
        if let Some(parent_doc) = self.get_mut(parent) {
            parent_doc.children.insert(fieldname.to_string(), names);
        }
    }

    // ── Internals ──────────────────────────────────────────────────

    fn insert(&mut self, doc: Document) {
        self.docs.entry(doc.doctype.clone()).or_default().insert(doc.name.clone(), doc);
    }

    fn take(&mut self, key: &DocKey) -> Option<Document> {
        self.docs.get_mut(&key.doctype)?.remove(&key.name)
    }

    /// Remove a document and, recursively, every row it references.
    fn remove_tree(&mut self, key: &DocKey) -> Vec<DocKey> {
        let Some(doc) = self.take(key) else {
            return Vec::new();
        };
        let mut removed = vec![key.clone()];
        for (fieldname, names) in &doc.children {
            let Some(child_doctype) = self.row_doctype(&doc, fieldname, names) else {
                continue;
            };
            for name in names {
                removed.extend(self.remove_tree(&DocKey::new(child_doctype.clone(), name.clone())));
            }
        }
        removed
    }

    /// Drop rows referenced by `old` that `new` no longer references.
    fn prune_orphans(&mut self, old: &Document, new: &Document, meta: &MetaCache) -> Vec<DocKey> {
        let mut removed = Vec::new();
        for (fieldname, names) in &old.children {
            let Some(child_doctype) = child_doctype_of(meta, &old.doctype, fieldname)
                .or_else(|| self.row_doctype(old, fieldname, names))
            else {
                continue;
            };
            let kept = new.table_rows(fieldname);
            for name in names.iter().filter(|name| !kept.contains(name)) {
                removed.extend(self.remove_tree(&DocKey::new(child_doctype.clone(), name.clone())));
            }
        }
        removed
    }

    /// Find the doctype of a parent's rows by probing the registry when the
    /// schema is unavailable.
    fn row_doctype(&self, parent: &Document, fieldname: &str, names: &[String]) -> Option<String> {
        let first = names.first()?;
        self.docs
            .iter()
            .find(|(_, docs)| {
                docs.get(first).is_some_and(|row| {
                    row.parent() == Some(parent.name.as_str())
                        && row.parentfield() == Some(fieldname)
                })
            })
            .map(|(doctype, _)| doctype.clone())
    }
}

/// Table fields to traverse for `doctype`: none when the schema is missing or
/// the doctype is itself a child table.
fn parent_tables(meta: &MetaCache, doctype: &str) -> Vec<TableField> {
    match meta.is_table_doctype(doctype) {
        Some(false) => meta.table_fields(doctype).unwrap_or_default(),
        Some(true) => Vec::new(),
        None => {
            debug!(doctype, "schema not loaded; table fields kept as plain values");
            Vec::new()
        }
    }
}

fn child_doctype_of(meta: &MetaCache, doctype: &str, fieldname: &str) -> Option<String> {
    let field = meta.field(doctype, fieldname)?;
    if !field.fieldtype.is_table() {
        return None;
    }
    field.link_target().map(str::to_string)
}

/// Pull a table field's rows out of `doc`. Anything but an array counts as an
/// empty table.
fn take_rows(doc: &mut Document, fieldname: &str) -> Vec<Value> {
    match doc.remove(fieldname) {
        Some(Value::Array(rows)) => rows,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            debug!(doctype = %doc.doctype, fieldname, ?other, "non-array table value coerced to empty");
            Vec::new()
        }
    }
}

/// Turn one embedded row into a registry document: the schema's child
/// doctype, a name, and parent linkage where the row lacks it.
fn build_row(row: Value, parent: &Document, table: &TableField, position: usize) -> Option<Document> {
    let Value::Object(mut fields) = row else {
        debug!(fieldname = %table.fieldname, "skipping non-object table row");
        return None;
    };
    fields.insert(KEY_DOCTYPE.into(), Value::String(table.child_doctype.clone()));
    let mut row = Document::from_value(Value::Object(fields)).ok()?;
    if !row.has_name() {
        row.name = new_local_name(&row.doctype);
    }

    stamp_missing(&mut row.fields, KEY_PARENT, || Value::String(parent.name.clone()));
    stamp_missing(&mut row.fields, KEY_PARENTTYPE, || Value::String(parent.doctype.clone()));
    stamp_missing(&mut row.fields, KEY_PARENTFIELD, || Value::String(table.fieldname.clone()));
    stamp_missing(&mut row.fields, KEY_IDX, || Value::from(position + 1));
    Some(row)
}

fn stamp_missing(fields: &mut Map<String, Value>, key: &str, value: impl FnOnce() -> Value) {
    let missing = fields.get(key).map_or(true, |current| current.is_null() || current == "");
    if missing {
        fields.insert(key.to_string(), value());
    }
}

#[cfg(test)]
mod tests {
    use docmirror_common::{DocTypeSchema, FieldDescriptor, FieldType};
    use serde_json::json;

    use super::*;

    fn meta() -> MetaCache {
        let mut meta = MetaCache::new();
        meta.insert(DocTypeSchema::new(
            "Sales Invoice",
            vec![
                FieldDescriptor::new("customer", FieldType::Link).with_options("Customer"),
                FieldDescriptor::new("items", FieldType::Table).with_options("Sales Invoice Item"),
            ],
        ));
        let mut item = DocTypeSchema::new(
            "Sales Invoice Item",
            vec![
                FieldDescriptor::new("item_code", FieldType::Link).with_options("Item"),
                FieldDescriptor::new("qty", FieldType::Float),
            ],
        );
        item.istable = true;
        meta.insert(item);
        meta
    }

    fn doc(value: Value) -> Document {
        Document::from_value(value).unwrap()
    }

    fn invoice(rows: Value) -> Document {
        doc(json!({"doctype": "Sales Invoice", "name": "SINV-1", "customer": "ACME", "items": rows}))
    }

    fn item_key(name: &str) -> DocKey {
        DocKey::new("Sales Invoice Item", name)
    }

    #[test]
    fn add_synthesizes_names_and_splits_rows() {
        let meta = meta();
        let mut locals = Locals::new();
        let outcome = locals.add(
            doc(json!({"doctype": "Sales Invoice", "items": [{"item_code": "X"}, {"name": "R2"}]})),
            &meta,
        );

        assert!(outcome.key.name.starts_with("new-sales-invoice-"));
        let parent = locals.get(&outcome.key).unwrap();
        assert!(parent.get("items").is_none());
        assert_eq!(parent.table_rows("items").len(), 2);

        let rows = locals.children(&outcome.key, "items", &meta);
        assert_eq!(rows[0].parent(), Some(outcome.key.name.as_str()));
        assert_eq!(rows[0].parentfield(), Some("items"));
        assert_eq!(rows[0].idx(), Some(1.0));
        assert!(rows[0].name.starts_with("new-sales-invoice-item-"));
        assert_eq!(rows[1].name, "R2");
        assert_eq!(rows[1].idx(), Some(2.0));
    }

    #[test]
    fn tables_stay_plain_without_schema() {
        let meta = MetaCache::new();
        let mut locals = Locals::new();
        let outcome = locals.add(invoice(json!([{"name": "R1"}])), &meta);

        let parent = locals.get(&outcome.key).unwrap();
        assert_eq!(parent.get("items"), Some(&json!([{"name": "R1"}])));
        assert_eq!(locals.len(), 1);
    }

    #[test]
    fn shorter_incoming_table_drops_trailing_rows() {
        let meta = meta();
        let mut locals = Locals::new();
        locals.add(
            invoice(json!([
                {"name": "A", "qty": 1},
                {"name": "B", "qty": 2},
                {"name": "C", "qty": 3}
            ])),
            &meta,
        );

        let outcome = locals.upsert(
            invoice(json!([{"name": "A", "qty": 10}, {"name": "B", "qty": 20}])),
            &meta,
        );

        assert_eq!(outcome.removed, vec![item_key("C")]);
        assert!(!locals.contains(&item_key("C")));
        let parent_key = DocKey::new("Sales Invoice", "SINV-1");
        let rows = locals.children(&parent_key, "items", &meta);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("qty"), Some(&json!(10)));
        assert_eq!(rows[1].get("qty"), Some(&json!(20)));
    }

    #[test]
    fn row_merge_deletes_absent_and_null_keys() {
        let meta = meta();
        let mut locals = Locals::new();
        locals.add(invoice(json!([{"name": "A", "qty": 1, "item_code": "X", "uom": "Nos"}])), &meta);

        locals.upsert(invoice(json!([{"name": "A", "qty": 5, "item_code": null}])), &meta);

        let row = locals.get(&item_key("A")).unwrap();
        assert_eq!(row.get("qty"), Some(&json!(5)));
        assert!(row.get("item_code").is_none());
        assert!(row.get("uom").is_none());
        assert_eq!(row.parent(), Some("SINV-1"));
        assert_eq!(row.idx(), Some(1.0));
    }

    #[test]
    fn positional_match_with_new_name_rekeys_row() {
        let meta = meta();
        let mut locals = Locals::new();
        locals.add(invoice(json!([{"name": "new-row-1", "qty": 1}])), &meta);

        let outcome = locals.upsert(invoice(json!([{"name": "ROW-0001", "qty": 1}])), &meta);

        assert_eq!(outcome.rekeyed, vec![(item_key("new-row-1"), item_key("ROW-0001"))]);
        assert!(!locals.contains(&item_key("new-row-1")));
        assert!(locals.contains(&item_key("ROW-0001")));
    }

    #[test]
    fn reordered_rows_stay_registered() {
        let meta = meta();
        let mut locals = Locals::new();
        locals.add(invoice(json!([{"name": "A", "qty": 1}, {"name": "B", "qty": 2}])), &meta);

        let outcome = locals.upsert(
            invoice(json!([{"name": "B", "qty": 2}, {"name": "A", "qty": 1}])),
            &meta,
        );

        assert!(outcome.rekeyed.is_empty());
        assert!(outcome.removed.is_empty());
        let parent_key = DocKey::new("Sales Invoice", "SINV-1");
        assert_eq!(locals.get(&parent_key).unwrap().table_rows("items"), ["B", "A"]);
        let rows = locals.children(&parent_key, "items", &meta);
        let names: Vec<&str> = rows.iter().map(|row| row.name.as_str()).collect();
        assert_eq!(names, vec!["B", "A"]);
        assert_eq!(locals.get(&item_key("B")).unwrap().get("qty"), Some(&json!(2)));
        assert_eq!(locals.len(), 3);
    }

    #[test]
    fn moved_rows_match_by_name_before_position() {
        let meta = meta();
        let mut locals = Locals::new();
        locals.add(invoice(json!([{"name": "new-row-1"}, {"name": "B"}])), &meta);

        let outcome = locals.upsert(invoice(json!([{"name": "B"}, {"name": "ROW-2"}])), &meta);

        assert_eq!(outcome.rekeyed, Vec::new());
        assert_eq!(outcome.removed, vec![item_key("new-row-1")]);
        assert!(locals.contains(&item_key("B")));
        assert!(locals.contains(&item_key("ROW-2")));
        assert_eq!(locals.len(), 3);
    }

    #[test]
    fn plain_table_value_is_dropped_once_rows_are_split() {
        let mut locals = Locals::new();
        locals.add(invoice(json!([{"name": "A"}])), &MetaCache::new());

        let meta = meta();
        locals.upsert(invoice(json!([{"name": "A", "qty": 3}])), &meta);

        let parent = locals.get(&DocKey::new("Sales Invoice", "SINV-1")).unwrap();
        assert!(parent.get("items").is_none());
        assert_eq!(parent.table_rows("items"), ["A"]);
        assert_eq!(locals.get(&item_key("A")).unwrap().get("qty"), Some(&json!(3)));
    }

    #[test]
    fn longer_incoming_table_registers_new_rows() {
        let meta = meta();
        let mut locals = Locals::new();
        locals.add(invoice(json!([{"name": "A"}])), &meta);
        locals.upsert(invoice(json!([{"name": "A"}, {"name": "B"}])), &meta);

        let parent_key = DocKey::new("Sales Invoice", "SINV-1");
        assert_eq!(locals.get(&parent_key).unwrap().table_rows("items"), ["A", "B"]);
        assert_eq!(locals.get(&item_key("B")).unwrap().idx(), Some(2.0));
    }

    #[test]
    fn non_array_table_value_empties_the_table() {
        let meta = meta();
        let mut locals = Locals::new();
        locals.add(invoice(json!([{"name": "A"}])), &meta);
        locals.upsert(invoice(json!("oops")), &meta);

        assert!(!locals.contains(&item_key("A")));
        let parent = locals.get(&DocKey::new("Sales Invoice", "SINV-1")).unwrap();
        assert!(parent.table_rows("items").is_empty());
    }

    #[test]
    fn update_keeps_fields_the_incoming_doc_omits() {
        let meta = meta();
        let mut locals = Locals::new();
        locals.add(invoice(json!([{"name": "A"}])), &meta);
        locals.upsert(doc(json!({"doctype": "Sales Invoice", "name": "SINV-1", "status": "Paid"})), &meta);

        let parent = locals.get(&DocKey::new("Sales Invoice", "SINV-1")).unwrap();
        assert_eq!(parent.get_str("customer"), Some("ACME"));
        assert_eq!(parent.get_str("status"), Some("Paid"));
        assert_eq!(parent.table_rows("items"), ["A"]);
    }

    #[test]
    fn removing_a_row_renumbers_siblings() {
        let meta = meta();
        let mut locals = Locals::new();
        locals.add(invoice(json!([{"name": "A"}, {"name": "B"}, {"name": "C"}])), &meta);

        assert_eq!(locals.remove(&item_key("A"), &meta), vec![item_key("A")]);

        let parent_key = DocKey::new("Sales Invoice", "SINV-1");
        let rows = locals.children(&parent_key, "items", &meta);
        let idx: Vec<f64> = rows.iter().filter_map(|row| row.idx()).collect();
        assert_eq!(idx, vec![1.0, 2.0]);
        assert_eq!(rows[0].name, "B");
    }

    #[test]
    fn removing_a_parent_cascades() {
        let meta = meta();
        let mut locals = Locals::new();
        locals.add(invoice(json!([{"name": "A"}, {"name": "B"}])), &meta);

        let removed = locals.remove(&DocKey::new("Sales Invoice", "SINV-1"), &meta);
        assert_eq!(removed.len(), 3);
        assert!(locals.is_empty());
    }

    #[test]
    fn insert_child_at_position_renumbers() {
        let meta = meta();
        let mut locals = Locals::new();
        locals.add(invoice(json!([{"name": "A"}, {"name": "B"}, {"name": "C"}])), &meta);
        let parent_key = DocKey::new("Sales Invoice", "SINV-1");

        let row = Document::new("Sales Invoice Item", "N");
        locals.insert_child(&parent_key, "items", row, Some(2), &meta).unwrap();

        let rows = locals.children(&parent_key, "items", &meta);
        let names: Vec<&str> = rows.iter().map(|row| row.name.as_str()).collect();
        let idx: Vec<f64> = rows.iter().filter_map(|row| row.idx()).collect();
        assert_eq!(names, vec!["A", "N", "B", "C"]);
        assert_eq!(idx, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn insert_child_rejects_non_table_fields() {
        let meta = meta();
        let mut locals = Locals::new();
        locals.add(invoice(json!([])), &meta);
        let parent_key = DocKey::new("Sales Invoice", "SINV-1");

        let error = locals
            .insert_child(&parent_key, "customer", Document::new("X", ""), None, &meta)
            .unwrap_err();
        assert!(matches!(error, MirrorError::NotATableField { .. }));
    }

    #[test]
    fn rename_drops_local_key_and_orphan_rows() {
        let meta = meta();
        let mut locals = Locals::new();
        locals.add(
            doc(json!({"doctype": "Sales Invoice", "name": "new-sales-invoice-1", "items": [{"name": "new-row"}]})),
            &meta,
        );
        locals.add(invoice(json!([{"name": "ROW-1"}])), &meta);

        let removed = locals.rename("Sales Invoice", "new-sales-invoice-1", "SINV-1", &meta);

        assert_eq!(
            removed,
            vec![DocKey::new("Sales Invoice", "new-sales-invoice-1"), item_key("new-row")]
        );
        assert_eq!(locals.new_name_for("new-sales-invoice-1"), Some("SINV-1"));
        assert!(locals.contains(&item_key("ROW-1")));
    }

    #[test]
    fn list_filters_and_falls_back_to_boot_records() {
        let meta = MetaCache::new();
        let mut locals = Locals::new();
        locals.add(doc(json!({"doctype": ":Company", "name": "ACME", "default_currency": "USD"})), &meta);
        locals.add(doc(json!({"doctype": "Task", "name": "T-1", "status": "Open"})), &meta);
        locals.add(doc(json!({"doctype": "Task", "name": "T-2", "status": "Closed"})), &meta);

        let open = Filters::from_map(json!({"status": "Open"}).as_object().unwrap());
        let tasks = locals.list("Task", &open);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name, "T-1");

        let companies = locals.list("Company", &Filters::new());
        assert_eq!(companies[0].name, "ACME");
    }

    #[test]
    fn to_value_renests_rows() {
        let meta = meta();
        let mut locals = Locals::new();
        locals.add(invoice(json!([{"name": "A", "qty": 2}])), &meta);

        let value = locals.to_value(&DocKey::new("Sales Invoice", "SINV-1"), &meta).unwrap();
        assert_eq!(value["items"][0]["name"], "A");
        assert_eq!(value["items"][0]["qty"], 2);
        assert_eq!(value["items"][0]["parent"], "SINV-1");
    }

    #[test]
    fn freshness_window() {
        let meta = MetaCache::new();
        let mut locals = Locals::new();
        let key = locals.add(doc(json!({"doctype": "Task", "name": "T-1"})), &meta).key;
        let now = Utc::now();

        assert!(!locals.is_fresh(&key, now, Duration::seconds(5)));
        locals.mark_synced(&key, now - Duration::seconds(2));
        assert!(locals.is_fresh(&key, now, Duration::seconds(5)));
        assert!(!locals.is_fresh(&key, now + Duration::seconds(10), Duration::seconds(5)));
    }
}
