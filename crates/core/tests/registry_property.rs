use chrono::{TimeZone, Utc};
use docmirror_common::protocol::sync::SyncPayload;
use docmirror_common::{DocKey, DocTypeSchema, Document, FieldDescriptor, FieldType};
use docmirror_core::meta::MetaCache;
use docmirror_core::store::docinfo::DocinfoStore;
use docmirror_core::store::locals::Locals;
use docmirror_core::sync::Synchronizer;
use proptest::prelude::*;
use serde_json::{json, Map, Value};

const PARENT: &str = "Packing List";
const ROW: &str = "Packing List Row";
const TABLE: &str = "rows";
const ROW_NAMES: [&str; 6] = ["PLR-1", "PLR-2", "PLR-3", "PLR-4", "PLR-5", "PLR-6"];

#[derive(Debug, Clone)]
enum RowOp {
    Append,
    InsertAt(usize),
    Remove(usize),
}

fn row_op() -> impl Strategy<Value = RowOp> {
    prop_oneof![
        Just(RowOp::Append),
        (0usize..8).prop_map(RowOp::InsertAt),
        (0usize..8).prop_map(RowOp::Remove),
    ]
}

/// Rows with unique server names in arbitrary order, so consecutive payloads
/// permute, drop, and introduce named rows.
fn named_rows() -> impl Strategy<Value = Vec<(String, String, i64)>> {
    prop::sample::subsequence(ROW_NAMES.to_vec(), 0..=ROW_NAMES.len())
        .prop_shuffle()
        .prop_flat_map(|names| {
            let len = names.len();
            (Just(names), prop::collection::vec(("[a-z]{1,6}", 0i64..100), len))
        })
        .prop_map(|(names, values)| {
            names
                .into_iter()
                .zip(values)
                .map(|(name, (item, qty))| (name.to_string(), item, qty))
                .collect()
        })
}

fn meta() -> MetaCache {
    let mut meta = MetaCache::new();
    meta.insert(DocTypeSchema::new(
        PARENT,
        vec![
            FieldDescriptor::new("title", FieldType::Data),
            FieldDescriptor::new(TABLE, FieldType::Table).with_options(ROW),
        ],
    ));
    let mut row = DocTypeSchema::new(
        ROW,
        vec![
            FieldDescriptor::new("item", FieldType::Data),
            FieldDescriptor::new("qty", FieldType::Int),
        ],
    );
    row.istable = true;
    meta.insert(row);
    meta
}

fn parent_key() -> DocKey {
    DocKey::new(PARENT, "PL-1")
}

fn apply(locals: &mut Locals, meta: &MetaCache, op: &RowOp) {
    let rows = locals.children(&parent_key(), TABLE, meta).len();
    match *op {
        RowOp::Append => {
            locals.insert_child(&parent_key(), TABLE, Document::new(ROW, ""), None, meta).unwrap();
        }
        RowOp::InsertAt(at) => {
            let at = at % (rows + 1) + 1;
            locals.insert_child(&parent_key(), TABLE, Document::new(ROW, ""), Some(at), meta).unwrap();
        }
        RowOp::Remove(index) if rows > 0 => {
            let victim = locals.children(&parent_key(), TABLE, meta)[index % rows].key();
            locals.remove(&victim, meta);
        }
        RowOp::Remove(_) => {}
    }
}

fn packing_list(rows: &[(String, String, i64)]) -> Value {
    let rows: Vec<Value> = rows
        .iter()
        .enumerate()
        .map(|(position, (name, item, qty))| {
            json!({
                "doctype": ROW,
                "name": name,
                "idx": position + 1,
                "item": item,
                "qty": qty
            })
        })
        .collect();
    json!({"doctype": PARENT, "name": "PL-1", "title": "Dock 4", TABLE: rows})
}

/// Names listed by the parent's table that have no registry entry.
fn unregistered_rows(locals: &Locals) -> Vec<String> {
    let Some(parent) = locals.get(&parent_key()) else {
        return Vec::new();
    };
    parent
        .table_rows(TABLE)
        .iter()
        .filter(|name| !locals.contains(&DocKey::new(ROW, name.as_str())))
        .cloned()
        .collect()
}

fn sync(meta: &mut MetaCache, locals: &mut Locals, docinfo: &mut DocinfoStore, payload: Value) {
    let mut user_info = Map::new();
    Synchronizer {
        meta,
        locals,
        docinfo,
        user_info: &mut user_info,
        now: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
    }
    .sync(SyncPayload::from_value(payload).unwrap());
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        .. ProptestConfig::default()
    })]

    #[test]
    fn row_idx_stays_contiguous_under_inserts_and_removals(ops in prop::collection::vec(row_op(), 1..40)) {
        let meta = meta();
        let mut locals = Locals::new();
        locals.add(Document::new(PARENT, "PL-1"), &meta);

        for op in &ops {
            apply(&mut locals, &meta, op);

            let rows = locals.children(&parent_key(), TABLE, &meta);
            let idx: Vec<Option<f64>> = rows.iter().map(|row| row.idx()).collect();
            let expected: Vec<Option<f64>> = (1..=rows.len()).map(|position| Some(position as f64)).collect();
            prop_assert_eq!(idx, expected);
            for row in &rows {
                prop_assert_eq!(row.parent(), Some("PL-1"));
            }
        }

        // Every registered row is reachable from the parent.
        let registered = locals.list(ROW, &Default::default()).len();
        prop_assert_eq!(registered, locals.children(&parent_key(), TABLE, &meta).len());
    }

    #[test]
    fn syncing_the_same_payload_twice_is_stable(first in named_rows(), second in named_rows()) {
        let mut meta = meta();
        let mut locals = Locals::new();
        let mut docinfo = DocinfoStore::new();

        sync(&mut meta, &mut locals, &mut docinfo, packing_list(&first));
        prop_assert_eq!(unregistered_rows(&locals), Vec::<String>::new());
        sync(&mut meta, &mut locals, &mut docinfo, packing_list(&second));
        prop_assert_eq!(unregistered_rows(&locals), Vec::<String>::new());
        let once = locals.to_value(&parent_key(), &meta);
        let len_once = locals.len();

        sync(&mut meta, &mut locals, &mut docinfo, packing_list(&second));
        prop_assert_eq!(unregistered_rows(&locals), Vec::<String>::new());
        prop_assert_eq!(locals.to_value(&parent_key(), &meta), once);
        prop_assert_eq!(locals.len(), len_once);
        prop_assert_eq!(len_once, second.len() + 1);

        let expected: Vec<&str> = second.iter().map(|(name, _, _)| name.as_str()).collect();
        let listed: Vec<String> = locals
            .children(&parent_key(), TABLE, &meta)
            .iter()
            .map(|row| row.name.clone())
            .collect();
        prop_assert_eq!(listed, expected);
    }
}
