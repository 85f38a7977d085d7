use docmirror_common::protocol::meta::MetaResponse;
use docmirror_common::protocol::sync::SyncPayload;
use docmirror_common::schema::{DocTypeSchema, FieldType};
use docmirror_common::types::Document;

fn load_fixture(name: &str) -> serde_json::Value {
    let path = format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"));
    let content = std::fs::read_to_string(path).expect("fixture file should be readable");
    serde_json::from_str(&content).expect("fixture file should be valid JSON")
}

#[test]
fn getdoc_response_normalizes_to_docs_and_docinfo() {
    let payload = SyncPayload::from_value(load_fixture("getdoc_response.json"))
        .expect("getdoc fixture should parse as a sync payload");

    assert_eq!(payload.docs.len(), 1);
    let invoice = &payload.docs[0];
    assert_eq!(invoice.doctype, "Sales Invoice");
    assert_eq!(invoice.localname(), Some("new-sales-invoice-3f9a1c2b7d"));

    let rows = invoice.get("items").and_then(|items| items.as_array()).expect("items array");
    assert_eq!(rows.len(), 2);

    let docinfo = payload.docinfo.expect("docinfo should be present");
    assert_eq!(docinfo.name, "SINV-00001");
    assert_eq!(docinfo.attachments.len(), 1);
    assert!(docinfo.user_info.contains_key("jane@example.com"));
}

#[test]
fn getdoctype_response_yields_parent_and_child_schemas() {
    let response = MetaResponse::from_value(load_fixture("getdoctype_response.json"))
        .expect("getdoctype fixture should parse");
    let MetaResponse::Docs(docs) = response else {
        panic!("fixture is a full payload");
    };

    let schemas: Vec<DocTypeSchema> = docs
        .into_iter()
        .map(|value| {
            let record = Document::from_value(value).expect("record should be a document");
            DocTypeSchema::from_record(&record).expect("record should be a schema")
        })
        .collect();

    assert_eq!(schemas.len(), 2);
    let invoice = &schemas[0];
    assert_eq!(invoice.autoname.as_deref(), Some("naming_series:"));
    assert!(invoice.field("company").unwrap().remember_last_selected_value);
    assert_eq!(invoice.field("items").unwrap().fieldtype, FieldType::Table);
    assert!(invoice.field("items").unwrap().reqd);
    assert!(schemas[1].istable);
    assert!(schemas[1].field("uom").unwrap().no_copy);
}

#[test]
fn payload_serde_entry_point_matches_from_value() {
    let fixture = load_fixture("getdoc_response.json");
    let via_serde: SyncPayload =
        serde_json::from_value(fixture.clone()).expect("serde entry point should parse");
    let via_fn = SyncPayload::from_value(fixture).expect("from_value should parse");
    assert_eq!(via_serde, via_fn);
}
