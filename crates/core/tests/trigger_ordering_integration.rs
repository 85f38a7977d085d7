use std::sync::{Arc, Mutex};
use std::time::Duration;

use docmirror_common::protocol::methods;
use docmirror_common::{DocKey, Document, FieldType};
use docmirror_core::triggers::TriggerFuture;
use docmirror_core::{Mirror, MirrorConfig, MirrorError, ScriptedTransport, TriggerEvent};
use serde_json::{json, Map, Value};

type Log = Arc<Mutex<Vec<String>>>;

async fn task_mirror(transport: ScriptedTransport) -> Mirror {
    let mirror = Mirror::in_memory(MirrorConfig::default(), Arc::new(transport));
    mirror
        .sync_value(json!({
            "doctype": "DocType",
            "name": "Task",
            "fields": [
                {"fieldname": "subject", "fieldtype": "Data"},
                {"fieldname": "status", "fieldtype": "Select", "options": "Open\nClosed"},
                {"fieldname": "project", "fieldtype": "Link", "options": "Project"},
                {"fieldname": "hours", "fieldtype": "Float"}
            ]
        }))
        .await
        .expect("task schema should sync");
    mirror
        .add_to_locals(
            Document::from_value(json!({
                "doctype": "Task",
                "name": "TASK-1",
                "subject": "Write docs",
                "status": "Open",
                "__unedited": 1
            }))
            .expect("task should parse"),
        )
        .await;
    mirror
}

fn task() -> DocKey {
    DocKey::new("Task", "TASK-1")
}

fn recorder(log: &Log, label: &'static str, delay_ms: u64) -> impl Fn(TriggerEvent) -> TriggerFuture + Send + Sync {
    let log = Arc::clone(log);
    move |event| -> TriggerFuture {
        let log = Arc::clone(&log);
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            log.lock().unwrap().push(format!("{label}:{}", event.fieldname));
            Ok(())
        })
    }
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[tokio::test(start_paused = true)]
async fn triggers_run_one_at_a_time_in_registration_order() {
    let mirror = task_mirror(ScriptedTransport::new()).await;
    let log: Log = Arc::default();
    mirror.on("Task", "status", recorder(&log, "slow", 30)).await;
    mirror.on("Task", "*", recorder(&log, "any", 0)).await;
    mirror.on("Task", "status", recorder(&log, "fast", 0)).await;

    mirror.set_value("Task", "TASK-1", "status", json!("Closed"), None).await.unwrap();

    assert_eq!(entries(&log), vec!["slow:status", "fast:status", "any:status"]);
    let doc = mirror.get_doc("Task", "TASK-1").await.unwrap();
    assert_eq!(doc.get_str("status"), Some("Closed"));
}

#[tokio::test]
async fn unchanged_values_fire_only_for_link_fields() {
    let mirror = task_mirror(ScriptedTransport::new()).await;
    let log: Log = Arc::default();
    mirror.on("Task", "*", recorder(&log, "any", 0)).await;

    mirror.set_value("Task", "TASK-1", "subject", json!("Write docs"), None).await.unwrap();
    assert!(entries(&log).is_empty(), "unchanged data field is silent");

    mirror.set_value("Task", "TASK-1", "project", json!("PROJ-1"), None).await.unwrap();
    mirror.set_value("Task", "TASK-1", "project", json!("PROJ-1"), None).await.unwrap();
    assert_eq!(entries(&log), vec!["any:project", "any:project"]);

    mirror
        .set_value("Task", "TASK-1", "subject", json!("Write docs"), Some(FieldType::DynamicLink))
        .await
        .unwrap();
    assert_eq!(entries(&log).len(), 3, "caller-supplied link type re-fires");
}

#[tokio::test]
async fn meaningful_edits_clear_the_unedited_flag() {
    let mirror = task_mirror(ScriptedTransport::new()).await;

    mirror.set_value("Task", "TASK-1", "hours", Value::Null, None).await.unwrap();
    let doc = mirror.get_doc("Task", "TASK-1").await.unwrap();
    assert_eq!(doc.get("__unedited"), Some(&json!(1)), "null over missing is not an edit");

    mirror.set_value("Task", "TASK-1", "hours", json!(2.5), None).await.unwrap();
    let doc = mirror.get_doc("Task", "TASK-1").await.unwrap();
    assert_eq!(doc.get("__unedited"), Some(&json!(0)));
    assert_eq!(doc.get("hours"), Some(&json!(2.5)));
}

#[tokio::test]
async fn reserved_keys_are_never_written() {
    let mirror = task_mirror(ScriptedTransport::new()).await;
    let mut values = Map::new();
    values.insert("name".into(), json!("TASK-2"));
    values.insert("subject".into(), json!("Renamed?"));

    mirror.set_values(&task(), values, false).await.unwrap();

    assert!(mirror.get_doc("Task", "TASK-2").await.is_none());
    let doc = mirror.get_doc("Task", "TASK-1").await.unwrap();
    assert_eq!(doc.get_str("subject"), Some("Renamed?"));
}

#[tokio::test]
async fn nested_changes_finish_before_the_outer_call_returns() {
    let mirror = task_mirror(ScriptedTransport::new()).await;
    let log: Log = Arc::default();
    mirror
        .on("Task", "status", |event| async move {
            event.mirror.set_value(&event.key.doctype, &event.key.name, "subject", json!("Done"), None).await?;
            Ok::<(), anyhow::Error>(())
        })
        .await;
    mirror.on("Task", "subject", recorder(&log, "subject", 10)).await;

    mirror.set_value("Task", "TASK-1", "status", json!("Closed"), None).await.unwrap();

    assert_eq!(entries(&log), vec!["subject:subject"]);
    let doc = mirror.get_doc("Task", "TASK-1").await.unwrap();
    assert_eq!(doc.get_str("subject"), Some("Done"));
}

#[tokio::test(start_paused = true)]
async fn set_value_waits_for_calls_started_by_triggers() {
    let transport = ScriptedTransport::new().with_latency(Duration::from_millis(50));
    transport.respond(methods::GET_DOC, "Project", json!({"docs": [{"doctype": "Project", "name": "PROJ-1"}]}));
    let mirror = task_mirror(transport.clone()).await;
    mirror
        .on("Task", "project", |event| async move {
            let name = event.value.as_str().unwrap_or_default().to_string();
            // Fired without awaiting; the barrier still covers it.
            drop(event.mirror.spawn_call(methods::GET_DOC, json!({"doctype": "Project", "name": name})));
            Ok::<(), anyhow::Error>(())
        })
        .await;

    let started = tokio::time::Instant::now();
    mirror.set_value("Task", "TASK-1", "project", json!("PROJ-1"), None).await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(mirror.pending_calls(), 0);
    assert_eq!(transport.calls_to(methods::GET_DOC).len(), 1);
}

#[tokio::test]
async fn failing_trigger_stops_the_chain_and_reports_the_field() {
    let mirror = task_mirror(ScriptedTransport::new()).await;
    let log: Log = Arc::default();
    mirror.on("Task", "status", |_| async { Err::<(), _>(anyhow::anyhow!("status is locked")) }).await;
    mirror.on("Task", "status", recorder(&log, "after", 0)).await;

    let error = mirror.set_value("Task", "TASK-1", "status", json!("Closed"), None).await.unwrap_err();

    assert!(matches!(&error, MirrorError::Trigger { fieldname, .. } if fieldname == "status"));
    assert!(error.to_string().contains("status is locked"));
    assert!(entries(&log).is_empty());
}

#[tokio::test]
async fn setting_a_value_on_a_missing_document_fails() {
    let mirror = task_mirror(ScriptedTransport::new()).await;
    let error = mirror.set_value("Task", "TASK-404", "status", json!("Closed"), None).await.unwrap_err();
    assert!(matches!(error, MirrorError::NotFound(key) if key == DocKey::new("Task", "TASK-404")));
}
