// Persisted doctype schemas in the device cache.
//
// Each doctype's raw metadata payload is stored under `_doctype:<name>`. The
// global `metadata_version` stamp invalidates every persisted entry at once.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::store::device_cache::{
    doctype_key, DeviceCache, DeviceCacheError, DOCTYPE_NAMESPACE, METADATA_VERSION_KEY,
};

/// Persisted metadata docs for `doctype`, or `None` when absent or unreadable.
pub fn load_docs(cache: &dyn DeviceCache, doctype: &str) -> Option<Vec<Value>> {
    let raw = match cache.get(&doctype_key(doctype)) {
        Ok(raw) => raw?,
        Err(error) => {
            warn!(doctype, %error, "failed to read persisted schema");
            return None;
        }
    };

    match serde_json::from_str::<Vec<Value>>(&raw) {
        Ok(docs) => Some(docs),
        Err(error) => {
            warn!(doctype, %error, "discarding unreadable persisted schema");
            None
        }
    }
}

/// `modified` stamp of the persisted `DocType` record named `doctype`.
pub fn cached_timestamp(docs: &[Value], doctype: &str) -> Option<String> {
    docs.iter()
        .find(|doc| doc.get("name").and_then(Value::as_str) == Some(doctype))
        .and_then(|doc| doc.get("modified"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Persist a metadata payload. On quota exhaustion the doctype namespace is
/// cleared and the write retried once; any remaining failure is logged and
/// dropped. Returns whether the payload was stored.
pub fn store_docs(cache: &mut dyn DeviceCache, doctype: &str, docs: &[Value]) -> bool {
    let serialized = match serde_json::to_string(docs) {
        Ok(serialized) => serialized,
        Err(error) => {
            warn!(doctype, %error, "failed to serialize schema for the device cache");
            return false;
        }
    };
    let key = doctype_key(doctype);

    match cache.set(&key, &serialized) {
        Ok(()) => {
            debug!(doctype, bytes = serialized.len(), "persisted schema");
            return true;
        }
        Err(DeviceCacheError::QuotaExceeded { needed, limit }) => {
            info!(doctype, needed, limit, "device cache full; clearing persisted schemas");
        }
        Err(error) => {
            warn!(doctype, %error, "failed to persist schema");
            return false;
        }
    }

    if let Err(error) = cache.clear_namespace(DOCTYPE_NAMESPACE) {
        warn!(doctype, %error, "failed to clear persisted schemas");
        return false;
    }
    match cache.set(&key, &serialized) {
        Ok(()) => true,
        Err(error) => {
            warn!(doctype, %error, "schema not persisted after clearing the cache");
            false
        }
    }
}

/// Compare the server's global metadata stamp with the persisted one. A
/// mismatch clears every persisted schema. Returns true when entries were
/// invalidated.
pub fn check_metadata_version(cache: &mut dyn DeviceCache, version: &str) -> bool {
    let stored = match cache.get(METADATA_VERSION_KEY) {
        Ok(stored) => stored,
        Err(error) => {
            warn!(%error, "failed to read metadata version stamp");
            None
        }
    };
    if stored.as_deref() == Some(version) {
        return false;
    }

    let cleared = match cache.clear_namespace(DOCTYPE_NAMESPACE) {
        Ok(cleared) => cleared,
        Err(error) => {
            warn!(%error, "failed to invalidate persisted schemas");
            0
        }
    };
    info!(previous = ?stored, current = version, cleared, "metadata version changed");

    if let Err(error) = cache.set(METADATA_VERSION_KEY, version) {
        warn!(%error, "failed to store metadata version stamp");
    }
    true
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::device_cache::MemoryDeviceCache;

    fn task_docs() -> Vec<Value> {
        vec![json!({
            "doctype": "DocType",
            "name": "Task",
            "modified": "2026-01-02 10:00:00.000000",
            "fields": [{"fieldname": "status", "fieldtype": "Select", "options": "Open\nClosed"}]
        })]
    }

    #[test]
    fn store_then_load_with_timestamp() {
        let mut cache = MemoryDeviceCache::new(0);
        assert!(store_docs(&mut cache, "Task", &task_docs()));

        let docs = load_docs(&cache, "Task").unwrap();
        assert_eq!(cached_timestamp(&docs, "Task").as_deref(), Some("2026-01-02 10:00:00.000000"));
        assert!(cached_timestamp(&docs, "Project").is_none());
    }

    #[test]
    fn garbage_entries_are_ignored() {
        let mut cache = MemoryDeviceCache::new(0);
        cache.set(&doctype_key("Task"), "{not json").unwrap();
        assert!(load_docs(&cache, "Task").is_none());
    }

    #[test]
    fn quota_clears_namespace_and_retries_once() {
        let docs = task_docs();
        let size = doctype_key("Task").len() + serde_json::to_string(&docs).unwrap().len();
        let mut cache = MemoryDeviceCache::new(size as u64 + 4);
        cache.set(&doctype_key("Old"), "[1]").unwrap();

        assert!(store_docs(&mut cache, "Task", &docs));
        assert!(cache.get(&doctype_key("Old")).unwrap().is_none());
        assert!(load_docs(&cache, "Task").is_some());
    }

    #[test]
    fn oversized_payload_is_swallowed() {
        let mut cache = MemoryDeviceCache::new(8);
        assert!(!store_docs(&mut cache, "Task", &task_docs()));
        assert!(load_docs(&cache, "Task").is_none());
    }

    #[test]
    fn metadata_version_mismatch_invalidates() {
        let mut cache = MemoryDeviceCache::new(0);
        store_docs(&mut cache, "Task", &task_docs());

        assert!(check_metadata_version(&mut cache, "v1"));
        assert!(load_docs(&cache, "Task").is_none());

        store_docs(&mut cache, "Task", &task_docs());
        assert!(!check_metadata_version(&mut cache, "v1"));
        assert!(load_docs(&cache, "Task").is_some());

        assert!(check_metadata_version(&mut cache, "v2"));
        assert!(load_docs(&cache, "Task").is_none());
        assert_eq!(cache.get(METADATA_VERSION_KEY).unwrap().as_deref(), Some("v2"));
    }
}
