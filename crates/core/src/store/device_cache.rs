// Best-effort persistent key/value cache on the local device.
//
// Writes can fail with `QuotaExceeded`; callers treat caching as an
// optimization and recover by clearing a namespace and retrying once.

use std::collections::BTreeMap;

use thiserror::Error;

/// Namespace prefix for persisted doctype schemas: `_doctype:<name>`.
pub const DOCTYPE_NAMESPACE: &str = "_doctype:";

/// Key holding the global metadata version stamp.
pub const METADATA_VERSION_KEY: &str = "metadata_version";

pub fn doctype_key(doctype: &str) -> String {
    format!("{DOCTYPE_NAMESPACE}{doctype}")
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceCacheError {
    #[error("device cache quota exceeded: {needed} bytes needed, limit {limit}")]
    QuotaExceeded { needed: u64, limit: u64 },

    #[error("device cache storage failure: {0}")]
    Storage(String),
}

pub trait DeviceCache: Send {
    fn get(&self, key: &str) -> Result<Option<String>, DeviceCacheError>;

    fn set(&mut self, key: &str, value: &str) -> Result<(), DeviceCacheError>;

    fn remove(&mut self, key: &str) -> Result<bool, DeviceCacheError>;

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, DeviceCacheError>;

    /// Bytes currently stored (keys plus values).
    fn used_bytes(&self) -> Result<u64, DeviceCacheError>;

    /// Remove every key under `prefix`. Returns how many were removed.
    fn clear_namespace(&mut self, prefix: &str) -> Result<usize, DeviceCacheError> {
        let keys = self.keys_with_prefix(prefix)?;
        let mut removed = 0;
        for key in keys {
            if self.remove(&key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

pub(crate) fn entry_bytes(key: &str, value: &str) -> u64 {
    (key.len() + value.len()) as u64
}

/// Byte budget check shared by cache implementations. `replaced` is the size
/// of the entry being overwritten, if any.
pub(crate) fn check_quota(
    limit: u64,
    used: u64,
    replaced: u64,
    incoming: u64,
) -> Result<(), DeviceCacheError> {
    if limit == 0 {
        return Ok(());
    }
    let needed = used.saturating_sub(replaced).saturating_add(incoming);
    if needed > limit {
        return Err(DeviceCacheError::QuotaExceeded { needed, limit });
    }
    Ok(())
}

/// Volatile cache for tests and embedded use without a disk.
#[derive(Debug, Default)]
pub struct MemoryDeviceCache {
    entries: BTreeMap<String, String>,
    max_bytes: u64,
}

impl MemoryDeviceCache {
    pub fn new(max_bytes: u64) -> Self {
        Self { entries: BTreeMap::new(), max_bytes }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl DeviceCache for MemoryDeviceCache {
    fn get(&self, key: &str) -> Result<Option<String>, DeviceCacheError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), DeviceCacheError> {
        let used = self.used_bytes()?;
        let replaced = self.entries.get(key).map(|old| entry_bytes(key, old)).unwrap_or(0);
        check_quota(self.max_bytes, used, replaced, entry_bytes(key, value))?;
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<bool, DeviceCacheError> {
        Ok(self.entries.remove(key).is_some())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, DeviceCacheError> {
        Ok(self.entries.keys().filter(|key| key.starts_with(prefix)).cloned().collect())
    }

    fn used_bytes(&self) -> Result<u64, DeviceCacheError> {
        Ok(self.entries.iter().map(|(key, value)| entry_bytes(key, value)).sum())
    }
}
