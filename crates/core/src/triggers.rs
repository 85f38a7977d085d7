// Field change triggers, registered per (doctype, fieldname) with `*` as the
// any-field wildcard.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use docmirror_common::DocKey;
use serde_json::Value;
use tracing::debug;

use crate::error::{MirrorError, Result};
use crate::mirror::Mirror;
use crate::serial::SerialRunner;

pub const WILDCARD: &str = "*";

pub type TriggerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
pub type Trigger = Arc<dyn Fn(TriggerEvent) -> TriggerFuture + Send + Sync>;

/// What a trigger receives. The mirror handle lets it read the document and
/// make further changes.
#[derive(Clone)]
pub struct TriggerEvent {
    pub mirror: Mirror,
    pub key: DocKey,
    pub fieldname: String,
    pub value: Value,
    pub skip_dirty_trigger: bool,
}

impl fmt::Debug for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerEvent")
            .field("key", &self.key)
            .field("fieldname", &self.fieldname)
            .field("value", &self.value)
            .field("skip_dirty_trigger", &self.skip_dirty_trigger)
            .finish()
    }
}

#[derive(Default)]
pub struct TriggerRegistry {
    handlers: HashMap<(String, String), Vec<Trigger>>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, doctype: &str, fieldname: &str, trigger: Trigger) {
        self.handlers.entry((doctype.to_string(), fieldname.to_string())).or_default().push(trigger);
    }

    /// Field-specific triggers then wildcard triggers, each in registration
    /// order.
    pub fn collect(&self, doctype: &str, fieldname: &str) -> Vec<Trigger> {
        let specific = self.handlers.get(&(doctype.to_string(), fieldname.to_string()));
        let wildcard = if fieldname == WILDCARD {
            None
        } else {
            self.handlers.get(&(doctype.to_string(), WILDCARD.to_string()))
        };
        specific.into_iter().chain(wildcard).flatten().cloned().collect()
    }

    pub fn count(&self, doctype: &str) -> usize {
        self.handlers
            .iter()
            .filter(|((registered, _), _)| registered == doctype)
            .map(|(_, triggers)| triggers.len())
            .sum()
    }
}

impl fmt::Debug for TriggerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.handlers.keys().collect();
        keys.sort();
        f.debug_struct("TriggerRegistry").field("handlers", &keys).finish()
    }
}

/// Run `triggers` for one field change strictly one after another.
pub async fn dispatch(triggers: Vec<Trigger>, event: TriggerEvent) -> Result<()> {
    if triggers.is_empty() {
        return Ok(());
    }
    debug!(key = %event.key, fieldname = %event.fieldname, count = triggers.len(), "dispatching triggers");

    let doctype = event.key.doctype.clone();
    let fieldname = event.fieldname.clone();
    let mut runner = SerialRunner::new();
    for trigger in triggers {
        let event = event.clone();
        runner = runner.then(move || (*trigger)(event));
    }
    runner.run().await.map_err(|source| MirrorError::Trigger { doctype, fieldname, source })
}

/// Wrap an async closure as a [`Trigger`].
pub fn trigger_fn<F, Fut>(handler: F) -> Trigger
where
    F: Fn(TriggerEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |event| -> TriggerFuture { Box::pin(handler(event)) })
}
