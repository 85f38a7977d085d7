// Transport boundary: server method calls plus the network-settle barrier.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("`{method}` failed: {message}")]
    Failed { method: String, message: String },

    #[error("server unreachable for `{0}`")]
    Unreachable(String),
}

pub type TransportFuture = Pin<Box<dyn Future<Output = Result<Value, TransportError>> + Send>>;

/// Calls a server method with JSON arguments and resolves to its `message`.
///
/// Production code wraps the platform's HTTP API. Tests and the offline CLI
/// use [`ScriptedTransport`].
pub trait Transport: Send + Sync {
    fn call(&self, method: &str, args: Value) -> TransportFuture;
}

// ── Network-settle barrier ─────────────────────────────────────────

/// Counts outstanding requests so callers can wait until the network is idle.
#[derive(Debug, Clone)]
pub struct InFlight {
    count: Arc<watch::Sender<usize>>,
}

impl Default for InFlight {
    fn default() -> Self {
        let (count, _) = watch::channel(0);
        Self { count: Arc::new(count) }
    }
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a request as started. It counts until the guard drops.
    pub fn begin(&self) -> InFlightGuard {
        self.count.send_modify(|count| *count += 1);
        InFlightGuard { count: Arc::clone(&self.count) }
    }

    pub fn pending(&self) -> usize {
        *self.count.borrow()
    }

    /// Resolve once no request is outstanding.
    pub async fn settled(&self) {
        let mut rx = self.count.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

#[derive(Debug)]
pub struct InFlightGuard {
    count: Arc<watch::Sender<usize>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.count.send_modify(|count| *count = count.saturating_sub(1));
    }
}

// ── Scripted transport ─────────────────────────────────────────────

#[derive(Debug, Default)]
struct Script {
    responses: HashMap<(String, String), Result<Value, TransportError>>,
    calls: Vec<(String, Value)>,
}

/// Canned responses keyed by `(method, doctype argument)`. Unscripted calls
/// fail with `Unreachable`. Every call is recorded.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
    latency: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every response, to exercise callers that wait on the network.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn respond(&self, method: &str, doctype: &str, response: Value) {
        self.lock().responses.insert((method.into(), doctype.into()), Ok(response));
    }

    pub fn fail(&self, method: &str, doctype: &str, message: &str) {
        let error = TransportError::Failed { method: method.into(), message: message.into() };
        self.lock().responses.insert((method.into(), doctype.into()), Err(error));
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.lock().calls.clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<Value> {
        self.lock()
            .calls
            .iter()
            .filter(|(called, _)| called == method)
            .map(|(_, args)| args.clone())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Transport for ScriptedTransport {
    fn call(&self, method: &str, args: Value) -> TransportFuture {
        let doctype = args.get("doctype").and_then(Value::as_str).unwrap_or_default().to_string();
        let response = {
            let mut script = self.lock();
            script.calls.push((method.to_string(), args));
            script
                .responses
                .get(&(method.to_string(), doctype.clone()))
                .cloned()
                .unwrap_or_else(|| Err(TransportError::Unreachable(method.to_string())))
        };
        debug!(method, doctype, ok = response.is_ok(), "scripted call");

        let latency = self.latency;
        Box::pin(async move {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn scripted_responses_and_call_log() {
        let transport = ScriptedTransport::new();
        transport.respond("getdoc", "Task", json!({"docs": []}));

        let reply = transport.call("getdoc", json!({"doctype": "Task", "name": "T-1"})).await;
        assert_eq!(reply.unwrap(), json!({"docs": []}));

        let missing = transport.call("getdoc", json!({"doctype": "Note"})).await;
        assert_eq!(missing.unwrap_err(), TransportError::Unreachable("getdoc".into()));
        assert_eq!(transport.calls_to("getdoc").len(), 2);
    }

    #[tokio::test]
    async fn scripted_failures_surface() {
        let transport = ScriptedTransport::new();
        transport.fail("getdoctype", "Task", "permission denied");
        let error = transport.call("getdoctype", json!({"doctype": "Task"})).await.unwrap_err();
        assert!(error.to_string().contains("permission denied"));
    }

    #[tokio::test]
    async fn in_flight_counts_guards() {
        let in_flight = InFlight::new();
        let first = in_flight.begin();
        let second = in_flight.begin();
        assert_eq!(in_flight.pending(), 2);
        drop(first);
        drop(second);
        assert_eq!(in_flight.pending(), 0);
        in_flight.settled().await;
    }

    #[tokio::test(start_paused = true)]
    async fn settled_waits_for_outstanding_requests() {
        let in_flight = InFlight::new();
        let guard = in_flight.begin();
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });

        in_flight.settled().await;
        assert_eq!(in_flight.pending(), 0);
        task.await.unwrap();
    }
}
