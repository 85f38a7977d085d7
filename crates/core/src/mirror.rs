// Mirror: the application context that owns every store and exposes the
// public API used by views and tooling.
//
// Lock order when more than one is held: meta → locals → docinfo → session →
// user_info. No lock is held across a transport call or a trigger.

use std::sync::{Arc, Mutex};

use chrono::{Duration, Local, Utc};
use docmirror_common::protocol::boot::{BootInfo, UserPermissions};
use docmirror_common::protocol::meta::{MetaRequest, MetaResponse};
use docmirror_common::protocol::methods;
use docmirror_common::protocol::sync::{Docinfo, SyncPayload};
use docmirror_common::types::{is_truthy, KEY_DOCTYPE, KEY_NAME, KEY_UNEDITED};
use docmirror_common::{DocKey, DocTypeSchema, Document, FieldDescriptor, FieldType};
use serde_json::{json, Map, Value};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::MirrorConfig;
use crate::error::{MirrorError, Result};
use crate::factory::{Factory, ParentSlot};
use crate::meta::{persist, MetaCache};
use crate::session::Session;
use crate::store::cache_db::CacheDb;
use crate::store::device_cache::{DeviceCache, DeviceCacheError, MemoryDeviceCache, DOCTYPE_NAMESPACE};
use crate::store::docinfo::DocinfoStore;
use crate::store::filters::Filters;
use crate::store::locals::Locals;
use crate::sync::{SyncReport, Synchronizer};
use crate::transport::{InFlight, Transport};
use crate::triggers::{dispatch, trigger_fn, TriggerEvent, TriggerRegistry};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Notifications for views that hold document handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorEvent {
    Renamed { doctype: String, from: String, to: String },
    Removed(DocKey),
    Synced(Vec<DocKey>),
}

#[derive(Clone)]
pub struct Mirror {
    meta: Arc<RwLock<MetaCache>>,
    locals: Arc<RwLock<Locals>>,
    docinfo: Arc<RwLock<DocinfoStore>>,
    session: Arc<RwLock<Session>>,
    user_info: Arc<RwLock<Map<String, Value>>>,
    triggers: Arc<RwLock<TriggerRegistry>>,
    cache: Arc<Mutex<Box<dyn DeviceCache>>>,
    transport: Arc<dyn Transport>,
    in_flight: InFlight,
    events: broadcast::Sender<MirrorEvent>,
    config: Arc<MirrorConfig>,
}

impl Mirror {
    pub fn new(config: MirrorConfig, transport: Arc<dyn Transport>, cache: Box<dyn DeviceCache>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            meta: Arc::new(RwLock::new(MetaCache::new())),
            locals: Arc::new(RwLock::new(Locals::new())),
            docinfo: Arc::new(RwLock::new(DocinfoStore::new())),
            session: Arc::new(RwLock::new(Session::from_config(&config.session))),
            user_info: Arc::new(RwLock::new(Map::new())),
            triggers: Arc::new(RwLock::new(TriggerRegistry::new())),
            cache: Arc::new(Mutex::new(cache)),
            transport,
            in_flight: InFlight::new(),
            events,
            config: Arc::new(config),
        }
    }

    /// Mirror with a volatile device cache sized from `config`.
    pub fn in_memory(config: MirrorConfig, transport: Arc<dyn Transport>) -> Self {
        let cache = MemoryDeviceCache::new(config.cache.max_bytes);
        Self::new(config, transport, Box::new(cache))
    }

    /// Mirror backed by the configured `cache.db`, or a volatile cache when
    /// no home directory is available.
    pub fn open(config: MirrorConfig, transport: Arc<dyn Transport>) -> anyhow::Result<Self> {
        let Some(path) = config.cache_path() else {
            warn!("no cache path available; using a volatile device cache");
            return Ok(Self::in_memory(config, transport));
        };
        let cache = CacheDb::open(&path, config.cache.max_bytes)?;
        debug!(path = %path.display(), "device cache opened");
        Ok(Self::new(config, transport, Box::new(cache)))
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MirrorEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: MirrorEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    // ── Registry ───────────────────────────────────────────────────

    pub async fn add_to_locals(&self, doc: Document) -> DocKey {
        let meta = self.meta.read().await;
        let mut locals = self.locals.write().await;
        locals.add(doc, &meta).key
    }

    pub async fn get_doc(&self, doctype: &str, name: &str) -> Option<Document> {
        self.locals.read().await.get_by(doctype, name).cloned()
    }

    /// Document JSON with child rows nested under their table fields.
    pub async fn doc_value(&self, key: &DocKey) -> Option<Value> {
        let meta = self.meta.read().await;
        let locals = self.locals.read().await;
        locals.to_value(key, &meta)
    }

    pub async fn get_list(&self, doctype: &str, filters: &Filters) -> Vec<Document> {
        self.locals.read().await.list(doctype, filters).into_iter().cloned().collect()
    }

    pub async fn children(&self, parent: &DocKey, fieldname: &str) -> Vec<Document> {
        let meta = self.meta.read().await;
        let locals = self.locals.read().await;
        locals.children(parent, fieldname, &meta).into_iter().cloned().collect()
    }

    pub async fn registry_len(&self) -> usize {
        self.locals.read().await.len()
    }

    pub async fn registered_doctypes(&self) -> Vec<String> {
        self.locals.read().await.doctypes().map(str::to_string).collect()
    }

    pub async fn new_name_for(&self, localname: &str) -> Option<String> {
        self.locals.read().await.new_name_for(localname).map(str::to_string)
    }

    pub async fn is_fresh(&self, key: &DocKey) -> bool {
        let window = Duration::from_std(self.config.sync.fresh_window()).unwrap_or_else(|_| Duration::days(365));
        self.locals.read().await.is_fresh(key, Utc::now(), window)
    }

    /// Remove a document and its rows; child rows are spliced out of their
    /// parent's table. Returns every removed key.
    pub async fn remove_doc(&self, key: &DocKey) -> Vec<DocKey> {
        let removed = {
            let mut meta = self.meta.write().await;
            let mut locals = self.locals.write().await;
            let mut docinfo = self.docinfo.write().await;
            let removed = locals.remove(key, &meta);
            for removed_key in &removed {
                meta.drop_working_copies(removed_key);
                docinfo.remove(removed_key);
            }
            removed
        };
        for removed_key in &removed {
            self.emit(MirrorEvent::Removed(removed_key.clone()));
        }
        removed
    }

    pub async fn docinfo(&self, key: &DocKey) -> Option<Docinfo> {
        self.docinfo.read().await.get(key).cloned()
    }

    pub async fn user_info(&self, user: &str) -> Option<Value> {
        self.user_info.read().await.get(user).cloned()
    }

    // ── Metadata ───────────────────────────────────────────────────

    pub async fn schema(&self, doctype: &str) -> Option<DocTypeSchema> {
        self.meta.read().await.get(doctype).cloned()
    }

    pub async fn loaded_doctypes(&self) -> Vec<String> {
        self.meta.read().await.doctypes().into_iter().map(str::to_string).collect()
    }

    /// Field descriptor as seen by one document (its working copy if any).
    pub async fn docfield(&self, doctype: &str, fieldname: &str, docname: Option<&str>) -> Option<FieldDescriptor> {
        self.meta.read().await.docfield(doctype, fieldname, docname).cloned()
    }

    /// Override a field property for one document only.
    pub async fn set_docfield_property<F>(&self, key: &DocKey, fieldname: &str, update: F) -> Result<()>
    where
        F: FnOnce(&mut FieldDescriptor),
    {
        self.meta.write().await.update_docfield(key, fieldname, update)
    }

    /// Ensure `doctype`'s schema is loaded: memory first, then the server
    /// with the persisted copy's `modified` stamp. A `use_cache` reply syncs
    /// the persisted copy; a full reply is persisted and synced.
    pub async fn with_doctype(&self, doctype: &str) -> Result<DocTypeSchema> {
        if let Some(schema) = self.schema(doctype).await {
            return Ok(schema);
        }

        let cached_docs = self.with_cache(|cache| persist::load_docs(cache, doctype));
        let cached_timestamp =
            cached_docs.as_deref().and_then(|docs| persist::cached_timestamp(docs, doctype));
        let request = MetaRequest::new(doctype, cached_timestamp.clone());
        let args = serde_json::to_value(&request).map_err(docmirror_common::PayloadError::from)?;

        let reply = self.call(methods::GET_DOCTYPE, args).await?;
        let docs = match MetaResponse::from_value(reply)? {
            MetaResponse::UseCache => {
                debug!(doctype, timestamp = ?cached_timestamp, "server confirmed cached schema");
                cached_docs.unwrap_or_default()
            }
            MetaResponse::Docs(docs) => {
                self.with_cache(|cache| persist::store_docs(cache, doctype, &docs));
                docs
            }
        };

        self.sync(SyncPayload::from_value(Value::Array(docs))?).await;
        self.schema(doctype).await.ok_or_else(|| MirrorError::schema_not_loaded(doctype))
    }

    fn with_cache<T>(&self, f: impl FnOnce(&mut dyn DeviceCache) -> T) -> T {
        let mut cache = self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut **cache)
    }

    pub fn cache_used_bytes(&self) -> std::result::Result<u64, DeviceCacheError> {
        self.with_cache(|cache| cache.used_bytes())
    }

    pub fn cached_doctypes(&self) -> std::result::Result<Vec<String>, DeviceCacheError> {
        let keys = self.with_cache(|cache| cache.keys_with_prefix(DOCTYPE_NAMESPACE))?;
        Ok(keys
            .iter()
            .filter_map(|key| key.strip_prefix(DOCTYPE_NAMESPACE))
            .map(str::to_string)
            .collect())
    }

    pub fn clear_cached_schemas(&self) -> std::result::Result<usize, DeviceCacheError> {
        self.with_cache(|cache| cache.clear_namespace(DOCTYPE_NAMESPACE))
    }

    // ── Transport ──────────────────────────────────────────────────

    /// Call a server method, counting it toward the network-settle barrier.
    pub async fn call(&self, method: &str, args: Value) -> Result<Value> {
        let _guard = self.in_flight.begin();
        Ok(self.transport.call(method, args).await?)
    }

    /// Start a server call in the background. It counts toward the settle
    /// barrier from the moment this returns, so a trigger can fire it without
    /// awaiting and the field change still waits for it.
    pub fn spawn_call(&self, method: &str, args: Value) -> JoinHandle<Result<Value>> {
        let guard = self.in_flight.begin();
        let reply = self.transport.call(method, args);
        tokio::spawn(async move {
            let _guard = guard;
            Ok(reply.await?)
        })
    }

    pub fn pending_calls(&self) -> usize {
        self.in_flight.pending()
    }

    /// Resolve once no server call is outstanding.
    pub async fn settled(&self) {
        self.in_flight.settled().await;
    }

    /// Return the registered document when its docinfo is loaded or it was
    /// synced within the fresh window; otherwise fetch and sync it.
    pub async fn with_doc(&self, doctype: &str, name: &str) -> Result<Document> {
        let key = DocKey::new(doctype, name);
        let cached = {
            let locals = self.locals.read().await;
            let docinfo = self.docinfo.read().await;
            locals.get(&key).cloned().filter(|_| docinfo.contains(&key))
        };
        if let Some(doc) = cached {
            return Ok(doc);
        }
        if self.is_fresh(&key).await {
            if let Some(doc) = self.get_doc(doctype, name).await {
                return Ok(doc);
            }
        }

        let reply = self.call(methods::GET_DOC, json!({ KEY_DOCTYPE: doctype, KEY_NAME: name })).await?;
        self.sync(SyncPayload::from_value(reply)?).await;
        self.get_doc(doctype, name).await.ok_or(MirrorError::NotFound(key))
    }

    /// Fetch user permissions once per session.
    pub async fn load_user_permissions(&self) -> Result<()> {
        if self.session.read().await.has_user_permissions() {
            return Ok(());
        }
        let reply = self.call(methods::GET_USER_PERMISSIONS, json!({})).await?;
        let permissions: UserPermissions =
            serde_json::from_value(reply).map_err(docmirror_common::PayloadError::from)?;
        info!(doctypes = permissions.len(), "user permissions loaded");
        self.session.write().await.set_user_permissions(permissions);
        Ok(())
    }

    // ── Sync ───────────────────────────────────────────────────────

    pub async fn sync(&self, payload: SyncPayload) -> SyncReport {
        let report = {
            let mut meta = self.meta.write().await;
            let mut locals = self.locals.write().await;
            let mut docinfo = self.docinfo.write().await;
            let mut user_info = self.user_info.write().await;
            Synchronizer {
                meta: &mut meta,
                locals: &mut locals,
                docinfo: &mut docinfo,
                user_info: &mut user_info,
                now: Utc::now(),
            }
            .sync(payload)
        };

        for rename in &report.renamed {
            self.emit(MirrorEvent::Renamed {
                doctype: rename.doctype.clone(),
                from: rename.from.clone(),
                to: rename.to.clone(),
            });
        }
        for key in &report.removed {
            self.emit(MirrorEvent::Removed(key.clone()));
        }
        if !report.synced.is_empty() {
            self.emit(MirrorEvent::Synced(report.synced.clone()));
        }
        report
    }

    pub async fn sync_value(&self, payload: Value) -> Result<SyncReport> {
        Ok(self.sync(SyncPayload::from_value(payload)?).await)
    }

    /// Install session bootstrap: identity, defaults, boot records under
    /// `:`-prefixed doctypes, user info, and the metadata version check.
    pub async fn boot(&self, boot: BootInfo) -> Result<()> {
        if let Some(version) = boot.metadata_version.as_deref() {
            self.with_cache(|cache| persist::check_metadata_version(cache, version));
        }

        let mut docs = Vec::with_capacity(boot.docs.len());
        for value in &boot.docs {
            let mut doc = Document::from_value(value.clone())?;
            if !doc.doctype.starts_with(':') {
                doc.doctype = format!(":{}", doc.doctype);
            }
            docs.push(doc);
        }
        {
            let meta = self.meta.read().await;
            let mut locals = self.locals.write().await;
            for doc in docs {
                locals.add(doc, &meta);
            }
        }

        self.session.write().await.apply_boot(&boot);
        self.user_info.write().await.extend(boot.user_info.clone());
        info!(user = %boot.user, records = boot.docs.len(), "session booted");
        Ok(())
    }

    // ── New documents ──────────────────────────────────────────────

    /// Create a draft. `parent` places it as a child row.
    pub async fn get_new_doc(
        &self,
        doctype: &str,
        parent: Option<ParentSlot>,
        with_mandatory_children: bool,
    ) -> Result<DocKey> {
        let mut meta = self.meta.write().await;
        let mut locals = self.locals.write().await;
        let mut docinfo = self.docinfo.write().await;
        let mut session = self.session.write().await;
        Factory {
            meta: &mut meta,
            locals: &mut locals,
            docinfo: &mut docinfo,
            session: &mut session,
            now: Local::now().naive_local(),
        }
        .new_doc(doctype, parent, with_mandatory_children)
    }

    /// Append a row to `parent.parentfield`, or insert it at 1-based `at`.
    pub async fn add_child(&self, parent: &DocKey, parentfield: &str, at: Option<usize>) -> Result<DocKey> {
        let mut meta = self.meta.write().await;
        let mut locals = self.locals.write().await;
        let mut docinfo = self.docinfo.write().await;
        let mut session = self.session.write().await;
        Factory {
            meta: &mut meta,
            locals: &mut locals,
            docinfo: &mut docinfo,
            session: &mut session,
            now: Local::now().naive_local(),
        }
        .add_child(parent, parentfield, at)
    }

    /// Values copied onto the next top-level draft, then discarded.
    pub async fn set_create_intent(&self, values: Map<String, Value>) {
        self.session.write().await.set_create_intent(values);
    }

    pub async fn session(&self) -> Session {
        self.session.read().await.clone()
    }

    // ── Mutation and triggers ──────────────────────────────────────

    pub async fn on<F, Fut>(&self, doctype: &str, fieldname: &str, handler: F)
    where
        F: Fn(TriggerEvent) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.triggers.write().await.register(doctype, fieldname, trigger_fn(handler));
    }

    /// Write one field and run its triggers. Link fields re-fire even when
    /// the value is unchanged; `fieldtype` defaults to the schema's.
    pub async fn set_value(
        &self,
        doctype: &str,
        name: &str,
        fieldname: &str,
        value: Value,
        fieldtype: Option<FieldType>,
    ) -> Result<()> {
        let key = DocKey::new(doctype, name);
        self.apply_values(&key, vec![(fieldname.to_string(), value)], fieldtype, false).await
    }

    /// Write several fields in one serial run.
    pub async fn set_values(&self, key: &DocKey, values: Map<String, Value>, skip_dirty_trigger: bool) -> Result<()> {
        self.apply_values(key, values.into_iter().collect(), None, skip_dirty_trigger).await
    }

    async fn apply_values(
        &self,
        key: &DocKey,
        values: Vec<(String, Value)>,
        fieldtype: Option<FieldType>,
        skip_dirty_trigger: bool,
    ) -> Result<()> {
        let fired = {
            let meta = self.meta.read().await;
            let mut locals = self.locals.write().await;
            let doc = locals.get_mut(key).ok_or_else(|| MirrorError::NotFound(key.clone()))?;

            let mut fired = Vec::with_capacity(values.len());
            for (fieldname, value) in values {
                if fieldname == KEY_NAME || fieldname == KEY_DOCTYPE {
                    warn!(%key, %fieldname, "reserved key cannot be set");
                    continue;
                }
                let current = doc.get(&fieldname);
                if current != Some(&value) {
                    let meaningful = current.is_some_and(is_truthy) || is_truthy(&value);
                    if meaningful && doc.get(KEY_UNEDITED).is_some_and(is_truthy) {
                        doc.set(KEY_UNEDITED, Value::from(0));
                    }
                    doc.set(fieldname.clone(), value.clone());
                    fired.push((fieldname, value));
                    continue;
                }

                let relink = fieldtype
                    .clone()
                    .or_else(|| {
                        meta.docfield(&key.doctype, &fieldname, Some(key.name.as_str()))
                            .map(|field| field.fieldtype.clone())
                    })
                    .is_some_and(|fieldtype| fieldtype.is_link());
                if relink {
                    debug!(%key, %fieldname, "unchanged link value; re-firing triggers");
                    fired.push((fieldname, value));
                }
            }
            fired
        };

        for (fieldname, value) in fired {
            let triggers = self.triggers.read().await.collect(&key.doctype, &fieldname);
            let event = TriggerEvent {
                mirror: self.clone(),
                key: key.clone(),
                fieldname,
                value,
                skip_dirty_trigger,
            };
            dispatch(triggers, event).await?;
        }

        self.in_flight.settled().await;
        Ok(())
    }

    /// Display text of a field, through the field's strategy when it has one.
    pub async fn formatted_value(&self, key: &DocKey, fieldname: &str) -> Option<String> {
        let meta = self.meta.read().await;
        let locals = self.locals.read().await;
        let doc = locals.get(key)?;
        let value = doc.get(fieldname).cloned().unwrap_or(Value::Null);
        let field = meta.docfield(&key.doctype, fieldname, Some(key.name.as_str()))?;
        Some(field.format_value(&value, doc))
    }

    /// Status reported by a field's strategy, if it has one.
    pub async fn field_status(&self, key: &DocKey, fieldname: &str) -> Option<String> {
        let meta = self.meta.read().await;
        let locals = self.locals.read().await;
        let doc = locals.get(key)?;
        let field = meta.docfield(&key.doctype, fieldname, Some(key.name.as_str()))?;
        field.strategy.get()?.status(doc)
    }
}

impl std::fmt::Debug for Mirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mirror")
            .field("config", &self.config)
            .field("in_flight", &self.in_flight.pending())
            .finish_non_exhaustive()
    }
}
