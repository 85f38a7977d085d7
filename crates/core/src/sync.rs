// Synchronizer: merge inbound payloads into the registry, docinfo, and
// metadata cache.

use chrono::{DateTime, Utc};
use docmirror_common::protocol::sync::SyncPayload;
use docmirror_common::schema::DOCTYPE_DOCTYPE;
use docmirror_common::DocKey;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::meta::MetaCache;
use crate::store::docinfo::DocinfoStore;
use crate::store::locals::{Locals, MergeOutcome};

/// A draft that arrived under its permanent name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub doctype: String,
    pub from: String,
    pub to: String,
}

impl Rename {
    pub fn old_key(&self) -> DocKey {
        DocKey::new(self.doctype.clone(), self.from.clone())
    }

    pub fn new_key(&self) -> DocKey {
        DocKey::new(self.doctype.clone(), self.to.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    /// Keys of the payload's documents, in payload order.
    pub synced: Vec<DocKey>,
    pub renamed: Vec<Rename>,
    /// Registry entries dropped by the merge (trailing rows, renamed drafts).
    pub removed: Vec<DocKey>,
    /// Doctypes whose schema the payload carried.
    pub schemas: Vec<String>,
    pub docinfo: Option<DocKey>,
}

/// Mutable state a sync touches, borrowed from the mirror for one call.
pub struct Synchronizer<'a> {
    pub meta: &'a mut MetaCache,
    pub locals: &'a mut Locals,
    pub docinfo: &'a mut DocinfoStore,
    pub user_info: &'a mut Map<String, Value>,
    pub now: DateTime<Utc>,
}

impl Synchronizer<'_> {
    pub fn sync(&mut self, payload: SyncPayload) -> SyncReport {
        let mut report = SyncReport::default();

        for (index, doc) in payload.docs.into_iter().enumerate() {
            if doc.doctype == DOCTYPE_DOCTYPE {
                match self.meta.sync_record(&doc) {
                    Ok(()) => report.schemas.push(doc.name.clone()),
                    Err(error) => warn!(doctype = %doc.name, %error, "ignoring unreadable schema record"),
                }
            }

            let localname = doc.localname().map(str::to_string);
            let outcome = self.locals.upsert(doc, self.meta);
            self.apply_outcome(&outcome, &mut report);
            self.locals.mark_synced(&outcome.key, self.now);

            if let Some(localname) = localname.filter(|localname| *localname != outcome.key.name) {
                self.rename(index, &outcome.key, localname, &mut report);
            }
            report.synced.push(outcome.key);
        }

        if let Some(docinfo) = payload.docinfo {
            for (user, info) in &docinfo.user_info {
                self.user_info.insert(user.clone(), info.clone());
            }
            let key = docinfo.key();
            debug!(%key, "docinfo merged");
            self.docinfo.merge(docinfo);
            report.docinfo = Some(key);
        }

        report
    }

    fn apply_outcome(&mut self, outcome: &MergeOutcome, report: &mut SyncReport) {
        for (from, to) in &outcome.rekeyed {
            self.meta.rename_working_copies(from, to);
        }
        for key in &outcome.removed {
            self.meta.drop_working_copies(key);
        }
        report.removed.extend(outcome.removed.iter().cloned());
    }

    fn rename(&mut self, index: usize, key: &DocKey, localname: String, report: &mut SyncReport) {
        let rename = Rename { doctype: key.doctype.clone(), from: localname, to: key.name.clone() };
        info!(doctype = %rename.doctype, from = %rename.from, to = %rename.to, "draft renamed");

        let removed = self.locals.rename(&rename.doctype, &rename.from, &rename.to, self.meta);
        self.meta.rename_working_copies(&rename.old_key(), &rename.new_key());
        for removed_key in removed.iter().filter(|removed_key| **removed_key != rename.old_key()) {
            self.meta.drop_working_copies(removed_key);
        }
        report.removed.extend(removed);

        // Only the first document of a batch carries its docinfo along.
        if index == 0 {
            self.docinfo.relocate(&rename.old_key(), &rename.new_key());
        }
        report.renamed.push(rename);
    }
}
