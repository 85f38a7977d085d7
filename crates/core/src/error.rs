// Error types for the mirror's public API.

use docmirror_common::{DocKey, PayloadError};
use thiserror::Error;

use crate::store::device_cache::DeviceCacheError;
use crate::transport::TransportError;

pub type Result<T> = std::result::Result<T, MirrorError>;

#[derive(Debug, Error)]
pub enum MirrorError {
    /// Defaulting or validation was attempted before the doctype's schema loaded.
    #[error("schema for doctype `{0}` is not loaded")]
    SchemaNotLoaded(String),

    #[error("document {0} is not in the registry")]
    NotFound(DocKey),

    #[error("`{fieldname}` is not a table field of `{doctype}`")]
    NotATableField { doctype: String, fieldname: String },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("device cache error: {0}")]
    Cache(#[from] DeviceCacheError),

    #[error("invalid payload: {0}")]
    Payload(#[from] PayloadError),

    #[error("trigger for {doctype}.{fieldname} failed: {source:#}")]
    Trigger {
        doctype: String,
        fieldname: String,
        #[source]
        source: anyhow::Error,
    },
}

impl MirrorError {
    pub fn schema_not_loaded(doctype: impl Into<String>) -> Self {
        Self::SchemaNotLoaded(doctype.into())
    }
}
