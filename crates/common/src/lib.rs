// docmirror-common: shared document, schema, and wire types for the mirror.

mod de;

pub mod naming;
pub mod payload;
pub mod protocol;
pub mod schema;
pub mod types;

pub use payload::PayloadError;
pub use schema::{DocTypeSchema, FieldDescriptor, FieldStrategy, FieldType};
pub use types::{DocKey, DocStatus, Document};
