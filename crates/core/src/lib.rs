// docmirror-core: client-side document registry, metadata cache, default
// resolution, and field triggers.

pub mod config;
pub mod defaults;
pub mod error;
pub mod factory;
pub mod meta;
pub mod mirror;
pub mod serial;
pub mod session;
pub mod store;
pub mod sync;
pub mod transport;
pub mod triggers;

pub use config::MirrorConfig;
pub use error::{MirrorError, Result};
pub use factory::ParentSlot;
pub use mirror::{Mirror, MirrorEvent};
pub use store::filters::{Filter, Filters};
pub use sync::{Rename, SyncReport};
pub use transport::{ScriptedTransport, Transport, TransportError};
pub use triggers::TriggerEvent;
