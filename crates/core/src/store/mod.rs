// Local state: document registry, docinfo, and the persistent device cache.

pub mod cache_db;
pub mod device_cache;
pub mod docinfo;
pub mod filters;
pub mod locals;
