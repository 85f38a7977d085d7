// Wire shapes exchanged with the transport collaborator.

pub mod boot;
pub mod meta;
pub mod methods;
pub mod sync;
