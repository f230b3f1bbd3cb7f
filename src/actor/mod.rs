//! Single-writer durable counters.
//!
//! Each key is owned by one [`DurableCounter`] that keeps the key's event
//! timestamps in [`DurableStorage`]. The [`ActorNamespace`] routes every
//! request for a key to that key's counter task, which serves requests one at
//! a time. This gives per-key linearizability without any lock around the
//! read-modify-write of the stored list.

mod counter;
mod namespace;
mod protocol;
mod storage;

pub use counter::DurableCounter;
pub use namespace::{ActorNamespace, NamespaceConfig};
pub use protocol::{
    ActorRequest, ActorResponse, STATUS_BAD_REQUEST, STATUS_INTERNAL_ERROR, STATUS_NOT_FOUND,
    STATUS_OK,
};
pub use storage::{DurableStorage, FileStorage, MemoryStorage, SharedStorage};
