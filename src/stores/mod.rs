//! Store implementations.
//!
//! Every variant reproduces the same sliding-window semantics on a different
//! medium and is interchangeable behind [`Store`](crate::ratelimit::Store).

mod actor;
mod locks;
mod relational;
mod rest;
mod sorted_set;

pub use actor::ActorStore;
pub use locks::{KeyGuard, KeyLocks};
pub use relational::{DatabaseStore, MemoryTable, TimestampRow, TimestampTable};
pub use rest::RestSortedSet;
pub use sorted_set::{MemorySortedSet, SortedSetBackend, SortedSetStore};
