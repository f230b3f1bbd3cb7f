//! Bite Limiter - Sliding Window Rate Limiting
//!
//! This crate decides, for an identifying key, whether the requests seen within
//! a trailing window keep the caller under a configured ceiling. The decision
//! itself lives in [`ratelimit::Limiter`]; the counting is delegated to a
//! [`ratelimit::Store`], of which three variants are provided:
//!
//! - [`stores::ActorStore`]: one single-writer durable counter per key
//! - [`stores::SortedSetStore`]: a sorted collection scored by timestamp
//! - [`stores::DatabaseStore`]: a table of `(key, timestamp)` rows

pub mod actor;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod stores;

pub use error::{LimiterError, Result};
pub use ratelimit::{Decision, Limiter, Store};
