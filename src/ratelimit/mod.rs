//! Rate limiting decision logic and the shared sliding-window semantics.

mod clock;
mod key;
mod limiter;
mod store;
mod window;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use key::RateLimiterKey;
pub use limiter::{Decision, Limiter, LimiterBuilder, DEFAULT_WINDOW_MS, GLOBAL_ID};
pub use store::Store;
pub use window::{window_start, WindowLog};
