//! Rate limiting policy, window math and the admission guard.

mod backend;
mod clock;
mod limiter;
mod policy;
mod window;

pub use backend::AdmissionGuard;
pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::{Decision, RateLimiter, DEFAULT_KEY_PREFIX, DEFAULT_STORE_TIMEOUT};
pub use policy::{LimitPolicy, LimitSettings, DEFAULT_SCOPE};
pub use window::WindowKey;
