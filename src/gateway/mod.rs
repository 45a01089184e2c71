pub mod dispatcher;
pub mod pool;
pub mod rate_limiter;

pub use dispatcher::{Dispatcher, Response};
pub use pool::{POOL_MAX, Pool, PoolConfig, PoolStats, PooledSession};
pub use rate_limiter::RateLimiter;
