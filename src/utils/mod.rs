pub mod pool;
pub mod retry;

pub use pool::{bounded_map, DEFAULT_CONCURRENCY};
pub use retry::{retry_with_backoff, RetryPolicy};
