use std::sync::Arc;

use redis::Client as RedisClient;

use crate::config::AppConfig;
use crate::notifications::Notifier;
use crate::shared::rate_limit::KeyedRateLimiter;
use crate::shared::utils::DbPool;

pub struct AppState {
    pub conn: DbPool,
    /// Optional cache/broker layer. Every path through it is best-effort;
    /// `None` means the service runs without caching, chat fan-out or
    /// report rate limiting backed by Redis.
    pub cache: Option<Arc<RedisClient>>,
    pub config: AppConfig,
    pub notifier: Notifier,
    pub report_limiter: KeyedRateLimiter,
}
