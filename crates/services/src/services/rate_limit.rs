use std::time::Duration;

use chrono::{DateTime, Utc};
use db::models::rate_limit::RateLimitCounter;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    Exceeded { retry_after_secs: u64 },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Fixed-window limiter backed by a shared table, so every server instance
/// draws from the same budget.
#[derive(Clone)]
pub struct RateLimiter {
    pool: SqlitePool,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(pool: SqlitePool, limit: u32, window: Duration) -> Self {
        Self {
            pool,
            limit,
            window: window.max(Duration::from_secs(1)),
        }
    }

    /// Count one request for `key` and fail once the window's budget is spent
    pub async fn check(&self, key: &str, now: DateTime<Utc>) -> Result<(), RateLimitError> {
        let window_secs = self.window.as_secs() as i64;
        let now_secs = now.timestamp();
        let window_start = now_secs - now_secs.rem_euclid(window_secs);

        let count = RateLimitCounter::hit(&self.pool, key, window_start).await?;
        if count == 1 {
            let pruned = RateLimitCounter::prune(&self.pool, window_start).await?;
            if pruned > 0 {
                debug!(pruned, "Pruned expired rate limit windows");
            }
        }

        if count > i64::from(self.limit) {
            let retry_after_secs = (window_start + window_secs - now_secs).max(1) as u64;
            warn!(key, count, limit = self.limit, "Rate limit exceeded");
            return Err(RateLimitError::Exceeded { retry_after_secs });
        }
        Ok(())
    }
}
