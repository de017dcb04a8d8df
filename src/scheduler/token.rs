use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppResult;

/// Result of trying to claim one scheduled occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenOutcome {
    Acquired,
    /// Another replica inserted the token first. Not an error.
    AlreadyClaimed,
}

/// Insert-if-absent provider for execution tokens.
///
/// INVARIANT: for a given `(job_name, scheduled_time)` exactly one call across
/// all replicas observes `Acquired`.
#[async_trait]
pub trait ScheduleTokenProvider: Send + Sync {
    async fn try_acquire(
        &self,
        job_name: &str,
        scheduled_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<TokenOutcome>;
}
