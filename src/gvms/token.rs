use super::models::AccessToken;
use crate::clock::Clock;
use crate::error::GvmsError;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Bearer credential cache for the GVMS API.
///
/// INVARIANTS:
/// - At most one token exchange is in flight; concurrent misses wait on the
///   refresh lock and then reuse whatever the winner stored
/// - A token is never served at or after `expires_at`
/// - `invalidate` takes effect for the very next caller
pub struct TokenCache {
    cached: RwLock<Option<CachedToken>>,
    refresh: Mutex<()>,
    clock: Arc<dyn Clock>,
}

impl TokenCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            cached: RwLock::new(None),
            refresh: Mutex::new(()),
            clock,
        }
    }

    /// Return the cached token, or run `fetch` once to obtain a new one.
    pub async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<String, GvmsError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AccessToken, GvmsError>>,
    {
        if let Some(token) = self.fresh().await {
            return Ok(token);
        }

        let _refresh = self.refresh.lock().await;

        // Another caller may have refreshed while we waited
        if let Some(token) = self.fresh().await {
            return Ok(token);
        }

        let token = fetch().await?;
        let expires_at = self.clock.now() + token.cache_lifetime();
        debug!(%expires_at, "GVMS access token cached");

        *self.cached.write().await = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at,
        });

        Ok(token.access_token)
    }

    /// Drop the cached token so the next call performs a fresh exchange.
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }

    async fn fresh(&self) -> Option<String> {
        let cached = self.cached.read().await;
        cached
            .as_ref()
            .filter(|t| self.clock.now() < t.expires_at)
            .map(|t| t.access_token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::FixedClock;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn token(value: &str, expires_in: i64) -> AccessToken {
        AccessToken {
            access_token: value.to_string(),
            token_type: "bearer".to_string(),
            expires_in,
        }
    }

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 11, 7, 9, 0, 0).unwrap(),
        ))
    }

    #[tokio::test]
    async fn test_concurrent_misses_fetch_once() {
        let cache = Arc::new(TokenCache::new(clock()));
        let fetches = Arc::new(AtomicUsize::new(0));

        let callers = (0..10).map(|_| {
            let cache = cache.clone();
            let fetches = fetches.clone();
            async move {
                cache
                    .get_or_fetch(|| async move {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        Ok(token("abc", 3600))
                    })
                    .await
            }
        });

        let results = futures::future::join_all(callers).await;

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r.as_deref().ok() == Some("abc")));
    }

    #[tokio::test]
    async fn test_refetches_after_margin_elapses() {
        let clock = clock();
        let cache = TokenCache::new(clock.clone());

        let first = cache.get_or_fetch(|| async { Ok(token("one", 3600)) }).await.unwrap();
        assert_eq!(first, "one");

        // Still inside 3600 - 60 seconds
        clock.advance(chrono::Duration::seconds(3539));
        let cached = cache.get_or_fetch(|| async { Ok(token("two", 3600)) }).await.unwrap();
        assert_eq!(cached, "one");

        clock.advance(chrono::Duration::seconds(1));
        let refreshed = cache.get_or_fetch(|| async { Ok(token("two", 3600)) }).await.unwrap();
        assert_eq!(refreshed, "two");
    }

    #[tokio::test]
    async fn test_invalidate_forces_exchange() {
        let cache = TokenCache::new(clock());

        cache.get_or_fetch(|| async { Ok(token("one", 3600)) }).await.unwrap();
        cache.invalidate().await;
        let next = cache.get_or_fetch(|| async { Ok(token("two", 3600)) }).await.unwrap();

        assert_eq!(next, "two");
    }

    #[tokio::test]
    async fn test_failed_exchange_is_not_cached() {
        let cache = TokenCache::new(clock());

        let err = cache
            .get_or_fetch(|| async { Err(GvmsError::Token("boom".to_string())) })
            .await;
        assert!(err.is_err());

        let ok = cache.get_or_fetch(|| async { Ok(token("one", 3600)) }).await.unwrap();
        assert_eq!(ok, "one");
    }
}
