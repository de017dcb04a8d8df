use super::models::*;
use crate::error::AppResult;
use crate::scheduler::token::{ScheduleTokenProvider, TokenOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Polling ledger - THE source of truth for where each MRN ended up
///
/// All mutation goes through per-document atomic primitives: upsert-by-key,
/// unordered bulk update, insert-with-conflict.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert the item unless one with the same id exists. Never mutates an existing item.
    async fn register_polling_item(&self, item: PollingItem) -> AppResult<RegisterOutcome>;

    /// Incomplete items, never-polled first then oldest `last_polled`, capped at `limit`.
    async fn find_incomplete(&self, limit: i64) -> AppResult<Vec<PollingItem>>;

    /// Apply all updates as one unordered write. Returns the number of items matched.
    async fn bulk_update(&self, updates: Vec<PollingItemUpdate>) -> AppResult<u64>;

    #[cfg(test)]
    async fn get_polling_item(&self, id: &str) -> AppResult<Option<PollingItem>>;

    /// Administrative wipe of the polling queue.
    async fn delete_all_polling_items(&self) -> AppResult<u64>;
}

// ========== POSTGRES ==========

pub struct PgLedgerRepository {
    pub pool: PgPool,
}

#[derive(Debug, FromRow)]
struct PollingItemRow {
    id: String,
    gmrs: Json<GmrSnapshot>,
    complete: bool,
    created: DateTime<Utc>,
    expiry: DateTime<Utc>,
    last_polled: Option<DateTime<Utc>>,
}

impl From<PollingItemRow> for PollingItem {
    fn from(row: PollingItemRow) -> Self {
        Self {
            id: row.id,
            gmrs: row.gmrs.0,
            complete: row.complete,
            created: row.created,
            expiry: row.expiry,
            last_polled: row.last_polled,
        }
    }
}

impl PgLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn snapshot_to_json(gmrs: &GmrSnapshot) -> serde_json::Value {
    serde_json::Value::Object(
        gmrs.iter()
            .map(|(id, raw)| (id.clone(), serde_json::Value::String(raw.clone())))
            .collect(),
    )
}

#[async_trait]
impl LedgerStore for PgLedgerRepository {
    async fn register_polling_item(&self, item: PollingItem) -> AppResult<RegisterOutcome> {
        let inserted: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO polling_items (id, gmrs, complete, created, expiry, last_polled)
            VALUES ($1, $2, FALSE, $3, $4, NULL)
            ON CONFLICT (id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&item.id)
        .bind(Json(&item.gmrs))
        .bind(item.created)
        .bind(item.expiry)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match inserted {
            Some(_) => RegisterOutcome::Created,
            None => RegisterOutcome::AlreadyExists,
        })
    }

    async fn find_incomplete(&self, limit: i64) -> AppResult<Vec<PollingItem>> {
        let rows = sqlx::query_as::<_, PollingItemRow>(
            r#"
            SELECT id, gmrs, complete, created, expiry, last_polled
            FROM polling_items
            WHERE complete = FALSE
            ORDER BY last_polled ASC NULLS FIRST
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PollingItem::from).collect())
    }

    async fn bulk_update(&self, updates: Vec<PollingItemUpdate>) -> AppResult<u64> {
        if updates.is_empty() {
            return Ok(0);
        }

        let mut ids = Vec::with_capacity(updates.len());
        let mut snapshots = Vec::with_capacity(updates.len());
        let mut polled = Vec::with_capacity(updates.len());
        let mut completes = Vec::with_capacity(updates.len());
        for update in &updates {
            ids.push(update.id.clone());
            snapshots.push(snapshot_to_json(&update.gmrs));
            polled.push(update.last_polled);
            completes.push(update.complete);
        }

        // Completion is OR-ed so a concurrent cycle can never revert it.
        let result = sqlx::query(
            r#"
            UPDATE polling_items AS p
            SET gmrs = u.gmrs,
                last_polled = u.last_polled,
                complete = p.complete OR u.complete
            FROM UNNEST($1::text[], $2::jsonb[], $3::timestamptz[], $4::bool[])
                AS u(id, gmrs, last_polled, complete)
            WHERE p.id = u.id
            "#,
        )
        .bind(&ids)
        .bind(&snapshots)
        .bind(&polled)
        .bind(&completes)
        .execute(&self.pool)
        .await?;

        debug!(
            requested = updates.len(),
            matched = result.rows_affected(),
            "Bulk polling item update applied"
        );

        Ok(result.rows_affected())
    }

    #[cfg(test)]
    async fn get_polling_item(&self, id: &str) -> AppResult<Option<PollingItem>> {
        let row = sqlx::query_as::<_, PollingItemRow>(
            r#"
            SELECT id, gmrs, complete, created, expiry, last_polled
            FROM polling_items
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(PollingItem::from))
    }

    async fn delete_all_polling_items(&self) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM polling_items")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ScheduleTokenProvider for PgLedgerRepository {
    async fn try_acquire(
        &self,
        job_name: &str,
        scheduled_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<TokenOutcome> {
        let token = ScheduleToken {
            job_name: job_name.to_string(),
            scheduled_time,
            acquired_at: now,
        };

        let result = sqlx::query(
            r#"
            INSERT INTO schedule_tokens (job_name, scheduled_time, acquired_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(&token.job_name)
        .bind(token.scheduled_time)
        .bind(token.acquired_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(TokenOutcome::Acquired),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Ok(TokenOutcome::AlreadyClaimed)
            }
            Err(e) => Err(e.into()),
        }
    }
}

// ========== IN-MEMORY ==========

/// In-process ledger for local runs (`STORE=memory`) and tests.
/// Exclusion only holds between tasks of one process.
pub struct InMemoryLedger {
    items: RwLock<HashMap<String, PollingItem>>,
    tokens: RwLock<HashMap<(String, DateTime<Utc>), ScheduleToken>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Overwrite an item as-is (test fixtures).
    #[cfg(test)]
    pub async fn put(&self, item: PollingItem) {
        self.items.write().await.insert(item.id.clone(), item);
    }

    #[cfg(test)]
    pub async fn token_count(&self) -> usize {
        self.tokens.read().await.len()
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn register_polling_item(&self, item: PollingItem) -> AppResult<RegisterOutcome> {
        let mut items = self.items.write().await;
        if items.contains_key(&item.id) {
            return Ok(RegisterOutcome::AlreadyExists);
        }
        items.insert(item.id.clone(), item);
        Ok(RegisterOutcome::Created)
    }

    async fn find_incomplete(&self, limit: i64) -> AppResult<Vec<PollingItem>> {
        let items = self.items.read().await;
        let mut pending: Vec<PollingItem> = items.values().filter(|p| !p.complete).cloned().collect();
        // None sorts before Some, i.e. never-polled first.
        pending.sort_by(|a, b| {
            a.last_polled
                .cmp(&b.last_polled)
                .then_with(|| a.id.cmp(&b.id))
        });
        pending.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(pending)
    }

    async fn bulk_update(&self, updates: Vec<PollingItemUpdate>) -> AppResult<u64> {
        let mut items = self.items.write().await;
        let mut matched = 0;
        for update in updates {
            if let Some(item) = items.get_mut(&update.id) {
                item.gmrs = update.gmrs;
                item.last_polled = Some(update.last_polled);
                item.complete = item.complete || update.complete;
                matched += 1;
            }
        }
        Ok(matched)
    }

    #[cfg(test)]
    async fn get_polling_item(&self, id: &str) -> AppResult<Option<PollingItem>> {
        Ok(self.items.read().await.get(id).cloned())
    }

    async fn delete_all_polling_items(&self) -> AppResult<u64> {
        let mut items = self.items.write().await;
        let deleted = items.len() as u64;
        items.clear();
        info!("🗑️  Deleted {} polling items", deleted);
        Ok(deleted)
    }
}

#[async_trait]
impl ScheduleTokenProvider for InMemoryLedger {
    async fn try_acquire(
        &self,
        job_name: &str,
        scheduled_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<TokenOutcome> {
        let mut tokens = self.tokens.write().await;
        match tokens.entry((job_name.to_string(), scheduled_time)) {
            Entry::Occupied(_) => Ok(TokenOutcome::AlreadyClaimed),
            Entry::Vacant(slot) => {
                slot.insert(ScheduleToken {
                    job_name: job_name.to_string(),
                    scheduled_time,
                    acquired_at: now,
                });
                Ok(TokenOutcome::Acquired)
            }
        }
    }
}


/// Run with `DATABASE_URL` pointing at a scratch Postgres: `cargo test -- --ignored`.
/// Each test gets a fresh database with `migrations/` applied.
#[cfg(test)]
mod pg_tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 7, 11, 10, 15).unwrap()
    }

    fn update(id: &str, last_polled: DateTime<Utc>, complete: bool) -> PollingItemUpdate {
        PollingItemUpdate {
            id: id.to_string(),
            gmrs: GmrSnapshot::new(),
            last_polled,
            complete,
        }
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_pg_register_is_idempotent(pool: PgPool) {
        let repo = PgLedgerRepository::new(pool);

        let first = repo
            .register_polling_item(PollingItem::new("MRN123".into(), t0(), Duration::days(30)))
            .await
            .unwrap();
        let second = repo
            .register_polling_item(PollingItem::new(
                "MRN123".into(),
                t0() + Duration::hours(5),
                Duration::days(30),
            ))
            .await
            .unwrap();

        assert_eq!(first, RegisterOutcome::Created);
        assert_eq!(second, RegisterOutcome::AlreadyExists);
        let stored = repo.get_polling_item("MRN123").await.unwrap().unwrap();
        assert_eq!(stored.created, t0());
        assert!(stored.gmrs.is_empty());
        assert!(stored.last_polled.is_none());
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_pg_find_incomplete_orders_never_polled_first(pool: PgPool) {
        let repo = PgLedgerRepository::new(pool);
        for id in ["A", "B", "C", "D"] {
            repo.register_polling_item(PollingItem::new(id.into(), t0(), Duration::days(30)))
                .await
                .unwrap();
        }
        repo.bulk_update(vec![
            update("A", t0(), true),
            update("B", t0() + Duration::minutes(10), false),
            update("C", t0() + Duration::minutes(1), false),
        ])
        .await
        .unwrap();

        let ids = |items: Vec<PollingItem>| items.into_iter().map(|i| i.id).collect::<Vec<_>>();
        assert_eq!(ids(repo.find_incomplete(10).await.unwrap()), vec!["D", "C", "B"]);
        assert_eq!(ids(repo.find_incomplete(2).await.unwrap()), vec!["D", "C"]);
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_pg_bulk_update_never_reverts_completion(pool: PgPool) {
        let repo = PgLedgerRepository::new(pool);
        repo.register_polling_item(PollingItem::new("MRN1".into(), t0(), Duration::days(30)))
            .await
            .unwrap();

        let mut snapshot = GmrSnapshot::new();
        snapshot.insert("G1".to_string(), r#"{"gmrId":"G1"}"#.to_string());
        let matched = repo
            .bulk_update(vec![
                PollingItemUpdate {
                    id: "MRN1".to_string(),
                    gmrs: snapshot.clone(),
                    last_polled: t0(),
                    complete: true,
                },
                update("UNKNOWN", t0(), false),
            ])
            .await
            .unwrap();
        assert_eq!(matched, 1);

        let stored = repo.get_polling_item("MRN1").await.unwrap().unwrap();
        assert!(stored.complete);
        assert_eq!(stored.gmrs, snapshot);

        // A later stale write replaces the snapshot but keeps completion
        repo.bulk_update(vec![update("MRN1", t0() + Duration::minutes(1), false)])
            .await
            .unwrap();
        let stored = repo.get_polling_item("MRN1").await.unwrap().unwrap();
        assert!(stored.complete);
        assert!(stored.gmrs.is_empty());
        assert_eq!(stored.last_polled, Some(t0() + Duration::minutes(1)));
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_pg_token_is_claimed_once(pool: PgPool) {
        let repo = PgLedgerRepository::new(pool);
        let scheduled = t0();

        let first = repo.try_acquire("poll", scheduled, t0()).await.unwrap();
        let second = repo
            .try_acquire("poll", scheduled, t0() + Duration::seconds(1))
            .await
            .unwrap();
        let next = repo
            .try_acquire("poll", scheduled + Duration::minutes(1), t0())
            .await
            .unwrap();

        assert_eq!(first, TokenOutcome::Acquired);
        assert_eq!(second, TokenOutcome::AlreadyClaimed);
        assert_eq!(next, TokenOutcome::Acquired);
    }
}
