use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Last-observed serialized form of each GMR, keyed by GMR id.
///
/// Replaced wholesale every cycle, never patched in place.
pub type GmrSnapshot = BTreeMap<String, String>;

/// One tracked MRN in the polling queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingItem {
    /// Canonical (upper-cased) MRN
    pub id: String,
    pub gmrs: GmrSnapshot,
    pub complete: bool,
    pub created: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
    pub last_polled: Option<DateTime<Utc>>,
}

impl PollingItem {
    /// A fresh item as inserted on first registration.
    pub fn new(id: String, created: DateTime<Utc>, ttl: chrono::Duration) -> Self {
        Self {
            id,
            gmrs: GmrSnapshot::new(),
            complete: false,
            created,
            expiry: created + ttl,
            last_polled: None,
        }
    }
}

/// Per-item change produced by one reconciliation cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct PollingItemUpdate {
    pub id: String,
    pub gmrs: GmrSnapshot,
    pub last_polled: DateTime<Utc>,
    /// Only ever sets completion; a `false` here never reverts a completed item.
    pub complete: bool,
}

/// Whether a registration created the item or found it already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Created,
    AlreadyExists,
}

/// Distributed mutual-exclusion marker for one scheduled occurrence of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleToken {
    pub job_name: String,
    pub scheduled_time: DateTime<Utc>,
    pub acquired_at: DateTime<Utc>,
}
