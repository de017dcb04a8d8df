use super::matched::MatchedGmr;
use super::sink::{PublishEntry, PublishSink};
use crate::config::PublisherConfig;
use crate::error::PublishError;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Batch publisher that tolerates partial failure from the sink.
///
/// INVARIANTS:
/// - No request carries more than `batch_ceiling` entries
/// - Caller-fault entries are dropped after one attempt and never block siblings
/// - A retry resends only the entries still pending from the previous attempt
pub struct ResilientPublisher {
    sink: Arc<dyn PublishSink>,
    batch_ceiling: usize,
    max_attempts: usize,
    backoff: Duration,
}

impl ResilientPublisher {
    pub fn new(sink: Arc<dyn PublishSink>, config: &PublisherConfig) -> Self {
        Self {
            sink,
            batch_ceiling: config.batch_ceiling.max(1),
            max_attempts: config.max_attempts.max(1),
            backoff: config.backoff(),
        }
    }

    /// Deliver every record, chunked and dispatched concurrently.
    ///
    /// Returns `RetriesExhausted` with the undelivered ids of every chunk
    /// once all chunks have settled.
    #[instrument(skip_all, fields(records = records.len()))]
    pub async fn publish(
        &self,
        records: &[MatchedGmr],
        cancel: &CancellationToken,
    ) -> Result<(), PublishError> {
        if records.is_empty() {
            return Ok(());
        }

        let entries = records
            .iter()
            .map(|record| {
                Ok::<_, PublishError>(PublishEntry {
                    id: record.identifier(),
                    payload: serde_json::to_string(record).map_err(PublishError::Encode)?,
                })
            })
            .collect::<Result<Vec<_>, PublishError>>()?;

        let chunks = entries
            .chunks(self.batch_ceiling)
            .map(|chunk| self.publish_chunk(chunk.to_vec(), cancel));
        let results = join_all(chunks).await;

        let mut undelivered = Vec::new();
        let mut first_error = None;
        for result in results {
            match result {
                Ok(()) => {}
                Err(PublishError::RetriesExhausted { entry_ids }) => undelivered.extend(entry_ids),
                Err(PublishError::Cancelled) => first_error = Some(PublishError::Cancelled),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        if !undelivered.is_empty() {
            return Err(PublishError::RetriesExhausted {
                entry_ids: undelivered,
            });
        }

        info!(published = entries.len(), "📤 Matched GMRs published");
        Ok(())
    }

    async fn publish_chunk(
        &self,
        mut pending: Vec<PublishEntry>,
        cancel: &CancellationToken,
    ) -> Result<(), PublishError> {
        for attempt in 1..=self.max_attempts {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PublishError::Cancelled),
                result = self.sink.publish_batch(&pending) => result,
            };

            match result {
                Ok(outcome) if outcome.failed.is_empty() => {
                    debug!(attempt, entries = pending.len(), "Chunk delivered");
                    return Ok(());
                }
                Ok(outcome) => {
                    let mut transient = HashSet::new();
                    for failed in &outcome.failed {
                        if failed.caller_fault {
                            warn!(
                                entry_id = %failed.id,
                                code = %failed.code,
                                "Sink rejected entry as invalid, dropping"
                            );
                        } else {
                            transient.insert(failed.id.as_str());
                        }
                    }
                    pending.retain(|entry| transient.contains(entry.id.as_str()));
                    if pending.is_empty() {
                        return Ok(());
                    }
                }
                Err(PublishError::Sink {
                    code,
                    message,
                    caller_fault: true,
                }) => {
                    let entry_ids: Vec<&str> = pending.iter().map(|e| e.id.as_str()).collect();
                    warn!(
                        %code,
                        %message,
                        entry_ids = %entry_ids.join(","),
                        "Sink rejected request as invalid, dropping chunk"
                    );
                    return Ok(());
                }
                Err(err @ PublishError::Sink { .. }) => {
                    warn!(attempt, error = %err, "Transient sink failure");
                }
                Err(err) => return Err(err),
            }

            if attempt < self.max_attempts {
                warn!(
                    attempt,
                    pending = pending.len(),
                    backoff_ms = self.backoff.as_millis() as u64,
                    "Retrying pending publish entries"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(PublishError::Cancelled),
                    _ = tokio::time::sleep(self.backoff) => {}
                }
            }
        }

        let entry_ids: Vec<String> = pending.into_iter().map(|e| e.id).collect();
        error!(
            attempts = self.max_attempts,
            entry_ids = %entry_ids.join(","),
            "❌ Publish retries exhausted, entries not delivered"
        );
        Err(PublishError::RetriesExhausted { entry_ids })
    }
}
