use super::completion::CompletionRule;
use super::mrn::Mrn;
use crate::clock::Clock;
use crate::config::PollingConfig;
use crate::error::{AppError, AppResult};
use crate::gvms::{Gmr, GvmsApi, MrnSearchResponse};
use crate::ledger::{GmrSnapshot, LedgerStore, PollingItem, PollingItemUpdate, RegisterOutcome};
use crate::publisher::{MatchedGmr, ResilientPublisher};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

/// Counts reported by one reconciliation cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub polled: usize,
    pub matched_mrns: usize,
    pub unmatched_mrns: usize,
    pub unique_gmrs: usize,
    pub items_with_gmrs: usize,
    pub completed: usize,
    pub changed_gmrs: usize,
}

/// Polling / reconciliation engine over the MRN ledger.
pub struct PollingService {
    ledger: Arc<dyn LedgerStore>,
    gvms: Arc<dyn GvmsApi>,
    publisher: Arc<ResilientPublisher>,
    completion: CompletionRule,
    clock: Arc<dyn Clock>,
    config: PollingConfig,
}

impl PollingService {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        gvms: Arc<dyn GvmsApi>,
        publisher: Arc<ResilientPublisher>,
        clock: Arc<dyn Clock>,
        config: PollingConfig,
    ) -> Self {
        Self {
            ledger,
            gvms,
            publisher,
            completion: CompletionRule::new(config.terminal_state.clone()),
            clock,
            config,
        }
    }

    /// Join the polling queue. Re-registering an existing MRN changes nothing.
    #[instrument(skip(self))]
    pub async fn register(&self, reference: &str) -> AppResult<RegisterOutcome> {
        let mrn = Mrn::canonical(reference);
        let item = PollingItem::new(mrn.into_inner(), self.clock.now(), self.config.expiry());
        let id = item.id.clone();

        let outcome = self.ledger.register_polling_item(item).await?;
        match outcome {
            RegisterOutcome::Created => info!(mrn = %id, "📥 Inserted new polling item"),
            RegisterOutcome::AlreadyExists => {
                info!(mrn = %id, "Polling item already exists, skipping")
            }
        }

        Ok(outcome)
    }

    /// Run one reconciliation cycle: fetch, diff, write, publish.
    ///
    /// An upstream failure aborts before any write. The ledger write always
    /// precedes publishing, so a publish failure leaves the ledger updated.
    #[instrument(skip_all)]
    pub async fn poll_items(&self, cancel: &CancellationToken) -> AppResult<PollSummary> {
        let now = self.clock.now();

        let items = self.ledger.find_incomplete(self.config.max_poll_size).await?;
        if items.is_empty() {
            info!("No MRNs to poll for");
            return Ok(PollSummary::default());
        }

        let mrns: Vec<String> = items.iter().map(|item| item.id.clone()).collect();
        info!(mrn_count = mrns.len(), mrns = %mrns.join(","), "🔎 Polling GVMS");

        let started = Instant::now();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AppError::Cancelled),
            response = self.gvms.search_for_gmrs(&mrns) => response?,
        };
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "GVMS poll completed"
        );

        let unique_gmrs = response.gmrs.len();
        let gmrs_by_mrn = group_by_mrn(response);

        let mut summary = PollSummary {
            polled: items.len(),
            unique_gmrs,
            ..Default::default()
        };
        summary.matched_mrns = items
            .iter()
            .filter(|item| gmrs_by_mrn.get(&item.id).is_some_and(|gmrs| !gmrs.is_empty()))
            .count();
        summary.unmatched_mrns = summary.polled - summary.matched_mrns;
        info!(
            matched = summary.matched_mrns,
            unmatched = summary.unmatched_mrns,
            unique_gmrs,
            "GVMS response received"
        );

        let mut updates = Vec::with_capacity(items.len());
        let mut changed = Vec::new();
        for item in &items {
            let current = gmrs_by_mrn
                .get(&item.id)
                .map(Vec::as_slice)
                .unwrap_or_default();

            // Diff against the snapshot as stored before this cycle
            if !current.is_empty() {
                summary.items_with_gmrs += 1;
                changed.extend(changed_gmrs(&item.id, &item.gmrs, current));
            }

            let complete = self.completion.determine(item, current, now).is_complete();
            if complete {
                summary.completed += 1;
            }

            updates.push(PollingItemUpdate {
                id: item.id.clone(),
                gmrs: snapshot_of(current)?,
                last_polled: now,
                complete,
            });
        }

        let written = self.ledger.bulk_update(updates).await?;
        summary.changed_gmrs = changed.len();
        info!(
            updated = written,
            items_with_gmrs = summary.items_with_gmrs,
            completed = summary.completed,
            "Polling items updated"
        );

        if changed.is_empty() {
            info!("No changed GMRs to publish for polled MRNs");
        } else {
            self.publisher.publish(&changed, cancel).await?;
            info!(changed = changed.len(), "Published changed GMRs");
        }

        Ok(summary)
    }
}

/// MRN → full GMRs, one per `gmrId`.
///
/// Associations naming GMRs absent from the response are ignored. Repeated
/// associations (same MRN after canonicalization, or a repeated id) collapse.
fn group_by_mrn(response: MrnSearchResponse) -> HashMap<String, Vec<Gmr>> {
    let gmrs: HashMap<String, Gmr> = response
        .gmrs
        .into_iter()
        .map(|gmr| (gmr.gmr_id.clone(), gmr))
        .collect();

    let mut by_mrn: HashMap<String, BTreeMap<String, Gmr>> = HashMap::new();
    for association in response.gmr_by_declaration_id {
        let mrn = Mrn::canonical(&association.dec).into_inner();
        let entry = by_mrn.entry(mrn).or_default();
        for gmr in association.gmrs.iter().filter_map(|id| gmrs.get(id)) {
            entry.insert(gmr.gmr_id.clone(), gmr.clone());
        }
    }

    by_mrn
        .into_iter()
        .map(|(mrn, gmrs)| (mrn, gmrs.into_values().collect()))
        .collect()
}

/// GMRs that are new for `mrn` or whose `updatedDateTime` moved since `prior`.
fn changed_gmrs(mrn: &str, prior: &GmrSnapshot, current: &[Gmr]) -> Vec<MatchedGmr> {
    current
        .iter()
        .filter(|gmr| match prior.get(&gmr.gmr_id) {
            None => true,
            // An unreadable stored value counts as changed
            Some(raw) => serde_json::from_str::<Gmr>(raw)
                .map(|previous| previous.updated_date_time != gmr.updated_date_time)
                .unwrap_or(true),
        })
        .map(|gmr| MatchedGmr {
            mrn: mrn.to_string(),
            gmr: gmr.clone(),
        })
        .collect()
}

fn snapshot_of(gmrs: &[Gmr]) -> AppResult<GmrSnapshot> {
    gmrs.iter()
        .map(|gmr| Ok::<_, AppError>((gmr.gmr_id.clone(), serde_json::to_string(gmr)?)))
        .collect()
}
