use crate::gvms::Gmr;
use crate::ledger::PollingItem;
use chrono::{DateTime, Utc};
use std::fmt;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionReason {
    /// Every associated GMR reached the terminal state
    MatchedTerminal,
    /// The item outlived its expiry without resolving
    Expired,
}

impl CompletionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionReason::MatchedTerminal => "matched-terminal",
            CompletionReason::Expired => "expired",
        }
    }
}

impl fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionResult {
    Complete {
        reason: CompletionReason,
        /// Time since the item was first registered
        age: chrono::Duration,
    },
    Incomplete,
}

impl CompletionResult {
    pub fn is_complete(&self) -> bool {
        matches!(self, CompletionResult::Complete { .. })
    }
}

/// Decide whether `item` is done given the GMRs fetched for it this cycle.
///
/// Terminal match is checked before expiry, so an expired item whose GMRs are
/// all terminal reports `MatchedTerminal`. No GMRs is never terminal.
pub fn decide(
    item: &PollingItem,
    gmrs: &[Gmr],
    now: DateTime<Utc>,
    terminal_state: &str,
) -> CompletionResult {
    let age = now - item.created;

    let all_terminal = !gmrs.is_empty()
        && gmrs
            .iter()
            .all(|g| g.state.eq_ignore_ascii_case(terminal_state));
    if all_terminal {
        return CompletionResult::Complete {
            reason: CompletionReason::MatchedTerminal,
            age,
        };
    }

    if now > item.expiry {
        return CompletionResult::Complete {
            reason: CompletionReason::Expired,
            age,
        };
    }

    CompletionResult::Incomplete
}

/// `decide` bound to the configured terminal state, logging items that leave the queue.
pub struct CompletionRule {
    terminal_state: String,
}

impl CompletionRule {
    pub fn new(terminal_state: impl Into<String>) -> Self {
        Self {
            terminal_state: terminal_state.into(),
        }
    }

    /// `now` is the cycle's instant, the same one written as `last_polled`.
    pub fn determine(
        &self,
        item: &PollingItem,
        gmrs: &[Gmr],
        now: DateTime<Utc>,
    ) -> CompletionResult {
        let result = decide(item, gmrs, now, &self.terminal_state);

        if let CompletionResult::Complete { reason, age } = &result {
            info!(
                mrn = %item.id,
                reason = %reason,
                age_secs = age.num_seconds(),
                expiry = %item.expiry,
                "✅ Polling item complete, leaving queue"
            );
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn created() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 1, 8, 0, 0).unwrap()
    }

    fn item() -> PollingItem {
        PollingItem::new("24GBABCDEFGHIJKLM1".to_string(), created(), Duration::days(30))
    }

    fn gmr(id: &str, state: &str) -> Gmr {
        Gmr {
            gmr_id: id.to_string(),
            state: state.to_string(),
            updated_date_time: "2025-10-02T10:00:00Z".to_string(),
            payload: Default::default(),
        }
    }

    #[test]
    fn test_all_terminal_completes() {
        let now = created() + Duration::days(2);
        let result = decide(
            &item(),
            &[gmr("G1", "COMPLETED"), gmr("G2", "COMPLETED")],
            now,
            "COMPLETED",
        );

        assert_eq!(
            result,
            CompletionResult::Complete {
                reason: CompletionReason::MatchedTerminal,
                age: Duration::days(2),
            }
        );
    }

    #[test]
    fn test_terminal_match_is_case_insensitive() {
        let now = created() + Duration::hours(1);
        let result = decide(&item(), &[gmr("G1", "completed")], now, "COMPLETED");
        assert!(result.is_complete());
    }

    #[test]
    fn test_terminal_wins_over_expiry() {
        let now = created() + Duration::days(45);
        let result = decide(&item(), &[gmr("G1", "COMPLETED")], now, "COMPLETED");

        assert!(matches!(
            result,
            CompletionResult::Complete {
                reason: CompletionReason::MatchedTerminal,
                ..
            }
        ));
    }

    #[test]
    fn test_partial_terminal_is_incomplete() {
        let now = created() + Duration::days(1);
        let result = decide(
            &item(),
            &[gmr("G1", "COMPLETED"), gmr("G2", "CHECKED_IN")],
            now,
            "COMPLETED",
        );
        assert_eq!(result, CompletionResult::Incomplete);
    }

    #[test]
    fn test_no_gmrs_not_expired_is_incomplete() {
        let now = created() + Duration::days(29);
        assert_eq!(decide(&item(), &[], now, "COMPLETED"), CompletionResult::Incomplete);
    }

    #[test]
    fn test_expiry_is_strict() {
        let at_expiry = created() + Duration::days(30);
        assert_eq!(
            decide(&item(), &[], at_expiry, "COMPLETED"),
            CompletionResult::Incomplete
        );

        let past = at_expiry + Duration::seconds(1);
        assert_eq!(
            decide(&item(), &[gmr("G1", "OPEN")], past, "COMPLETED"),
            CompletionResult::Complete {
                reason: CompletionReason::Expired,
                age: Duration::days(30) + Duration::seconds(1),
            }
        );
    }

    #[test]
    fn test_rule_decides_at_given_instant() {
        let rule = CompletionRule::new("COMPLETED");
        let expiry = created() + Duration::days(30);

        assert!(!rule.determine(&item(), &[], expiry).is_complete());
        assert!(rule
            .determine(&item(), &[], expiry + Duration::seconds(1))
            .is_complete());
    }
}
