use crate::gvms::Gmr;
use serde::Serialize;

/// A GMR that is new or changed for an MRN this cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchedGmr {
    pub mrn: String,
    pub gmr: Gmr,
}

impl MatchedGmr {
    /// Stable per-(MRN, GMR) entry id so downstream can dedupe retries.
    pub fn identifier(&self) -> String {
        format!("{}-{}", self.mrn, self.gmr.gmr_id)
    }
}
