use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One upstream Goods Movement Record.
///
/// Only the fields the reconciliation cycle reasons about are typed; everything
/// else GVMS sends rides along in `payload` and is re-serialized unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gmr {
    pub gmr_id: String,
    #[serde(default)]
    pub state: String,
    /// Kept as the raw string GVMS sent; compared verbatim for change detection.
    #[serde(default)]
    pub updated_date_time: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

/// Association of one declaration id (MRN) to the GMR ids it appears on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GmrByDeclaration {
    pub dec: String,
    #[serde(default)]
    pub gmrs: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MrnSearchRequest {
    pub declaration_ids: Vec<String>,
}

impl MrnSearchRequest {
    pub fn new(mrns: &[String]) -> Self {
        Self {
            declaration_ids: mrns.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MrnSearchResponse {
    #[serde(default)]
    pub gmr_by_declaration_id: Vec<GmrByDeclaration>,
    #[serde(default)]
    pub gmrs: Vec<Gmr>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HoldGmrRequest {
    pub hold: bool,
}

/// Seconds shaved off the advertised lifetime so a cached token never expires mid-request.
const EXPIRY_LATENCY_ADJUSTMENT_SECS: i64 = 60;

/// OAuth2 client-credentials token response.
#[derive(Clone, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    pub expires_in: i64,
}

impl AccessToken {
    /// How long the token may be served from cache: `min(|expires_in - 60|, expires_in)`.
    pub fn cache_lifetime(&self) -> chrono::Duration {
        let adjusted = (self.expires_in - EXPIRY_LATENCY_ADJUSTMENT_SECS).abs();
        chrono::Duration::seconds(adjusted.min(self.expires_in))
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}
