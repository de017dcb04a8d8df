use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// Result of a dev registration request
#[derive(Debug, Serialize)]
pub struct RegisterMrnResponse {
    pub mrn: String,
    pub created: bool,
}

#[derive(Debug, Serialize)]
pub struct DeletePollingItemsResponse {
    pub deleted: u64,
}

#[derive(Debug, Deserialize)]
pub struct HoldGmrBody {
    pub hold: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldGmrResponse {
    pub gmr_id: String,
    pub hold: bool,
}
