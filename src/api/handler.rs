use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::{info, warn};

use super::models::*;
use crate::{
    clock::Clock,
    error::AppResult,
    gvms::GvmsApi,
    ledger::{LedgerStore, RegisterOutcome},
    middleware::DevCredentials,
    polling::{Mrn, PollingService},
};

#[derive(Clone)]
pub struct AppState {
    pub polling: Arc<PollingService>,
    pub ledger: Arc<dyn LedgerStore>,
    pub gvms: Arc<dyn GvmsApi>,
    pub clock: Arc<dyn Clock>,
    /// Present only when the dev endpoints are enabled
    pub dev_credentials: Option<Arc<DevCredentials>>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: state.clock.now(),
    })
}

/// Put an MRN on the polling queue by hand
/// POST /polling-queue/items/:mrn
pub async fn register_mrn(
    State(state): State<AppState>,
    Path(mrn): Path<String>,
) -> AppResult<(StatusCode, Json<RegisterMrnResponse>)> {
    let mrn = Mrn::parse(&mrn)?;
    info!(mrn = %mrn, "Dev registration requested");

    let outcome = state.polling.register(mrn.as_str()).await?;
    let (status, created) = match outcome {
        RegisterOutcome::Created => (StatusCode::CREATED, true),
        RegisterOutcome::AlreadyExists => (StatusCode::OK, false),
    };

    Ok((
        status,
        Json(RegisterMrnResponse {
            mrn: mrn.into_inner(),
            created,
        }),
    ))
}

/// Wipe the polling queue
/// DELETE /polling-queue/items
pub async fn delete_polling_items(
    State(state): State<AppState>,
) -> AppResult<Json<DeletePollingItemsResponse>> {
    let deleted = state.ledger.delete_all_polling_items().await?;
    warn!(deleted, "🗑️  Polling queue cleared via dev endpoint");

    Ok(Json(DeletePollingItemsResponse { deleted }))
}

/// Set or clear the DEFRA hold flag on a GMR
/// PUT /gmrs/:gmr_id/hold
pub async fn hold_gmr(
    State(state): State<AppState>,
    Path(gmr_id): Path<String>,
    Json(request): Json<HoldGmrBody>,
) -> AppResult<Json<HoldGmrResponse>> {
    state.gvms.hold_gmr(&gmr_id, request.hold).await?;
    info!(gmr_id = %gmr_id, hold = request.hold, "GMR hold updated via dev endpoint");

    Ok(Json(HoldGmrResponse {
        gmr_id,
        hold: request.hold,
    }))
}
