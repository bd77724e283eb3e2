use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;

use crate::error::EscrowError;
use crate::models::transaction::{ActionResponse, DisputeRequest, ResolveRequest, TransactionStatus};
use crate::services::dispute::{self, ResolveOutcome};
use crate::AppState;

use super::{authenticate, spawn_dispatch};

/// POST /api/transactions/dispute
pub async fn raise_dispute(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DisputeRequest>,
) -> Result<Json<ActionResponse>, EscrowError> {
    let caller = authenticate(&state, &headers).await?;

    dispute::raise(&state.db, req.transaction_id, &caller, &req.reason).await?;

    spawn_dispatch(&state);

    Ok(Json(ActionResponse {
        success: true,
        status: TransactionStatus::Disputed,
        message: "Dispute opened. The transaction is frozen until our team resolves it."
            .to_string(),
    }))
}

/// POST /api/admin/disputes/resolve (operator-only)
pub async fn resolve_dispute(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<ActionResponse>, EscrowError> {
    let caller = authenticate(&state, &headers).await?;

    let outcome = dispute::resolve(
        &state.db,
        state.payments.as_ref(),
        req.transaction_id,
        &caller,
        req.resolution,
        req.admin_notes.as_deref(),
    )
    .await?;

    spawn_dispatch(&state);

    let (status, message) = match outcome {
        ResolveOutcome::Refunded { .. } => (
            TransactionStatus::Refunded,
            "Dispute resolved: the buyer has been refunded.".to_string(),
        ),
        ResolveOutcome::Released { .. } => (
            TransactionStatus::Completed,
            "Dispute resolved: funds released to the seller.".to_string(),
        ),
    };

    Ok(Json(ActionResponse {
        success: true,
        status,
        message,
    }))
}
