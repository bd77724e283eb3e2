use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use uuid::Uuid;

use crate::error::EscrowError;
use crate::models::transaction::{ActionResponse, ConfirmRequest, TransactionView};
use crate::services::escrow::{self, ConfirmOutcome, PayoutOutcome};
use crate::AppState;

use super::{authenticate, spawn_dispatch};

/// POST /api/transactions/confirm
///
/// Records the caller's side of the dual confirmation; when both sides have
/// confirmed, completes the sale and attempts the payout in the same call.
pub async fn confirm_sale(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ConfirmRequest>,
) -> Result<Json<ActionResponse>, EscrowError> {
    let caller = authenticate(&state, &headers).await?;

    let outcome = escrow::confirm(
        &state.db,
        state.payments.as_ref(),
        req.transaction_id,
        req.role,
        &caller,
    )
    .await?;

    spawn_dispatch(&state);

    // The message states exactly what happened and what is pending, so the
    // UI renders state without interpretation logic of its own.
    let current = escrow::fetch(&state.db, req.transaction_id).await?;
    let status = escrow::parse_status(&current.status)?;
    let message = match outcome {
        ConfirmOutcome::AwaitingCounterparty { waiting_on } => {
            format!("Confirmation recorded. Waiting for {} confirmation.", waiting_on)
        }
        ConfirmOutcome::CompletedByPeer => "Sale complete.".to_string(),
        ConfirmOutcome::Frozen { status } => format!(
            "Confirmation recorded, but the transaction is now {} and cannot complete until it is resolved.",
            status
        ),
        ConfirmOutcome::Completed { payout } => match payout {
            PayoutOutcome::Settled { .. } => {
                "Sale complete. Payout has been sent to the seller.".to_string()
            }
            PayoutOutcome::DeferredNoAccount => {
                "Sale complete. Payout pending: the seller has not linked a payout account yet."
                    .to_string()
            }
            PayoutOutcome::DeferredInsufficientBalance => {
                "Sale complete. Payout pending: it will be retried shortly.".to_string()
            }
            PayoutOutcome::Failed { .. } => {
                "Sale complete. The payout could not be sent and will be retried.".to_string()
            }
        },
    };

    Ok(Json(ActionResponse {
        success: true,
        status,
        message,
    }))
}

/// GET /api/transactions/{id}
///
/// Parties and operators may read the row; anyone else is rejected.
pub async fn get_transaction(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<TransactionView>, EscrowError> {
    let caller = authenticate(&state, &headers).await?;
    let tx = escrow::fetch(&state.db, id).await?;

    if caller.user_id != tx.buyer_id && caller.user_id != tx.seller_id && !caller.is_operator {
        return Err(EscrowError::Unauthorized);
    }

    let status = escrow::parse_status(&tx.status)?;
    Ok(Json(TransactionView {
        id: tx.id,
        buyer_id: tx.buyer_id,
        seller_id: tx.seller_id,
        currency: tx.currency,
        gross_amount: tx.gross_amount,
        platform_fee: tx.platform_fee,
        seller_payout: tx.seller_payout,
        status,
        buyer_confirmed_at: tx.buyer_confirmed_at,
        seller_confirmed_at: tx.seller_confirmed_at,
        transfer_id: tx.transfer_id,
        payout_completed_at: tx.payout_completed_at,
        dispute_reason: tx.dispute_reason,
        operational_note: tx.operational_note,
    }))
}
