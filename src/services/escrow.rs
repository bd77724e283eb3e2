//! Escrow confirmation handler and payout initiator
//!
//! Every transition is a guarded `UPDATE ... WHERE status IN (...)` whose
//! affected-row count decides whether it applied, so concurrent buyer and
//! seller confirmations (or a racing dispute) cannot both act on a stale
//! read. The confirmation timestamps carry the truth; the status column
//! only ever advances behind them.
//!
//! Payout is deliberately decoupled from the confirmation transition: once
//! both parties agree, the transaction is `completed` even if the money
//! could not move yet. A processor outage leaves a note on the row and a
//! deferred payout for the retry job, never a rolled-back agreement.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::str::FromStr;
use uuid::Uuid;

use crate::entities::prelude::*;
use crate::entities::{payout_accounts, sale_transactions};
use crate::error::EscrowError;
use crate::models::event::EventKind;
use crate::models::transaction::{ConfirmRole, TransactionStatus};
use crate::services::auth::Identity;
use crate::services::outbox;
use crate::services::payments::{self, PaymentProcessor, TransferRequest};

/// What a successful confirmation call did
#[derive(Debug)]
pub enum ConfirmOutcome {
    /// Caller's side recorded; the sale is waiting on the other party
    AwaitingCounterparty { waiting_on: ConfirmRole },
    /// Both sides confirmed and this call won the completion transition
    Completed { payout: PayoutOutcome },
    /// Both sides confirmed but a concurrent call completed the sale
    /// (and ran the payout) first
    CompletedByPeer,
    /// Both sides confirmed but a dispute froze the row before the
    /// completion transition could apply
    Frozen { status: TransactionStatus },
}

/// Outcome of a payout attempt; none of these fail the confirmation
#[derive(Debug)]
pub enum PayoutOutcome {
    Settled { transfer_id: String },
    DeferredNoAccount,
    DeferredInsufficientBalance,
    Failed { error: String },
}

pub(crate) fn parse_status(raw: &str) -> Result<TransactionStatus, EscrowError> {
    TransactionStatus::from_str(raw).map_err(|e| EscrowError::InvalidState(e))
}

pub(crate) fn invalid_state(status: TransactionStatus) -> EscrowError {
    EscrowError::InvalidState(format!(
        "Action not allowed while the transaction is {}",
        status
    ))
}

pub async fn fetch(
    db: &DatabaseConnection,
    transaction_id: Uuid,
) -> Result<sale_transactions::Model, EscrowError> {
    SaleTransactions::find_by_id(transaction_id)
        .one(db)
        .await?
        .ok_or(EscrowError::NotFound)
}

fn active_statuses() -> [&'static str; 3] {
    TransactionStatus::ACTIVE.map(|s| s.as_str())
}

/// Record a buyer/seller confirmation, completing the sale and running the
/// payout when both sides have now confirmed.
pub async fn confirm(
    db: &DatabaseConnection,
    payments_api: &dyn PaymentProcessor,
    transaction_id: Uuid,
    role: ConfirmRole,
    caller: &Identity,
) -> Result<ConfirmOutcome, EscrowError> {
    let tx = fetch(db, transaction_id).await?;

    let party = match role {
        ConfirmRole::Buyer => tx.buyer_id,
        ConfirmRole::Seller => tx.seller_id,
    };
    if caller.user_id != party {
        return Err(EscrowError::Unauthorized);
    }

    let own_confirmed_at = match role {
        ConfirmRole::Buyer => tx.buyer_confirmed_at,
        ConfirmRole::Seller => tx.seller_confirmed_at,
    };
    if own_confirmed_at.is_some() {
        return Err(EscrowError::AlreadyConfirmed);
    }

    let status = parse_status(&tx.status)?;
    if !status.is_active() {
        return Err(invalid_state(status));
    }

    let ts_column = match role {
        ConfirmRole::Buyer => sale_transactions::Column::BuyerConfirmedAt,
        ConfirmRole::Seller => sale_transactions::Column::SellerConfirmedAt,
    };
    let now = Utc::now().fixed_offset();

    // Claim this side's confirmation slot. The status and null filters close
    // the window against a concurrent dispute or a duplicate confirm.
    let claimed = SaleTransactions::update_many()
        .col_expr(ts_column, Expr::value(Some(now)))
        .col_expr(sale_transactions::Column::UpdatedAt, Expr::value(now))
        .filter(sale_transactions::Column::Id.eq(transaction_id))
        .filter(sale_transactions::Column::Status.is_in(active_statuses()))
        .filter(ts_column.is_null())
        .exec(db)
        .await?
        .rows_affected
        == 1;

    if !claimed {
        let current = fetch(db, transaction_id).await?;
        let own = match role {
            ConfirmRole::Buyer => current.buyer_confirmed_at,
            ConfirmRole::Seller => current.seller_confirmed_at,
        };
        if own.is_some() {
            return Err(EscrowError::AlreadyConfirmed);
        }
        return Err(invalid_state(parse_status(&current.status)?));
    }

    let own_event = match role {
        ConfirmRole::Buyer => EventKind::BuyerConfirmed,
        ConfirmRole::Seller => EventKind::SellerConfirmed,
    };
    outbox::record(db, transaction_id, own_event, None).await;

    // Decide completion from the authoritative row, not the stale read. The
    // guarded update picks exactly one winner between racing confirmations.
    let current = fetch(db, transaction_id).await?;
    if current.buyer_confirmed_at.is_none() || current.seller_confirmed_at.is_none() {
        // Half confirmed: advance the status marker. Losing this update to a
        // concurrent transition is benign, the timestamps already committed.
        SaleTransactions::update_many()
            .col_expr(
                sale_transactions::Column::Status,
                Expr::value(role.confirmed_status().as_str()),
            )
            .col_expr(
                sale_transactions::Column::UpdatedAt,
                Expr::value(Utc::now().fixed_offset()),
            )
            .filter(sale_transactions::Column::Id.eq(transaction_id))
            .filter(sale_transactions::Column::Status.is_in(active_statuses()))
            .exec(db)
            .await?;

        return Ok(ConfirmOutcome::AwaitingCounterparty {
            waiting_on: role.other(),
        });
    }

    let won = SaleTransactions::update_many()
        .col_expr(
            sale_transactions::Column::Status,
            Expr::value(TransactionStatus::Completed.as_str()),
        )
        .col_expr(
            sale_transactions::Column::UpdatedAt,
            Expr::value(Utc::now().fixed_offset()),
        )
        .filter(sale_transactions::Column::Id.eq(transaction_id))
        .filter(sale_transactions::Column::Status.is_in(active_statuses()))
        .exec(db)
        .await?
        .rows_affected
        == 1;

    if !won {
        // Either a concurrent confirmation completed the sale, or a dispute
        // claimed the row first; report what the row actually says.
        let current = fetch(db, transaction_id).await?;
        return Ok(lost_completion_outcome(parse_status(&current.status)?));
    }

    tracing::info!("Transaction {} completed by dual confirmation", transaction_id);
    outbox::record(db, transaction_id, EventKind::TransactionCompleted, None).await;

    let current = fetch(db, transaction_id).await?;
    let payout = initiate_payout(db, payments_api, &current).await?;
    Ok(ConfirmOutcome::Completed { payout })
}

/// Attempt the seller payout for a completed transaction.
///
/// Idempotent by intent: a transaction that already carries a transfer id is
/// reported settled without touching the processor, and the transfer call
/// itself carries a deterministic idempotency key.
pub async fn initiate_payout(
    db: &DatabaseConnection,
    payments_api: &dyn PaymentProcessor,
    tx: &sale_transactions::Model,
) -> Result<PayoutOutcome, EscrowError> {
    if let Some(existing) = &tx.transfer_id {
        return Ok(PayoutOutcome::Settled {
            transfer_id: existing.clone(),
        });
    }

    let account = PayoutAccounts::find()
        .filter(payout_accounts::Column::UserId.eq(tx.seller_id))
        .filter(payout_accounts::Column::PayoutsEnabled.eq(true))
        .one(db)
        .await?;

    let Some(account) = account else {
        tracing::warn!(
            "Deferring payout for transaction {}: seller {} has no payout account",
            tx.id,
            tx.seller_id
        );
        set_operational_note(db, tx.id, "Payout deferred: seller has no payout account linked")
            .await?;
        outbox::record(
            db,
            tx.id,
            EventKind::PayoutDeferred,
            Some("no payout account".to_string()),
        )
        .await;
        return Ok(PayoutOutcome::DeferredNoAccount);
    };

    let balance = match payments_api.available_balance(&tx.currency).await {
        Ok(balance) => balance,
        Err(e) => {
            tracing::warn!("Balance check failed for transaction {}: {}", tx.id, e);
            set_operational_note(db, tx.id, &format!("Payout failed: {}", e)).await?;
            outbox::record(db, tx.id, EventKind::PayoutFailed, Some(e.to_string())).await;
            return Ok(PayoutOutcome::Failed {
                error: e.to_string(),
            });
        }
    };

    if balance < tx.seller_payout {
        tracing::warn!(
            "Deferring payout for transaction {}: balance {} below payout {}",
            tx.id,
            balance,
            tx.seller_payout
        );
        set_operational_note(
            db,
            tx.id,
            "Payout pending: insufficient platform balance, will retry",
        )
        .await?;
        outbox::record(
            db,
            tx.id,
            EventKind::PayoutDeferred,
            Some("insufficient balance".to_string()),
        )
        .await;
        return Ok(PayoutOutcome::DeferredInsufficientBalance);
    }

    match payments_api
        .create_transfer(TransferRequest {
            amount: tx.seller_payout,
            currency: &tx.currency,
            destination: &account.processor_account_id,
            idempotency_key: payments::payout_idempotency_key(tx.id),
        })
        .await
    {
        Ok(transfer_id) => {
            let now = Utc::now().fixed_offset();
            // transfer_id is written at most once per transaction
            let recorded = SaleTransactions::update_many()
                .col_expr(
                    sale_transactions::Column::TransferId,
                    Expr::value(Some(transfer_id.clone())),
                )
                .col_expr(
                    sale_transactions::Column::PayoutCompletedAt,
                    Expr::value(Some(now)),
                )
                .col_expr(sale_transactions::Column::UpdatedAt, Expr::value(now))
                .filter(sale_transactions::Column::Id.eq(tx.id))
                .filter(sale_transactions::Column::TransferId.is_null())
                .exec(db)
                .await?
                .rows_affected
                == 1;

            if recorded {
                tracing::info!("Payout settled for transaction {}: {}", tx.id, transfer_id);
                outbox::record(
                    db,
                    tx.id,
                    EventKind::PayoutSettled,
                    Some(transfer_id.clone()),
                )
                .await;
            }
            Ok(PayoutOutcome::Settled { transfer_id })
        }
        Err(e) => {
            tracing::warn!("Transfer failed for transaction {}: {}", tx.id, e);
            set_operational_note(db, tx.id, &format!("Payout failed: {}", e)).await?;
            outbox::record(db, tx.id, EventKind::PayoutFailed, Some(e.to_string())).await;
            Ok(PayoutOutcome::Failed {
                error: e.to_string(),
            })
        }
    }
}

fn lost_completion_outcome(status: TransactionStatus) -> ConfirmOutcome {
    match status {
        TransactionStatus::Completed => ConfirmOutcome::CompletedByPeer,
        status => ConfirmOutcome::Frozen { status },
    }
}

async fn set_operational_note(
    db: &DatabaseConnection,
    transaction_id: Uuid,
    note: &str,
) -> Result<(), EscrowError> {
    SaleTransactions::update_many()
        .col_expr(
            sale_transactions::Column::OperationalNote,
            Expr::value(Some(note.to_string())),
        )
        .col_expr(
            sale_transactions::Column::UpdatedAt,
            Expr::value(Utc::now().fixed_offset()),
        )
        .filter(sale_transactions::Column::Id.eq(transaction_id))
        .exec(db)
        .await?;
    Ok(())
}
