//! Dispute handler and operator resolution
//!
//! A dispute freezes the transaction: once `disputed`, confirmation and
//! further disputes are rejected until an operator resolves it. Resolution
//! is a privileged override that ignores confirmation timestamps; the
//! operator's decision is final. Unlike the confirmation flow, money
//! movement failures here are surfaced to the operator and the row stays
//! `disputed` until a resolution attempt succeeds.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use uuid::Uuid;

use crate::entities::prelude::*;
use crate::entities::{payout_accounts, sale_transactions};
use crate::error::EscrowError;
use crate::models::event::EventKind;
use crate::models::transaction::{ConfirmRole, Resolution, TransactionStatus};
use crate::services::auth::Identity;
use crate::services::escrow;
use crate::services::outbox;
use crate::services::payments::{self, PaymentProcessor, RefundRequest, TransferRequest};

/// A reason shorter than this is rejected outright
pub const MIN_REASON_LEN: usize = 10;

#[derive(Debug)]
pub enum ResolveOutcome {
    Refunded { refund_id: String },
    Released { transfer_id: String },
}

/// Freeze an in-flight transaction pending operator adjudication.
pub async fn raise(
    db: &DatabaseConnection,
    transaction_id: Uuid,
    caller: &Identity,
    reason: &str,
) -> Result<ConfirmRole, EscrowError> {
    let tx = escrow::fetch(db, transaction_id).await?;

    let role = if caller.user_id == tx.buyer_id {
        ConfirmRole::Buyer
    } else if caller.user_id == tx.seller_id {
        ConfirmRole::Seller
    } else {
        return Err(EscrowError::Unauthorized);
    };

    let reason = reason.trim();
    if reason.chars().count() < MIN_REASON_LEN {
        return Err(EscrowError::Validation(format!(
            "Dispute reason must be at least {} characters",
            MIN_REASON_LEN
        )));
    }

    let status = escrow::parse_status(&tx.status)?;
    if status == TransactionStatus::Disputed {
        return Err(EscrowError::InvalidState(
            "A dispute is already open for this transaction".to_string(),
        ));
    }
    if !status.is_active() {
        return Err(escrow::invalid_state(status));
    }

    let tagged_reason = format!("{}: {}", role, reason);
    let applied = SaleTransactions::update_many()
        .col_expr(
            sale_transactions::Column::Status,
            Expr::value(TransactionStatus::Disputed.as_str()),
        )
        .col_expr(
            sale_transactions::Column::DisputeReason,
            Expr::value(Some(tagged_reason.clone())),
        )
        .col_expr(
            sale_transactions::Column::UpdatedAt,
            Expr::value(Utc::now().fixed_offset()),
        )
        .filter(sale_transactions::Column::Id.eq(transaction_id))
        .filter(
            sale_transactions::Column::Status
                .is_in(TransactionStatus::ACTIVE.map(|s| s.as_str())),
        )
        .exec(db)
        .await?
        .rows_affected
        == 1;

    if !applied {
        // Lost a race against a confirmation or another dispute
        let current = escrow::fetch(db, transaction_id).await?;
        let current_status = escrow::parse_status(&current.status)?;
        if current_status == TransactionStatus::Disputed {
            return Err(EscrowError::InvalidState(
                "A dispute is already open for this transaction".to_string(),
            ));
        }
        return Err(escrow::invalid_state(current_status));
    }

    tracing::info!("Dispute opened on transaction {} by {}", transaction_id, role);
    outbox::record(db, transaction_id, EventKind::DisputeRaised, Some(tagged_reason)).await;

    Ok(role)
}

/// Operator override for a disputed transaction.
///
/// Only a `disputed` row can be resolved; a second resolution attempt on an
/// already-resolved transaction fails rather than moving money twice.
pub async fn resolve(
    db: &DatabaseConnection,
    payments_api: &dyn PaymentProcessor,
    transaction_id: Uuid,
    operator: &Identity,
    resolution: Resolution,
    admin_notes: Option<&str>,
) -> Result<ResolveOutcome, EscrowError> {
    if !operator.is_operator {
        return Err(EscrowError::Unauthorized);
    }

    let tx = escrow::fetch(db, transaction_id).await?;
    let status = escrow::parse_status(&tx.status)?;
    if status != TransactionStatus::Disputed {
        return Err(EscrowError::InvalidState(format!(
            "Resolution requires a disputed transaction, current status is {}",
            status
        )));
    }

    match resolution {
        Resolution::RefundBuyer => refund_buyer(db, payments_api, &tx, operator, admin_notes).await,
        Resolution::ReleaseToSeller => {
            release_to_seller(db, payments_api, &tx, operator, admin_notes).await
        }
    }
}

async fn refund_buyer(
    db: &DatabaseConnection,
    payments_api: &dyn PaymentProcessor,
    tx: &sale_transactions::Model,
    operator: &Identity,
    admin_notes: Option<&str>,
) -> Result<ResolveOutcome, EscrowError> {
    let payment_ref = tx
        .payment_ref
        .as_deref()
        .ok_or_else(|| EscrowError::Payment("no payment reference on file to refund".to_string()))?;

    let refund_id = payments_api
        .create_refund(RefundRequest {
            payment_ref,
            amount: tx.gross_amount,
            idempotency_key: payments::refund_idempotency_key(tx.id),
        })
        .await
        .map_err(|e| EscrowError::Payment(e.to_string()))?;

    let note = match admin_notes {
        Some(notes) => format!("Refunded to buyer by operator ({}): {}", refund_id, notes),
        None => format!("Refunded to buyer by operator ({})", refund_id),
    };

    let applied = SaleTransactions::update_many()
        .col_expr(
            sale_transactions::Column::Status,
            Expr::value(TransactionStatus::Refunded.as_str()),
        )
        .col_expr(
            sale_transactions::Column::OperationalNote,
            Expr::value(Some(note)),
        )
        .col_expr(
            sale_transactions::Column::ResolvedBy,
            Expr::value(Some(operator.user_id)),
        )
        .col_expr(
            sale_transactions::Column::UpdatedAt,
            Expr::value(Utc::now().fixed_offset()),
        )
        .filter(sale_transactions::Column::Id.eq(tx.id))
        .filter(sale_transactions::Column::Status.eq(TransactionStatus::Disputed.as_str()))
        .exec(db)
        .await?
        .rows_affected
        == 1;

    if !applied {
        return Err(EscrowError::InvalidState(
            "Transaction was resolved concurrently".to_string(),
        ));
    }

    tracing::info!("Dispute on transaction {} resolved: buyer refunded ({})", tx.id, refund_id);
    outbox::record(
        db,
        tx.id,
        EventKind::DisputeResolved,
        Some("refund_buyer".to_string()),
    )
    .await;

    Ok(ResolveOutcome::Refunded { refund_id })
}

async fn release_to_seller(
    db: &DatabaseConnection,
    payments_api: &dyn PaymentProcessor,
    tx: &sale_transactions::Model,
    operator: &Identity,
    admin_notes: Option<&str>,
) -> Result<ResolveOutcome, EscrowError> {
    // A transfer recorded by an earlier attempt is reused, never repeated
    let transfer_id = match &tx.transfer_id {
        Some(existing) => existing.clone(),
        None => {
            let account = PayoutAccounts::find()
                .filter(payout_accounts::Column::UserId.eq(tx.seller_id))
                .filter(payout_accounts::Column::PayoutsEnabled.eq(true))
                .one(db)
                .await?
                .ok_or_else(|| {
                    EscrowError::Payment("seller has no payout account linked".to_string())
                })?;

            let balance = payments_api
                .available_balance(&tx.currency)
                .await
                .map_err(|e| EscrowError::Payment(e.to_string()))?;
            if balance < tx.seller_payout {
                return Err(EscrowError::Payment(format!(
                    "insufficient platform balance for payout of {} {}",
                    tx.seller_payout, tx.currency
                )));
            }

            payments_api
                .create_transfer(TransferRequest {
                    amount: tx.seller_payout,
                    currency: &tx.currency,
                    destination: &account.processor_account_id,
                    idempotency_key: payments::payout_idempotency_key(tx.id),
                })
                .await
                .map_err(|e| EscrowError::Payment(e.to_string()))?
        }
    };

    let note = match admin_notes {
        Some(notes) => format!("Released to seller by operator ({}): {}", transfer_id, notes),
        None => format!("Released to seller by operator ({})", transfer_id),
    };
    let now = Utc::now().fixed_offset();

    let applied = SaleTransactions::update_many()
        .col_expr(
            sale_transactions::Column::Status,
            Expr::value(TransactionStatus::Completed.as_str()),
        )
        .col_expr(
            sale_transactions::Column::TransferId,
            Expr::value(Some(transfer_id.clone())),
        )
        .col_expr(
            sale_transactions::Column::PayoutCompletedAt,
            Expr::value(Some(now)),
        )
        .col_expr(
            sale_transactions::Column::OperationalNote,
            Expr::value(Some(note)),
        )
        .col_expr(
            sale_transactions::Column::ResolvedBy,
            Expr::value(Some(operator.user_id)),
        )
        .col_expr(sale_transactions::Column::UpdatedAt, Expr::value(now))
        .filter(sale_transactions::Column::Id.eq(tx.id))
        .filter(sale_transactions::Column::Status.eq(TransactionStatus::Disputed.as_str()))
        .exec(db)
        .await?
        .rows_affected
        == 1;

    if !applied {
        return Err(EscrowError::InvalidState(
            "Transaction was resolved concurrently".to_string(),
        ));
    }

    tracing::info!(
        "Dispute on transaction {} resolved: released to seller ({})",
        tx.id,
        transfer_id
    );
    outbox::record(
        db,
        tx.id,
        EventKind::DisputeResolved,
        Some("release_to_seller".to_string()),
    )
    .await;
    outbox::record(db, tx.id, EventKind::PayoutSettled, Some(transfer_id.clone())).await;

    Ok(ResolveOutcome::Released { transfer_id })
}
