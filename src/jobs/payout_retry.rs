use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;
use tokio::time::{interval, Duration};

use crate::entities::prelude::*;
use crate::entities::sale_transactions;
use crate::error::EscrowError;
use crate::models::transaction::TransactionStatus;
use crate::services::escrow::{self, PayoutOutcome};
use crate::services::payments::PaymentProcessor;

/// Retry deferred payouts out of band.
///
/// Completed transactions without a transfer id are the ones whose payout
/// was deferred (no account, low balance) or failed; a seller who links an
/// account later gets paid on the next pass without operator action.
pub async fn start_payout_retry_job(
    db: DatabaseConnection,
    payments: Arc<dyn PaymentProcessor>,
    interval_secs: u64,
) {
    tokio::spawn(async move {
        let mut interval = interval(Duration::from_secs(interval_secs));

        loop {
            interval.tick().await;

            match retry_deferred_payouts(&db, payments.as_ref()).await {
                Ok(0) => {}
                Ok(settled) => tracing::info!("Payout retry settled {} transactions", settled),
                Err(e) => tracing::error!("Payout retry pass failed: {}", e),
            }
        }
    });
}

async fn retry_deferred_payouts(
    db: &DatabaseConnection,
    payments: &dyn PaymentProcessor,
) -> Result<u64, EscrowError> {
    let deferred = SaleTransactions::find()
        .filter(sale_transactions::Column::Status.eq(TransactionStatus::Completed.as_str()))
        .filter(sale_transactions::Column::TransferId.is_null())
        .filter(sale_transactions::Column::SellerPayout.gt(0))
        .all(db)
        .await?;

    let mut settled = 0;
    for tx in deferred {
        match escrow::initiate_payout(db, payments, &tx).await? {
            PayoutOutcome::Settled { .. } => settled += 1,
            outcome => {
                tracing::debug!("Payout for transaction {} still pending: {:?}", tx.id, outcome)
            }
        }
    }

    Ok(settled)
}
