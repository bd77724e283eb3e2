//! Transaction event outbox
//!
//! State-mutating services append an event row after each committed
//! transition; the dispatcher fans the undelivered rows out to the
//! notification channels. Recording is best-effort and never fails the
//! caller, since the state transition is already durable by the time an
//! event is written.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use std::str::FromStr;
use uuid::Uuid;

use crate::entities::prelude::*;
use crate::entities::transaction_events;
use crate::models::event::EventKind;
use crate::services::notifier::Notifier;

/// Events that keep failing delivery are parked after this many attempts
const MAX_DISPATCH_ATTEMPTS: i32 = 3;

/// Append an event for a committed transition.
pub async fn record(
    db: &DatabaseConnection,
    transaction_id: Uuid,
    kind: EventKind,
    detail: Option<String>,
) {
    let now = Utc::now().fixed_offset();
    let event = transaction_events::ActiveModel {
        transaction_id: Set(transaction_id),
        kind: Set(kind.to_string()),
        detail: Set(detail),
        attempts: Set(0),
        dispatched_at: Set(None),
        created_at: Set(now),
        ..Default::default()
    };

    if let Err(e) = event.insert(db).await {
        tracing::error!(
            "Failed to record {} event for transaction {}: {}",
            kind,
            transaction_id,
            e
        );
    }
}

/// Deliver undispatched events to the notification channels.
///
/// Returns the number of events fully delivered. Events whose channels keep
/// erroring are retried on later passes up to [`MAX_DISPATCH_ATTEMPTS`].
pub async fn dispatch_pending(
    db: &DatabaseConnection,
    notifier: &Notifier,
) -> Result<u64, DbErr> {
    let pending = TransactionEvents::find()
        .filter(transaction_events::Column::DispatchedAt.is_null())
        .filter(transaction_events::Column::Attempts.lt(MAX_DISPATCH_ATTEMPTS))
        .order_by_asc(transaction_events::Column::Id)
        .all(db)
        .await?;

    let mut delivered = 0;
    for event in pending {
        let now = Utc::now().fixed_offset();

        let kind = match EventKind::from_str(&event.kind) {
            Ok(kind) => kind,
            Err(e) => {
                tracing::warn!("Parking unreadable outbox event {}: {}", event.id, e);
                let mut model: transaction_events::ActiveModel = event.into();
                model.dispatched_at = Set(Some(now));
                model.update(db).await?;
                continue;
            }
        };

        let Some(tx) = SaleTransactions::find_by_id(event.transaction_id).one(db).await? else {
            tracing::warn!(
                "Parking outbox event {} for missing transaction {}",
                event.id,
                event.transaction_id
            );
            let mut model: transaction_events::ActiveModel = event.into();
            model.dispatched_at = Set(Some(now));
            model.update(db).await?;
            continue;
        };

        let clean = notifier.fan_out(&tx, kind, event.detail.as_deref()).await;

        let next_attempts = event.attempts + 1;
        let mut model: transaction_events::ActiveModel = event.into();
        model.attempts = Set(next_attempts);
        if clean {
            model.dispatched_at = Set(Some(now));
            delivered += 1;
        }
        model.update(db).await?;
    }

    Ok(delivered)
}
