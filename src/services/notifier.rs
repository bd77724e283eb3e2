//! Notification fan-out channels
//!
//! Three channels per event: an in-app notification row, a transactional
//! email through the relay, and a support-desk ticket for disputes. Every
//! send is isolated; one channel failing is logged and never affects
//! another channel or the caller. Unconfigured channels are skipped.

use chrono::Utc;
use reqwest::Client;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use serde_json::json;
use uuid::Uuid;

use crate::entities::{notifications, sale_transactions};
use crate::models::event::EventKind;

#[derive(Clone)]
pub struct Notifier {
    db: DatabaseConnection,
    email: Option<EmailRelay>,
    support: Option<SupportDesk>,
}

/// Transactional email relay (the relay resolves user ids to addresses)
#[derive(Clone)]
pub struct EmailRelay {
    client: Client,
    base_url: String,
    api_key: String,
}

impl EmailRelay {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_key,
        }
    }

    async fn send(
        &self,
        user_id: Uuid,
        transaction_id: Uuid,
        kind: EventKind,
        body: &str,
    ) -> Result<(), reqwest::Error> {
        self.client
            .post(format!("{}/messages", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "user_id": user_id,
                "transaction_id": transaction_id,
                "kind": kind.as_str(),
                "body": body,
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Support-desk ticket creation for the operator dispute queue
#[derive(Clone)]
pub struct SupportDesk {
    client: Client,
    base_url: String,
    api_key: String,
}

impl SupportDesk {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_key,
        }
    }

    async fn open_ticket(
        &self,
        transaction_id: Uuid,
        detail: Option<&str>,
    ) -> Result<(), reqwest::Error> {
        self.client
            .post(format!("{}/tickets", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "subject": format!("Dispute opened on transaction {}", transaction_id),
                "transaction_id": transaction_id,
                "body": detail.unwrap_or("No reason recorded"),
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

impl Notifier {
    pub fn new(
        db: DatabaseConnection,
        email: Option<EmailRelay>,
        support: Option<SupportDesk>,
    ) -> Self {
        Self { db, email, support }
    }

    /// Deliver one event to all applicable channels.
    ///
    /// Returns true when every attempted channel succeeded; failures are
    /// logged and reported back only so the outbox can schedule a retry.
    pub async fn fan_out(
        &self,
        tx: &sale_transactions::Model,
        kind: EventKind,
        detail: Option<&str>,
    ) -> bool {
        let body = body_for(kind, detail);
        let mut clean = true;

        for user_id in recipients_for(tx, kind) {
            if let Err(e) = self.insert_in_app(user_id, tx.id, kind, &body).await {
                tracing::warn!(
                    "In-app notification failed for user {} on transaction {}: {}",
                    user_id,
                    tx.id,
                    e
                );
                clean = false;
            }

            if let Some(email) = &self.email {
                if let Err(e) = email.send(user_id, tx.id, kind, &body).await {
                    tracing::warn!(
                        "Email send failed for user {} on transaction {}: {}",
                        user_id,
                        tx.id,
                        e
                    );
                    clean = false;
                }
            }
        }

        if kind == EventKind::DisputeRaised {
            if let Some(support) = &self.support {
                if let Err(e) = support.open_ticket(tx.id, detail).await {
                    tracing::warn!("Support ticket creation failed for transaction {}: {}", tx.id, e);
                    clean = false;
                }
            }
        }

        clean
    }

    async fn insert_in_app(
        &self,
        user_id: Uuid,
        transaction_id: Uuid,
        kind: EventKind,
        body: &str,
    ) -> Result<(), sea_orm::DbErr> {
        let record = notifications::ActiveModel {
            user_id: Set(user_id),
            transaction_id: Set(transaction_id),
            kind: Set(kind.to_string()),
            body: Set(body.to_string()),
            read_at: Set(None),
            created_at: Set(Utc::now().fixed_offset()),
            ..Default::default()
        };
        record.insert(&self.db).await?;
        Ok(())
    }
}

fn recipients_for(tx: &sale_transactions::Model, kind: EventKind) -> Vec<Uuid> {
    match kind {
        // The counterparty needs to know their confirmation is awaited
        EventKind::BuyerConfirmed => vec![tx.seller_id],
        EventKind::SellerConfirmed => vec![tx.buyer_id],
        EventKind::TransactionCompleted
        | EventKind::DisputeRaised
        | EventKind::DisputeResolved => vec![tx.buyer_id, tx.seller_id],
        EventKind::PayoutSettled | EventKind::PayoutDeferred | EventKind::PayoutFailed => {
            vec![tx.seller_id]
        }
    }
}

fn body_for(kind: EventKind, detail: Option<&str>) -> String {
    let base = match kind {
        EventKind::BuyerConfirmed => "The buyer has confirmed this sale.",
        EventKind::SellerConfirmed => "The seller has confirmed this sale.",
        EventKind::TransactionCompleted => "Both parties confirmed - the sale is complete.",
        EventKind::PayoutSettled => "Your payout has been sent.",
        EventKind::PayoutDeferred => "The sale is complete; your payout is pending.",
        EventKind::PayoutFailed => {
            "The sale is complete but your payout could not be sent yet; it will be retried."
        }
        EventKind::DisputeRaised => "A dispute was opened on this transaction.",
        EventKind::DisputeResolved => "The dispute on this transaction has been resolved.",
    };
    match detail {
        Some(detail) => format!("{} ({})", base, detail),
        None => base.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_tx(buyer: Uuid, seller: Uuid) -> sale_transactions::Model {
        let now = Utc::now().fixed_offset();
        sale_transactions::Model {
            id: Uuid::new_v4(),
            buyer_id: buyer,
            seller_id: seller,
            currency: "usd".to_string(),
            gross_amount: 10_000,
            platform_fee: 1_000,
            seller_payout: 9_000,
            payment_ref: None,
            fulfillment: None,
            status: "paid".to_string(),
            buyer_confirmed_at: None,
            seller_confirmed_at: None,
            transfer_id: None,
            payout_completed_at: None,
            dispute_reason: None,
            operational_note: None,
            resolved_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn confirmations_notify_the_counterparty() {
        let buyer = Uuid::new_v4();
        let seller = Uuid::new_v4();
        let tx = sample_tx(buyer, seller);

        assert_eq!(recipients_for(&tx, EventKind::BuyerConfirmed), vec![seller]);
        assert_eq!(recipients_for(&tx, EventKind::SellerConfirmed), vec![buyer]);
        assert_eq!(recipients_for(&tx, EventKind::PayoutSettled), vec![seller]);
        assert_eq!(
            recipients_for(&tx, EventKind::DisputeRaised),
            vec![buyer, seller]
        );
    }

    #[test]
    fn detail_is_appended_to_the_body() {
        let body = body_for(EventKind::PayoutDeferred, Some("insufficient balance"));
        assert!(body.contains("pending"));
        assert!(body.contains("insufficient balance"));
        assert_eq!(
            body_for(EventKind::PayoutSettled, None),
            "Your payout has been sent."
        );
    }
}
