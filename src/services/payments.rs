//! Payment processor gateway
//!
//! All money movement goes through the processor's hosted API: balance
//! reads, transfers to a seller's connected account, and refunds against
//! the original charge. The trait keeps the escrow core testable without
//! network access.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("processor request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("processor rejected the request: {0}")]
    Api(String),
}

#[derive(Debug)]
pub struct TransferRequest<'a> {
    pub amount: i64,
    pub currency: &'a str,
    pub destination: &'a str,
    pub idempotency_key: String,
}

#[derive(Debug)]
pub struct RefundRequest<'a> {
    pub payment_ref: &'a str,
    pub amount: i64,
    pub idempotency_key: String,
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Platform funds available for payouts, in minor units of `currency`
    async fn available_balance(&self, currency: &str) -> Result<i64, PaymentError>;

    /// Move funds to a connected account; returns the processor transfer id
    async fn create_transfer(&self, req: TransferRequest<'_>) -> Result<String, PaymentError>;

    /// Reverse a charge back to the buyer; returns the processor refund id
    async fn create_refund(&self, req: RefundRequest<'_>) -> Result<String, PaymentError>;
}

/// Deterministic idempotency key for the payout of a transaction, so a
/// retried transfer after a transient failure can never pay twice
pub fn payout_idempotency_key(transaction_id: Uuid) -> String {
    format!("payout-{}", transaction_id)
}

pub fn refund_idempotency_key(transaction_id: Uuid) -> String {
    format!("refund-{}", transaction_id)
}

/// Stripe-backed implementation of [`PaymentProcessor`]
#[derive(Clone)]
pub struct StripeGateway {
    client: Client,
    secret_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    available: Vec<BalanceEntry>,
}

#[derive(Debug, Deserialize)]
struct BalanceEntry {
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct CreatedObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

impl StripeGateway {
    pub fn new(secret_key: String, base_url: String) -> Self {
        Self {
            client: Client::new(),
            secret_key,
            base_url,
        }
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, PaymentError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorEnvelope>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        Err(PaymentError::Api(format!("{}: {}", status, message)))
    }
}

#[async_trait]
impl PaymentProcessor for StripeGateway {
    async fn available_balance(&self, currency: &str) -> Result<i64, PaymentError> {
        let resp = self
            .client
            .get(format!("{}/v1/balance", self.base_url))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;
        let balance: BalanceResponse = Self::check(resp).await?.json().await?;

        Ok(balance
            .available
            .iter()
            .filter(|entry| entry.currency.eq_ignore_ascii_case(currency))
            .map(|entry| entry.amount)
            .sum())
    }

    async fn create_transfer(&self, req: TransferRequest<'_>) -> Result<String, PaymentError> {
        let resp = self
            .client
            .post(format!("{}/v1/transfers", self.base_url))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", &req.idempotency_key)
            .form(&[
                ("amount", req.amount.to_string()),
                ("currency", req.currency.to_lowercase()),
                ("destination", req.destination.to_string()),
            ])
            .send()
            .await?;
        let transfer: CreatedObject = Self::check(resp).await?.json().await?;

        tracing::info!("Created transfer {} for {} {}", transfer.id, req.amount, req.currency);
        Ok(transfer.id)
    }

    async fn create_refund(&self, req: RefundRequest<'_>) -> Result<String, PaymentError> {
        let resp = self
            .client
            .post(format!("{}/v1/refunds", self.base_url))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", &req.idempotency_key)
            .form(&[
                ("payment_intent", req.payment_ref.to_string()),
                ("amount", req.amount.to_string()),
            ])
            .send()
            .await?;
        let refund: CreatedObject = Self::check(resp).await?.json().await?;

        tracing::info!("Created refund {} against {}", refund.id, req.payment_ref);
        Ok(refund.id)
    }
}
