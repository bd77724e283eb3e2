//! Sale-transaction status, roles and request/response types
//!
//! Status walks: paid → buyer_confirmed/seller_confirmed → completed
//!                                                       ↘ disputed → refunded
//!                                                                  ↘ completed

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle states of a sale transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Created at checkout, funds not yet captured
    Pending,
    /// Funds captured and held by the platform
    Paid,
    /// Buyer acknowledged, waiting on seller
    BuyerConfirmed,
    /// Seller acknowledged, waiting on buyer
    SellerConfirmed,
    /// Both parties agreed (or operator released); payout attempted
    Completed,
    /// Frozen pending operator adjudication
    Disputed,
    /// Operator refunded the buyer (terminal)
    Refunded,
    /// Cancelled before confirmation (terminal, set outside this core)
    Cancelled,
}

impl TransactionStatus {
    /// States from which a confirmation or dispute may proceed
    pub const ACTIVE: [TransactionStatus; 3] = [
        TransactionStatus::Paid,
        TransactionStatus::BuyerConfirmed,
        TransactionStatus::SellerConfirmed,
    ];

    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Paid => "paid",
            TransactionStatus::BuyerConfirmed => "buyer_confirmed",
            TransactionStatus::SellerConfirmed => "seller_confirmed",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Disputed => "disputed",
            TransactionStatus::Refunded => "refunded",
            TransactionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "paid" => Ok(TransactionStatus::Paid),
            "buyer_confirmed" => Ok(TransactionStatus::BuyerConfirmed),
            "seller_confirmed" => Ok(TransactionStatus::SellerConfirmed),
            "completed" => Ok(TransactionStatus::Completed),
            "disputed" => Ok(TransactionStatus::Disputed),
            "refunded" => Ok(TransactionStatus::Refunded),
            "cancelled" => Ok(TransactionStatus::Cancelled),
            _ => Err(format!("Unknown transaction status: {}", s)),
        }
    }
}

/// Which side of the sale the caller is acting as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmRole {
    Buyer,
    Seller,
}

impl ConfirmRole {
    pub fn other(self) -> ConfirmRole {
        match self {
            ConfirmRole::Buyer => ConfirmRole::Seller,
            ConfirmRole::Seller => ConfirmRole::Buyer,
        }
    }

    /// Status marking that only this side has confirmed so far
    pub fn confirmed_status(self) -> TransactionStatus {
        match self {
            ConfirmRole::Buyer => TransactionStatus::BuyerConfirmed,
            ConfirmRole::Seller => TransactionStatus::SellerConfirmed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConfirmRole::Buyer => "buyer",
            ConfirmRole::Seller => "seller",
        }
    }
}

impl std::fmt::Display for ConfirmRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator decision for a disputed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    RefundBuyer,
    ReleaseToSeller,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub transaction_id: Uuid,
    pub role: ConfirmRole,
}

#[derive(Debug, Deserialize)]
pub struct DisputeRequest {
    pub transaction_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub transaction_id: Uuid,
    pub resolution: Resolution,
    pub admin_notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub status: TransactionStatus,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Row view returned to parties/operators so the UI renders state directly
#[derive(Debug, Serialize)]
pub struct TransactionView {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub currency: String,
    pub gross_amount: i64,
    pub platform_fee: i64,
    pub seller_payout: i64,
    pub status: TransactionStatus,
    pub buyer_confirmed_at: Option<chrono::DateTime<chrono::FixedOffset>>,
    pub seller_confirmed_at: Option<chrono::DateTime<chrono::FixedOffset>>,
    pub transfer_id: Option<String>,
    pub payout_completed_at: Option<chrono::DateTime<chrono::FixedOffset>>,
    pub dispute_reason: Option<String>,
    pub operational_note: Option<String>,
}
