//! Domain event kinds recorded in the transaction_events outbox

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    BuyerConfirmed,
    SellerConfirmed,
    TransactionCompleted,
    PayoutSettled,
    PayoutDeferred,
    PayoutFailed,
    DisputeRaised,
    DisputeResolved,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::BuyerConfirmed => "buyer_confirmed",
            EventKind::SellerConfirmed => "seller_confirmed",
            EventKind::TransactionCompleted => "transaction_completed",
            EventKind::PayoutSettled => "payout_settled",
            EventKind::PayoutDeferred => "payout_deferred",
            EventKind::PayoutFailed => "payout_failed",
            EventKind::DisputeRaised => "dispute_raised",
            EventKind::DisputeResolved => "dispute_resolved",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buyer_confirmed" => Ok(EventKind::BuyerConfirmed),
            "seller_confirmed" => Ok(EventKind::SellerConfirmed),
            "transaction_completed" => Ok(EventKind::TransactionCompleted),
            "payout_settled" => Ok(EventKind::PayoutSettled),
            "payout_deferred" => Ok(EventKind::PayoutDeferred),
            "payout_failed" => Ok(EventKind::PayoutFailed),
            "dispute_raised" => Ok(EventKind::DisputeRaised),
            "dispute_resolved" => Ok(EventKind::DisputeResolved),
            _ => Err(format!("Unknown event kind: {}", s)),
        }
    }
}
