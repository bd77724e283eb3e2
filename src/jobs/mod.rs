pub mod outbox_dispatch;
pub mod payout_retry;
