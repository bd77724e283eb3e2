// src/lib.rs

use sea_orm::DatabaseConnection;
use std::sync::Arc;

use services::auth::IdentityProvider;
use services::notifier::Notifier;
use services::payments::PaymentProcessor;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub payments: Arc<dyn PaymentProcessor>,
    pub auth: Arc<dyn IdentityProvider>,
    pub notifier: Notifier,
}

pub mod entities {
    pub mod prelude;
    pub mod notifications;
    pub mod payout_accounts;
    pub mod sale_transactions;
    pub mod transaction_events;
}

pub mod services {
    pub mod auth;
    pub mod dispute;
    pub mod escrow;
    pub mod notifier;
    pub mod outbox;
    pub mod payments;
}

pub mod error;
pub mod handlers;
pub mod jobs;
pub mod models;
