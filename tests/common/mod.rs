use async_trait::async_trait;
use axum::Router;
use chrono::Utc;
use migration::MigratorTrait;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, DbErr, Set};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use vendibook_backend::entities::{payout_accounts, sale_transactions};
use vendibook_backend::handlers::api_router;
use vendibook_backend::services::auth::{AuthError, Identity, IdentityProvider};
use vendibook_backend::services::notifier::Notifier;
use vendibook_backend::services::payments::{
    PaymentError, PaymentProcessor, RefundRequest, TransferRequest,
};
use vendibook_backend::AppState;

pub const BUYER_TOKEN: &str = "buyer-token";
pub const SELLER_TOKEN: &str = "seller-token";
pub const ADMIN_TOKEN: &str = "admin-token";
pub const STRANGER_TOKEN: &str = "stranger-token";

/// In-memory database with the full schema applied
pub async fn setup_test_db() -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new("sqlite::memory:".to_string());
    // A single connection keeps the in-memory database shared
    options.max_connections(1);

    let db = Database::connect(options).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(db)
}

/// Scriptable payment processor: balance and failure mode are adjustable,
/// every transfer/refund call is recorded.
pub struct MockPayments {
    pub balance: AtomicI64,
    pub fail_transfers: AtomicBool,
    pub fail_refunds: AtomicBool,
    pub transfer_keys: Mutex<Vec<String>>,
    pub refund_keys: Mutex<Vec<String>>,
    counter: AtomicU64,
}

impl Default for MockPayments {
    fn default() -> Self {
        Self {
            balance: AtomicI64::new(1_000_000),
            fail_transfers: AtomicBool::new(false),
            fail_refunds: AtomicBool::new(false),
            transfer_keys: Mutex::new(Vec::new()),
            refund_keys: Mutex::new(Vec::new()),
            counter: AtomicU64::new(0),
        }
    }
}

impl MockPayments {
    pub fn transfer_count(&self) -> usize {
        self.transfer_keys.lock().unwrap().len()
    }

    pub fn refund_count(&self) -> usize {
        self.refund_keys.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentProcessor for MockPayments {
    async fn available_balance(&self, _currency: &str) -> Result<i64, PaymentError> {
        Ok(self.balance.load(Ordering::SeqCst))
    }

    async fn create_transfer(&self, req: TransferRequest<'_>) -> Result<String, PaymentError> {
        if self.fail_transfers.load(Ordering::SeqCst) {
            return Err(PaymentError::Api("transfer rejected by processor".to_string()));
        }
        self.transfer_keys.lock().unwrap().push(req.idempotency_key);
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("tr_test_{}", n))
    }

    async fn create_refund(&self, req: RefundRequest<'_>) -> Result<String, PaymentError> {
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(PaymentError::Api("refund rejected by processor".to_string()));
        }
        self.refund_keys.lock().unwrap().push(req.idempotency_key);
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("re_test_{}", n))
    }
}

/// Token → identity lookup without an auth backend
pub struct StaticIdentities {
    map: HashMap<String, Identity>,
}

#[async_trait]
impl IdentityProvider for StaticIdentities {
    async fn resolve(&self, bearer_token: &str) -> Result<Identity, AuthError> {
        self.map
            .get(bearer_token)
            .copied()
            .ok_or(AuthError::InvalidToken)
    }
}

pub struct TestApp {
    pub db: DatabaseConnection,
    pub router: Router,
    pub payments: Arc<MockPayments>,
    pub buyer: Uuid,
    pub seller: Uuid,
    pub admin: Uuid,
}

pub async fn build_test_app() -> TestApp {
    let db = setup_test_db().await.expect("Failed to set up test DB");

    let buyer = Uuid::new_v4();
    let seller = Uuid::new_v4();
    let admin = Uuid::new_v4();

    let mut map = HashMap::new();
    map.insert(
        BUYER_TOKEN.to_string(),
        Identity { user_id: buyer, is_operator: false },
    );
    map.insert(
        SELLER_TOKEN.to_string(),
        Identity { user_id: seller, is_operator: false },
    );
    map.insert(
        ADMIN_TOKEN.to_string(),
        Identity { user_id: admin, is_operator: true },
    );
    map.insert(
        STRANGER_TOKEN.to_string(),
        Identity { user_id: Uuid::new_v4(), is_operator: false },
    );

    let payments = Arc::new(MockPayments::default());
    let notifier = Notifier::new(db.clone(), None, None);

    let state = AppState {
        db: db.clone(),
        payments: payments.clone(),
        auth: Arc::new(StaticIdentities { map }),
        notifier,
    };

    TestApp {
        db,
        router: api_router().with_state(state),
        payments,
        buyer,
        seller,
        admin,
    }
}

/// Insert a sale in the given status: $100.00 gross, $10.00 fee
pub async fn insert_transaction(
    db: &DatabaseConnection,
    buyer: Uuid,
    seller: Uuid,
    status: &str,
) -> Uuid {
    let id = Uuid::new_v4();
    let now = Utc::now().fixed_offset();
    let tx = sale_transactions::ActiveModel {
        id: Set(id),
        buyer_id: Set(buyer),
        seller_id: Set(seller),
        currency: Set("usd".to_string()),
        gross_amount: Set(10_000),
        platform_fee: Set(1_000),
        seller_payout: Set(9_000),
        payment_ref: Set(Some("pi_test_1".to_string())),
        fulfillment: Set(None),
        status: Set(status.to_string()),
        buyer_confirmed_at: Set(None),
        seller_confirmed_at: Set(None),
        transfer_id: Set(None),
        payout_completed_at: Set(None),
        dispute_reason: Set(None),
        operational_note: Set(None),
        resolved_by: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    };
    tx.insert(db).await.expect("Failed to insert transaction");
    id
}

pub async fn link_payout_account(db: &DatabaseConnection, seller: Uuid) {
    let account = payout_accounts::ActiveModel {
        user_id: Set(seller),
        processor_account_id: Set("acct_test_1".to_string()),
        payouts_enabled: Set(true),
        created_at: Set(Utc::now().fixed_offset()),
        ..Default::default()
    };
    account.insert(db).await.expect("Failed to insert payout account");
}
