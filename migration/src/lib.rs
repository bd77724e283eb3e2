pub use sea_orm_migration::prelude::*;

mod m20260803_000001_create_sale_transactions;
mod m20260803_000002_create_payout_accounts;
mod m20260803_000003_create_transaction_events;
mod m20260803_000004_create_notifications;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260803_000001_create_sale_transactions::Migration),
            Box::new(m20260803_000002_create_payout_accounts::Migration),
            Box::new(m20260803_000003_create_transaction_events::Migration),
            Box::new(m20260803_000004_create_notifications::Migration),
        ]
    }
}
