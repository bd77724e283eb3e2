//! Migration to create the payout_accounts table linking sellers to processor destinations

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PayoutAccounts::Table)
                    .if_not_exists()
                    .col(pk_auto(PayoutAccounts::Id))
                    .col(uuid(PayoutAccounts::UserId).not_null())
                    .col(string(PayoutAccounts::ProcessorAccountId).not_null())
                    .col(boolean(PayoutAccounts::PayoutsEnabled).default(true))
                    .col(
                        timestamp_with_time_zone(PayoutAccounts::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // One destination per user
        manager
            .create_index(
                Index::create()
                    .name("idx_payout_accounts_user")
                    .table(PayoutAccounts::Table)
                    .col(PayoutAccounts::UserId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PayoutAccounts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PayoutAccounts {
    Table,
    Id,
    UserId,
    ProcessorAccountId,
    PayoutsEnabled,
    CreatedAt,
}
