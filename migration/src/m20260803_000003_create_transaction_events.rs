//! Migration to create the transaction_events outbox/audit table

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TransactionEvents::Table)
                    .if_not_exists()
                    .col(pk_auto(TransactionEvents::Id))
                    .col(uuid(TransactionEvents::TransactionId).not_null())
                    .col(string(TransactionEvents::Kind).not_null())
                    .col(string_null(TransactionEvents::Detail))
                    .col(integer(TransactionEvents::Attempts).default(0))
                    .col(timestamp_with_time_zone_null(TransactionEvents::DispatchedAt))
                    .col(
                        timestamp_with_time_zone(TransactionEvents::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_transaction_events_transaction")
                    .table(TransactionEvents::Table)
                    .col(TransactionEvents::TransactionId)
                    .to_owned(),
            )
            .await?;

        // Index for the dispatcher scanning undelivered events
        manager
            .create_index(
                Index::create()
                    .name("idx_transaction_events_dispatched")
                    .table(TransactionEvents::Table)
                    .col(TransactionEvents::DispatchedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TransactionEvents::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum TransactionEvents {
    Table,
    Id,
    TransactionId,
    Kind,
    Detail,
    Attempts,
    DispatchedAt,
    CreatedAt,
}
