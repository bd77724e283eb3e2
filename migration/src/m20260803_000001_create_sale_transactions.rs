//! Migration to create the sale_transactions table, the escrow state machine row

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SaleTransactions::Table)
                    .if_not_exists()
                    .col(pk_uuid(SaleTransactions::Id))
                    .col(uuid(SaleTransactions::BuyerId).not_null())
                    .col(uuid(SaleTransactions::SellerId).not_null())
                    .col(string(SaleTransactions::Currency).not_null())
                    // Amounts in minor units (cents), the unit the processor API takes
                    .col(big_integer(SaleTransactions::GrossAmount).not_null())
                    .col(big_integer(SaleTransactions::PlatformFee).not_null())
                    .col(big_integer(SaleTransactions::SellerPayout).not_null())
                    .col(string_null(SaleTransactions::PaymentRef))
                    .col(json_null(SaleTransactions::Fulfillment))
                    .col(string(SaleTransactions::Status).not_null())
                    .col(timestamp_with_time_zone_null(SaleTransactions::BuyerConfirmedAt))
                    .col(timestamp_with_time_zone_null(SaleTransactions::SellerConfirmedAt))
                    .col(string_null(SaleTransactions::TransferId))
                    .col(timestamp_with_time_zone_null(SaleTransactions::PayoutCompletedAt))
                    .col(string_null(SaleTransactions::DisputeReason))
                    .col(string_null(SaleTransactions::OperationalNote))
                    .col(uuid_null(SaleTransactions::ResolvedBy))
                    .col(
                        timestamp_with_time_zone(SaleTransactions::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(SaleTransactions::UpdatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Index for party-scoped queries
        manager
            .create_index(
                Index::create()
                    .name("idx_sale_transactions_buyer")
                    .table(SaleTransactions::Table)
                    .col(SaleTransactions::BuyerId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sale_transactions_seller")
                    .table(SaleTransactions::Table)
                    .col(SaleTransactions::SellerId)
                    .to_owned(),
            )
            .await?;

        // Index for querying by status (dispute queue, deferred payouts)
        manager
            .create_index(
                Index::create()
                    .name("idx_sale_transactions_status")
                    .table(SaleTransactions::Table)
                    .col(SaleTransactions::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SaleTransactions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SaleTransactions {
    Table,
    Id,
    BuyerId,
    SellerId,
    Currency,
    GrossAmount,
    PlatformFee,
    SellerPayout,
    PaymentRef,
    Fulfillment,
    Status,
    BuyerConfirmedAt,
    SellerConfirmedAt,
    TransferId,
    PayoutCompletedAt,
    DisputeReason,
    OperationalNote,
    ResolvedBy,
    CreatedAt,
    UpdatedAt,
}
