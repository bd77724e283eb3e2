//! `SeaORM` Entity for the sale_transactions table
//!
//! One row per sale; the escrow state machine mutates only this row.
//! Monetary columns are minor units (cents) and immutable after checkout.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sale_transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub currency: String,
    pub gross_amount: i64,
    pub platform_fee: i64,
    pub seller_payout: i64,
    pub payment_ref: Option<String>,
    pub fulfillment: Option<Json>,
    pub status: String,
    pub buyer_confirmed_at: Option<DateTimeWithTimeZone>,
    pub seller_confirmed_at: Option<DateTimeWithTimeZone>,
    pub transfer_id: Option<String>,
    pub payout_completed_at: Option<DateTimeWithTimeZone>,
    pub dispute_reason: Option<String>,
    pub operational_note: Option<String>,
    pub resolved_by: Option<Uuid>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
