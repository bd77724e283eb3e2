//! `SeaORM` Entity for the transaction_events table
//!
//! Append-only: one row per state transition, doubling as the audit trail
//! and as the notification outbox (dispatched_at is null until fan-out ran).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "transaction_events")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub transaction_id: Uuid,
    pub kind: String,
    pub detail: Option<String>,
    pub attempts: i32,
    pub dispatched_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
