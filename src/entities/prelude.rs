pub use super::notifications::Entity as Notifications;
pub use super::payout_accounts::Entity as PayoutAccounts;
pub use super::sale_transactions::Entity as SaleTransactions;
pub use super::transaction_events::Entity as TransactionEvents;
