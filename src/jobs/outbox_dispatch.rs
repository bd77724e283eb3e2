use sea_orm::DatabaseConnection;
use tokio::time::{interval, Duration};

use crate::services::notifier::Notifier;
use crate::services::outbox;

/// Periodic sweep of the transaction-event outbox. The request path already
/// kicks a dispatch after each transition; this loop retries events whose
/// channels failed and anything a crashed dispatch left behind.
pub async fn start_outbox_dispatch_job(
    db: DatabaseConnection,
    notifier: Notifier,
    interval_secs: u64,
) {
    tokio::spawn(async move {
        let mut interval = interval(Duration::from_secs(interval_secs));

        loop {
            interval.tick().await;

            match outbox::dispatch_pending(&db, &notifier).await {
                Ok(0) => {}
                Ok(delivered) => {
                    tracing::info!("Outbox sweep delivered {} transaction events", delivered)
                }
                Err(e) => tracing::error!("Outbox sweep failed: {}", e),
            }
        }
    });
}
