pub mod dispute;
pub mod transaction;

use axum::http::{header, HeaderMap};
use axum::routing::{get, post};
use axum::Router;

use crate::error::EscrowError;
use crate::services::auth::{AuthError, Identity};
use crate::services::outbox;
use crate::AppState;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/api/transactions/{id}", get(transaction::get_transaction))
        .route("/api/transactions/confirm", post(transaction::confirm_sale))
        .route("/api/transactions/dispute", post(dispute::raise_dispute))
        .route("/api/admin/disputes/resolve", post(dispute::resolve_dispute))
}

/// Resolve the caller's identity from the Authorization bearer token
pub(crate) async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Identity, EscrowError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(EscrowError::Unauthenticated)?;

    state.auth.resolve(token).await.map_err(|e| match e {
        AuthError::InvalidToken => EscrowError::Unauthenticated,
        AuthError::Http(e) => {
            tracing::error!("Identity resolution failed: {}", e);
            EscrowError::Unauthenticated
        }
    })
}

/// Kick the outbox after a committed transition. Fan-out must never block
/// or fail the response, so it runs detached; the periodic job picks up
/// anything this pass misses.
pub(crate) fn spawn_dispatch(state: &AppState) {
    let db = state.db.clone();
    let notifier = state.notifier.clone();
    tokio::spawn(async move {
        if let Err(e) = outbox::dispatch_pending(&db, &notifier).await {
            tracing::warn!("Outbox dispatch failed: {}", e);
        }
    });
}
