//! Error taxonomy for the escrow core
//!
//! Validation and authorization failures fail closed before any state
//! mutation. Payout failures after a committed confirmation are recorded on
//! the row instead of surfacing here (see services::escrow).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use sea_orm::DbErr;
use thiserror::Error;

use crate::models::transaction::ErrorResponse;

#[derive(Debug, Error)]
pub enum EscrowError {
    #[error("Transaction not found")]
    NotFound,

    #[error("Missing or invalid authorization token")]
    Unauthenticated,

    #[error("Caller is not authorized to act on this transaction")]
    Unauthorized,

    #[error("{0}")]
    InvalidState(String),

    #[error("Confirmation already recorded for this role")]
    AlreadyConfirmed,

    #[error("{0}")]
    Validation(String),

    /// Processor failure that must be surfaced (admin resolution path)
    #[error("Payment processor error: {0}")]
    Payment(String),

    #[error("Database error: {0}")]
    Db(#[from] DbErr),
}

impl EscrowError {
    fn status_code(&self) -> StatusCode {
        match self {
            EscrowError::NotFound => StatusCode::NOT_FOUND,
            EscrowError::Unauthenticated => StatusCode::UNAUTHORIZED,
            EscrowError::Unauthorized => StatusCode::FORBIDDEN,
            EscrowError::InvalidState(_) | EscrowError::AlreadyConfirmed => StatusCode::CONFLICT,
            EscrowError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EscrowError::Payment(_) => StatusCode::BAD_GATEWAY,
            EscrowError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for EscrowError {
    fn into_response(self) -> Response {
        if let EscrowError::Db(ref e) = self {
            tracing::error!("Database error: {}", e);
        }
        let status = self.status_code();
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
