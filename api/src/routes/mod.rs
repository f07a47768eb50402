pub mod accounts;
pub mod health;
pub mod import;
pub mod networks;
pub mod portfolio;
pub mod session;

use axum::http::StatusCode;
use secrets::SecretError;
use tracing::warn;

use crate::repositories::StoreError;

pub(crate) fn map_secret_err(err: SecretError) -> StatusCode {
    match err {
        SecretError::Decryption => StatusCode::UNAUTHORIZED,
        SecretError::EmptyPassphrase => StatusCode::BAD_REQUEST,
        SecretError::MissingSecret(_) => StatusCode::NOT_FOUND,
        SecretError::Transport(message) => {
            warn!(%message, "secret service call failed");
            StatusCode::BAD_GATEWAY
        }
        SecretError::Internal(message) => {
            warn!(%message, "secret handling failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub(crate) fn map_store_err(err: StoreError) -> StatusCode {
    warn!(error = %err, "account store call failed");
    match err {
        StoreError::WalletNotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Conflict { .. } => StatusCode::CONFLICT,
        StoreError::Backend(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
