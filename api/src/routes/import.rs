use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use domain::{AccountResponse, ImportKeyPayload, ImportResponse, WalletResponse};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{
    routes::map_secret_err,
    services::{ImportError, ImportKeyRequest},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/import/key", post(import_key))
        .route("/import/validate", post(validate_key))
}

async fn import_key(
    State(state): State<AppState>,
    Json(payload): Json<ImportKeyPayload>,
) -> Result<(StatusCode, Json<ImportResponse>), StatusCode> {
    let ImportKeyPayload {
        key,
        passphrase,
        wallet_id,
        wallet_name,
    } = payload;
    let outcome = state
        .importer
        .import_from_key(ImportKeyRequest {
            key: Zeroizing::new(key),
            passphrase: Zeroizing::new(passphrase),
            wallet_id,
            wallet_name,
        })
        .await
        .map_err(map_import_err)?;

    Ok((
        StatusCode::CREATED,
        Json(ImportResponse {
            wallet: WalletResponse::from(&outcome.wallet),
            imported_accounts: outcome
                .imported_accounts
                .iter()
                .map(AccountResponse::from)
                .collect(),
            duplicate_count: outcome.duplicate_count(),
            errors: outcome.errors.iter().map(|err| err.to_string()).collect(),
        }),
    ))
}

#[derive(Deserialize)]
struct ValidateKeyPayload {
    key: String,
}

#[derive(Serialize)]
struct ValidateKeyResponse {
    valid: bool,
}

async fn validate_key(
    State(state): State<AppState>,
    Json(payload): Json<ValidateKeyPayload>,
) -> Json<ValidateKeyResponse> {
    let key = Zeroizing::new(payload.key);
    let key = key.trim();
    let valid = !key.is_empty() && state.registry.validate_key_all(key).await;
    Json(ValidateKeyResponse { valid })
}

fn map_import_err(err: ImportError) -> StatusCode {
    match err {
        ImportError::EmptyKey => StatusCode::BAD_REQUEST,
        ImportError::NoImportableAccounts { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ImportError::WalletNotFound(_) => StatusCode::NOT_FOUND,
        ImportError::Persistence(err) => {
            tracing::warn!(error = %err, "import could not be persisted");
            StatusCode::SERVICE_UNAVAILABLE
        }
        ImportError::Secret(err) => map_secret_err(err),
    }
}
