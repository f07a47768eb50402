use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use domain::{AccountResponse, ExportKeyPayload, ExportKeyResponse, WalletResponse};
use zeroize::Zeroizing;

use crate::{
    routes::{map_secret_err, map_store_err},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/wallets", get(list_wallets))
        .route("/accounts", get(list_accounts))
        .route("/accounts/export-key", post(export_key))
}

async fn list_wallets(
    State(state): State<AppState>,
) -> Result<Json<Vec<WalletResponse>>, StatusCode> {
    let wallets = state.store.list_wallets().await.map_err(map_store_err)?;
    Ok(Json(wallets.iter().map(WalletResponse::from).collect()))
}

async fn list_accounts(
    State(state): State<AppState>,
) -> Result<Json<Vec<AccountResponse>>, StatusCode> {
    let accounts = state.store.list_accounts().await.map_err(map_store_err)?;
    Ok(Json(accounts.iter().map(AccountResponse::from).collect()))
}

async fn export_key(
    State(state): State<AppState>,
    Json(payload): Json<ExportKeyPayload>,
) -> Result<Json<ExportKeyResponse>, StatusCode> {
    let passphrase = Zeroizing::new(payload.passphrase);
    let account = state
        .store
        .find_account(payload.address.trim(), &payload.blockchain)
        .await
        .map_err(map_store_err)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let key = secrets::export_key(state.secrets.as_ref(), &account, &passphrase)
        .await
        .map_err(map_secret_err)?;
    tracing::info!(address = %account.address, blockchain = %account.blockchain, "key exported");
    Ok(Json(ExportKeyResponse {
        key: key.to_string(),
    }))
}
