use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use domain::{BackupResponse, PassphrasePayload};
use zeroize::Zeroizing;

use crate::{
    routes::{map_secret_err, map_store_err},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/session/verify", post(verify))
        .route("/backup", post(backup))
}

/// Unlocks the wallet when the passphrase opens every stored secret.
async fn verify(
    State(state): State<AppState>,
    Json(payload): Json<PassphrasePayload>,
) -> Result<StatusCode, StatusCode> {
    let passphrase = Zeroizing::new(payload.passphrase);
    let wallets = state.store.list_wallets().await.map_err(map_store_err)?;
    let accounts = state.store.list_accounts().await.map_err(map_store_err)?;
    secrets::verify_passphrase(state.secrets.as_ref(), &passphrase, &wallets, &accounts)
        .await
        .map_err(map_secret_err)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn backup(
    State(state): State<AppState>,
    Json(payload): Json<PassphrasePayload>,
) -> Result<Json<BackupResponse>, StatusCode> {
    let passphrase = Zeroizing::new(payload.passphrase);
    let wallets = state.store.list_wallets().await.map_err(map_store_err)?;
    let accounts = state.store.list_accounts().await.map_err(map_store_err)?;
    let document = secrets::build_backup(state.secrets.as_ref(), &passphrase, &wallets, &accounts)
        .await
        .map_err(map_secret_err)?;
    let content = secrets::seal_backup(state.secrets.as_ref(), &document, &passphrase)
        .await
        .map_err(map_secret_err)?;

    let account_count: usize = document.wallets.iter().map(|w| w.accounts.len()).sum();
    tracing::info!(wallets = document.wallets.len(), accounts = account_count, "backup created");
    Ok(Json(BackupResponse {
        content,
        wallets: document.wallets.len(),
        accounts: account_count,
    }))
}
