use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use blockchain::ChainError;
use domain::{BlockchainServiceKey, NetworkConfig};
use serde::Serialize;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/networks", get(list_networks).put(apply_networks))
        .route("/networks/:blockchain", put(set_network))
}

#[derive(Serialize)]
struct NetworkEntry {
    blockchain: BlockchainServiceKey,
    #[serde(flatten)]
    network: NetworkConfig,
}

#[derive(Serialize)]
struct ApplyNetworksResponse {
    networks: Vec<NetworkEntry>,
    errors: Vec<String>,
}

async fn list_networks(State(state): State<AppState>) -> Json<Vec<NetworkEntry>> {
    Json(current_networks(&state).await)
}

/// Chains missing from the body keep their endpoint.
async fn apply_networks(
    State(state): State<AppState>,
    Json(networks): Json<HashMap<BlockchainServiceKey, NetworkConfig>>,
) -> Result<Json<ApplyNetworksResponse>, StatusCode> {
    if let Some(unknown) = networks.keys().find(|key| !state.registry.contains(key)) {
        tracing::warn!(blockchain = %unknown, "network update for unknown chain");
        return Err(StatusCode::NOT_FOUND);
    }
    let errors = state.registry.apply_networks(&networks).await;
    Ok(Json(ApplyNetworksResponse {
        networks: current_networks(&state).await,
        errors: errors.iter().map(|err| err.to_string()).collect(),
    }))
}

async fn set_network(
    State(state): State<AppState>,
    Path(blockchain): Path<String>,
    Json(network): Json<NetworkConfig>,
) -> Result<Json<NetworkEntry>, StatusCode> {
    let blockchain = BlockchainServiceKey::new(blockchain);
    state
        .registry
        .set_network(&blockchain, network.clone())
        .await
        .map_err(|err| match err {
            ChainError::UnknownBlockchain(_) => StatusCode::NOT_FOUND,
            ChainError::InvalidNetwork { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        })?;
    Ok(Json(NetworkEntry {
        blockchain,
        network,
    }))
}

async fn current_networks(state: &AppState) -> Vec<NetworkEntry> {
    state
        .registry
        .networks()
        .await
        .into_iter()
        .map(|(blockchain, network)| NetworkEntry {
            blockchain,
            network,
        })
        .collect()
}
