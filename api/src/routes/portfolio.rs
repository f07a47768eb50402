use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use domain::{BalanceRequest, PortfolioResult};

use crate::{routes::map_store_err, state::AppState};

pub fn router() -> Router<AppState> {
    Router::new().route("/portfolio", get(stored_portfolio).post(requested_portfolio))
}

async fn stored_portfolio(
    State(state): State<AppState>,
) -> Result<Json<PortfolioResult>, StatusCode> {
    let accounts = state.store.list_accounts().await.map_err(map_store_err)?;
    let requests: Vec<BalanceRequest> = accounts
        .into_iter()
        .map(|account| BalanceRequest {
            address: account.address,
            blockchain: account.blockchain,
        })
        .collect();
    let exchange = state.exchange.current().await;
    Ok(Json(state.aggregator.get_portfolio(&requests, exchange).await))
}

async fn requested_portfolio(
    State(state): State<AppState>,
    Json(requests): Json<Vec<BalanceRequest>>,
) -> Json<PortfolioResult> {
    let exchange = state.exchange.current().await;
    Json(state.aggregator.get_portfolio(&requests, exchange).await)
}
