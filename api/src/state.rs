use std::sync::Arc;

use blockchain::BlockchainServiceRegistry;
use secrets::SecretService;

use crate::{
    config::AppConfig,
    repositories::AccountStore,
    services::{BalanceAggregator, ExchangeFeed, KeyImportPipeline},
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub registry: Arc<BlockchainServiceRegistry>,
    pub store: Arc<dyn AccountStore>,
    pub secrets: Arc<dyn SecretService>,
    pub importer: Arc<KeyImportPipeline>,
    pub aggregator: Arc<BalanceAggregator>,
    pub exchange: Arc<ExchangeFeed>,
}

// Ensure critical dependencies uphold Send/Sync for Axum state usage.
#[allow(dead_code)]
fn _assert_state_types_are_send_sync()
where
    AppConfig: Send + Sync + 'static,
    BlockchainServiceRegistry: Send + Sync + 'static,
    dyn AccountStore: Send + Sync,
    dyn SecretService: Send + Sync,
    KeyImportPipeline: Send + Sync + 'static,
    BalanceAggregator: Send + Sync + 'static,
    ExchangeFeed: Send + Sync + 'static,
{
}

#[allow(dead_code)]
fn _assert_state_bounds() {
    fn assert_bounds<T: Clone + Send + Sync + 'static>() {}
    assert_bounds::<AppState>();
}
