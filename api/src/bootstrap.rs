use std::{str::FromStr, sync::Arc};

use anyhow::Result;
use blockchain::BlockchainServiceRegistry;
use domain::{BlockchainServiceKey, NetworkConfig};
use ethers::types::Address;
use secrets::{InMemorySecretService, RemoteSecretService, SecretService};
use sqlx::PgPool;
use tracing::{info, warn};

use crate::{
    config::AppConfig,
    repositories::{AccountStore, InMemoryAccountStore, PostgresAccountStore},
    services::{
        BalanceAggregator, CoingeckoExchangeSource, EvmBlockchainService, EvmChainConfig,
        ExchangeFeed, FallbackExchangeSource, KeyImportPipeline, StaticExchangeSource,
        TokenConfig, TrackedAsset, NATIVE_TOKEN_HASH,
    },
    state::AppState,
};

pub async fn build_state(config: &AppConfig) -> Result<AppState> {
    let secrets: Arc<dyn SecretService> = match &config.secret_service_url {
        Some(url) => Arc::new(RemoteSecretService::new(url.clone())),
        None if config.database_url.is_some() => {
            anyhow::bail!("SECRET_SERVICE_URL is required with a Postgres account store")
        }
        None => {
            warn!("SECRET_SERVICE_URL not set, sealing secrets in-process");
            Arc::new(InMemorySecretService)
        }
    };

    let store: Arc<dyn AccountStore> = match &config.database_url {
        Some(url) => {
            let pool = PgPool::connect(url).await?;
            sqlx::migrate!("../migrations").run(&pool).await?;
            Arc::new(PostgresAccountStore::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set, accounts are kept in memory only");
            Arc::new(InMemoryAccountStore::new())
        }
    };

    let registry = Arc::new(build_registry(config)?);

    let coingecko = Arc::new(CoingeckoExchangeSource::new(
        config.coingecko_api_base.clone(),
        config.token_price_ids.clone(),
    ));
    let static_prices = Arc::new(StaticExchangeSource::new(config.token_prices.clone()));
    let exchange = Arc::new(ExchangeFeed::new(
        Arc::new(FallbackExchangeSource::new(coingecko, static_prices)),
        tracked_assets(config),
    ));
    exchange.clone().spawn(config.exchange_refresh_interval);

    let importer = Arc::new(KeyImportPipeline::new(
        registry.clone(),
        store.clone(),
        secrets.clone(),
        config.import_commit_attempts,
    ));
    let aggregator = Arc::new(BalanceAggregator::new(
        registry.clone(),
        config.balance_max_concurrency,
        config.balance_fetch_timeout,
    ));

    Ok(AppState {
        config: config.clone(),
        registry,
        store,
        secrets,
        importer,
        aggregator,
        exchange,
    })
}

pub fn build_registry(config: &AppConfig) -> Result<BlockchainServiceRegistry> {
    let mut builder = BlockchainServiceRegistry::builder();
    for chain in &config.evm_chains {
        let tokens: Vec<TokenConfig> = config
            .tracked_tokens
            .iter()
            .filter(|token| token.blockchain == chain.key && token.hash != NATIVE_TOKEN_HASH)
            .filter_map(|token| match Address::from_str(&token.hash) {
                Ok(address) => Some(TokenConfig {
                    symbol: token.symbol.clone(),
                    address,
                    decimals: token.decimals,
                }),
                Err(_) => {
                    warn!(
                        blockchain = %chain.key,
                        hash = %token.hash,
                        "ignoring token with invalid address"
                    );
                    None
                }
            })
            .collect();
        let network = NetworkConfig {
            network_type: config.network_type,
            url: config.rpc_url_for(&chain.key),
        };
        let service = EvmBlockchainService::new(
            EvmChainConfig {
                key: BlockchainServiceKey::new(&chain.key),
                chain_id: chain.chain_id,
                native_symbol: chain.native_symbol.clone(),
            },
            network,
            tokens,
        )?;
        info!(
            blockchain = %chain.key,
            chain_id = service.chain_id(),
            "chain service registered"
        );
        builder = builder.register(Arc::new(service));
    }
    Ok(builder.build()?)
}

/// Native coins of every configured chain plus the tracked tokens.
pub fn tracked_assets(config: &AppConfig) -> Vec<TrackedAsset> {
    let natives = config.evm_chains.iter().map(|chain| TrackedAsset {
        blockchain: BlockchainServiceKey::new(&chain.key),
        hash: NATIVE_TOKEN_HASH.to_string(),
        symbol: chain.native_symbol.clone(),
    });
    let tokens = config.tracked_tokens.iter().map(|token| TrackedAsset {
        blockchain: BlockchainServiceKey::new(&token.blockchain),
        hash: token.hash.to_lowercase(),
        symbol: token.symbol.clone(),
    });
    let mut assets: Vec<TrackedAsset> = Vec::new();
    for asset in natives.chain(tokens) {
        if !assets
            .iter()
            .any(|a| a.blockchain == asset.blockchain && a.hash == asset.hash)
        {
            assets.push(asset);
        }
    }
    assets
}
