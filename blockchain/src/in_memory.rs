use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use async_trait::async_trait;
use domain::{
    BlockchainServiceKey, DerivedAccount, NetworkConfig, NetworkType, RawTokenBalance, Token,
};
use tokio::sync::RwLock;

use crate::{BlockchainService, ChainError, ChainResult};

/// Chain service backed by in-process tables. Keys, balances and failures are
/// configured up front; useful for local demos and for exercising callers.
pub struct InMemoryBlockchainService {
    key: BlockchainServiceKey,
    state: RwLock<ChainState>,
}

struct ChainState {
    network: NetworkConfig,
    accounts_by_key: HashMap<String, String>,
    underivable_keys: HashSet<String>,
    balances: HashMap<String, Vec<RawTokenBalance>>,
    failing_addresses: HashSet<String>,
    latency: Option<Duration>,
}

impl InMemoryBlockchainService {
    pub fn new(key: impl Into<BlockchainServiceKey>) -> Self {
        Self {
            key: key.into(),
            state: RwLock::new(ChainState {
                network: NetworkConfig {
                    network_type: NetworkType::Mainnet,
                    url: "memory://mainnet".to_string(),
                },
                accounts_by_key: HashMap::new(),
                underivable_keys: HashSet::new(),
                balances: HashMap::new(),
                failing_addresses: HashSet::new(),
                latency: None,
            }),
        }
    }

    pub fn with_key(mut self, secret: impl Into<String>, address: impl Into<String>) -> Self {
        self.state
            .get_mut()
            .accounts_by_key
            .insert(secret.into(), address.into());
        self
    }

    /// Key passes validation but derivation fails.
    pub fn with_underivable_key(mut self, secret: impl Into<String>) -> Self {
        self.state.get_mut().underivable_keys.insert(secret.into());
        self
    }

    pub fn with_token_balance(
        mut self,
        address: impl Into<String>,
        hash: &str,
        symbol: &str,
        decimals: u8,
        amount: &str,
    ) -> Self {
        self.state
            .get_mut()
            .balances
            .entry(address.into())
            .or_default()
            .push(RawTokenBalance {
                token: Token {
                    hash: hash.to_string(),
                    symbol: symbol.to_string(),
                    decimals,
                },
                amount: amount.to_string(),
            });
        self
    }

    pub fn with_failing_address(mut self, address: impl Into<String>) -> Self {
        self.state.get_mut().failing_addresses.insert(address.into());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.state.get_mut().latency = Some(latency);
        self
    }

    async fn simulate_latency(&self) {
        let latency = self.state.read().await.latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl BlockchainService for InMemoryBlockchainService {
    fn key(&self) -> &BlockchainServiceKey {
        &self.key
    }

    async fn validate_key(&self, secret: &str) -> bool {
        let state = self.state.read().await;
        state.accounts_by_key.contains_key(secret) || state.underivable_keys.contains(secret)
    }

    async fn generate_account_from_key(&self, secret: &str) -> ChainResult<DerivedAccount> {
        self.simulate_latency().await;
        let state = self.state.read().await;
        state
            .accounts_by_key
            .get(secret)
            .map(|address| DerivedAccount {
                address: address.clone(),
                blockchain: self.key.clone(),
            })
            .ok_or_else(|| ChainError::invalid_key(&self.key, "key cannot derive an address"))
    }

    async fn get_balance(&self, address: &str) -> ChainResult<Vec<RawTokenBalance>> {
        self.simulate_latency().await;
        let state = self.state.read().await;
        if state.failing_addresses.contains(address) {
            return Err(ChainError::network(
                &self.key,
                format!("rpc unavailable at {}", state.network.url),
            ));
        }
        Ok(state.balances.get(address).cloned().unwrap_or_default())
    }

    async fn set_network(&self, network: NetworkConfig) -> ChainResult<()> {
        if network.url.trim().is_empty() {
            return Err(ChainError::InvalidNetwork {
                blockchain: self.key.clone(),
                url: network.url,
            });
        }
        self.state.write().await.network = network;
        Ok(())
    }

    async fn network(&self) -> NetworkConfig {
        self.state.read().await.network.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn derives_configured_address() {
        let chain = InMemoryBlockchainService::new("neo3").with_key("secret", "NAddr");
        assert!(chain.validate_key("secret").await);
        let derived = chain
            .generate_account_from_key("secret")
            .await
            .expect("should derive");
        assert_eq!(derived.address, "NAddr");
        assert_eq!(derived.blockchain.as_str(), "neo3");
    }

    #[tokio::test]
    async fn underivable_key_validates_but_fails_derivation() {
        let chain = InMemoryBlockchainService::new("neo3").with_underivable_key("odd");
        assert!(chain.validate_key("odd").await);
        let err = chain
            .generate_account_from_key("odd")
            .await
            .expect_err("should fail");
        assert!(matches!(err, ChainError::InvalidKey { .. }));
    }

    #[tokio::test]
    async fn failing_address_reports_network_error() {
        let chain = InMemoryBlockchainService::new("neo3")
            .with_token_balance("ok", "h1", "GAS", 8, "100000000")
            .with_failing_address("down");
        assert_eq!(chain.get_balance("ok").await.expect("ok").len(), 1);
        assert!(chain.get_balance("unknown").await.expect("empty").is_empty());
        let err = chain.get_balance("down").await.expect_err("down");
        assert!(matches!(err, ChainError::Network { .. }));
    }

    #[tokio::test]
    async fn empty_network_url_is_rejected() {
        let chain = InMemoryBlockchainService::new("neo3");
        let err = chain
            .set_network(NetworkConfig {
                network_type: NetworkType::Custom,
                url: " ".to_string(),
            })
            .await
            .expect_err("empty url");
        assert!(matches!(err, ChainError::InvalidNetwork { .. }));
    }
}
