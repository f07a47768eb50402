use std::{str::FromStr, sync::Arc, time::Duration};

use async_trait::async_trait;
use blockchain::{BlockchainService, ChainError, ChainResult};
use domain::{BlockchainServiceKey, DerivedAccount, NetworkConfig, RawTokenBalance, Token};
use ethers::{
    providers::{Http, Middleware, Provider, ProviderError},
    signers::{LocalWallet, Signer},
    types::{transaction::eip2718::TypedTransaction, Address, Bytes, TransactionRequest, U256},
    utils::keccak256,
};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Hash under which the chain's native coin is reported and priced.
pub const NATIVE_TOKEN_HASH: &str = "0x0000000000000000000000000000000000000000";

const NATIVE_DECIMALS: u8 = 18;
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Clone, Debug)]
pub struct EvmChainConfig {
    pub key: BlockchainServiceKey,
    pub chain_id: u64,
    pub native_symbol: String,
}

#[derive(Clone, Debug)]
pub struct TokenConfig {
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
}

/// Account derivation and balance reads for one EVM-compatible chain.
pub struct EvmBlockchainService {
    key: BlockchainServiceKey,
    chain_id: u64,
    native_symbol: String,
    tokens: Vec<TokenConfig>,
    endpoint: RwLock<Endpoint>,
}

struct Endpoint {
    network: NetworkConfig,
    provider: Arc<Provider<Http>>,
}

impl EvmBlockchainService {
    pub fn new(
        config: EvmChainConfig,
        network: NetworkConfig,
        tokens: Vec<TokenConfig>,
    ) -> ChainResult<Self> {
        let provider = build_provider(&config.key, &network.url)?;
        Ok(Self {
            key: config.key,
            chain_id: config.chain_id,
            native_symbol: config.native_symbol,
            tokens,
            endpoint: RwLock::new(Endpoint {
                network,
                provider: Arc::new(provider),
            }),
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn parse_key(secret: &str) -> Option<LocalWallet> {
        let hex = secret
            .strip_prefix("0x")
            .or_else(|| secret.strip_prefix("0X"))
            .unwrap_or(secret);
        if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        LocalWallet::from_str(hex).ok()
    }

    async fn provider(&self) -> Arc<Provider<Http>> {
        self.endpoint.read().await.provider.clone()
    }

    async fn token_balance(
        provider: &Provider<Http>,
        token: &TokenConfig,
        owner: Address,
    ) -> Result<U256, ProviderError> {
        // Raw eth_call keeps decoding independent of token ABI quirks.
        let selector = &keccak256("balanceOf(address)")[..4];
        let mut data = Vec::from(selector);
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(owner.as_bytes());

        let tx = TypedTransaction::Legacy(TransactionRequest {
            to: Some(token.address.into()),
            data: Some(Bytes::from(data)),
            ..Default::default()
        });
        let result = provider.call(&tx, None).await?;
        let word = &result[..result.len().min(32)];
        Ok(U256::from_big_endian(word))
    }
}

fn build_provider(key: &BlockchainServiceKey, url: &str) -> ChainResult<Provider<Http>> {
    Provider::<Http>::try_from(url)
        .map(|provider| provider.interval(POLL_INTERVAL))
        .map_err(|_| ChainError::InvalidNetwork {
            blockchain: key.clone(),
            url: url.to_string(),
        })
}

#[async_trait]
impl BlockchainService for EvmBlockchainService {
    fn key(&self) -> &BlockchainServiceKey {
        &self.key
    }

    async fn validate_key(&self, secret: &str) -> bool {
        Self::parse_key(secret.trim()).is_some()
    }

    async fn generate_account_from_key(&self, secret: &str) -> ChainResult<DerivedAccount> {
        let wallet = Self::parse_key(secret.trim()).ok_or_else(|| {
            ChainError::invalid_key(&self.key, "expected a 32-byte hex private key")
        })?;
        Ok(DerivedAccount {
            address: format!("{:#x}", wallet.address()),
            blockchain: self.key.clone(),
        })
    }

    async fn get_balance(&self, address: &str) -> ChainResult<Vec<RawTokenBalance>> {
        let owner = Address::from_str(address).map_err(|_| ChainError::InvalidAddress {
            blockchain: self.key.clone(),
            address: address.to_string(),
        })?;
        let provider = self.provider().await;

        let native = provider
            .get_balance(owner, None)
            .await
            .map_err(|err| ChainError::network(&self.key, err))?;
        let mut balances = vec![RawTokenBalance {
            token: Token {
                hash: NATIVE_TOKEN_HASH.to_string(),
                symbol: self.native_symbol.clone(),
                decimals: NATIVE_DECIMALS,
            },
            amount: native.to_string(),
        }];

        for token in &self.tokens {
            match Self::token_balance(&provider, token, owner).await {
                Ok(amount) => {
                    debug!(
                        blockchain = %self.key,
                        token = %token.symbol,
                        %amount,
                        "token balance fetched"
                    );
                    balances.push(RawTokenBalance {
                        token: Token {
                            hash: format!("{:#x}", token.address),
                            symbol: token.symbol.clone(),
                            decimals: token.decimals,
                        },
                        amount: amount.to_string(),
                    });
                }
                Err(err) => {
                    warn!(
                        error = %err,
                        blockchain = %self.key,
                        token = %token.symbol,
                        token_address = %token.address,
                        "balanceOf call failed, skipping"
                    );
                }
            }
        }
        Ok(balances)
    }

    async fn set_network(&self, network: NetworkConfig) -> ChainResult<()> {
        let provider = build_provider(&self.key, &network.url)?;
        let mut endpoint = self.endpoint.write().await;
        endpoint.provider = Arc::new(provider);
        endpoint.network = network;
        Ok(())
    }

    async fn network(&self) -> NetworkConfig {
        self.endpoint.read().await.network.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::NetworkType;

    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const DEV_ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

    fn service() -> EvmBlockchainService {
        EvmBlockchainService::new(
            EvmChainConfig {
                key: "ethereum".into(),
                chain_id: 1,
                native_symbol: "ETH".to_string(),
            },
            NetworkConfig {
                network_type: NetworkType::Mainnet,
                url: "http://localhost:8545".to_string(),
            },
            Vec::new(),
        )
        .expect("service should build")
    }

    #[tokio::test]
    async fn derives_lowercase_address_from_hex_key() {
        let service = service();
        assert!(service.validate_key(DEV_KEY).await);
        assert!(service.validate_key(&DEV_KEY[2..]).await);
        let derived = service
            .generate_account_from_key(DEV_KEY)
            .await
            .expect("should derive");
        assert_eq!(derived.address, DEV_ADDRESS);
        assert_eq!(derived.blockchain.as_str(), "ethereum");
    }

    #[tokio::test]
    async fn rejects_non_hex_keys() {
        let service = service();
        assert!(
            !service
                .validate_key("KxFC1jmwwCoACiCAWZ3eXa96mBM6tb3TYzGmf6YwgdGWZgawvrtJ")
                .await
        );
        assert!(!service.validate_key("0x1234").await);
        let err = service
            .generate_account_from_key("not a key")
            .await
            .expect_err("invalid");
        assert!(matches!(err, ChainError::InvalidKey { .. }));
    }

    #[tokio::test]
    async fn set_network_swaps_endpoint_and_rejects_bad_urls() {
        let service = service();
        service
            .set_network(NetworkConfig {
                network_type: NetworkType::Testnet,
                url: "http://localhost:9545".to_string(),
            })
            .await
            .expect("valid url");
        assert_eq!(service.network().await.url, "http://localhost:9545");

        let err = service
            .set_network(NetworkConfig {
                network_type: NetworkType::Custom,
                url: "not a url".to_string(),
            })
            .await
            .expect_err("invalid url");
        assert!(matches!(err, ChainError::InvalidNetwork { .. }));
        assert_eq!(service.network().await.network_type, NetworkType::Testnet);
    }

    #[tokio::test]
    async fn malformed_address_is_rejected_before_any_rpc() {
        let err = service().get_balance("NAddr").await.expect_err("bad address");
        assert!(matches!(err, ChainError::InvalidAddress { .. }));
    }
}
