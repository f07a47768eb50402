mod in_memory;
mod registry;

use async_trait::async_trait;
use domain::{BlockchainServiceKey, DerivedAccount, NetworkConfig, RawTokenBalance};
use thiserror::Error;

pub use in_memory::InMemoryBlockchainService;
pub use registry::{BlockchainServiceRegistry, RegistryBuilder};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChainError {
    #[error("key is not valid for {blockchain}: {reason}")]
    InvalidKey {
        blockchain: BlockchainServiceKey,
        reason: String,
    },
    #[error("network error on {blockchain}: {message}")]
    Network {
        blockchain: BlockchainServiceKey,
        message: String,
    },
    #[error("{address} is not a valid {blockchain} address")]
    InvalidAddress {
        blockchain: BlockchainServiceKey,
        address: String,
    },
    #[error("invalid network endpoint for {blockchain}: {url}")]
    InvalidNetwork {
        blockchain: BlockchainServiceKey,
        url: String,
    },
    #[error("blockchain {0} is not registered")]
    UnknownBlockchain(BlockchainServiceKey),
    #[error("blockchain {0} is registered twice")]
    DuplicateBlockchain(BlockchainServiceKey),
}

impl ChainError {
    pub fn blockchain(&self) -> &BlockchainServiceKey {
        match self {
            ChainError::InvalidKey { blockchain, .. }
            | ChainError::Network { blockchain, .. }
            | ChainError::InvalidAddress { blockchain, .. }
            | ChainError::InvalidNetwork { blockchain, .. } => blockchain,
            ChainError::UnknownBlockchain(key) | ChainError::DuplicateBlockchain(key) => key,
        }
    }

    pub fn network(blockchain: &BlockchainServiceKey, message: impl ToString) -> Self {
        ChainError::Network {
            blockchain: blockchain.clone(),
            message: message.to_string(),
        }
    }

    pub fn invalid_key(blockchain: &BlockchainServiceKey, reason: impl ToString) -> Self {
        ChainError::InvalidKey {
            blockchain: blockchain.clone(),
            reason: reason.to_string(),
        }
    }
}

pub type ChainResult<T> = Result<T, ChainError>;

/// One pluggable chain backend. Every call is a suspension point; no retry
/// happens at this layer.
#[async_trait]
pub trait BlockchainService: Send + Sync {
    fn key(&self) -> &BlockchainServiceKey;

    async fn validate_key(&self, secret: &str) -> bool;

    /// Fails with [`ChainError::InvalidKey`] when the key is malformed for this chain.
    async fn generate_account_from_key(&self, secret: &str) -> ChainResult<DerivedAccount>;

    /// Fails with [`ChainError::Network`] on transport failure.
    async fn get_balance(&self, address: &str) -> ChainResult<Vec<RawTokenBalance>>;

    /// Swaps the active endpoint for subsequent calls. In-flight calls may use
    /// either endpoint.
    async fn set_network(&self, network: NetworkConfig) -> ChainResult<()>;

    async fn network(&self) -> NetworkConfig;
}
