use std::{collections::HashMap, sync::Arc};

use domain::{BlockchainServiceKey, NetworkConfig};
use tracing::{info, warn};

use crate::{BlockchainService, ChainError, ChainResult};

/// Process-wide set of chain services. The key set is fixed once built and
/// iteration follows registration order.
#[derive(Clone, Default)]
pub struct BlockchainServiceRegistry {
    services: Vec<Arc<dyn BlockchainService>>,
    index: HashMap<BlockchainServiceKey, usize>,
}

#[derive(Default)]
pub struct RegistryBuilder {
    services: Vec<Arc<dyn BlockchainService>>,
}

impl RegistryBuilder {
    pub fn register(mut self, service: Arc<dyn BlockchainService>) -> Self {
        self.services.push(service);
        self
    }

    pub fn build(self) -> ChainResult<BlockchainServiceRegistry> {
        let mut index = HashMap::with_capacity(self.services.len());
        for (position, service) in self.services.iter().enumerate() {
            let key = service.key().clone();
            if index.insert(key.clone(), position).is_some() {
                return Err(ChainError::DuplicateBlockchain(key));
            }
        }
        Ok(BlockchainServiceRegistry {
            services: self.services,
            index,
        })
    }
}

impl BlockchainServiceRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn get(&self, key: &BlockchainServiceKey) -> Option<Arc<dyn BlockchainService>> {
        self.index
            .get(key)
            .and_then(|position| self.services.get(*position))
            .cloned()
    }

    pub fn require(&self, key: &BlockchainServiceKey) -> ChainResult<Arc<dyn BlockchainService>> {
        self.get(key)
            .ok_or_else(|| ChainError::UnknownBlockchain(key.clone()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn BlockchainService>> {
        self.services.iter()
    }

    pub fn keys(&self) -> Vec<BlockchainServiceKey> {
        self.services.iter().map(|s| s.key().clone()).collect()
    }

    pub fn contains(&self, key: &BlockchainServiceKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// True when at least one registered chain accepts the key.
    pub async fn validate_key_all(&self, secret: &str) -> bool {
        for service in &self.services {
            if service.validate_key(secret).await {
                return true;
            }
        }
        false
    }

    pub async fn set_network(
        &self,
        key: &BlockchainServiceKey,
        network: NetworkConfig,
    ) -> ChainResult<()> {
        let service = self.require(key)?;
        service.set_network(network.clone()).await?;
        info!(blockchain = %key, url = %network.url, "network switched");
        Ok(())
    }

    /// Pushes the selected network of every chain present in `networks`.
    /// Chains without an entry keep their current endpoint; failures are
    /// returned after every chain has been attempted.
    pub async fn apply_networks(
        &self,
        networks: &HashMap<BlockchainServiceKey, NetworkConfig>,
    ) -> Vec<ChainError> {
        let mut errors = Vec::new();
        for service in &self.services {
            let Some(network) = networks.get(service.key()) else {
                continue;
            };
            if let Err(err) = service.set_network(network.clone()).await {
                warn!(error = %err, blockchain = %service.key(), "failed to apply network");
                errors.push(err);
            }
        }
        errors
    }

    pub async fn networks(&self) -> Vec<(BlockchainServiceKey, NetworkConfig)> {
        let mut out = Vec::with_capacity(self.services.len());
        for service in &self.services {
            out.push((service.key().clone(), service.network().await));
        }
        out
    }
}
