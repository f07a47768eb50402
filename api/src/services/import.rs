use std::sync::Arc;

use blockchain::{BlockchainServiceRegistry, ChainError};
use domain::{Account, AccountType, DerivedAccount, Wallet, WalletType};
use futures::future::join_all;
use metrics::counter;
use secrets::{SecretError, SecretService};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::repositories::{AccountStore, StoreError};

pub const DEFAULT_WALLET_NAME: &str = "Imported wallet";

pub struct ImportKeyRequest {
    pub key: Zeroizing<String>,
    pub passphrase: Zeroizing<String>,
    /// Attach to an existing wallet instead of creating a legacy one.
    pub wallet_id: Option<Uuid>,
    pub wallet_name: Option<String>,
}

#[derive(Debug)]
pub struct ImportOutcome {
    pub wallet: Wallet,
    pub imported_accounts: Vec<Account>,
    pub duplicates: Vec<DerivedAccount>,
    /// Chains that accepted the key but failed to derive an address.
    pub errors: Vec<ChainError>,
}

impl ImportOutcome {
    pub fn duplicate_count(&self) -> usize {
        self.duplicates.len()
    }
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("key must not be empty")]
    EmptyKey,
    /// `duplicates == 0` means no registered chain accepted the key.
    #[error("no importable accounts ({duplicates} already imported)")]
    NoImportableAccounts {
        duplicates: usize,
        errors: Vec<ChainError>,
    },
    #[error("wallet {0} not found")]
    WalletNotFound(Uuid),
    #[error("failed to persist imported accounts: {0}")]
    Persistence(#[source] StoreError),
    #[error(transparent)]
    Secret(#[from] SecretError),
}

enum ChainAttempt {
    Rejected,
    Derived(DerivedAccount),
    Failed(ChainError),
}

/// Turns one private key into accounts on every chain that accepts it.
/// Imports are serialized through `commit_lock`; the store's uniqueness
/// check catches writers outside this process.
pub struct KeyImportPipeline {
    registry: Arc<BlockchainServiceRegistry>,
    store: Arc<dyn AccountStore>,
    secrets: Arc<dyn SecretService>,
    commit_lock: Mutex<()>,
    max_commit_attempts: u32,
}

impl KeyImportPipeline {
    pub fn new(
        registry: Arc<BlockchainServiceRegistry>,
        store: Arc<dyn AccountStore>,
        secrets: Arc<dyn SecretService>,
        max_commit_attempts: u32,
    ) -> Self {
        Self {
            registry,
            store,
            secrets,
            commit_lock: Mutex::new(()),
            max_commit_attempts: max_commit_attempts.max(1),
        }
    }

    pub async fn import_from_key(
        &self,
        request: ImportKeyRequest,
    ) -> Result<ImportOutcome, ImportError> {
        let secret = request.key.trim();
        if secret.is_empty() {
            return Err(ImportError::EmptyKey);
        }
        counter!("wallet_import_requests_total").increment(1);

        let (candidates, errors) = self.derive_candidates(secret).await;
        if candidates.is_empty() {
            info!(
                chains = self.registry.len(),
                failed = errors.len(),
                "key accepted by no chain"
            );
            return Err(ImportError::NoImportableAccounts {
                duplicates: 0,
                errors,
            });
        }

        let encrypted_key = self.secrets.encrypt(secret, &request.passphrase).await?;
        let wallet_name = request
            .wallet_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_WALLET_NAME)
            .to_string();

        let _guard = self.commit_lock.lock().await;
        let existing_wallet = match request.wallet_id {
            Some(wallet_id) => Some(
                self.store
                    .find_wallet(wallet_id)
                    .await
                    .map_err(ImportError::Persistence)?
                    .ok_or(ImportError::WalletNotFound(wallet_id))?,
            ),
            None => None,
        };

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let (fresh, duplicates) = self.partition_duplicates(&candidates).await?;
            if fresh.is_empty() {
                counter!("wallet_import_duplicates_total").increment(duplicates.len() as u64);
                info!(duplicates = duplicates.len(), "every derived account already imported");
                return Err(ImportError::NoImportableAccounts {
                    duplicates: duplicates.len(),
                    errors,
                });
            }

            let (wallet, new_wallet) = match &existing_wallet {
                Some(wallet) => (wallet.clone(), None),
                None => {
                    let wallet = Wallet::new(wallet_name.clone(), WalletType::Legacy);
                    (wallet.clone(), Some(wallet))
                }
            };
            let accounts: Vec<Account> = fresh
                .iter()
                .map(|derived| Account {
                    id: Uuid::new_v4(),
                    wallet_id: wallet.id,
                    address: derived.address.clone(),
                    blockchain: derived.blockchain.clone(),
                    account_type: AccountType::Legacy,
                    encrypted_key: Some(encrypted_key.clone()),
                })
                .collect();

            match self.store.commit_import(new_wallet.as_ref(), &accounts).await {
                Ok(imported_accounts) => {
                    counter!("wallet_imported_accounts_total")
                        .increment(imported_accounts.len() as u64);
                    counter!("wallet_import_duplicates_total").increment(duplicates.len() as u64);
                    info!(
                        wallet_id = %wallet.id,
                        imported = imported_accounts.len(),
                        duplicates = duplicates.len(),
                        failed = errors.len(),
                        "key imported"
                    );
                    return Ok(ImportOutcome {
                        wallet,
                        imported_accounts,
                        duplicates,
                        errors,
                    });
                }
                Err(StoreError::Conflict {
                    address,
                    blockchain,
                }) if attempt < self.max_commit_attempts => {
                    warn!(
                        %address,
                        %blockchain,
                        attempt,
                        "account stored concurrently, re-checking duplicates"
                    );
                }
                Err(StoreError::WalletNotFound(wallet_id)) => {
                    return Err(ImportError::WalletNotFound(wallet_id));
                }
                Err(err) => return Err(ImportError::Persistence(err)),
            }
        }
    }

    /// Validates and derives on every chain concurrently. The result keeps
    /// registry order.
    async fn derive_candidates(&self, secret: &str) -> (Vec<DerivedAccount>, Vec<ChainError>) {
        let attempts = self.registry.iter().map(|service| async move {
            if !service.validate_key(secret).await {
                debug!(blockchain = %service.key(), "key rejected");
                return ChainAttempt::Rejected;
            }
            match service.generate_account_from_key(secret).await {
                Ok(derived) => ChainAttempt::Derived(derived),
                Err(err) => ChainAttempt::Failed(err),
            }
        });

        let mut candidates = Vec::new();
        let mut errors = Vec::new();
        for attempt in join_all(attempts).await {
            match attempt {
                ChainAttempt::Rejected => {}
                ChainAttempt::Derived(derived) => candidates.push(derived),
                ChainAttempt::Failed(err) => {
                    warn!(
                        error = %err,
                        blockchain = %err.blockchain(),
                        "account derivation failed"
                    );
                    errors.push(err);
                }
            }
        }
        (candidates, errors)
    }

    async fn partition_duplicates(
        &self,
        candidates: &[DerivedAccount],
    ) -> Result<(Vec<DerivedAccount>, Vec<DerivedAccount>), ImportError> {
        let mut fresh = Vec::new();
        let mut duplicates = Vec::new();
        for candidate in candidates {
            let taken = self
                .store
                .exists(&candidate.address, &candidate.blockchain)
                .await
                .map_err(ImportError::Persistence)?;
            if taken {
                duplicates.push(candidate.clone());
            } else {
                fresh.push(candidate.clone());
            }
        }
        Ok((fresh, duplicates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use blockchain::InMemoryBlockchainService;
    use domain::BlockchainServiceKey;
    use secrets::InMemorySecretService;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::repositories::{InMemoryAccountStore, StoreResult};

    fn registry() -> Arc<BlockchainServiceRegistry> {
        Arc::new(
            BlockchainServiceRegistry::builder()
                .register(Arc::new(
                    InMemoryBlockchainService::new("neo3")
                        .with_key("K", "N_ADDR")
                        .with_underivable_key("BROKEN"),
                ))
                .register(Arc::new(
                    InMemoryBlockchainService::new("ethereum")
                        .with_key("K", "0xaddr")
                        .with_key("ETH_ONLY", "0xonly"),
                ))
                .build()
                .expect("registry"),
        )
    }

    fn pipeline(store: Arc<dyn AccountStore>) -> KeyImportPipeline {
        KeyImportPipeline::new(registry(), store, Arc::new(InMemorySecretService), 3)
    }

    fn request(key: &str) -> ImportKeyRequest {
        ImportKeyRequest {
            key: Zeroizing::new(key.to_string()),
            passphrase: Zeroizing::new("pass".to_string()),
            wallet_id: None,
            wallet_name: None,
        }
    }

    #[tokio::test]
    async fn imports_one_account_per_accepting_chain() {
        let store = Arc::new(InMemoryAccountStore::new());
        let outcome = pipeline(store.clone())
            .import_from_key(request("K"))
            .await
            .expect("import");

        let pairs: Vec<(&str, &str)> = outcome
            .imported_accounts
            .iter()
            .map(|a| (a.address.as_str(), a.blockchain.as_str()))
            .collect();
        assert_eq!(pairs, vec![("N_ADDR", "neo3"), ("0xaddr", "ethereum")]);
        assert_eq!(outcome.wallet.wallet_type, WalletType::Legacy);
        assert_eq!(outcome.wallet.name, DEFAULT_WALLET_NAME);
        assert!(outcome
            .imported_accounts
            .iter()
            .all(|a| a.account_type == AccountType::Legacy && a.wallet_id == outcome.wallet.id));

        let stored = store.list_accounts().await.expect("accounts");
        assert_eq!(stored.len(), 2);
        let sealed = stored[0].encrypted_key.as_deref().expect("sealed key");
        assert_ne!(sealed, "K");
    }

    #[tokio::test]
    async fn importing_same_key_twice_yields_no_new_accounts() {
        let store = Arc::new(InMemoryAccountStore::new());
        let pipeline = pipeline(store.clone());
        pipeline.import_from_key(request("K")).await.expect("first");

        let err = pipeline
            .import_from_key(request("K"))
            .await
            .expect_err("second");
        assert!(matches!(
            err,
            ImportError::NoImportableAccounts { duplicates: 2, .. }
        ));
        assert_eq!(store.list_accounts().await.expect("accounts").len(), 2);
        assert_eq!(store.list_wallets().await.expect("wallets").len(), 1);
    }

    #[tokio::test]
    async fn account_already_held_on_one_chain_is_counted_as_duplicate() {
        let store = Arc::new(InMemoryAccountStore::new());
        let existing = store
            .insert_wallet(&Wallet::new("main", WalletType::Standard))
            .await
            .expect("wallet");
        store
            .insert_account(&Account {
                id: Uuid::new_v4(),
                wallet_id: existing.id,
                address: "N_ADDR".to_string(),
                blockchain: "neo3".into(),
                account_type: AccountType::Standard,
                encrypted_key: None,
            })
            .await
            .expect("account");

        let outcome = pipeline(store.clone())
            .import_from_key(request("K"))
            .await
            .expect("import");

        assert_eq!(outcome.imported_accounts.len(), 1);
        assert_eq!(outcome.imported_accounts[0].address, "0xaddr");
        assert_eq!(outcome.imported_accounts[0].blockchain.as_str(), "ethereum");
        assert_eq!(outcome.duplicate_count(), 1);
        assert_ne!(outcome.wallet.id, existing.id);
        assert_eq!(store.list_accounts().await.expect("accounts").len(), 2);
    }

    #[tokio::test]
    async fn key_valid_nowhere_is_rejected() {
        let store = Arc::new(InMemoryAccountStore::new());
        let err = pipeline(store.clone())
            .import_from_key(request("garbage"))
            .await
            .expect_err("invalid everywhere");
        assert!(matches!(
            err,
            ImportError::NoImportableAccounts { duplicates: 0, .. }
        ));
        assert!(store.list_wallets().await.expect("wallets").is_empty());
    }

    #[tokio::test]
    async fn empty_key_is_rejected_before_any_chain_call() {
        let store = Arc::new(InMemoryAccountStore::new());
        let err = pipeline(store)
            .import_from_key(request("   "))
            .await
            .expect_err("empty");
        assert!(matches!(err, ImportError::EmptyKey));
    }

    #[tokio::test]
    async fn derivation_failure_is_reported_and_other_chains_still_import() {
        let registry = Arc::new(
            BlockchainServiceRegistry::builder()
                .register(Arc::new(
                    InMemoryBlockchainService::new("neo3").with_underivable_key("MIXED"),
                ))
                .register(Arc::new(
                    InMemoryBlockchainService::new("ethereum").with_key("MIXED", "0xmixed"),
                ))
                .build()
                .expect("registry"),
        );
        let store = Arc::new(InMemoryAccountStore::new());
        let pipeline =
            KeyImportPipeline::new(registry, store.clone(), Arc::new(InMemorySecretService), 3);
        let outcome = pipeline
            .import_from_key(request("MIXED"))
            .await
            .expect("partial import");
        assert_eq!(outcome.imported_accounts.len(), 1);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].blockchain().as_str(), "neo3");
    }

    #[tokio::test]
    async fn attaches_to_existing_wallet_and_skips_known_pairs() {
        let store = Arc::new(InMemoryAccountStore::new());
        let pipeline = pipeline(store.clone());
        let first = pipeline
            .import_from_key(request("ETH_ONLY"))
            .await
            .expect("first");

        let mut second = request("K");
        second.wallet_id = Some(first.wallet.id);
        let outcome = pipeline.import_from_key(second).await.expect("second");
        assert_eq!(outcome.wallet.id, first.wallet.id);
        assert_eq!(outcome.imported_accounts.len(), 2);
        assert_eq!(outcome.duplicate_count(), 0);
        assert_eq!(store.list_wallets().await.expect("wallets").len(), 1);

        let mut unknown = request("K");
        unknown.wallet_id = Some(Uuid::new_v4());
        assert!(matches!(
            pipeline.import_from_key(unknown).await,
            Err(ImportError::WalletNotFound(_))
        ));
    }

    #[tokio::test]
    async fn failed_write_persists_nothing() {
        let store = Arc::new(InMemoryAccountStore::new().with_rejected_address("0xaddr"));
        let err = pipeline(store.clone())
            .import_from_key(request("K"))
            .await
            .expect_err("write fails");
        assert!(matches!(err, ImportError::Persistence(StoreError::Backend(_))));
        assert!(store.list_accounts().await.expect("accounts").is_empty());
        assert!(store.list_wallets().await.expect("wallets").is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_imports_of_one_key_store_each_pair_once() {
        let store = Arc::new(InMemoryAccountStore::new());
        let pipeline = Arc::new(pipeline(store.clone()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pipeline = pipeline.clone();
                tokio::spawn(async move { pipeline.import_from_key(request("K")).await })
            })
            .collect();

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.expect("join") {
                Ok(_) => succeeded += 1,
                Err(ImportError::NoImportableAccounts { duplicates, .. }) => {
                    assert_eq!(duplicates, 2)
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(succeeded, 1);
        assert_eq!(store.list_accounts().await.expect("accounts").len(), 2);
    }

    /// Reports no duplicates on its first lookups, as if another process
    /// committed between the check and the write.
    struct RacingStore {
        inner: InMemoryAccountStore,
        blind_lookups: AtomicUsize,
    }

    #[async_trait]
    impl AccountStore for RacingStore {
        async fn exists(
            &self,
            address: &str,
            blockchain: &BlockchainServiceKey,
        ) -> StoreResult<bool> {
            if self.blind_lookups.load(Ordering::SeqCst) > 0 {
                self.blind_lookups.fetch_sub(1, Ordering::SeqCst);
                return Ok(false);
            }
            self.inner.exists(address, blockchain).await
        }
        async fn find_account(
            &self,
            address: &str,
            blockchain: &BlockchainServiceKey,
        ) -> StoreResult<Option<Account>> {
            self.inner.find_account(address, blockchain).await
        }
        async fn find_wallet(&self, wallet_id: Uuid) -> StoreResult<Option<Wallet>> {
            self.inner.find_wallet(wallet_id).await
        }
        async fn list_wallets(&self) -> StoreResult<Vec<Wallet>> {
            self.inner.list_wallets().await
        }
        async fn list_accounts(&self) -> StoreResult<Vec<Account>> {
            self.inner.list_accounts().await
        }
        async fn insert_wallet(&self, wallet: &Wallet) -> StoreResult<Wallet> {
            self.inner.insert_wallet(wallet).await
        }
        async fn insert_account(&self, account: &Account) -> StoreResult<Account> {
            self.inner.insert_account(account).await
        }
        async fn commit_import(
            &self,
            wallet: Option<&Wallet>,
            accounts: &[Account],
        ) -> StoreResult<Vec<Account>> {
            self.inner.commit_import(wallet, accounts).await
        }
    }

    #[tokio::test]
    async fn commit_conflict_is_retried_with_fresh_duplicate_check() {
        let inner = InMemoryAccountStore::new();
        let other = inner
            .insert_wallet(&Wallet::new("other process", WalletType::Standard))
            .await
            .expect("wallet");
        inner
            .insert_account(&Account {
                id: Uuid::new_v4(),
                wallet_id: other.id,
                address: "0xaddr".to_string(),
                blockchain: "ethereum".into(),
                account_type: AccountType::Standard,
                encrypted_key: None,
            })
            .await
            .expect("account");
        let store = Arc::new(RacingStore {
            inner,
            blind_lookups: AtomicUsize::new(2),
        });

        let outcome = pipeline(store.clone())
            .import_from_key(request("K"))
            .await
            .expect("retry succeeds");
        assert_eq!(outcome.imported_accounts.len(), 1);
        assert_eq!(outcome.imported_accounts[0].blockchain.as_str(), "neo3");
        assert_eq!(outcome.duplicate_count(), 1);
        assert_eq!(store.list_accounts().await.expect("accounts").len(), 2);
    }
}
