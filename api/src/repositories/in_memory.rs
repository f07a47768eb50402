use std::collections::HashSet;

use async_trait::async_trait;
use domain::{Account, BlockchainServiceKey, Wallet};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{AccountStore, StoreError, StoreResult};

/// Process-local store used when no `DATABASE_URL` is configured and by the
/// test suites. Every operation holds the lock for its whole duration, so a
/// commit is observed entirely or not at all.
#[derive(Default)]
pub struct InMemoryAccountStore {
    state: Mutex<StoreState>,
}

#[derive(Default, Clone)]
struct StoreState {
    wallets: Vec<Wallet>,
    accounts: Vec<Account>,
    rejected_addresses: HashSet<String>,
}

impl StoreState {
    fn has_account(&self, address: &str, blockchain: &BlockchainServiceKey) -> bool {
        self.accounts.iter().any(|a| a.matches(address, blockchain))
    }

    fn push_wallet(&mut self, wallet: &Wallet) -> StoreResult<()> {
        if self.wallets.iter().any(|w| w.id == wallet.id) {
            return Err(StoreError::Backend(format!("wallet {} already stored", wallet.id)));
        }
        self.wallets.push(wallet.clone());
        Ok(())
    }

    fn push_account(&mut self, account: &Account) -> StoreResult<()> {
        if self.rejected_addresses.contains(&account.address) {
            return Err(StoreError::Backend(format!(
                "write rejected for {}",
                account.address
            )));
        }
        if !self.wallets.iter().any(|w| w.id == account.wallet_id) {
            return Err(StoreError::WalletNotFound(account.wallet_id));
        }
        if self.has_account(&account.address, &account.blockchain) {
            return Err(StoreError::Conflict {
                address: account.address.clone(),
                blockchain: account.blockchain.clone(),
            });
        }
        self.accounts.push(account.clone());
        Ok(())
    }
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every write of an account with `address` fail with a backend error.
    pub fn with_rejected_address(mut self, address: impl Into<String>) -> Self {
        self.state.get_mut().rejected_addresses.insert(address.into());
        self
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn exists(&self, address: &str, blockchain: &BlockchainServiceKey) -> StoreResult<bool> {
        Ok(self.state.lock().await.has_account(address, blockchain))
    }

    async fn find_account(
        &self,
        address: &str,
        blockchain: &BlockchainServiceKey,
    ) -> StoreResult<Option<Account>> {
        let state = self.state.lock().await;
        Ok(state
            .accounts
            .iter()
            .find(|a| a.matches(address, blockchain))
            .cloned())
    }

    async fn find_wallet(&self, wallet_id: Uuid) -> StoreResult<Option<Wallet>> {
        let state = self.state.lock().await;
        Ok(state.wallets.iter().find(|w| w.id == wallet_id).cloned())
    }

    async fn list_wallets(&self) -> StoreResult<Vec<Wallet>> {
        Ok(self.state.lock().await.wallets.clone())
    }

    async fn list_accounts(&self) -> StoreResult<Vec<Account>> {
        Ok(self.state.lock().await.accounts.clone())
    }

    async fn insert_wallet(&self, wallet: &Wallet) -> StoreResult<Wallet> {
        self.state.lock().await.push_wallet(wallet)?;
        Ok(wallet.clone())
    }

    async fn insert_account(&self, account: &Account) -> StoreResult<Account> {
        self.state.lock().await.push_account(account)?;
        Ok(account.clone())
    }

    async fn commit_import(
        &self,
        wallet: Option<&Wallet>,
        accounts: &[Account],
    ) -> StoreResult<Vec<Account>> {
        let mut state = self.state.lock().await;
        let mut staged = state.clone();
        if let Some(wallet) = wallet {
            staged.push_wallet(wallet)?;
        }
        for account in accounts {
            staged.push_account(account)?;
        }
        *state = staged;
        Ok(accounts.to_vec())
    }
}
