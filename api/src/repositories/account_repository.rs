use async_trait::async_trait;
use domain::{Account, AccountType, BlockchainServiceKey, Wallet, WalletType};
use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};
use thiserror::Error;
use uuid::Uuid;

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("account {address} already exists on {blockchain}")]
    Conflict {
        address: String,
        blockchain: BlockchainServiceKey,
    },
    #[error("wallet {0} not found")]
    WalletNotFound(Uuid),
    #[error("account store unavailable: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Persistence boundary for wallets and accounts. `(address, blockchain)` is
/// unique across every account the store holds.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn exists(&self, address: &str, blockchain: &BlockchainServiceKey) -> StoreResult<bool>;
    async fn find_account(
        &self,
        address: &str,
        blockchain: &BlockchainServiceKey,
    ) -> StoreResult<Option<Account>>;
    async fn find_wallet(&self, wallet_id: Uuid) -> StoreResult<Option<Wallet>>;
    async fn list_wallets(&self) -> StoreResult<Vec<Wallet>>;
    async fn list_accounts(&self) -> StoreResult<Vec<Account>>;
    async fn insert_wallet(&self, wallet: &Wallet) -> StoreResult<Wallet>;
    async fn insert_account(&self, account: &Account) -> StoreResult<Account>;
    /// Writes `wallet` (when given) and every account, or nothing at all.
    /// A uniqueness clash surfaces as [`StoreError::Conflict`].
    async fn commit_import(
        &self,
        wallet: Option<&Wallet>,
        accounts: &[Account],
    ) -> StoreResult<Vec<Account>>;
}

#[derive(Clone)]
pub struct PostgresAccountStore {
    pool: PgPool,
}

impl PostgresAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn write_wallet(tx: &mut Transaction<'_, Postgres>, wallet: &Wallet) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO wallets (id, name, wallet_type, encrypted_mnemonic)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(wallet.id)
        .bind(&wallet.name)
        .bind(wallet.wallet_type.as_str())
        .bind(wallet.encrypted_mnemonic.as_deref())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn write_account(
        tx: &mut Transaction<'_, Postgres>,
        account: &Account,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO accounts (id, wallet_id, address, blockchain, account_type, encrypted_key)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(account.id)
        .bind(account.wallet_id)
        .bind(&account.address)
        .bind(account.blockchain.as_str())
        .bind(account.account_type.as_str())
        .bind(account.encrypted_key.as_deref())
        .execute(&mut **tx)
        .await
        .map_err(|err| map_account_write_error(err, account))?;
        Ok(())
    }
}

#[async_trait]
impl AccountStore for PostgresAccountStore {
    async fn exists(&self, address: &str, blockchain: &BlockchainServiceKey) -> StoreResult<bool> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM accounts WHERE address = $1 AND blockchain = $2) AS found",
        )
        .bind(address)
        .bind(blockchain.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("found")?)
    }

    async fn find_account(
        &self,
        address: &str,
        blockchain: &BlockchainServiceKey,
    ) -> StoreResult<Option<Account>> {
        let row = sqlx::query(
            "SELECT id, wallet_id, address, blockchain, account_type, encrypted_key
             FROM accounts WHERE address = $1 AND blockchain = $2",
        )
        .bind(address)
        .bind(blockchain.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| row_to_account(&row)).transpose()
    }

    async fn find_wallet(&self, wallet_id: Uuid) -> StoreResult<Option<Wallet>> {
        let row = sqlx::query(
            "SELECT id, name, wallet_type, encrypted_mnemonic FROM wallets WHERE id = $1",
        )
        .bind(wallet_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| row_to_wallet(&row)).transpose()
    }

    async fn list_wallets(&self) -> StoreResult<Vec<Wallet>> {
        let rows = sqlx::query(
            "SELECT id, name, wallet_type, encrypted_mnemonic FROM wallets ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_wallet).collect()
    }

    async fn list_accounts(&self) -> StoreResult<Vec<Account>> {
        let rows = sqlx::query(
            "SELECT id, wallet_id, address, blockchain, account_type, encrypted_key
             FROM accounts ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_account).collect()
    }

    async fn insert_wallet(&self, wallet: &Wallet) -> StoreResult<Wallet> {
        let mut tx = self.pool.begin().await?;
        Self::write_wallet(&mut tx, wallet).await?;
        tx.commit().await?;
        Ok(wallet.clone())
    }

    async fn insert_account(&self, account: &Account) -> StoreResult<Account> {
        let mut tx = self.pool.begin().await?;
        Self::write_account(&mut tx, account).await?;
        tx.commit().await?;
        Ok(account.clone())
    }

    async fn commit_import(
        &self,
        wallet: Option<&Wallet>,
        accounts: &[Account],
    ) -> StoreResult<Vec<Account>> {
        // Dropping `tx` on an early return rolls everything back.
        let mut tx = self.pool.begin().await?;
        if let Some(wallet) = wallet {
            Self::write_wallet(&mut tx, wallet).await?;
        }
        for account in accounts {
            Self::write_account(&mut tx, account).await?;
        }
        tx.commit().await?;
        Ok(accounts.to_vec())
    }
}

fn map_account_write_error(err: sqlx::Error, account: &Account) -> StoreError {
    let code = err
        .as_database_error()
        .and_then(|db| db.code())
        .map(|code| code.into_owned());
    match code.as_deref() {
        Some(UNIQUE_VIOLATION) => StoreError::Conflict {
            address: account.address.clone(),
            blockchain: account.blockchain.clone(),
        },
        Some(FOREIGN_KEY_VIOLATION) => StoreError::WalletNotFound(account.wallet_id),
        _ => StoreError::Backend(err.to_string()),
    }
}

fn row_to_wallet(row: &PgRow) -> StoreResult<Wallet> {
    let wallet_type: String = row.try_get("wallet_type")?;
    Ok(Wallet {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        wallet_type: WalletType::parse(&wallet_type)
            .ok_or_else(|| StoreError::Backend(format!("unknown wallet type {wallet_type}")))?,
        encrypted_mnemonic: row.try_get("encrypted_mnemonic")?,
    })
}

fn row_to_account(row: &PgRow) -> StoreResult<Account> {
    let account_type: String = row.try_get("account_type")?;
    let blockchain: String = row.try_get("blockchain")?;
    Ok(Account {
        id: row.try_get("id")?,
        wallet_id: row.try_get("wallet_id")?,
        address: row.try_get("address")?,
        blockchain: BlockchainServiceKey::new(blockchain),
        account_type: AccountType::parse(&account_type)
            .ok_or_else(|| StoreError::Backend(format!("unknown account type {account_type}")))?,
        encrypted_key: row.try_get("encrypted_key")?,
    })
}
