mod remote;

use async_trait::async_trait;
use domain::{Account, AccountBackup, BackupDocument, Wallet, WalletBackup};
use futures::future::{join_all, try_join_all};
use thiserror::Error;
use tracing::{debug, warn};
use zeroize::Zeroizing;

pub use remote::RemoteSecretService;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SecretError {
    #[error("wrong passphrase or corrupt ciphertext")]
    Decryption,
    #[error("passphrase must not be empty")]
    EmptyPassphrase,
    #[error("no stored secret for {0}")]
    MissingSecret(String),
    #[error("secret service unavailable: {0}")]
    Transport(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type SecretResult<T> = Result<T, SecretError>;

/// Opaque encryption boundary. Plaintext never outlives the caller's
/// `Zeroizing` buffer.
#[async_trait]
pub trait SecretService: Send + Sync {
    async fn encrypt(&self, plaintext: &str, passphrase: &str) -> SecretResult<String>;
    async fn decrypt(&self, ciphertext: &str, passphrase: &str)
        -> SecretResult<Zeroizing<String>>;
}

/// Tags values with the passphrase instead of encrypting them.
/// Offers no protection; for tests and local demos.
#[derive(Clone, Default)]
pub struct InMemorySecretService;

const IN_MEMORY_PREFIX: &str = "sealed";

#[async_trait]
impl SecretService for InMemorySecretService {
    async fn encrypt(&self, plaintext: &str, passphrase: &str) -> SecretResult<String> {
        if passphrase.is_empty() {
            return Err(SecretError::EmptyPassphrase);
        }
        Ok(format!(
            "{IN_MEMORY_PREFIX}:{}:{passphrase}:{plaintext}",
            passphrase.len()
        ))
    }

    async fn decrypt(
        &self,
        ciphertext: &str,
        passphrase: &str,
    ) -> SecretResult<Zeroizing<String>> {
        let rest = ciphertext
            .strip_prefix(IN_MEMORY_PREFIX)
            .and_then(|r| r.strip_prefix(':'))
            .ok_or(SecretError::Decryption)?;
        let (len, rest) = rest.split_once(':').ok_or(SecretError::Decryption)?;
        let len: usize = len.parse().map_err(|_| SecretError::Decryption)?;
        if rest.len() < len + 1 || !rest.is_char_boundary(len) {
            return Err(SecretError::Decryption);
        }
        let (stored, plaintext) = rest.split_at(len);
        let plaintext = plaintext.strip_prefix(':').ok_or(SecretError::Decryption)?;
        if stored != passphrase {
            return Err(SecretError::Decryption);
        }
        Ok(Zeroizing::new(plaintext.to_string()))
    }
}

/// Checks a login passphrase by decrypting every stored mnemonic and account
/// key with it.
pub async fn verify_passphrase(
    service: &dyn SecretService,
    passphrase: &str,
    wallets: &[Wallet],
    accounts: &[Account],
) -> SecretResult<()> {
    if passphrase.is_empty() {
        return Err(SecretError::EmptyPassphrase);
    }
    let ciphertexts = wallets
        .iter()
        .filter_map(|w| w.encrypted_mnemonic.as_deref())
        .chain(accounts.iter().filter_map(|a| a.encrypted_key.as_deref()));
    let results = join_all(ciphertexts.map(|c| service.decrypt(c, passphrase))).await;
    let checked = results.len();
    for result in results {
        result?;
    }
    debug!(checked, "passphrase verified");
    Ok(())
}

pub async fn export_key(
    service: &dyn SecretService,
    account: &Account,
    passphrase: &str,
) -> SecretResult<Zeroizing<String>> {
    if passphrase.is_empty() {
        return Err(SecretError::EmptyPassphrase);
    }
    let ciphertext = account.encrypted_key.as_deref().ok_or_else(|| {
        SecretError::MissingSecret(format!("{}@{}", account.address, account.blockchain))
    })?;
    service.decrypt(ciphertext, passphrase).await
}

/// Builds the plaintext backup document. Accounts are grouped under the
/// wallet they reference; accounts of unknown wallets are left out.
pub async fn build_backup(
    service: &dyn SecretService,
    passphrase: &str,
    wallets: &[Wallet],
    accounts: &[Account],
) -> SecretResult<BackupDocument> {
    if passphrase.is_empty() {
        return Err(SecretError::EmptyPassphrase);
    }
    let orphaned = accounts
        .iter()
        .filter(|a| !wallets.iter().any(|w| w.id == a.wallet_id))
        .count();
    if orphaned > 0 {
        warn!(orphaned, "accounts without a wallet skipped from backup");
    }

    let wallets = try_join_all(wallets.iter().map(|wallet| async move {
        let accounts = try_join_all(
            accounts
                .iter()
                .filter(|account| account.wallet_id == wallet.id)
                .map(|account| backup_account(service, account, passphrase)),
        )
        .await?;
        let mnemonic = match wallet.encrypted_mnemonic.as_deref() {
            Some(ciphertext) => service.decrypt(ciphertext, passphrase).await?.to_string(),
            None => String::new(),
        };
        Ok::<_, SecretError>(WalletBackup {
            id: wallet.id,
            name: wallet.name.clone(),
            wallet_type: wallet.wallet_type,
            mnemonic,
            accounts,
        })
    }))
    .await?;

    Ok(BackupDocument { wallets })
}

async fn backup_account(
    service: &dyn SecretService,
    account: &Account,
    passphrase: &str,
) -> SecretResult<AccountBackup> {
    let key = match account.encrypted_key.as_deref() {
        Some(ciphertext) => Some(service.decrypt(ciphertext, passphrase).await?.to_string()),
        None => None,
    };
    Ok(AccountBackup {
        account_type: account.account_type,
        address: account.address.clone(),
        blockchain: account.blockchain.clone(),
        id_wallet: account.wallet_id,
        key,
    })
}

pub async fn seal_backup(
    service: &dyn SecretService,
    document: &BackupDocument,
    passphrase: &str,
) -> SecretResult<String> {
    let json = Zeroizing::new(
        serde_json::to_string(document)
            .map_err(|err| SecretError::Internal(format!("backup encode failed: {err}")))?,
    );
    service.encrypt(&json, passphrase).await
}

pub async fn open_backup(
    service: &dyn SecretService,
    content: &str,
    passphrase: &str,
) -> SecretResult<BackupDocument> {
    let json = service.decrypt(content, passphrase).await?;
    serde_json::from_str(&json)
        .map_err(|err| SecretError::Internal(format!("backup decode failed: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{AccountType, WalletType};
    use uuid::Uuid;

    async fn sealed(value: &str, passphrase: &str) -> String {
        InMemorySecretService
            .encrypt(value, passphrase)
            .await
            .expect("encrypt")
    }

    async fn fixtures(passphrase: &str) -> (Vec<Wallet>, Vec<Account>) {
        let mut wallet = Wallet::new("main", WalletType::Standard);
        wallet.encrypted_mnemonic = Some(sealed("word word word", passphrase).await);
        let legacy = Wallet::new("imported", WalletType::Legacy);
        let accounts = vec![
            Account {
                id: Uuid::new_v4(),
                wallet_id: wallet.id,
                address: "NAddr".to_string(),
                blockchain: "neo3".into(),
                account_type: AccountType::Standard,
                encrypted_key: Some(sealed("neo-key", passphrase).await),
            },
            Account {
                id: Uuid::new_v4(),
                wallet_id: legacy.id,
                address: "0xabc".to_string(),
                blockchain: "ethereum".into(),
                account_type: AccountType::Legacy,
                encrypted_key: Some(sealed("eth-key", passphrase).await),
            },
            Account {
                id: Uuid::new_v4(),
                wallet_id: legacy.id,
                address: "0xwatch".to_string(),
                blockchain: "ethereum".into(),
                account_type: AccountType::Watch,
                encrypted_key: None,
            },
        ];
        (vec![wallet, legacy], accounts)
    }

    #[tokio::test]
    async fn in_memory_service_rejects_wrong_passphrase() {
        let ciphertext = sealed("secret:with:colons", "pass").await;
        let plain = InMemorySecretService
            .decrypt(&ciphertext, "pass")
            .await
            .expect("decrypt");
        assert_eq!(plain.as_str(), "secret:with:colons");
        assert_eq!(
            InMemorySecretService.decrypt(&ciphertext, "pas").await,
            Err(SecretError::Decryption)
        );
        assert_eq!(
            InMemorySecretService.decrypt("garbage", "pass").await,
            Err(SecretError::Decryption)
        );
    }

    #[tokio::test]
    async fn verify_passphrase_checks_every_secret() {
        let (wallets, accounts) = fixtures("right").await;
        let service = InMemorySecretService;
        assert!(verify_passphrase(&service, "right", &wallets, &accounts).await.is_ok());
        assert_eq!(
            verify_passphrase(&service, "wrong", &wallets, &accounts).await,
            Err(SecretError::Decryption)
        );
        assert_eq!(
            verify_passphrase(&service, "", &wallets, &accounts).await,
            Err(SecretError::EmptyPassphrase)
        );
    }

    #[tokio::test]
    async fn export_key_requires_stored_secret() {
        let (_, accounts) = fixtures("right").await;
        let service = InMemorySecretService;
        let key = export_key(&service, &accounts[0], "right").await.expect("key");
        assert_eq!(key.as_str(), "neo-key");
        assert!(matches!(
            export_key(&service, &accounts[2], "right").await,
            Err(SecretError::MissingSecret(_))
        ));
        assert_eq!(
            export_key(&service, &accounts[0], "nope").await,
            Err(SecretError::Decryption)
        );
    }

    #[tokio::test]
    async fn backup_groups_accounts_and_survives_sealing() {
        let (wallets, accounts) = fixtures("right").await;
        let service = InMemorySecretService;
        let document = build_backup(&service, "right", &wallets, &accounts)
            .await
            .expect("backup");
        assert_eq!(document.wallets.len(), 2);
        assert_eq!(document.wallets[0].mnemonic, "word word word");
        assert_eq!(document.wallets[0].accounts.len(), 1);
        assert_eq!(document.wallets[1].mnemonic, "");
        assert_eq!(document.wallets[1].accounts.len(), 2);
        assert_eq!(document.wallets[1].accounts[1].key, None);

        let content = seal_backup(&service, &document, "right").await.expect("seal");
        let reopened = open_backup(&service, &content, "right").await.expect("open");
        assert_eq!(reopened, document);
        assert_eq!(
            open_backup(&service, &content, "other").await,
            Err(SecretError::Decryption)
        );
    }
}
