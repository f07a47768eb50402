use std::{borrow::Borrow, collections::HashMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a supported chain, e.g. `ethereum` or `neo3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlockchainServiceKey(String);

impl BlockchainServiceKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockchainServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BlockchainServiceKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("blockchain key must not be empty".to_string());
        }
        Ok(Self::new(trimmed))
    }
}

impl TryFrom<String> for BlockchainServiceKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BlockchainServiceKey> for String {
    fn from(key: BlockchainServiceKey) -> Self {
        key.0
    }
}

impl Borrow<str> for BlockchainServiceKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BlockchainServiceKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Standard,
    Legacy,
    Ledger,
    Watch,
}

impl AccountType {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountType::Standard => "standard",
            AccountType::Legacy => "legacy",
            AccountType::Ledger => "ledger",
            AccountType::Watch => "watch",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "standard" => Some(AccountType::Standard),
            "legacy" => Some(AccountType::Legacy),
            "ledger" => Some(AccountType::Ledger),
            "watch" => Some(AccountType::Watch),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WalletType {
    Standard,
    Legacy,
    Ledger,
    Watch,
}

impl WalletType {
    pub fn as_str(self) -> &'static str {
        match self {
            WalletType::Standard => "standard",
            WalletType::Legacy => "legacy",
            WalletType::Ledger => "ledger",
            WalletType::Watch => "watch",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "standard" => Some(WalletType::Standard),
            "legacy" => Some(WalletType::Legacy),
            "ledger" => Some(WalletType::Ledger),
            "watch" => Some(WalletType::Watch),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub id: Uuid,
    pub name: String,
    pub wallet_type: WalletType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_mnemonic: Option<String>,
}

impl Wallet {
    pub fn new(name: impl Into<String>, wallet_type: WalletType) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            wallet_type,
            encrypted_mnemonic: None,
        }
    }
}

/// A persisted account. `(address, blockchain)` is unique across the store.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub address: String,
    pub blockchain: BlockchainServiceKey,
    pub account_type: AccountType,
    /// Ciphertext handed out by the secret service; never the plaintext key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_key: Option<String>,
}

impl Account {
    pub fn matches(&self, address: &str, blockchain: &BlockchainServiceKey) -> bool {
        self.address == address && &self.blockchain == blockchain
    }
}

/// Address derived from a key by one chain service, before persistence.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DerivedAccount {
    pub address: String,
    pub blockchain: BlockchainServiceKey,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Token {
    pub hash: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Balance entry as returned by a chain backend. `amount` is the chain-native
/// integer amount, not yet scaled by `token.decimals`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RawTokenBalance {
    pub token: Token,
    pub amount: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    pub token: Token,
    pub blockchain: BlockchainServiceKey,
    pub amount_raw: String,
    pub amount_number: f64,
    pub exchange_ratio: f64,
    pub exchange_amount: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioBalance {
    pub address: String,
    pub blockchain: BlockchainServiceKey,
    pub tokens_balances: Vec<TokenBalance>,
    pub exchange_total: f64,
}

/// One token aggregated across every address holding it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenHolding {
    pub token: Token,
    pub blockchain: BlockchainServiceKey,
    pub amount_number: f64,
    pub exchange_ratio: f64,
    pub exchange_amount: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TokenPrice {
    pub hash: String,
    pub price: f64,
}

/// Point-in-time price table per chain.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeSnapshot {
    pub prices: HashMap<BlockchainServiceKey, Vec<TokenPrice>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,
}

impl ExchangeSnapshot {
    pub fn new(prices: HashMap<BlockchainServiceKey, Vec<TokenPrice>>) -> Self {
        Self {
            prices,
            fetched_at: Some(Utc::now()),
        }
    }

    pub fn insert(
        &mut self,
        blockchain: BlockchainServiceKey,
        hash: impl Into<String>,
        price: f64,
    ) {
        let hash = hash.into();
        let entries = self.prices.entry(blockchain).or_default();
        match entries.iter_mut().find(|entry| entry.hash == hash) {
            Some(existing) => existing.price = price,
            None => entries.push(TokenPrice { hash, price }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prices.values().all(|entries| entries.is_empty())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Mainnet,
    Testnet,
    Custom,
}

impl NetworkType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "mainnet" => Some(NetworkType::Mainnet),
            "testnet" => Some(NetworkType::Testnet),
            "custom" => Some(NetworkType::Custom),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    #[serde(rename = "type")]
    pub network_type: NetworkType,
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct BalanceRequest {
    pub address: String,
    pub blockchain: BlockchainServiceKey,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BalanceFailure {
    pub address: String,
    pub blockchain: BlockchainServiceKey,
    pub error: String,
}

/// Combined view over every requested `(address, blockchain)` pair.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioResult {
    pub balances: Vec<PortfolioBalance>,
    pub tokens: Vec<TokenHolding>,
    pub failures: Vec<BalanceFailure>,
    pub pending: Vec<BalanceRequest>,
    pub exchange_total: f64,
    pub is_loading: bool,
}

impl PortfolioResult {
    pub fn loading() -> Self {
        Self {
            is_loading: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccountBackup {
    #[serde(rename = "type")]
    pub account_type: AccountType,
    pub address: String,
    pub blockchain: BlockchainServiceKey,
    pub id_wallet: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WalletBackup {
    pub id: Uuid,
    pub name: String,
    pub wallet_type: WalletType,
    pub mnemonic: String,
    pub accounts: Vec<AccountBackup>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct BackupDocument {
    pub wallets: Vec<WalletBackup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportKeyPayload {
    pub key: String,
    pub passphrase: String,
    #[serde(default)]
    pub wallet_id: Option<Uuid>,
    #[serde(default)]
    pub wallet_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub address: String,
    pub blockchain: BlockchainServiceKey,
    #[serde(rename = "type")]
    pub account_type: AccountType,
}

impl From<&Account> for AccountResponse {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            wallet_id: account.wallet_id,
            address: account.address.clone(),
            blockchain: account.blockchain.clone(),
            account_type: account.account_type,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletResponse {
    pub id: Uuid,
    pub name: String,
    pub wallet_type: WalletType,
}

impl From<&Wallet> for WalletResponse {
    fn from(wallet: &Wallet) -> Self {
        Self {
            id: wallet.id,
            name: wallet.name.clone(),
            wallet_type: wallet.wallet_type,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResponse {
    pub wallet: WalletResponse,
    pub imported_accounts: Vec<AccountResponse>,
    pub duplicate_count: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct PassphrasePayload {
    pub passphrase: String,
}

#[derive(Debug, Deserialize)]
pub struct ExportKeyPayload {
    pub address: String,
    pub blockchain: BlockchainServiceKey,
    pub passphrase: String,
}

#[derive(Debug, Serialize)]
pub struct ExportKeyResponse {
    pub key: String,
}

#[derive(Debug, Serialize)]
pub struct BackupResponse {
    pub content: String,
    pub wallets: usize,
    pub accounts: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blockchain_key_is_normalized() {
        let key: BlockchainServiceKey = " Ethereum ".parse().expect("should parse");
        assert_eq!(key.as_str(), "ethereum");
        assert!("  ".parse::<BlockchainServiceKey>().is_err());
    }

    #[test]
    fn blockchain_key_is_normalized_when_decoded() {
        let key: BlockchainServiceKey = serde_json::from_str("\" Ethereum\"").expect("key");
        assert_eq!(key, BlockchainServiceKey::new("ethereum"));
        assert!(serde_json::from_str::<BlockchainServiceKey>("\"\"").is_err());

        let request: BalanceRequest =
            serde_json::from_str(r#"{"address":"0xabc","blockchain":"NEO3"}"#).expect("request");
        assert_eq!(request.blockchain.as_str(), "neo3");

        let networks: HashMap<BlockchainServiceKey, NetworkConfig> =
            serde_json::from_str(r#"{"Ethereum":{"type":"mainnet","url":"http://a"}}"#)
                .expect("map keys");
        assert!(networks.contains_key("ethereum"));
        assert_eq!(serde_json::to_string(&key).expect("encode"), "\"ethereum\"");
    }

    #[test]
    fn snapshot_insert_replaces_existing_hash() {
        let mut snapshot = ExchangeSnapshot::default();
        assert!(snapshot.is_empty());
        snapshot.insert("neo3".into(), "h1", 1.0);
        snapshot.insert("neo3".into(), "h1", 2.5);
        let entries = &snapshot.prices[&BlockchainServiceKey::new("neo3")];
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].price, 2.5);
    }

    #[test]
    fn network_config_uses_type_field() {
        let json = r#"{"type":"testnet","url":"http://localhost:8545"}"#;
        let network: NetworkConfig = serde_json::from_str(json).expect("should decode");
        assert_eq!(network.network_type, NetworkType::Testnet);
        assert_eq!(NetworkType::parse("MAINNET"), Some(NetworkType::Mainnet));
    }
}
