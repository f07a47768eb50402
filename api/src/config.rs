use std::{collections::HashMap, env, time::Duration};

use anyhow::{Context, Result};
use domain::NetworkType;
use serde::{Deserialize, Serialize};

const DEFAULT_RPC_URL: &str = "http://localhost:8545";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvmChainSettings {
    pub key: String,
    pub chain_id: u64,
    pub native_symbol: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackedTokenConfig {
    pub blockchain: String,
    pub hash: String,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Clone)]
pub struct AppConfig {
    /// In-memory store when absent.
    pub database_url: Option<String>,
    pub port: u16,
    pub frontend_origins: Vec<String>,
    pub evm_chains: Vec<EvmChainSettings>,
    pub chain_rpc_urls: HashMap<String, String>,
    pub network_type: NetworkType,
    pub tracked_tokens: Vec<TrackedTokenConfig>,
    pub token_prices: HashMap<String, f64>,
    pub token_price_ids: HashMap<String, String>,
    pub coingecko_api_base: String,
    pub exchange_refresh_interval: Duration,
    pub balance_max_concurrency: usize,
    pub balance_fetch_timeout: Duration,
    pub import_commit_attempts: u32,
    /// In-process sealing when absent. Only allowed with the in-memory store
    /// outside production.
    pub secret_service_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty());
        let secret_service_url = env::var("SECRET_SERVICE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());

        check_secret_storage(
            is_production_environment(),
            database_url.as_deref(),
            secret_service_url.as_deref(),
        )?;

        let network_type = match env::var("NETWORK_TYPE") {
            Ok(raw) => NetworkType::parse(&raw).with_context(|| {
                format!("NETWORK_TYPE must be mainnet, testnet or custom, got {raw}")
            })?,
            Err(_) => NetworkType::Mainnet,
        };

        Ok(Self {
            database_url,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8081".to_string())
                .parse()
                .context("PORT must be a valid u16")?,
            frontend_origins: parse_origins(),
            evm_chains: parse_evm_chains("EVM_CHAINS"),
            chain_rpc_urls: parse_chain_urls("CHAIN_RPC_URLS"),
            network_type,
            tracked_tokens: parse_tracked_tokens("TRACKED_TOKENS"),
            token_prices: parse_token_prices("TOKEN_PRICES"),
            token_price_ids: parse_token_price_ids("TOKEN_PRICE_IDS"),
            coingecko_api_base: env::var("COINGECKO_API_BASE")
                .unwrap_or_else(|_| "https://api.coingecko.com/api/v3".to_string()),
            exchange_refresh_interval: parse_duration_seconds("EXCHANGE_REFRESH_SECS", 60),
            balance_max_concurrency: parse_usize("BALANCE_MAX_CONCURRENCY", 8),
            balance_fetch_timeout: parse_duration_millis("BALANCE_FETCH_TIMEOUT_MS", 10_000),
            import_commit_attempts: parse_usize("IMPORT_COMMIT_ATTEMPTS", 3) as u32,
            secret_service_url,
        })
    }

    pub fn rpc_url_for(&self, chain_key: &str) -> String {
        self.chain_rpc_urls
            .get(chain_key)
            .cloned()
            .unwrap_or_else(|| DEFAULT_RPC_URL.to_string())
    }
}

/// In-process sealing is only accepted with the in-memory store outside
/// production.
fn check_secret_storage(
    production: bool,
    database_url: Option<&str>,
    secret_service_url: Option<&str>,
) -> Result<()> {
    if production && database_url.is_none() {
        anyhow::bail!("DATABASE_URL must be set in production");
    }
    if secret_service_url.is_none() {
        if production {
            anyhow::bail!("SECRET_SERVICE_URL must be set in production");
        }
        if database_url.is_some() {
            anyhow::bail!(
                "SECRET_SERVICE_URL must be set when DATABASE_URL is; \
                 in-process sealing would persist keys unencrypted"
            );
        }
    }
    Ok(())
}

fn is_production_environment() -> bool {
    env::var("ENVIRONMENT")
        .or_else(|_| env::var("ENV"))
        .map(|e| {
            let lower = e.to_lowercase();
            lower == "production" || lower == "prod"
        })
        .unwrap_or(false)
}

fn parse_origins() -> Vec<String> {
    if let Ok(list) = env::var("FRONTEND_ORIGINS") {
        split_list(&list)
    } else {
        vec!["http://localhost:3000".to_string()]
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter_map(|item| {
            let trimmed = item.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect()
}

fn parse_duration_seconds(key: &str, default: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default))
}

fn parse_duration_millis(key: &str, default: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(default))
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn parse_evm_chains(key: &str) -> Vec<EvmChainSettings> {
    let raw = env::var(key).unwrap_or_else(|_| "ethereum:1:ETH".to_string());
    evm_chains_from_str(&raw)
}

fn evm_chains_from_str(raw: &str) -> Vec<EvmChainSettings> {
    split_list(raw)
        .iter()
        .filter_map(|item| {
            let parts: Vec<_> = item.split(':').map(str::trim).collect();
            let key = parts.first()?.to_lowercase();
            let chain_id = parts.get(1)?.parse::<u64>().ok()?;
            let native_symbol = parts
                .get(2)
                .filter(|s| !s.is_empty())
                .map(|s| s.to_uppercase())
                .unwrap_or_else(|| "ETH".to_string());
            if key.is_empty() {
                return None;
            }
            Some(EvmChainSettings {
                key,
                chain_id,
                native_symbol,
            })
        })
        .collect()
}

fn parse_tracked_tokens(key: &str) -> Vec<TrackedTokenConfig> {
    match env::var(key) {
        Ok(raw) => tracked_tokens_from_str(&raw),
        Err(_) => Vec::new(),
    }
}

fn tracked_tokens_from_str(raw: &str) -> Vec<TrackedTokenConfig> {
    split_list(raw)
        .iter()
        .filter_map(|item| {
            let parts: Vec<_> = item.split(':').map(str::trim).collect();
            if parts.len() < 3 {
                return None;
            }
            let blockchain = parts[0].to_lowercase();
            let hash = parts[1].to_string();
            let symbol = parts[2].to_uppercase();
            let decimals = parts
                .get(3)
                .and_then(|d| d.parse::<u8>().ok())
                .unwrap_or(18);
            if blockchain.is_empty() || hash.is_empty() || symbol.is_empty() {
                return None;
            }
            Some(TrackedTokenConfig {
                blockchain,
                hash,
                symbol,
                decimals,
            })
        })
        .collect()
}

fn parse_token_prices(key: &str) -> HashMap<String, f64> {
    match env::var(key) {
        Ok(raw) => token_prices_from_str(&raw),
        Err(_) => HashMap::new(),
    }
}

fn token_prices_from_str(raw: &str) -> HashMap<String, f64> {
    raw.split(',')
        .filter_map(|item| {
            let (symbol, value) = item.split_once('=')?;
            let price = value.trim().parse::<f64>().ok()?;
            let symbol = symbol.trim().to_uppercase();
            if symbol.is_empty() {
                return None;
            }
            Some((symbol, price))
        })
        .collect()
}

fn parse_token_price_ids(key: &str) -> HashMap<String, String> {
    let raw = match env::var(key) {
        Ok(v) => v,
        Err(_) => return HashMap::new(),
    };

    raw.split(',')
        .filter_map(|item| {
            let (symbol, id) = item.split_once(':')?;
            let symbol = symbol.trim().to_uppercase();
            let id = id.trim().to_lowercase();
            if symbol.is_empty() || id.is_empty() {
                return None;
            }
            Some((symbol, id))
        })
        .collect()
}

fn parse_chain_urls(key: &str) -> HashMap<String, String> {
    match env::var(key) {
        Ok(raw) => chain_urls_from_str(&raw),
        Err(_) => HashMap::new(),
    }
}

fn chain_urls_from_str(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|item| {
            let (chain, url) = item.split_once('=')?;
            let chain = chain.trim().to_lowercase();
            let url = url.trim();
            if chain.is_empty() || url.is_empty() {
                return None;
            }
            Some((chain, url.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evm_chains_parse_with_symbol_default() {
        let chains = evm_chains_from_str("Ethereum:1:eth, bsc:56:BNB, polygon:137, bad, :5:X");
        assert_eq!(chains.len(), 3);
        assert_eq!(chains[0].key, "ethereum");
        assert_eq!(chains[0].native_symbol, "ETH");
        assert_eq!(chains[1].chain_id, 56);
        assert_eq!(chains[2].native_symbol, "ETH");
    }

    #[test]
    fn tracked_tokens_default_to_18_decimals() {
        let tokens = tracked_tokens_from_str(
            "ethereum:0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48:usdc:6,bsc:0x2170:ETH,broken",
        );
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].symbol, "USDC");
        assert_eq!(tokens[0].decimals, 6);
        assert_eq!(tokens[1].blockchain, "bsc");
        assert_eq!(tokens[1].decimals, 18);
    }

    #[test]
    fn chain_urls_and_prices_skip_malformed_entries() {
        let urls = chain_urls_from_str("ethereum=http://a, BSC = http://b ,broken,=http://c");
        assert_eq!(urls.len(), 2);
        assert_eq!(urls.get("bsc").map(String::as_str), Some("http://b"));

        let prices = token_prices_from_str("eth=3000,USDC=1,bad=x");
        assert_eq!(prices.get("ETH"), Some(&3000.0));
        assert_eq!(prices.len(), 2);
    }

    #[test]
    fn in_process_sealing_requires_the_in_memory_store() {
        assert!(check_secret_storage(false, None, None).is_ok());
        assert!(check_secret_storage(false, Some("postgres://db"), None).is_err());
        assert!(check_secret_storage(false, Some("postgres://db"), Some("http://sealer")).is_ok());
        assert!(check_secret_storage(true, None, Some("http://sealer")).is_err());
        assert!(check_secret_storage(true, Some("postgres://db"), None).is_err());
        assert!(check_secret_storage(true, Some("postgres://db"), Some("http://sealer")).is_ok());
    }
}
