use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use domain::{BlockchainServiceKey, ExchangeSnapshot};
use metrics::counter;
use reqwest::Client;
use tokio::{sync::RwLock, time::sleep};
use tracing::{info, warn};

/// A priced asset: one token hash on one chain, quoted by its symbol.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackedAsset {
    pub blockchain: BlockchainServiceKey,
    pub hash: String,
    pub symbol: String,
}

#[async_trait]
pub trait ExchangeSource: Send + Sync {
    async fn fetch_snapshot(&self, assets: &[TrackedAsset]) -> Result<ExchangeSnapshot>;
}

/// Fixed prices keyed by upper-case symbol.
#[derive(Clone, Default)]
pub struct StaticExchangeSource {
    prices: HashMap<String, f64>,
}

impl StaticExchangeSource {
    pub fn new(prices: HashMap<String, f64>) -> Self {
        let prices = prices
            .into_iter()
            .map(|(symbol, price)| (symbol.to_uppercase(), price))
            .collect();
        Self { prices }
    }
}

#[async_trait]
impl ExchangeSource for StaticExchangeSource {
    async fn fetch_snapshot(&self, assets: &[TrackedAsset]) -> Result<ExchangeSnapshot> {
        let mut snapshot = ExchangeSnapshot::new(HashMap::new());
        for asset in assets {
            if let Some(price) = self.prices.get(&asset.symbol.to_uppercase()) {
                snapshot.insert(asset.blockchain.clone(), asset.hash.clone(), *price);
            }
        }
        Ok(snapshot)
    }
}

#[derive(Clone)]
pub struct CoingeckoExchangeSource {
    client: Client,
    api_base: String,
    ids: HashMap<String, String>,
}

impl CoingeckoExchangeSource {
    pub fn new(api_base: String, ids: HashMap<String, String>) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            ids,
        }
    }

    /// Configured ids win over the built-in ones. Unknown symbols get no id
    /// and are left to the fallback source.
    fn coingecko_id(&self, symbol: &str) -> Option<String> {
        let upper = symbol.to_uppercase();
        if let Some(mapped) = self.ids.get(&upper) {
            return Some(mapped.clone());
        }
        let id = match upper.as_str() {
            "ETH" | "WETH" => "ethereum",
            "BTC" => "bitcoin",
            "WBTC" => "wrapped-bitcoin",
            "USDC" => "usd-coin",
            "USDT" => "tether",
            "DAI" => "dai",
            "BNB" => "binancecoin",
            "MATIC" | "POL" => "matic-network",
            "NEO" => "neo",
            "GAS" => "gas",
            _ => return None,
        };
        Some(id.to_string())
    }
}

#[async_trait]
impl ExchangeSource for CoingeckoExchangeSource {
    async fn fetch_snapshot(&self, assets: &[TrackedAsset]) -> Result<ExchangeSnapshot> {
        let ids: BTreeSet<String> = assets
            .iter()
            .filter_map(|a| self.coingecko_id(&a.symbol))
            .collect();
        if ids.is_empty() {
            return Ok(ExchangeSnapshot::new(HashMap::new()));
        }
        let joined = ids.into_iter().collect::<Vec<_>>().join(",");
        let url = format!("{}/simple/price", self.api_base);
        let resp = self
            .client
            .get(url)
            .query(&[("ids", joined.as_str()), ("vs_currencies", "usd")])
            .send()
            .await
            .context("coingecko request failed")?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("coingecko returned status {}", status));
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to decode coingecko price response")?;

        let mut snapshot = ExchangeSnapshot::new(HashMap::new());
        for asset in assets {
            let Some(id) = self.coingecko_id(&asset.symbol) else {
                continue;
            };
            let price = body
                .get(&id)
                .and_then(|entry| entry.get("usd"))
                .and_then(|value| value.as_f64());
            match price {
                Some(price) => snapshot.insert(asset.blockchain.clone(), asset.hash.clone(), price),
                None => warn!(symbol = %asset.symbol, %id, "coingecko price missing"),
            }
        }
        Ok(snapshot)
    }
}

/// Asks `primary` first and fills whatever it could not price from `fallback`.
#[derive(Clone)]
pub struct FallbackExchangeSource<P, F>
where
    P: ExchangeSource,
    F: ExchangeSource,
{
    primary: Arc<P>,
    fallback: Arc<F>,
}

impl<P, F> FallbackExchangeSource<P, F>
where
    P: ExchangeSource,
    F: ExchangeSource,
{
    pub fn new(primary: Arc<P>, fallback: Arc<F>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl<P, F> ExchangeSource for FallbackExchangeSource<P, F>
where
    P: ExchangeSource,
    F: ExchangeSource,
{
    async fn fetch_snapshot(&self, assets: &[TrackedAsset]) -> Result<ExchangeSnapshot> {
        let mut snapshot = match self.primary.fetch_snapshot(assets).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "primary exchange source failed, using fallback");
                let snapshot = self.fallback.fetch_snapshot(assets).await?;
                if snapshot.is_empty() && !assets.is_empty() {
                    return Err(err.context("fallback exchange source priced nothing"));
                }
                return Ok(snapshot);
            }
        };

        let missing: Vec<TrackedAsset> = assets
            .iter()
            .filter(|asset| !is_priced(&snapshot, asset))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(snapshot);
        }
        match self.fallback.fetch_snapshot(&missing).await {
            Ok(filler) => {
                for (blockchain, entries) in filler.prices {
                    for entry in entries {
                        snapshot.insert(blockchain.clone(), entry.hash, entry.price);
                    }
                }
            }
            Err(err) => warn!(
                error = %err,
                missing = missing.len(),
                "fallback exchange source failed"
            ),
        }
        Ok(snapshot)
    }
}

fn is_priced(snapshot: &ExchangeSnapshot, asset: &TrackedAsset) -> bool {
    price_of(snapshot, asset).is_some()
}

fn price_of(snapshot: &ExchangeSnapshot, asset: &TrackedAsset) -> Option<f64> {
    snapshot
        .prices
        .get(&asset.blockchain)?
        .iter()
        .find(|entry| entry.hash.eq_ignore_ascii_case(&asset.hash))
        .map(|entry| entry.price)
}

/// Latest exchange snapshot shared by every portfolio request. Stays empty
/// until the first successful refresh; a failed refresh keeps the previous
/// snapshot, and assets a refresh leaves unpriced keep their previous price.
pub struct ExchangeFeed {
    source: Arc<dyn ExchangeSource>,
    assets: Vec<TrackedAsset>,
    current: RwLock<Option<Arc<ExchangeSnapshot>>>,
}

impl ExchangeFeed {
    pub fn new(source: Arc<dyn ExchangeSource>, assets: Vec<TrackedAsset>) -> Self {
        Self {
            source,
            assets,
            current: RwLock::new(None),
        }
    }

    pub async fn current(&self) -> Option<Arc<ExchangeSnapshot>> {
        self.current.read().await.clone()
    }

    pub async fn refresh(&self) -> Result<Arc<ExchangeSnapshot>> {
        match self.source.fetch_snapshot(&self.assets).await {
            Ok(mut snapshot) => {
                let mut current = self.current.write().await;
                let mut carried = 0usize;
                if let Some(previous) = current.as_deref() {
                    for asset in &self.assets {
                        if is_priced(&snapshot, asset) {
                            continue;
                        }
                        if let Some(price) = price_of(previous, asset) {
                            snapshot.insert(asset.blockchain.clone(), asset.hash.clone(), price);
                            carried += 1;
                        }
                    }
                }
                let snapshot = Arc::new(snapshot);
                *current = Some(snapshot.clone());
                info!(assets = self.assets.len(), carried, "exchange snapshot refreshed");
                Ok(snapshot)
            }
            Err(err) => {
                counter!("exchange_refresh_failures_total").increment(1);
                Err(err)
            }
        }
    }

    pub fn spawn(self: Arc<Self>, interval: Duration) {
        let interval = interval.max(Duration::from_secs(5));
        tokio::spawn(async move {
            loop {
                if let Err(err) = self.refresh().await {
                    warn!(error = %err, "exchange refresh failed, keeping previous snapshot");
                }
                sleep(interval).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn asset(blockchain: &str, hash: &str, symbol: &str) -> TrackedAsset {
        TrackedAsset {
            blockchain: blockchain.into(),
            hash: hash.to_string(),
            symbol: symbol.to_string(),
        }
    }

    fn priced_at(snapshot: &ExchangeSnapshot, blockchain: &str, hash: &str) -> Option<f64> {
        snapshot
            .prices
            .get(&BlockchainServiceKey::new(blockchain))
            .and_then(|entries| entries.iter().find(|e| e.hash == hash))
            .map(|e| e.price)
    }

    struct Flaky {
        fail: AtomicBool,
        price: f64,
    }

    #[async_trait]
    impl ExchangeSource for Flaky {
        async fn fetch_snapshot(&self, assets: &[TrackedAsset]) -> Result<ExchangeSnapshot> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(anyhow::anyhow!("upstream down"));
            }
            let mut snapshot = ExchangeSnapshot::default();
            for asset in assets.iter().filter(|a| a.symbol == "ETH") {
                snapshot.insert(asset.blockchain.clone(), asset.hash.clone(), self.price);
            }
            Ok(snapshot)
        }
    }

    #[test]
    fn coingecko_ids_come_from_config_or_known_symbols() {
        let source = CoingeckoExchangeSource::new(
            "https://api.coingecko.com/api/v3/".to_string(),
            HashMap::from([("FLM".to_string(), "flamingo-finance".to_string())]),
        );
        assert_eq!(source.coingecko_id("flm").as_deref(), Some("flamingo-finance"));
        assert_eq!(source.coingecko_id("weth").as_deref(), Some("ethereum"));
        assert_eq!(source.coingecko_id("PEPE2"), None);
    }

    #[tokio::test]
    async fn coingecko_skips_request_when_nothing_is_mapped() {
        let source = CoingeckoExchangeSource::new("http://127.0.0.1:9".to_string(), HashMap::new());
        let snapshot = source
            .fetch_snapshot(&[asset("ethereum", "0xdead", "UNKNOWN")])
            .await
            .expect("no request made");
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn static_source_prices_known_symbols_only() {
        let source = StaticExchangeSource::new(HashMap::from([("usdc".to_string(), 1.0)]));
        let snapshot = source
            .fetch_snapshot(&[asset("ethereum", "0xa0b8", "USDC"), asset("ethereum", "0x0", "ETH")])
            .await
            .expect("static");
        assert_eq!(priced_at(&snapshot, "ethereum", "0xa0b8"), Some(1.0));
        assert_eq!(priced_at(&snapshot, "ethereum", "0x0"), None);
    }

    #[tokio::test]
    async fn fallback_fills_missing_assets() {
        let primary = Arc::new(Flaky {
            fail: AtomicBool::new(false),
            price: 3000.0,
        });
        let fallback = Arc::new(StaticExchangeSource::new(HashMap::from([
            ("ETH".to_string(), 1.0),
            ("USDC".to_string(), 1.0),
        ])));
        let source = FallbackExchangeSource::new(primary.clone(), fallback);
        let assets = [asset("ethereum", "0x0", "ETH"), asset("ethereum", "0xa0b8", "USDC")];

        let snapshot = source.fetch_snapshot(&assets).await.expect("snapshot");
        assert_eq!(priced_at(&snapshot, "ethereum", "0x0"), Some(3000.0));
        assert_eq!(priced_at(&snapshot, "ethereum", "0xa0b8"), Some(1.0));

        primary.fail.store(true, Ordering::SeqCst);
        let snapshot = source.fetch_snapshot(&assets).await.expect("fallback");
        assert_eq!(priced_at(&snapshot, "ethereum", "0x0"), Some(1.0));
    }

    #[tokio::test]
    async fn empty_fallback_after_primary_failure_is_an_error() {
        let primary = Arc::new(Flaky {
            fail: AtomicBool::new(true),
            price: 3000.0,
        });
        let fallback = Arc::new(StaticExchangeSource::new(HashMap::new()));
        let source = FallbackExchangeSource::new(primary, fallback);
        assert!(source
            .fetch_snapshot(&[asset("ethereum", "0x0", "ETH")])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn feed_survives_primary_outage_with_empty_fallback() {
        let primary = Arc::new(Flaky {
            fail: AtomicBool::new(false),
            price: 3000.0,
        });
        let source = FallbackExchangeSource::new(
            primary.clone(),
            Arc::new(StaticExchangeSource::new(HashMap::new())),
        );
        let feed = ExchangeFeed::new(Arc::new(source), vec![asset("ethereum", "0x0", "ETH")]);
        feed.refresh().await.expect("first refresh");

        primary.fail.store(true, Ordering::SeqCst);
        assert!(feed.refresh().await.is_err());
        let current = feed.current().await.expect("snapshot kept");
        assert_eq!(priced_at(&current, "ethereum", "0x0"), Some(3000.0));
    }

    #[tokio::test]
    async fn refresh_carries_forward_prices_it_could_not_fetch() {
        let primary = Arc::new(Flaky {
            fail: AtomicBool::new(false),
            price: 3000.0,
        });
        let fallback = Arc::new(StaticExchangeSource::new(HashMap::from([(
            "USDC".to_string(),
            1.0,
        )])));
        let source = FallbackExchangeSource::new(primary.clone(), fallback);
        let feed = ExchangeFeed::new(
            Arc::new(source),
            vec![asset("ethereum", "0x0", "ETH"), asset("ethereum", "0xa0b8", "USDC")],
        );
        feed.refresh().await.expect("first refresh");

        primary.fail.store(true, Ordering::SeqCst);
        let current = feed.refresh().await.expect("fallback priced USDC");
        assert_eq!(priced_at(&current, "ethereum", "0x0"), Some(3000.0));
        assert_eq!(priced_at(&current, "ethereum", "0xa0b8"), Some(1.0));
    }

    #[tokio::test]
    async fn feed_keeps_previous_snapshot_when_refresh_fails() {
        let source = Arc::new(Flaky {
            fail: AtomicBool::new(false),
            price: 2.0,
        });
        let feed = ExchangeFeed::new(source.clone(), vec![asset("ethereum", "0x0", "ETH")]);
        assert!(feed.current().await.is_none());

        feed.refresh().await.expect("first refresh");
        source.fail.store(true, Ordering::SeqCst);
        assert!(feed.refresh().await.is_err());

        let current = feed.current().await.expect("stale snapshot kept");
        assert_eq!(priced_at(&current, "ethereum", "0x0"), Some(2.0));
    }
}
