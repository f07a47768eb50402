use std::collections::HashMap;

use domain::{
    BalanceFailure, BalanceRequest, BlockchainServiceKey, ExchangeSnapshot, PortfolioBalance,
    PortfolioResult, RawTokenBalance, TokenBalance, TokenHolding,
};
use serde::Serialize;
use tracing::warn;

/// Lookup of `(blockchain, token hash)` to price. Hashes compare
/// case-insensitively; anything missing is worth 0.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExchangeRateTable {
    prices: HashMap<BlockchainServiceKey, HashMap<String, f64>>,
}

impl ExchangeRateTable {
    pub fn from_snapshot(snapshot: &ExchangeSnapshot) -> Self {
        let prices = snapshot
            .prices
            .iter()
            .map(|(blockchain, entries)| {
                let by_hash = entries
                    .iter()
                    .map(|entry| (entry.hash.to_lowercase(), entry.price))
                    .collect();
                (blockchain.clone(), by_hash)
            })
            .collect();
        Self { prices }
    }

    pub fn ratio(&self, hash: &str, blockchain: &BlockchainServiceKey) -> f64 {
        self.prices
            .get(blockchain)
            .and_then(|by_hash| by_hash.get(&hash.to_lowercase()))
            .copied()
            .filter(|price| price.is_finite())
            .unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.prices.values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scales a chain-native integer amount by `decimals`. Amounts that already
/// carry a decimal point are taken as scaled. Lossy; display only.
pub fn scale_amount(raw: &str, decimals: u8) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.contains('.') {
        return raw.parse::<f64>().ok().filter(|v| v.is_finite());
    }
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let digits = raw.trim_start_matches('0');
    if digits.is_empty() {
        return Some(0.0);
    }
    let decimals = decimals as usize;
    let text = if decimals == 0 {
        digits.to_string()
    } else if digits.len() > decimals {
        let (int_part, frac_part) = digits.split_at(digits.len() - decimals);
        format!("{int_part}.{frac_part}")
    } else {
        format!("0.{}{}", "0".repeat(decimals - digits.len()), digits)
    };
    text.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn build_token_balance(
    raw: RawTokenBalance,
    blockchain: &BlockchainServiceKey,
    table: &ExchangeRateTable,
) -> TokenBalance {
    let amount_number = scale_amount(&raw.amount, raw.token.decimals).unwrap_or_else(|| {
        warn!(
            %blockchain,
            token = %raw.token.hash,
            amount = %raw.amount,
            "unparseable token amount, counting as 0"
        );
        0.0
    });
    let exchange_ratio = table.ratio(&raw.token.hash, blockchain);
    TokenBalance {
        exchange_amount: amount_number * exchange_ratio,
        token: raw.token,
        blockchain: blockchain.clone(),
        amount_raw: raw.amount,
        amount_number,
        exchange_ratio,
    }
}

/// Joins one address' raw balances with the price table.
/// `exchange_total` is always the sum of the entries' `exchange_amount`.
pub fn build_portfolio_balance(
    address: &str,
    blockchain: &BlockchainServiceKey,
    raw: Vec<RawTokenBalance>,
    table: &ExchangeRateTable,
) -> PortfolioBalance {
    let tokens_balances: Vec<TokenBalance> = raw
        .into_iter()
        .map(|entry| build_token_balance(entry, blockchain, table))
        .collect();
    let exchange_total = tokens_balances.iter().map(|tb| tb.exchange_amount).sum();
    PortfolioBalance {
        address: address.to_string(),
        blockchain: blockchain.clone(),
        tokens_balances,
        exchange_total,
    }
}

/// Merges token entries across addresses by `(blockchain, hash)`. Zero
/// amounts are dropped; highest exchange value first.
pub fn token_breakdown(balances: &[PortfolioBalance]) -> Vec<TokenHolding> {
    let mut merged: Vec<TokenHolding> = Vec::new();
    let mut positions: HashMap<(BlockchainServiceKey, String), usize> = HashMap::new();

    for balance in balances {
        for entry in &balance.tokens_balances {
            if entry.amount_number == 0.0 {
                continue;
            }
            let id = (entry.blockchain.clone(), entry.token.hash.to_lowercase());
            match positions.get(&id) {
                Some(&position) => {
                    let holding = &mut merged[position];
                    holding.amount_number += entry.amount_number;
                    holding.exchange_amount += entry.exchange_amount;
                }
                None => {
                    positions.insert(id, merged.len());
                    merged.push(TokenHolding {
                        token: entry.token.clone(),
                        blockchain: entry.blockchain.clone(),
                        amount_number: entry.amount_number,
                        exchange_ratio: entry.exchange_ratio,
                        exchange_amount: entry.exchange_amount,
                    });
                }
            }
        }
    }

    merged.sort_by(|a, b| {
        b.exchange_amount
            .partial_cmp(&a.exchange_amount)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.token.symbol.cmp(&b.token.symbol))
    });
    merged
}

/// Final reduce over every settled request. Does not depend on the order in
/// which requests completed.
pub fn combine(
    balances: Vec<PortfolioBalance>,
    failures: Vec<BalanceFailure>,
    pending: Vec<BalanceRequest>,
) -> PortfolioResult {
    let exchange_total = balances.iter().map(|b| b.exchange_total).sum();
    let tokens = token_breakdown(&balances);
    PortfolioResult {
        is_loading: !pending.is_empty(),
        balances,
        tokens,
        failures,
        pending,
        exchange_total,
    }
}
