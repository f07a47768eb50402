use std::{
    collections::HashSet,
    sync::Arc,
    time::{Duration, Instant},
};

use blockchain::{BlockchainServiceRegistry, ChainError};
use domain::{BalanceFailure, BalanceRequest, ExchangeSnapshot, PortfolioBalance, PortfolioResult};
use metrics::{counter, histogram};
use portfolio_engine::{build_portfolio_balance, combine, ExchangeRateTable};
use tokio::{sync::Semaphore, time::timeout};
use tracing::{info, warn};

enum FetchOutcome {
    Settled(PortfolioBalance),
    Failed(BalanceFailure),
    Pending(BalanceRequest),
}

/// Fans balance reads out over the registry and folds them into one
/// [`PortfolioResult`]. Each request settles independently; one failing
/// address never hides the others.
pub struct BalanceAggregator {
    registry: Arc<BlockchainServiceRegistry>,
    max_concurrency: usize,
    fetch_timeout: Duration,
}

impl BalanceAggregator {
    pub fn new(
        registry: Arc<BlockchainServiceRegistry>,
        max_concurrency: usize,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            max_concurrency: max_concurrency.max(1),
            fetch_timeout,
        }
    }

    /// Without an exchange snapshot nothing is fetched and the result is
    /// loading. The deadline covers waiting for a permit as well as the read,
    /// so requests queued or still running after `fetch_timeout` are reported
    /// as pending.
    pub async fn get_portfolio(
        &self,
        requests: &[BalanceRequest],
        exchange: Option<Arc<ExchangeSnapshot>>,
    ) -> PortfolioResult {
        let Some(exchange) = exchange else {
            return PortfolioResult::loading();
        };
        let table = Arc::new(ExchangeRateTable::from_snapshot(&exchange));
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));

        let mut seen = HashSet::with_capacity(requests.len());
        let mut handles = Vec::with_capacity(requests.len());
        for request in requests.iter().filter(|r| seen.insert(*r)) {
            let request = request.clone();
            let service = self.registry.get(&request.blockchain);
            let table = table.clone();
            let semaphore = semaphore.clone();
            let fetch_timeout = self.fetch_timeout;
            let task_request = request.clone();
            let handle = tokio::spawn(async move {
                let request = task_request;
                let Some(service) = service else {
                    let err = ChainError::UnknownBlockchain(request.blockchain.clone());
                    return FetchOutcome::Failed(failure(&request, err.to_string()));
                };
                let started = Instant::now();
                let fetched = timeout(fetch_timeout, async {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|err| ChainError::network(&request.blockchain, err))?;
                    service.get_balance(&request.address).await
                })
                .await;
                match fetched {
                    Ok(Ok(raw)) => {
                        histogram!("balance_fetch_seconds").record(started.elapsed().as_secs_f64());
                        FetchOutcome::Settled(build_portfolio_balance(
                            &request.address,
                            &request.blockchain,
                            raw,
                            &table,
                        ))
                    }
                    Ok(Err(err)) => FetchOutcome::Failed(failure(&request, err.to_string())),
                    Err(_) => FetchOutcome::Pending(request),
                }
            });
            handles.push((request, handle));
        }

        let mut balances = Vec::new();
        let mut failures = Vec::new();
        let mut pending = Vec::new();
        for (request, handle) in handles {
            match handle.await {
                Ok(FetchOutcome::Settled(balance)) => balances.push(balance),
                Ok(FetchOutcome::Failed(balance_failure)) => {
                    counter!("balance_fetch_failures_total").increment(1);
                    warn!(
                        address = %balance_failure.address,
                        blockchain = %balance_failure.blockchain,
                        error = %balance_failure.error,
                        "balance fetch failed"
                    );
                    failures.push(balance_failure);
                }
                Ok(FetchOutcome::Pending(request)) => pending.push(request),
                Err(join_err) => {
                    warn!(error = %join_err, "balance task join error");
                    failures.push(failure(&request, join_err.to_string()));
                }
            }
        }

        let result = combine(balances, failures, pending);
        info!(
            settled = result.balances.len(),
            failed = result.failures.len(),
            pending = result.pending.len(),
            exchange_total = result.exchange_total,
            "portfolio aggregated"
        );
        result
    }
}

fn failure(request: &BalanceRequest, error: String) -> BalanceFailure {
    BalanceFailure {
        address: request.address.clone(),
        blockchain: request.blockchain.clone(),
        error,
    }
}
