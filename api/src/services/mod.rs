pub mod evm;
pub mod exchange;
pub mod import;
pub mod portfolio;

pub use evm::{EvmBlockchainService, EvmChainConfig, TokenConfig, NATIVE_TOKEN_HASH};
pub use exchange::{
    CoingeckoExchangeSource, ExchangeFeed, ExchangeSource, FallbackExchangeSource,
    StaticExchangeSource, TrackedAsset,
};
pub use import::{ImportError, ImportKeyRequest, ImportOutcome, KeyImportPipeline};
pub use portfolio::BalanceAggregator;
