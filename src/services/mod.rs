pub mod cache;
pub mod chain;
pub mod circuit_breaker;
pub mod payment_verifier;
pub mod pipeline;
pub mod price_feed;

pub use cache::CacheService;
pub use chain::{ChainProvider, EthersChainProvider};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use payment_verifier::{PaymentConfig, PaymentVerifier};
pub use pipeline::{PipelineConfig, PricePipeline};
pub use price_feed::{PriceFeedConfig, PriceFeedService};
