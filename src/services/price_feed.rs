use crate::error::OracleError;
use crate::metrics::{UPSTREAM_DURATION, UPSTREAM_REQUESTS};
use crate::models::PriceQuote;
use crate::services::circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
use anyhow::Result;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct PriceFeedConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before retry N; the last entry repeats
    pub retry_delays: Vec<Duration>,
}

impl Default for PriceFeedConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.zapper.fi/v2".to_string(),
            api_key: None,
            timeout: Duration::from_millis(3_000),
            max_retries: 3,
            retry_delays: vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
            ],
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PriceFeedError {
    #[error("circuit breaker is open")]
    CircuitOpen,

    #[error("price data not found in upstream response")]
    PriceNotFound,

    #[error("upstream request timed out")]
    Timeout,

    #[error("upstream network error: {0}")]
    Network(String),

    #[error("upstream returned HTTP {0}")]
    Status(u16),

    #[error("malformed upstream response: {0}")]
    Decode(String),
}

impl PriceFeedError {
    /// Network failures, timeouts, 5xx and 429 are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            PriceFeedError::Timeout | PriceFeedError::Network(_) => true,
            PriceFeedError::Status(status) => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// True when the provider itself is unreachable, as opposed to the token being unknown.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, PriceFeedError::CircuitOpen) || self.is_retryable()
    }

    pub fn into_oracle_error(self, chain_id: u32) -> OracleError {
        match self {
            PriceFeedError::PriceNotFound | PriceFeedError::Status(404) => {
                OracleError::TokenNotFound { chain_id }
            }
            PriceFeedError::CircuitOpen => {
                OracleError::ServiceUnavailable("Price provider is unreachable".to_string())
            }
            e if e.is_retryable() => OracleError::ServiceUnavailable(e.to_string()),
            e => OracleError::Internal(e.to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpstreamPrice {
    price: Option<f64>,
    market_cap: Option<f64>,
    volume: Option<f64>,
    price_change_24h: Option<f64>,
}

impl UpstreamPrice {
    fn into_quote(self) -> Result<PriceQuote, PriceFeedError> {
        let price = self.price.ok_or(PriceFeedError::PriceNotFound)?;
        Ok(PriceQuote {
            price,
            market_cap: self.market_cap.unwrap_or(0.0),
            volume: self.volume.unwrap_or(0.0),
            price_change_24h: self.price_change_24h.unwrap_or(0.0),
        })
    }
}

/// Upstream price client: retries with a fixed backoff schedule, behind a circuit breaker.
pub struct PriceFeedService {
    client: reqwest::Client,
    config: PriceFeedConfig,
    breaker: Arc<CircuitBreaker>,
}

impl PriceFeedService {
    pub fn new(config: PriceFeedConfig, breaker: Arc<CircuitBreaker>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            config,
            breaker,
        })
    }

    pub async fn fetch(&self, chain_id: u32, token_address: &str) -> Result<PriceQuote, PriceFeedError> {
        let address = token_address.to_lowercase();
        let started = Instant::now();

        let result = self
            .breaker
            .execute(|| self.fetch_with_retry(chain_id, &address))
            .await;

        match result {
            Ok(body) => {
                UPSTREAM_REQUESTS.with_label_values(&["success"]).inc();
                UPSTREAM_DURATION.observe(started.elapsed().as_secs_f64());

                let quote = body.into_quote()?;
                tracing::info!(
                    chain_id,
                    address = %address,
                    price = quote.price,
                    "Fetched price from upstream"
                );
                Ok(quote)
            }
            Err(CircuitBreakerError::Open) => {
                UPSTREAM_REQUESTS.with_label_values(&["circuit_breaker"]).inc();
                tracing::error!(
                    service = %self.breaker.name(),
                    chain_id,
                    address = %address,
                    "Price provider unavailable: circuit breaker is open"
                );
                Err(PriceFeedError::CircuitOpen)
            }
            Err(CircuitBreakerError::Inner(e)) => {
                UPSTREAM_REQUESTS.with_label_values(&["failed"]).inc();
                UPSTREAM_DURATION.observe(started.elapsed().as_secs_f64());
                tracing::error!(
                    service = %self.breaker.name(),
                    chain_id,
                    address = %address,
                    error = %e,
                    "Upstream price request failed"
                );
                Err(e)
            }
        }
    }

    async fn fetch_with_retry(&self, chain_id: u32, address: &str) -> Result<UpstreamPrice, PriceFeedError> {
        let mut retries = 0;
        loop {
            match self.request_once(chain_id, address).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && retries < self.config.max_retries => {
                    let delay = self.retry_delay(retries);
                    retries += 1;
                    tracing::warn!(
                        retry_count = retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying upstream price request"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn retry_delay(&self, retry: u32) -> Duration {
        let delays = &self.config.retry_delays;
        delays
            .get(retry as usize)
            .or_else(|| delays.last())
            .copied()
            .unwrap_or_default()
    }

    async fn request_once(&self, chain_id: u32, address: &str) -> Result<UpstreamPrice, PriceFeedError> {
        let url = format!("{}/price", self.config.base_url.trim_end_matches('/'));
        let mut request = self
            .client
            .get(url)
            .query(&[("addresses[]", address.to_string()), ("networks[]", chain_id.to_string())]);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(Self::transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(PriceFeedError::Status(status.as_u16()));
        }

        response.json::<UpstreamPrice>().await.map_err(|e| {
            if e.is_timeout() {
                PriceFeedError::Timeout
            } else {
                PriceFeedError::Decode(e.to_string())
            }
        })
    }

    fn transport_error(e: reqwest::Error) -> PriceFeedError {
        if e.is_timeout() {
            PriceFeedError::Timeout
        } else {
            PriceFeedError::Network(e.to_string())
        }
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.breaker.state().await
    }

    pub async fn reset_circuit_breaker(&self) {
        self.breaker.reset().await;
    }
}
