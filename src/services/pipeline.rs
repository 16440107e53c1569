use crate::error::OracleError;
use crate::metrics::{CACHE_HITS, CACHE_MISSES};
use crate::models::{PaymentFailure, PaymentHeaders, PriceQuery, PriceQuote};
use crate::services::payment_verifier::{PaymentConfig, PaymentVerifier};
use crate::services::price_feed::PriceFeedService;
use crate::services::CacheService;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub price_ttl_secs: u64,
    /// TTL of the last-known-good shadow copy; `None` disables stale fallback
    pub stale_ttl_secs: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            price_ttl_secs: 60,
            stale_ttl_secs: Some(600),
        }
    }
}

/// Validate, verify payment, then serve the quote from cache or upstream.
pub struct PricePipeline {
    cache: Arc<CacheService>,
    verifier: Arc<PaymentVerifier>,
    price_feed: Arc<PriceFeedService>,
    config: PipelineConfig,
}

impl PricePipeline {
    pub fn new(
        cache: Arc<CacheService>,
        verifier: Arc<PaymentVerifier>,
        price_feed: Arc<PriceFeedService>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            cache,
            verifier,
            price_feed,
            config,
        }
    }

    pub fn payment_config(&self) -> &PaymentConfig {
        self.verifier.config()
    }

    pub fn price_feed(&self) -> &Arc<PriceFeedService> {
        &self.price_feed
    }

    pub fn cache(&self) -> &Arc<CacheService> {
        &self.cache
    }

    pub async fn handle(&self, body: &Value, headers: &PaymentHeaders) -> Result<PriceQuote, OracleError> {
        let query = PriceQuery::from_body(body)?;

        let Some(proof) = headers.to_proof() else {
            return Err(OracleError::PaymentRequired {
                missing: headers.missing(),
            });
        };

        // A verified payment stays consumed whatever happens below
        let verification = self.verifier.verify(&proof).await;
        if !verification.valid {
            let failure = verification
                .failure
                .unwrap_or(PaymentFailure::VerificationFailed);
            return Err(OracleError::PaymentInvalid(failure));
        }

        let cache_key = query.cache_key();
        if let Some(quote) = self.cache.get::<PriceQuote>(&cache_key).await {
            CACHE_HITS.inc();
            tracing::info!(
                chain_id = query.chain_id,
                address = %query.token_address,
                "Price served from cache"
            );
            return Ok(quote);
        }
        CACHE_MISSES.inc();

        match self
            .price_feed
            .fetch(query.chain_id, &query.token_address)
            .await
        {
            Ok(quote) => {
                self.store(&query, &quote).await;
                Ok(quote)
            }
            Err(e) if e.is_unavailable() => match self.stale_quote(&query).await {
                Some(quote) => {
                    tracing::warn!(
                        chain_id = query.chain_id,
                        address = %query.token_address,
                        error = %e,
                        "Upstream unavailable, serving stale price"
                    );
                    Ok(quote)
                }
                None => Err(e.into_oracle_error(query.chain_id)),
            },
            Err(e) => Err(e.into_oracle_error(query.chain_id)),
        }
    }

    async fn store(&self, query: &PriceQuery, quote: &PriceQuote) {
        self.cache
            .set(&query.cache_key(), quote, self.config.price_ttl_secs)
            .await;

        if let Some(stale_ttl) = self.config.stale_ttl_secs {
            self.cache
                .set(&query.stale_cache_key(), quote, stale_ttl)
                .await;
        }
    }

    async fn stale_quote(&self, query: &PriceQuery) -> Option<PriceQuote> {
        self.config.stale_ttl_secs?;
        self.cache.get(&query.stale_cache_key()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CHAIN_HEADER, PAYMENT_ID_HEADER, SIGNATURE_HEADER};
    use crate::services::chain::{ChainError, ChainProvider, ChainReceipt, ChainTransaction};
    use crate::services::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
    use crate::services::payment_verifier::used_tx_key;
    use crate::services::price_feed::PriceFeedConfig;
    use async_trait::async_trait;
    use ethers::types::{Address, H256, U256};
    use mockito::{Matcher, ServerGuard};
    use serde_json::json;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    const COLLECTION: &str = "0x1234567890abcdef1234567890abcdef12345678";
    const USDC_BASE: &str = "0x833589FCD6EDB6E08F4C7C32D4F71B54BDA02913";

    /// Every well-formed reference is a confirmed payment of the minimum.
    #[derive(Default)]
    struct PaidChain {
        lookups: AtomicU32,
    }

    impl PaidChain {
        fn lookups(&self) -> u32 {
            self.lookups.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChainProvider for PaidChain {
        async fn get_transaction(&self, reference: &str) -> Result<Option<ChainTransaction>, ChainError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            let hash = H256::from_str(reference.trim_start_matches("0x"))
                .map_err(|_| ChainError::InvalidReference(reference.to_string()))?;
            Ok(Some(ChainTransaction {
                hash,
                to: Some(Address::from_str(COLLECTION).unwrap()),
                value: U256::from(3_000u64),
            }))
        }

        async fn get_receipt(&self, _hash: H256) -> Result<Option<ChainReceipt>, ChainError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(Some(ChainReceipt { status: Some(1) }))
        }
    }

    fn pipeline(upstream: &str, stale_ttl_secs: Option<u64>) -> PricePipeline {
        pipeline_on(Arc::new(PaidChain::default()), upstream, stale_ttl_secs)
    }

    fn pipeline_on(chain: Arc<PaidChain>, upstream: &str, stale_ttl_secs: Option<u64>) -> PricePipeline {
        let cache = Arc::new(CacheService::memory_only());
        let verifier = Arc::new(PaymentVerifier::new(
            chain,
            cache.clone(),
            PaymentConfig {
                chain_name: "base".to_string(),
                collection_address: Address::from_str(COLLECTION).unwrap(),
                min_amount: U256::from(3_000u64),
                price_per_call: "0.003".to_string(),
                token_decimals: 6,
                used_tx_ttl_secs: 300,
            },
        ));
        let breaker = Arc::new(CircuitBreaker::new(
            "pipeline_test",
            CircuitBreakerConfig::default(),
        ));
        let price_feed = Arc::new(
            PriceFeedService::new(
                PriceFeedConfig {
                    base_url: upstream.to_string(),
                    api_key: None,
                    timeout: Duration::from_millis(500),
                    max_retries: 1,
                    retry_delays: vec![Duration::from_millis(1)],
                },
                breaker,
            )
            .unwrap(),
        );

        PricePipeline::new(
            cache,
            verifier,
            price_feed,
            PipelineConfig {
                price_ttl_secs: 60,
                stale_ttl_secs,
            },
        )
    }

    fn paid(tx: u8) -> PaymentHeaders {
        PaymentHeaders {
            signature: Some(format!("0x{}", hex::encode([tx; 32]))),
            payment_id: Some(format!("payment-{}", tx)),
            chain: Some("base".to_string()),
        }
    }

    async fn payment_recorded(oracle: &PricePipeline, headers: &PaymentHeaders) -> bool {
        let reference = headers.signature.as_deref().unwrap_or_default();
        let hash = H256::from_str(reference.trim_start_matches("0x")).unwrap();
        oracle.cache().sismember(&used_tx_key(&hash), reference).await
    }

    fn usdc_request() -> Value {
        json!({"chainId": 8453, "address": USDC_BASE})
    }

    fn quote(price: f64) -> PriceQuote {
        PriceQuote {
            price,
            market_cap: 1_000_000.0,
            volume: 50_000.0,
            price_change_24h: 2.5,
        }
    }

    async fn upstream(status: usize, body: &str, hits: usize) -> (ServerGuard, mockito::Mock) {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/price")
            .match_query(Matcher::Any)
            .with_status(status)
            .with_body(body)
            .expect(hits)
            .create_async()
            .await;
        (server, mock)
    }

    #[tokio::test]
    async fn body_is_validated_before_headers() {
        let oracle = pipeline("http://127.0.0.1:1", None);
        let err = oracle
            .handle(&json!({"chainId": -1, "address": USDC_BASE}), &PaymentHeaders::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_CHAIN_ID");
    }

    #[tokio::test]
    async fn invalid_body_leaves_payment_untouched() {
        let chain = Arc::new(PaidChain::default());
        let oracle = pipeline_on(chain.clone(), "http://127.0.0.1:1", None);
        let headers = paid(10);

        let err = oracle
            .handle(&json!({"chainId": 0, "address": USDC_BASE}), &headers)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_CHAIN_ID");
        assert_eq!(chain.lookups(), 0);
        assert!(!payment_recorded(&oracle, &headers).await);
    }

    #[tokio::test]
    async fn partial_headers_never_reach_the_chain() {
        let chain = Arc::new(PaidChain::default());
        let oracle = pipeline_on(chain.clone(), "http://127.0.0.1:1", None);
        let mut headers = paid(11);
        headers.payment_id = None;

        let err = oracle.handle(&usdc_request(), &headers).await.unwrap_err();
        match err {
            OracleError::PaymentRequired { missing } => assert_eq!(missing, vec![PAYMENT_ID_HEADER]),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(chain.lookups(), 0);
        assert!(!payment_recorded(&oracle, &headers).await);
    }

    #[tokio::test]
    async fn missing_headers_require_payment() {
        let oracle = pipeline("http://127.0.0.1:1", None);
        let err = oracle
            .handle(&usdc_request(), &PaymentHeaders::default())
            .await
            .unwrap_err();
        match err {
            OracleError::PaymentRequired { missing } => {
                assert_eq!(missing, vec![SIGNATURE_HEADER, PAYMENT_ID_HEADER, CHAIN_HEADER])
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejected_payment_is_payment_invalid() {
        let chain = Arc::new(PaidChain::default());
        let oracle = pipeline_on(chain.clone(), "http://127.0.0.1:1", None);
        let mut headers = paid(1);
        headers.chain = Some("ethereum".to_string());

        let err = oracle.handle(&usdc_request(), &headers).await.unwrap_err();
        assert!(matches!(err, OracleError::PaymentInvalid(PaymentFailure::InvalidChain)));
        assert_eq!(chain.lookups(), 0);
        assert!(!payment_recorded(&oracle, &headers).await);
    }

    #[tokio::test]
    async fn cache_hit_never_calls_upstream() {
        let (server, mock) = upstream(200, r#"{"price":9.9}"#, 0).await;
        let oracle = pipeline(&server.url(), None);
        oracle
            .cache()
            .set(&format!("price:8453:{}", USDC_BASE.to_lowercase()), &quote(1.0), 60)
            .await;

        let result = oracle.handle(&usdc_request(), &paid(2)).await.unwrap();
        assert_eq!(result, quote(1.0));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn miss_fetches_once_then_serves_from_cache() {
        let (server, mock) = upstream(
            200,
            r#"{"price":1.5,"marketCap":1000000,"volume":50000,"priceChange24h":2.5}"#,
            1,
        )
        .await;
        let oracle = pipeline(&server.url(), Some(600));

        let first = oracle.handle(&usdc_request(), &paid(3)).await.unwrap();
        let lowercase = json!({"chainId": 8453, "address": USDC_BASE.to_lowercase()});
        let second = oracle.handle(&lowercase, &paid(4)).await.unwrap();

        assert_eq!(first, quote(1.5));
        assert_eq!(second, first);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn payment_is_consumed_even_when_upstream_fails() {
        let (server, _mock) = upstream(200, r#"{"volume":5}"#, 1).await;
        let oracle = pipeline(&server.url(), None);

        let err = oracle.handle(&usdc_request(), &paid(5)).await.unwrap_err();
        assert_eq!(err.code(), "TOKEN_NOT_FOUND");

        let retry = oracle.handle(&usdc_request(), &paid(5)).await.unwrap_err();
        assert!(matches!(
            retry,
            OracleError::PaymentInvalid(PaymentFailure::PaymentDuplicate)
        ));
    }

    #[tokio::test]
    async fn unavailable_upstream_serves_stale_copy() {
        let (server, _mock) = upstream(503, "", 2).await;
        let oracle = pipeline(&server.url(), Some(600));
        oracle
            .cache()
            .set(&format!("price_stale:8453:{}", USDC_BASE.to_lowercase()), &quote(0.99), 600)
            .await;

        let result = oracle.handle(&usdc_request(), &paid(6)).await.unwrap();
        assert_eq!(result, quote(0.99));
    }

    #[tokio::test]
    async fn unavailable_upstream_without_stale_copy_is_503() {
        let (server, _mock) = upstream(503, "", 2).await;
        let oracle = pipeline(&server.url(), Some(600));

        let err = oracle.handle(&usdc_request(), &paid(7)).await.unwrap_err();
        assert_eq!(err.code(), "SERVICE_UNAVAILABLE");
    }

    #[tokio::test]
    async fn stale_copy_never_masks_unknown_token() {
        let (server, _mock) = upstream(404, "", 1).await;
        let oracle = pipeline(&server.url(), Some(600));
        oracle
            .cache()
            .set(&format!("price_stale:8453:{}", USDC_BASE.to_lowercase()), &quote(0.99), 600)
            .await;

        let err = oracle.handle(&usdc_request(), &paid(8)).await.unwrap_err();
        assert_eq!(err.code(), "TOKEN_NOT_FOUND");
    }

    #[tokio::test]
    async fn disabled_stale_fallback_is_ignored() {
        let (server, _mock) = upstream(503, "", 2).await;
        let oracle = pipeline(&server.url(), None);
        oracle
            .cache()
            .set(&format!("price_stale:8453:{}", USDC_BASE.to_lowercase()), &quote(0.99), 600)
            .await;

        let err = oracle.handle(&usdc_request(), &paid(9)).await.unwrap_err();
        assert_eq!(err.code(), "SERVICE_UNAVAILABLE");
    }
}
