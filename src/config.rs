use crate::services::{CircuitBreakerConfig, PaymentConfig, PipelineConfig, PriceFeedConfig};
use anyhow::{bail, Context, Result};
use ethers::types::{Address, U256};
use ethers::utils::parse_units;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Testnet,
    Production,
}

impl Environment {
    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub host: String,
    pub port: u16,
    pub max_body_bytes: usize,

    // Base (payment network)
    pub base_rpc_url: String,
    pub rpc_timeout: Duration,

    // x402 Configuration
    pub payment: PaymentConfig,

    // Redis
    pub redis_url: String,

    // Price cache
    pub pipeline: PipelineConfig,

    // Zapper (price source)
    pub price_feed: PriceFeedConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let environment = Self::parse_environment(&var("ENVIRONMENT", "development"))?;

        let decimals: u32 = var("PAYMENT_TOKEN_DECIMALS", "6")
            .parse()
            .context("Invalid PAYMENT_TOKEN_DECIMALS")?;
        let price_per_call = var("PRICE_PER_CALL", "0.003");
        let min_amount = Self::parse_token_amount(&price_per_call, decimals)?;

        let stale_ttl_secs: u64 = var("STALE_PRICE_TTL_SECS", "600")
            .parse()
            .context("Invalid STALE_PRICE_TTL_SECS")?;

        let api_key = get("ZAPPER_API_KEY").filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!("ZAPPER_API_KEY not set, upstream calls may be rejected");
        }

        let config = Self {
            environment,
            host: var("HOST", "0.0.0.0"),
            port: var("PORT", "3000").parse().context("Invalid PORT")?,
            max_body_bytes: var("MAX_BODY_BYTES", "1024")
                .parse()
                .context("Invalid MAX_BODY_BYTES")?,

            base_rpc_url: var("BASE_RPC_URL", "https://mainnet.base.org"),
            rpc_timeout: Duration::from_millis(
                var("RPC_TIMEOUT_MS", "5000")
                    .parse()
                    .context("Invalid RPC_TIMEOUT_MS")?,
            ),

            payment: PaymentConfig {
                chain_name: var("X402_CHAIN", "base"),
                collection_address: Self::parse_address(
                    "X402_COLLECTION_ADDRESS",
                    get("X402_COLLECTION_ADDRESS"),
                )?,
                min_amount,
                price_per_call,
                token_decimals: decimals,
                used_tx_ttl_secs: var("USED_TX_TTL_SECS", "300")
                    .parse()
                    .context("Invalid USED_TX_TTL_SECS")?,
            },

            redis_url: var("REDIS_URL", "redis://localhost:6379"),

            pipeline: PipelineConfig {
                price_ttl_secs: var("PRICE_TTL_SECS", "60")
                    .parse()
                    .context("Invalid PRICE_TTL_SECS")?,
                stale_ttl_secs: (stale_ttl_secs > 0).then_some(stale_ttl_secs),
            },

            price_feed: PriceFeedConfig {
                base_url: var("ZAPPER_API_URL", "https://api.zapper.fi/v2"),
                api_key,
                timeout: Duration::from_millis(
                    var("ZAPPER_TIMEOUT_MS", "3000")
                        .parse()
                        .context("Invalid ZAPPER_TIMEOUT_MS")?,
                ),
                max_retries: var("ZAPPER_MAX_RETRIES", "3")
                    .parse()
                    .context("Invalid ZAPPER_MAX_RETRIES")?,
                retry_delays: Self::parse_delays(&var("ZAPPER_RETRY_DELAYS_MS", "100,200,400"))?,
            },

            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: var("CB_FAILURE_THRESHOLD", "5")
                    .parse()
                    .context("Invalid CB_FAILURE_THRESHOLD")?,
                timeout: Duration::from_millis(
                    var("CB_TIMEOUT_MS", "60000")
                        .parse()
                        .context("Invalid CB_TIMEOUT_MS")?,
                ),
                half_open_max_calls: var("CB_HALF_OPEN_MAX_CALLS", "1")
                    .parse()
                    .context("Invalid CB_HALF_OPEN_MAX_CALLS")?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn parse_environment(env: &str) -> Result<Environment> {
        match env.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "testnet" | "test" => Ok(Environment::Testnet),
            "production" | "prod" => Ok(Environment::Production),
            _ => bail!("Unknown environment: {}", env),
        }
    }

    fn parse_address(var: &str, value: Option<String>) -> Result<Address> {
        let addr_str = value.with_context(|| format!("{} required", var))?;
        let address = Address::from_str(&addr_str)
            .with_context(|| format!("Invalid address for {}", var))?;
        if address.is_zero() {
            bail!("{} must not be the zero address", var);
        }
        Ok(address)
    }

    /// Converts a decimal token amount ("0.003") into smallest units.
    pub fn parse_token_amount(amount: &str, decimals: u32) -> Result<U256> {
        let parsed = parse_units(amount.trim(), decimals)
            .with_context(|| format!("Invalid token amount: {}", amount))?;
        Ok(parsed.into())
    }

    fn parse_delays(raw: &str) -> Result<Vec<Duration>> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<u64>()
                    .map(Duration::from_millis)
                    .with_context(|| format!("Invalid retry delay: {}", s))
            })
            .collect()
    }

    fn validate(&self) -> Result<()> {
        if !self.base_rpc_url.starts_with("http") {
            bail!("BASE_RPC_URL must be HTTP(S) URL");
        }
        if !self.price_feed.base_url.starts_with("http") {
            bail!("ZAPPER_API_URL must be HTTP(S) URL");
        }
        if self.price_feed.retry_delays.is_empty() {
            bail!("ZAPPER_RETRY_DELAYS_MS must list at least one delay");
        }
        if self.circuit_breaker.failure_threshold == 0 {
            bail!("CB_FAILURE_THRESHOLD must be positive");
        }
        if self.circuit_breaker.half_open_max_calls == 0 {
            bail!("CB_HALF_OPEN_MAX_CALLS must be positive");
        }
        if self.payment.used_tx_ttl_secs == 0 {
            bail!("USED_TX_TTL_SECS must be positive");
        }
        if self.pipeline.price_ttl_secs == 0 {
            bail!("PRICE_TTL_SECS must be positive");
        }
        if self.payment.chain_name.trim().is_empty() {
            bail!("X402_CHAIN must not be empty");
        }

        tracing::info!(
            "Configuration validated for {:?} environment",
            self.environment
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const COLLECTION: &str = "0x1234567890123456789012345678901234567890";

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_collection_address_is_set() {
        let config = load(&[("X402_COLLECTION_ADDRESS", COLLECTION)]).unwrap();

        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.port, 3000);
        assert_eq!(config.payment.chain_name, "base");
        assert_eq!(config.payment.min_amount, U256::from(3_000u64));
        assert_eq!(config.payment.used_tx_ttl_secs, 300);
        assert_eq!(config.pipeline.price_ttl_secs, 60);
        assert_eq!(config.pipeline.stale_ttl_secs, Some(600));
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.timeout, Duration::from_millis(60_000));
        assert_eq!(config.circuit_breaker.half_open_max_calls, 1);
        assert_eq!(config.price_feed.timeout, Duration::from_millis(3_000));
        assert_eq!(config.price_feed.max_retries, 3);
        assert_eq!(
            config.price_feed.retry_delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400)
            ]
        );
    }

    #[test]
    fn collection_address_is_required_and_non_zero() {
        assert!(load(&[]).is_err());
        assert!(load(&[(
            "X402_COLLECTION_ADDRESS",
            "0x0000000000000000000000000000000000000000"
        )])
        .is_err());
        assert!(load(&[("X402_COLLECTION_ADDRESS", "not-an-address")]).is_err());
    }

    #[test]
    fn token_amount_is_converted_without_floating_point() {
        assert_eq!(
            Config::parse_token_amount("0.003", 6).unwrap(),
            U256::from(3_000u64)
        );
        assert_eq!(
            Config::parse_token_amount("1.000001", 6).unwrap(),
            U256::from(1_000_001u64)
        );
        assert!(Config::parse_token_amount("abc", 6).is_err());
    }

    #[test]
    fn stale_fallback_can_be_disabled() {
        let config = load(&[
            ("X402_COLLECTION_ADDRESS", COLLECTION),
            ("STALE_PRICE_TTL_SECS", "0"),
        ])
        .unwrap();
        assert_eq!(config.pipeline.stale_ttl_secs, None);
    }

    #[test]
    fn rejects_bad_overrides() {
        assert!(load(&[
            ("X402_COLLECTION_ADDRESS", COLLECTION),
            ("ENVIRONMENT", "staging"),
        ])
        .is_err());
        assert!(load(&[
            ("X402_COLLECTION_ADDRESS", COLLECTION),
            ("ZAPPER_API_URL", "ftp://prices"),
        ])
        .is_err());
        assert!(load(&[
            ("X402_COLLECTION_ADDRESS", COLLECTION),
            ("CB_FAILURE_THRESHOLD", "0"),
        ])
        .is_err());
        assert!(load(&[
            ("X402_COLLECTION_ADDRESS", COLLECTION),
            ("ZAPPER_RETRY_DELAYS_MS", "100,fast"),
        ])
        .is_err());
        assert!(load(&[
            ("X402_COLLECTION_ADDRESS", COLLECTION),
            ("USED_TX_TTL_SECS", "0"),
        ])
        .is_err());
        assert!(load(&[
            ("X402_COLLECTION_ADDRESS", COLLECTION),
            ("PRICE_TTL_SECS", "0"),
        ])
        .is_err());
    }
}
