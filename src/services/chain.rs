use async_trait::async_trait;
use ethers::{
    providers::{Http, Middleware, Provider, ProviderError},
    types::{Address, H256, U256},
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("RPC error: {0}")]
    Rpc(#[from] ProviderError),

    #[error("RPC call timed out after {0:?}")]
    Timeout(Duration),

    /// The reference is not a 32-byte hex hash. No such transaction can
    /// exist, so payment verification reports it as `TX_NOT_FOUND` rather
    /// than `VERIFICATION_FAILED`.
    #[error("Invalid transaction reference: {0}")]
    InvalidReference(String),
}

/// The parts of a transaction the payment check needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    pub hash: H256,
    pub to: Option<Address>,
    pub value: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainReceipt {
    pub status: Option<u64>,
}

impl ChainReceipt {
    pub fn succeeded(&self) -> bool {
        self.status == Some(1)
    }
}

/// Read-only access to the payment chain.
#[async_trait]
pub trait ChainProvider: Send + Sync {
    async fn get_transaction(&self, reference: &str) -> Result<Option<ChainTransaction>, ChainError>;

    async fn get_receipt(&self, hash: H256) -> Result<Option<ChainReceipt>, ChainError>;
}

pub struct EthersChainProvider {
    provider: Arc<Provider<Http>>,
    timeout: Duration,
}

impl EthersChainProvider {
    pub fn new(rpc_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let provider = Arc::new(Provider::<Http>::try_from(rpc_url)?);
        Ok(Self { provider, timeout })
    }

    fn parse_hash(reference: &str) -> Result<H256, ChainError> {
        let digits = reference.trim().trim_start_matches("0x");
        if digits.len() != 64 {
            return Err(ChainError::InvalidReference(reference.to_string()));
        }
        H256::from_str(digits).map_err(|_| ChainError::InvalidReference(reference.to_string()))
    }
}

#[async_trait]
impl ChainProvider for EthersChainProvider {
    async fn get_transaction(&self, reference: &str) -> Result<Option<ChainTransaction>, ChainError> {
        let hash = Self::parse_hash(reference)?;

        let tx = tokio::time::timeout(self.timeout, self.provider.get_transaction(hash))
            .await
            .map_err(|_| ChainError::Timeout(self.timeout))??;

        Ok(tx.map(|tx| ChainTransaction {
            hash: tx.hash,
            to: tx.to,
            value: tx.value,
        }))
    }

    async fn get_receipt(&self, hash: H256) -> Result<Option<ChainReceipt>, ChainError> {
        let receipt = tokio::time::timeout(self.timeout, self.provider.get_transaction_receipt(hash))
            .await
            .map_err(|_| ChainError::Timeout(self.timeout))??;

        Ok(receipt.map(|r| ChainReceipt {
            status: r.status.map(|s| s.as_u64()),
        }))
    }
}
