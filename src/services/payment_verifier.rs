use crate::metrics::X402_VERIFICATIONS;
use crate::models::{PaymentFailure, PaymentProof, PaymentVerification};
use crate::services::chain::{ChainError, ChainProvider};
use crate::services::CacheService;
use ethers::types::{Address, H256, U256};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct PaymentConfig {
    /// The single supported payment chain, compared case-insensitively
    pub chain_name: String,
    pub collection_address: Address,
    /// Minimum value per call in the payment token's smallest unit
    pub min_amount: U256,
    /// Human-readable price, e.g. "0.003"
    pub price_per_call: String,
    pub token_decimals: u32,
    pub used_tx_ttl_secs: u64,
}

pub fn used_tx_key(hash: &H256) -> String {
    format!("used_tx:{:#x}", hash)
}

/// Checks an x402 payment proof against the chain and the used-payment ledger.
pub struct PaymentVerifier {
    chain: Arc<dyn ChainProvider>,
    ledger: Arc<CacheService>,
    config: PaymentConfig,
}

impl PaymentVerifier {
    pub fn new(chain: Arc<dyn ChainProvider>, ledger: Arc<CacheService>, config: PaymentConfig) -> Self {
        Self {
            chain,
            ledger,
            config,
        }
    }

    pub fn config(&self) -> &PaymentConfig {
        &self.config
    }

    /// Never fails: provider errors become `VERIFICATION_FAILED`.
    pub async fn verify(&self, proof: &PaymentProof) -> PaymentVerification {
        let result = match self.check(proof).await {
            Ok((hash, amount)) => {
                tracing::info!(
                    payment_id = %proof.payment_id,
                    tx_hash = %format!("{:#x}", hash),
                    amount = %amount,
                    "x402 payment verified successfully"
                );
                PaymentVerification::verified(hash, amount)
            }
            Err(failure) => PaymentVerification::rejected(failure),
        };

        let status = if result.valid { "success" } else { "failed" };
        X402_VERIFICATIONS.with_label_values(&[status]).inc();
        result
    }

    async fn check(&self, proof: &PaymentProof) -> Result<(H256, U256), PaymentFailure> {
        if !proof.chain_name.eq_ignore_ascii_case(&self.config.chain_name) {
            tracing::warn!(chain = %proof.chain_name, "Invalid chain for x402 payment");
            return Err(PaymentFailure::InvalidChain);
        }

        let tx = match self.chain.get_transaction(&proof.transaction_ref).await {
            Ok(Some(tx)) => tx,
            Ok(None) => return Err(PaymentFailure::TxNotFound),
            Err(ChainError::InvalidReference(reference)) => {
                tracing::warn!(reference = %reference, "Malformed payment transaction reference");
                return Err(PaymentFailure::TxNotFound);
            }
            Err(e) => return Err(self.provider_failure(proof, e)),
        };

        let ledger_key = used_tx_key(&tx.hash);
        let tx_id = format!("{:#x}", tx.hash);

        // Fast path; the atomic insert below is what actually guards reuse
        if self.ledger.sismember(&ledger_key, &tx_id).await {
            tracing::warn!(tx_hash = %tx_id, "Duplicate payment detected");
            return Err(PaymentFailure::PaymentDuplicate);
        }

        let receipt = match self.chain.get_receipt(tx.hash).await {
            Ok(receipt) => receipt,
            Err(e) => return Err(self.provider_failure(proof, e)),
        };
        if !receipt.map_or(false, |r| r.succeeded()) {
            return Err(PaymentFailure::TxNotConfirmed);
        }

        if tx.to != Some(self.config.collection_address) {
            tracing::warn!(
                tx_to = ?tx.to,
                expected = ?self.config.collection_address,
                "Payment recipient mismatch"
            );
            return Err(PaymentFailure::InvalidRecipient);
        }

        if tx.value < self.config.min_amount {
            tracing::warn!(
                amount = %tx.value,
                min_payment = %self.config.min_amount,
                "Insufficient payment amount"
            );
            return Err(PaymentFailure::InsufficientAmount);
        }

        if !self
            .ledger
            .insert_if_absent(&ledger_key, &tx_id, self.config.used_tx_ttl_secs)
            .await
        {
            tracing::warn!(tx_hash = %tx_id, "Payment consumed by a concurrent request");
            return Err(PaymentFailure::PaymentDuplicate);
        }

        Ok((tx.hash, tx.value))
    }

    fn provider_failure(&self, proof: &PaymentProof, error: ChainError) -> PaymentFailure {
        tracing::error!(
            error = %error,
            payment_id = %proof.payment_id,
            "x402 verification error"
        );
        PaymentFailure::VerificationFailed
    }
}
