use ethers::types::{H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const SIGNATURE_HEADER: &str = "X-x402-Signature";
pub const PAYMENT_ID_HEADER: &str = "X-x402-Payment-Id";
pub const CHAIN_HEADER: &str = "X-x402-Chain";

/// Raw x402 header values as received. Blank values count as missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaymentHeaders {
    pub signature: Option<String>,
    pub payment_id: Option<String>,
    pub chain: Option<String>,
}

impl PaymentHeaders {
    /// Names of the required headers that are absent or blank.
    pub fn missing(&self) -> Vec<&'static str> {
        [
            (SIGNATURE_HEADER, &self.signature),
            (PAYMENT_ID_HEADER, &self.payment_id),
            (CHAIN_HEADER, &self.chain),
        ]
        .into_iter()
        .filter(|(_, value)| present(value).is_none())
        .map(|(name, _)| name)
        .collect()
    }

    pub fn to_proof(&self) -> Option<PaymentProof> {
        Some(PaymentProof {
            transaction_ref: present(&self.signature)?.to_string(),
            payment_id: present(&self.payment_id)?.to_string(),
            chain_name: present(&self.chain)?.to_string(),
        })
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Payment proof supplied through the x402 headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentProof {
    pub transaction_ref: String,
    pub payment_id: String,
    pub chain_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentFailure {
    InvalidChain,
    TxNotFound,
    PaymentDuplicate,
    TxNotConfirmed,
    InvalidRecipient,
    InsufficientAmount,
    VerificationFailed,
}

impl PaymentFailure {
    pub fn code(&self) -> &'static str {
        match self {
            PaymentFailure::InvalidChain => "INVALID_CHAIN",
            PaymentFailure::TxNotFound => "TX_NOT_FOUND",
            PaymentFailure::PaymentDuplicate => "PAYMENT_DUPLICATE",
            PaymentFailure::TxNotConfirmed => "TX_NOT_CONFIRMED",
            PaymentFailure::InvalidRecipient => "INVALID_RECIPIENT",
            PaymentFailure::InsufficientAmount => "INSUFFICIENT_AMOUNT",
            PaymentFailure::VerificationFailed => "VERIFICATION_FAILED",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            PaymentFailure::InvalidChain => "unsupported payment chain",
            PaymentFailure::TxNotFound => "transaction not found",
            PaymentFailure::PaymentDuplicate => "payment transaction already used",
            PaymentFailure::TxNotConfirmed => "transaction failed or not confirmed",
            PaymentFailure::InvalidRecipient => "invalid payment recipient",
            PaymentFailure::InsufficientAmount => "insufficient payment amount",
            PaymentFailure::VerificationFailed => "payment verification failed",
        }
    }
}

impl fmt::Display for PaymentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.description())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentVerification {
    pub valid: bool,
    pub transaction_hash: Option<H256>,
    pub amount_paid: Option<U256>,
    pub failure: Option<PaymentFailure>,
}

impl PaymentVerification {
    pub fn verified(transaction_hash: H256, amount_paid: U256) -> Self {
        Self {
            valid: true,
            transaction_hash: Some(transaction_hash),
            amount_paid: Some(amount_paid),
            failure: None,
        }
    }

    pub fn rejected(failure: PaymentFailure) -> Self {
        Self {
            valid: false,
            transaction_hash: None,
            amount_paid: None,
            failure: Some(failure),
        }
    }
}
