use crate::error::{PaymentHeaderNames, PaymentInstructions};
use crate::models::{PaymentHeaders, CHAIN_HEADER, PAYMENT_ID_HEADER, SIGNATURE_HEADER};
use crate::services::PaymentConfig;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use std::convert::Infallible;

/// Reads the x402 headers. Header names are matched case-insensitively.
pub fn extract_payment_headers(headers: &HeaderMap) -> PaymentHeaders {
    let read = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };

    PaymentHeaders {
        signature: read(SIGNATURE_HEADER),
        payment_id: read(PAYMENT_ID_HEADER),
        chain: read(CHAIN_HEADER),
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for PaymentHeaders
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(extract_payment_headers(&parts.headers))
    }
}

/// How to pay, attached to 402 responses for missing headers.
pub fn payment_instructions(config: &PaymentConfig) -> PaymentInstructions {
    PaymentInstructions {
        chain: config.chain_name.clone(),
        amount: config.price_per_call.clone(),
        recipient: format!("{:#x}", config.collection_address),
        headers: PaymentHeaderNames {
            signature: SIGNATURE_HEADER.to_string(),
            payment_id: PAYMENT_ID_HEADER.to_string(),
            chain: CHAIN_HEADER.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use ethers::types::{Address, U256};
    use std::str::FromStr;

    #[test]
    fn reads_headers_regardless_of_case() {
        let mut headers = HeaderMap::new();
        headers.insert("x-x402-signature", HeaderValue::from_static("0xabc"));
        headers.insert("X-X402-PAYMENT-ID", HeaderValue::from_static("pay-1"));

        let extracted = extract_payment_headers(&headers);
        assert_eq!(extracted.signature.as_deref(), Some("0xabc"));
        assert_eq!(extracted.payment_id.as_deref(), Some("pay-1"));
        assert!(extracted.chain.is_none());
        assert_eq!(extracted.missing(), vec![CHAIN_HEADER]);
    }

    #[test]
    fn instructions_describe_the_configured_payment() {
        let config = PaymentConfig {
            chain_name: "base".to_string(),
            collection_address: Address::from_str("0x1234567890ABCDEF1234567890abcdef12345678").unwrap(),
            min_amount: U256::from(3_000u64),
            price_per_call: "0.003".to_string(),
            token_decimals: 6,
            used_tx_ttl_secs: 300,
        };

        let instructions = payment_instructions(&config);
        assert_eq!(instructions.chain, "base");
        assert_eq!(instructions.amount, "0.003");
        assert_eq!(instructions.recipient, "0x1234567890abcdef1234567890abcdef12345678");
        assert_eq!(instructions.headers.signature, SIGNATURE_HEADER);
    }
}
