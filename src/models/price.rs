use crate::error::OracleError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MAX_CHAIN_ID: u64 = 2_147_483_647;

const ACCEPTED_FIELDS: [&str; 2] = ["chainId", "address"];

/// A validated price request. `token_address` is always lowercase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceQuery {
    pub chain_id: u32,
    pub token_address: String,
}

impl PriceQuery {
    /// Validates a parsed request body.
    pub fn from_body(body: &Value) -> Result<Self, OracleError> {
        let Some(fields) = body.as_object() else {
            return Err(OracleError::InvalidBody(
                "Request body must be a valid JSON object".to_string(),
            ));
        };

        let chain_id = match fields.get("chainId") {
            None => {
                return Err(OracleError::InvalidChainId(
                    "chainId is required and must be a positive integer".to_string(),
                ))
            }
            Some(raw) => parse_chain_id(raw).ok_or_else(|| {
                OracleError::InvalidChainId(format!(
                    "chainId must be a positive integer (received: {})",
                    raw
                ))
            })?,
        };

        let token_address = match fields.get("address") {
            None => {
                return Err(OracleError::InvalidAddress(
                    "address is required and must be a valid Ethereum address".to_string(),
                ))
            }
            Some(Value::String(addr)) if is_valid_address(addr) => addr.to_lowercase(),
            Some(raw) => {
                return Err(OracleError::InvalidAddress(format!(
                    "address must be a valid Ethereum address (received: {})",
                    raw
                )))
            }
        };

        let extra: Vec<&str> = fields
            .keys()
            .map(String::as_str)
            .filter(|key| !ACCEPTED_FIELDS.contains(key))
            .collect();
        if !extra.is_empty() {
            tracing::warn!(extra_fields = ?extra, "Request contains extra fields, ignoring");
        }

        Ok(Self {
            chain_id,
            token_address,
        })
    }

    pub fn cache_key(&self) -> String {
        format!("price:{}:{}", self.chain_id, self.token_address)
    }

    pub fn stale_cache_key(&self) -> String {
        format!("price_stale:{}:{}", self.chain_id, self.token_address)
    }
}

fn parse_chain_id(raw: &Value) -> Option<u32> {
    let Value::Number(n) = raw else {
        return None;
    };

    let id = match n.as_u64() {
        Some(id) => id,
        // 8453.0 is still an integer
        None => {
            let f = n.as_f64()?;
            if f.fract() != 0.0 || f < 1.0 || f > MAX_CHAIN_ID as f64 {
                return None;
            }
            f as u64
        }
    };

    if id == 0 || id > MAX_CHAIN_ID {
        return None;
    }
    u32::try_from(id).ok()
}

/// Matches `^0x[0-9a-fA-F]{40}$`.
pub fn is_valid_address(address: &str) -> bool {
    match address.strip_prefix("0x") {
        Some(digits) => digits.len() == 40 && hex::decode(digits).is_ok(),
        None => false,
    }
}

/// Price data returned to callers and stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    pub price: f64,
    pub market_cap: f64,
    pub volume: f64,
    pub price_change_24h: f64,
}
