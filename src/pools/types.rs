use std::{str::FromStr, time::Duration};

use alloy_primitives::Address;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::errors::{DecodeError, StreamError};

/// How the squared price is reduced before converting to a float.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "camelCase")]
pub enum DecodeMode {
    /// keeps the whole ratio as an exact rational and rounds once
    #[default]
    Exact,
    /// floors `sqrtPriceX96^2 / 2^192` to an integer before rescaling, any
    /// raw ratio below 1 decodes to zero
    TruncateFirst,
}

/// Parameters of a `streamContract` subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamContractRequest {
    pub endpoint: Url,
    #[serde(default)]
    pub chain_id: String,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abi: Option<String>,
    /// milliseconds between polls
    pub scrape_interval: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decode_mode: Option<DecodeMode>,
}

impl StreamContractRequest {
    pub fn into_pool_reference(
        self,
        min_scrape_interval: Duration,
    ) -> Result<PoolReference, StreamError> {
        let address = Address::from_str(self.address.trim()).map_err(|e| {
            StreamError::InvalidRequest(format!("bad pool address '{}' - {e}", self.address))
        })?;

        let scrape_interval = Duration::from_millis(self.scrape_interval as u64);
        if scrape_interval.is_zero() || scrape_interval < min_scrape_interval {
            return Err(StreamError::InvalidRequest(format!(
                "scrape interval {}ms is below the minimum of {}ms",
                self.scrape_interval,
                min_scrape_interval.as_millis()
            )));
        }

        if let Some(abi) = &self.abi {
            validate_abi_override(abi)?;
        }

        // a non-numeric chain id ("ethereum", "mainnet") is only a label
        let chain_id = self.chain_id.trim().parse::<u64>().ok();
        if chain_id.is_none() && !self.chain_id.is_empty() {
            debug!(target: "dex_stream", chain = %self.chain_id, "chain id is not numeric, skipping chain check");
        }

        Ok(PoolReference {
            endpoint: self.endpoint,
            chain_id,
            address,
            scrape_interval,
            decode_mode: self.decode_mode.unwrap_or_default(),
        })
    }
}

/// The override is only accepted when it still describes a pool we know how
/// to price.
fn validate_abi_override(abi: &str) -> Result<(), StreamError> {
    let entries: Vec<serde_json::Value> = serde_json::from_str(abi)
        .map_err(|e| StreamError::InvalidRequest(format!("abi override is not a JSON ABI - {e}")))?;

    let has_slot0 = entries.iter().any(|entry| {
        let is_function = entry
            .get("type")
            .and_then(|t| t.as_str())
            .map_or(true, |t| t == "function");
        is_function && entry.get("name").and_then(|n| n.as_str()) == Some("slot0")
    });

    if has_slot0 {
        Ok(())
    } else {
        Err(StreamError::InvalidRequest(
            "abi override doesn't declare slot0()".to_string(),
        ))
    }
}

/// The pool one session polls, fixed for the session's lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolReference {
    pub endpoint: Url,
    pub chain_id: Option<u64>,
    pub address: Address,
    pub scrape_interval: Duration,
    pub decode_mode: DecodeMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub address: Address,
    pub name: String,
    pub decimals: u8,
}

impl TokenMetadata {
    pub fn new(address: Address, name: impl Into<String>, decimals: u8) -> Self {
        Self {
            address,
            name: name.into(),
            decimals,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpotPrice {
    pub value: f32,
    pub block_height: u64,
    pub observed_at: DateTime<Utc>,
}

/// One item of the `streamContract` subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    pub token0: String,
    pub token1: String,
    pub spot_price: f32,
    pub block_height: i32,
    pub timestamp: String,
}

impl PriceUpdate {
    pub fn new(
        token0: &TokenMetadata,
        token1: &TokenMetadata,
        price: &SpotPrice,
    ) -> Result<Self, DecodeError> {
        let block_height = i32::try_from(price.block_height)
            .map_err(|_| DecodeError::HeightOutOfRange(price.block_height))?;

        Ok(Self {
            token0: token0.name.clone(),
            token1: token1.name.clone(),
            spot_price: price.value,
            block_height,
            timestamp: price
                .observed_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        })
    }
}
