//! Engine configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::orderbook::error::{OrderBookError, OrderBookResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding `bids.journal` and `asks.journal`.
    pub data_dir: PathBuf,
    /// fsync the journal after every book mutation.
    pub sync_writes: bool,
    /// Rewrite journals down to live entries when they are opened.
    pub compact_on_open: bool,
    /// TTL applied to placements that carry none.
    pub default_ttl: Option<Duration>,
    /// Placements with a longer TTL are rejected.
    pub max_ttl: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/books"),
            sync_writes: false,
            compact_on_open: true,
            default_ttl: None,
            max_ttl: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> OrderBookResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| OrderBookError::SystemError(format!("invalid engine config: {}", e)))
    }

    /// Resolves the TTL of a placement against the configured default and ceiling.
    pub fn effective_ttl(&self, requested: Option<Duration>) -> OrderBookResult<Option<Duration>> {
        let ttl = requested.or(self.default_ttl).filter(|ttl| !ttl.is_zero());
        match (ttl, self.max_ttl) {
            (Some(ttl), Some(max)) if ttl > max => Err(OrderBookError::InvalidTtl),
            _ => Ok(ttl),
        }
    }
}
