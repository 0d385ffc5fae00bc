use serde::{Deserialize, Serialize};
use std::fmt;

use crate::orderbook::codec::CodecError;
use crate::orderbook::records::RecordError;
use crate::orderbook::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderBookError {
    /// Order not found in the book, or not owned by the requester
    OrderNotFound,

    /// Invalid price (zero, negative, not finite, or below 1e-18)
    InvalidPrice,

    /// Price does not fit the fixed-point key field
    PriceOutOfRange,

    /// Time-to-live rejected by configuration
    InvalidTtl,

    /// Key bytes or order id could not be decoded
    MalformedKey(String),

    /// Book store failure; no partial effect was applied
    Storage(String),

    /// System error
    SystemError(String),
}

impl OrderBookError {
    /// Validation failures are rejected before the book guard is taken.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            OrderBookError::InvalidPrice
                | OrderBookError::PriceOutOfRange
                | OrderBookError::InvalidTtl
                | OrderBookError::MalformedKey(_)
        )
    }
}

impl fmt::Display for OrderBookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderBookError::OrderNotFound => write!(f, "Order not found"),
            OrderBookError::InvalidPrice => write!(f, "Invalid price"),
            OrderBookError::PriceOutOfRange => write!(f, "Price outside allowed range"),
            OrderBookError::InvalidTtl => write!(f, "Invalid time-to-live"),
            OrderBookError::MalformedKey(msg) => write!(f, "Malformed order key: {}", msg),
            OrderBookError::Storage(msg) => write!(f, "Storage error: {}", msg),
            OrderBookError::SystemError(msg) => write!(f, "System error: {}", msg),
        }
    }
}

impl std::error::Error for OrderBookError {}

impl From<CodecError> for OrderBookError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::NonPositivePrice | CodecError::NonFinitePrice => {
                OrderBookError::InvalidPrice
            }
            CodecError::PriceOverflow => OrderBookError::PriceOutOfRange,
            other => OrderBookError::MalformedKey(other.to_string()),
        }
    }
}

impl From<StoreError> for OrderBookError {
    fn from(err: StoreError) -> Self {
        OrderBookError::Storage(err.to_string())
    }
}

impl From<RecordError> for OrderBookError {
    fn from(err: RecordError) -> Self {
        OrderBookError::SystemError(err.to_string())
    }
}

/// Result type for order book operations
pub type OrderBookResult<T> = Result<T, OrderBookError>;
