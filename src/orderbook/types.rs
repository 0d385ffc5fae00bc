use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::orderbook::codec::{CodecError, KEY_LEN};
use crate::orderbook::error::{OrderBookError, OrderBookResult};

/// Opaque identifier of the submitting user.
pub type OwnerId = u64;

/// Nanoseconds since the Unix epoch.
pub type Timestamp = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The book an incoming order of this side is matched against.
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Strictly positive decimal price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Price(Decimal);

impl Price {
    pub fn new(value: Decimal) -> OrderBookResult<Self> {
        if value.is_sign_negative() || value.is_zero() {
            return Err(OrderBookError::InvalidPrice);
        }
        Ok(Self(value.normalize()))
    }

    /// Converts a float price, rejecting NaN and infinities.
    pub fn from_f64(value: f64) -> OrderBookResult<Self> {
        if !value.is_finite() {
            return Err(CodecError::NonFinitePrice.into());
        }
        let decimal = Decimal::from_f64(value).ok_or(OrderBookError::PriceOutOfRange)?;
        Self::new(decimal)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Price {
    type Error = OrderBookError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Price::new(value)
    }
}

impl From<Price> for Decimal {
    fn from(price: Price) -> Self {
        price.0
    }
}

impl FromStr for Price {
    type Err = OrderBookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decimal = Decimal::from_str(s.trim()).map_err(|_| OrderBookError::InvalidPrice)?;
        Price::new(decimal)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed-width, byte-ordered book key. Also the public identifier of a resting order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderKey([u8; KEY_LEN]);

impl OrderKey {
    pub const MIN: OrderKey = OrderKey([0x00; KEY_LEN]);

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CodecError> {
        let array: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CodecError::KeyLength(bytes.len()))?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OrderKey({})", self.to_hex())
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for OrderKey {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim()).map_err(|e| CodecError::InvalidHex(e.to_string()))?;
        OrderKey::from_slice(&bytes)
    }
}

impl Serialize for OrderKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for OrderKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A placement request before the engine stamps it with a creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub side: Side,
    pub price: Price,
    pub owner_id: OwnerId,
    pub ttl: Option<Duration>,
}

impl NewOrder {
    pub fn new(side: Side, price: Price, owner_id: OwnerId) -> Self {
        Self {
            side,
            price,
            owner_id,
            ttl: None,
        }
    }

    pub fn buy(owner_id: OwnerId, price: Price) -> Self {
        Self::new(Side::Buy, price, owner_id)
    }

    pub fn sell(owner_id: OwnerId, price: Price) -> Self {
        Self::new(Side::Sell, price, owner_id)
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub(crate) fn stamp(self, created_at: Timestamp) -> Order {
        Order {
            side: self.side,
            price: self.price,
            owner_id: self.owner_id,
            created_at,
            ttl: self.ttl.filter(|ttl| !ttl.is_zero()),
        }
    }
}

/// An immutable order. Its book key is derived from side, price, creation time and owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub side: Side,
    pub price: Price,
    pub owner_id: OwnerId,
    pub created_at: Timestamp,
    pub ttl: Option<Duration>,
}

impl Order {
    /// Last instant at which the order is still matchable, if it expires.
    pub fn expires_at(&self) -> Option<Timestamp> {
        let ttl = self.ttl.filter(|ttl| !ttl.is_zero())?;
        let nanos = u64::try_from(ttl.as_nanos()).unwrap_or(u64::MAX);
        Some(self.created_at.saturating_add(nanos))
    }

    /// Expired once `now` is strictly past `created_at + ttl`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at().map_or(false, |deadline| now > deadline)
    }

    pub fn created_at_utc(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.created_at as i64)
    }

    /// Whether this order, resting in the book, crosses an incoming order.
    pub fn crosses(&self, incoming: &Order) -> bool {
        match incoming.side {
            Side::Buy => self.price <= incoming.price,
            Side::Sell => self.price >= incoming.price,
        }
    }
}

/// An order as it sits in a book, together with its key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestingOrder {
    pub key: OrderKey,
    pub order: Order,
}

/// Result of a placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlaceOutcome {
    /// The incoming order crossed this resting order, which has been removed.
    Matched(RestingOrder),
    /// No counter-order; the incoming order now rests under this key.
    Rested(OrderKey),
}

impl PlaceOutcome {
    pub fn matched(&self) -> Option<&RestingOrder> {
        match self {
            PlaceOutcome::Matched(resting) => Some(resting),
            PlaceOutcome::Rested(_) => None,
        }
    }

    pub fn rested_key(&self) -> Option<OrderKey> {
        match self {
            PlaceOutcome::Rested(key) => Some(*key),
            PlaceOutcome::Matched(_) => None,
        }
    }
}
