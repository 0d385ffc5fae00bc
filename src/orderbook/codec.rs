//! Byte-ordered key codec for the bid and ask books
//!
//! Key layout, 32 bytes, all fields big-endian:
//!
//! ```text
//! [price: u128, price * 10^18 truncated][created_at: u64][owner_id: u64]
//! ```
//!
//! Comparing keys as bytes compares price first, then creation time, then owner.
//! The ask book is walked from its minimum key, which gives lowest price and then
//! earliest time. The bid book is walked from its maximum key, so its time field is
//! stored complemented: within one price the earliest bid holds the largest time
//! bytes and is reached first.
//!
//! Values are 8 bytes: the time-to-live in nanoseconds, zero meaning no expiry.

use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

use crate::orderbook::types::{Order, OrderKey, OwnerId, Price, Side, Timestamp};

pub const PRICE_LEN: usize = 16;
pub const TIME_LEN: usize = 8;
pub const OWNER_LEN: usize = 8;
pub const KEY_LEN: usize = PRICE_LEN + TIME_LEN + OWNER_LEN;
pub const VALUE_LEN: usize = 8;

/// Number of fractional decimal digits kept in the price field.
pub const PRICE_SCALE: u32 = 18;

/// Largest scaled price that still decodes into a `Decimal` (96-bit mantissa).
pub const MAX_SCALED_PRICE: u128 = (1u128 << 96) - 1;

const TIME_OFFSET: usize = PRICE_LEN;
const OWNER_OFFSET: usize = PRICE_LEN + TIME_LEN;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("price must be strictly positive at 18 decimal places")]
    NonPositivePrice,

    #[error("price must be finite")]
    NonFinitePrice,

    #[error("price does not fit the fixed-point key field")]
    PriceOverflow,

    #[error("key must be 32 bytes, got {0}")]
    KeyLength(usize),

    #[error("value must be empty or 8 bytes, got {0}")]
    ValueLength(usize),

    #[error("key carries a zero price")]
    ZeroPriceField,

    #[error("order id is not valid hex: {0}")]
    InvalidHex(String),
}

/// Fields recovered from a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyFields {
    pub price: Price,
    pub created_at: Timestamp,
    pub owner_id: OwnerId,
}

/// Scales a price by 10^18, truncating digits beyond the 18th decimal.
pub fn price_to_fixed(price: &Price) -> Result<u128, CodecError> {
    let value = price.as_decimal();
    if value.is_sign_negative() || value.is_zero() {
        return Err(CodecError::NonPositivePrice);
    }

    let mantissa = value.mantissa();
    let scale = value.scale();
    let scaled = if scale <= PRICE_SCALE {
        mantissa
            .checked_mul(10i128.pow(PRICE_SCALE - scale))
            .ok_or(CodecError::PriceOverflow)?
    } else {
        // TODO: decide whether sub-1e-18 digits should round instead of truncate
        mantissa / 10i128.pow(scale - PRICE_SCALE)
    };

    let scaled = scaled as u128;
    if scaled == 0 {
        return Err(CodecError::NonPositivePrice);
    }
    if scaled > MAX_SCALED_PRICE {
        return Err(CodecError::PriceOverflow);
    }
    Ok(scaled)
}

pub fn fixed_to_price(scaled: u128) -> Result<Price, CodecError> {
    if scaled == 0 {
        return Err(CodecError::ZeroPriceField);
    }
    if scaled > MAX_SCALED_PRICE {
        return Err(CodecError::PriceOverflow);
    }
    let value = Decimal::try_from_i128_with_scale(scaled as i128, PRICE_SCALE)
        .map_err(|_| CodecError::PriceOverflow)?;
    Price::new(value).map_err(|_| CodecError::ZeroPriceField)
}

fn time_field(side: Side, created_at: Timestamp) -> u64 {
    match side {
        Side::Buy => !created_at,
        Side::Sell => created_at,
    }
}

pub fn encode_key(
    side: Side,
    price: &Price,
    created_at: Timestamp,
    owner_id: OwnerId,
) -> Result<OrderKey, CodecError> {
    let scaled = price_to_fixed(price)?;

    let mut key = [0u8; KEY_LEN];
    key[..PRICE_LEN].copy_from_slice(&scaled.to_be_bytes());
    key[TIME_OFFSET..OWNER_OFFSET].copy_from_slice(&time_field(side, created_at).to_be_bytes());
    key[OWNER_OFFSET..].copy_from_slice(&owner_id.to_be_bytes());
    Ok(OrderKey::from_bytes(key))
}

pub fn decode_key(side: Side, bytes: &[u8]) -> Result<KeyFields, CodecError> {
    let key = OrderKey::from_slice(bytes)?;
    let raw = key.as_bytes();

    let mut price_bytes = [0u8; PRICE_LEN];
    price_bytes.copy_from_slice(&raw[..PRICE_LEN]);
    let mut time_bytes = [0u8; TIME_LEN];
    time_bytes.copy_from_slice(&raw[TIME_OFFSET..OWNER_OFFSET]);
    let mut owner_bytes = [0u8; OWNER_LEN];
    owner_bytes.copy_from_slice(&raw[OWNER_OFFSET..]);

    Ok(KeyFields {
        price: fixed_to_price(u128::from_be_bytes(price_bytes))?,
        // complement is its own inverse
        created_at: time_field(side, u64::from_be_bytes(time_bytes)),
        owner_id: u64::from_be_bytes(owner_bytes),
    })
}

pub fn encode_value(ttl: Option<Duration>) -> [u8; VALUE_LEN] {
    let nanos = ttl
        .map(|ttl| u64::try_from(ttl.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0);
    nanos.to_be_bytes()
}

pub fn decode_value(bytes: &[u8]) -> Result<Option<Duration>, CodecError> {
    if bytes.is_empty() {
        return Ok(None);
    }
    let raw: [u8; VALUE_LEN] = bytes
        .try_into()
        .map_err(|_| CodecError::ValueLength(bytes.len()))?;
    match u64::from_be_bytes(raw) {
        0 => Ok(None),
        nanos => Ok(Some(Duration::from_nanos(nanos))),
    }
}

/// Key and value under which an order rests in its own book.
pub fn encode_order(order: &Order) -> Result<(OrderKey, [u8; VALUE_LEN]), CodecError> {
    let key = encode_key(order.side, &order.price, order.created_at, order.owner_id)?;
    Ok((key, encode_value(order.ttl)))
}

pub fn decode_order(side: Side, key: &OrderKey, value: &[u8]) -> Result<Order, CodecError> {
    let fields = decode_key(side, key.as_bytes())?;
    Ok(Order {
        side,
        price: fields.price,
        owner_id: fields.owner_id,
        created_at: fields.created_at,
        ttl: decode_value(value)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn price(s: &str) -> Price {
        s.parse().unwrap()
    }

    #[test]
    fn test_key_layout() {
        let key = encode_key(Side::Sell, &price("1"), 5, 9).unwrap();
        let raw = key.as_bytes();
        assert_eq!(
            u128::from_be_bytes(raw[..16].try_into().unwrap()),
            1_000_000_000_000_000_000
        );
        assert_eq!(u64::from_be_bytes(raw[16..24].try_into().unwrap()), 5);
        assert_eq!(u64::from_be_bytes(raw[24..32].try_into().unwrap()), 9);

        let key = encode_key(Side::Buy, &price("1"), 5, 9).unwrap();
        let raw = key.as_bytes();
        assert_eq!(u64::from_be_bytes(raw[16..24].try_into().unwrap()), !5u64);
    }

    #[test]
    fn test_fractional_price_is_exact() {
        let p = price("0.000000000000000001");
        assert_eq!(price_to_fixed(&p).unwrap(), 1);
        assert_eq!(fixed_to_price(1).unwrap(), p);

        let p = price("123.456");
        assert_eq!(price_to_fixed(&p).unwrap(), 123_456_000_000_000_000_000);
    }

    #[test]
    fn test_sub_scale_digits_truncate() {
        let p = price("1.0000000000000000019");
        assert_eq!(price_to_fixed(&p).unwrap(), 1_000_000_000_000_000_001);

        let tiny = price("0.0000000000000000009");
        assert_eq!(price_to_fixed(&tiny), Err(CodecError::NonPositivePrice));
    }

    #[test]
    fn test_price_overflow_rejected() {
        let too_big = price("79228162515");
        assert_eq!(price_to_fixed(&too_big), Err(CodecError::PriceOverflow));

        let largest = price("79228162514");
        assert!(price_to_fixed(&largest).is_ok());
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert_eq!(
            decode_key(Side::Buy, &[0u8; 31]),
            Err(CodecError::KeyLength(31))
        );
        assert_eq!(
            decode_key(Side::Buy, &[0u8; 33]),
            Err(CodecError::KeyLength(33))
        );
        assert_eq!(
            decode_key(Side::Sell, &[0u8; 32]),
            Err(CodecError::ZeroPriceField)
        );
        assert_eq!(decode_value(&[0u8; 3]), Err(CodecError::ValueLength(3)));
    }

    #[test]
    fn test_value_encoding() {
        assert_eq!(encode_value(None), [0u8; 8]);
        assert_eq!(decode_value(&encode_value(None)).unwrap(), None);
        assert_eq!(decode_value(&[]).unwrap(), None);

        let ttl = Duration::from_millis(10);
        let bytes = encode_value(Some(ttl));
        assert_eq!(u64::from_be_bytes(bytes), 10_000_000);
        assert_eq!(decode_value(&bytes).unwrap(), Some(ttl));
    }

    #[test]
    fn test_buy_book_time_priority_at_maximum() {
        let early = encode_key(Side::Buy, &price("100"), 1_000, 1).unwrap();
        let late = encode_key(Side::Buy, &price("100"), 2_000, 1).unwrap();
        let better = encode_key(Side::Buy, &price("100.01"), 9_000, 1).unwrap();

        // bids are walked from the maximum key
        assert!(early > late);
        assert!(better > early);
    }

    #[test]
    fn test_sell_book_time_priority_at_minimum() {
        let early = encode_key(Side::Sell, &price("100"), 1_000, 1).unwrap();
        let late = encode_key(Side::Sell, &price("100"), 2_000, 1).unwrap();
        let better = encode_key(Side::Sell, &price("99.99"), 9_000, 1).unwrap();

        // asks are walked from the minimum key
        assert!(early < late);
        assert!(better < early);
    }

    fn arb_price() -> impl Strategy<Value = Price> {
        (1u64..10_000_000_000u64, 0u32..=18u32)
            .prop_map(|(mantissa, scale)| Price::new(Decimal::new(mantissa as i64, scale)).unwrap())
    }

    /// Priority of `a` over `b` as the matching traversal sees it.
    fn ahead_in_traversal(side: Side, a: &OrderKey, b: &OrderKey) -> bool {
        match side {
            Side::Buy => a > b,
            Side::Sell => a < b,
        }
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            p in arb_price(),
            created_at in any::<u64>(),
            owner in any::<u64>(),
            buy in any::<bool>(),
            ttl_nanos in any::<u64>(),
        ) {
            let side = if buy { Side::Buy } else { Side::Sell };
            let ttl = if ttl_nanos == 0 { None } else { Some(Duration::from_nanos(ttl_nanos)) };
            let order = Order { side, price: p, owner_id: owner, created_at, ttl };

            let (key, value) = encode_order(&order).unwrap();
            let decoded = decode_order(side, &key, &value).unwrap();
            prop_assert_eq!(decoded, order);
        }

        #[test]
        fn prop_better_price_sorts_ahead(
            a in arb_price(),
            b in arb_price(),
            ta in any::<u64>(),
            tb in any::<u64>(),
            buy in any::<bool>(),
        ) {
            prop_assume!(a != b);
            let side = if buy { Side::Buy } else { Side::Sell };
            let (better, worse, t_better, t_worse) = match side {
                Side::Buy if a > b => (a, b, ta, tb),
                Side::Buy => (b, a, tb, ta),
                Side::Sell if a < b => (a, b, ta, tb),
                Side::Sell => (b, a, tb, ta),
            };
            let kb = encode_key(side, &better, t_better, 1).unwrap();
            let kw = encode_key(side, &worse, t_worse, 2).unwrap();
            prop_assert!(ahead_in_traversal(side, &kb, &kw));
        }

        #[test]
        fn prop_earlier_time_sorts_ahead(
            p in arb_price(),
            t1 in any::<u64>(),
            t2 in any::<u64>(),
            o1 in any::<u64>(),
            o2 in any::<u64>(),
            buy in any::<bool>(),
        ) {
            prop_assume!(t1 != t2);
            let side = if buy { Side::Buy } else { Side::Sell };
            let (early, late) = if t1 < t2 { ((t1, o1), (t2, o2)) } else { ((t2, o2), (t1, o1)) };
            let ke = encode_key(side, &p, early.0, early.1).unwrap();
            let kl = encode_key(side, &p, late.0, late.1).unwrap();
            prop_assert!(ahead_in_traversal(side, &ke, &kl));
        }
    }
}
