//! The matching scan stops at the first eligible candidate. These properties check
//! that it picks the same resting order as an exhaustive search over the whole book.

use std::cmp::Ordering;
use std::time::Duration;

use keyed_matching_engine::orderbook::codec::encode_order;
use keyed_matching_engine::orderbook::{
    MatchingEngine, MemoryStore, OrderBookStore, OrderRecord, OrderedStore,
};
use keyed_matching_engine::{InMemoryOrderRecords, Order, OrderRecords, Price, Side};
use proptest::prelude::*;
use rust_decimal::Decimal;

const BASE: u64 = 1_000_000_000;
const MS: u64 = 1_000_000;

#[derive(Debug, Clone)]
struct Draft {
    buy: bool,
    cents: i64,
    owner_id: u64,
    ttl_ms: Option<u64>,
}

fn draft_strategy() -> impl Strategy<Value = Draft> {
    (
        any::<bool>(),
        9_950i64..10_050,
        1u64..5,
        prop::option::of(1u64..40),
    )
        .prop_map(|(buy, cents, owner_id, ttl_ms)| Draft {
            buy,
            cents,
            owner_id,
            ttl_ms,
        })
}

fn to_order(draft: &Draft, created_at: u64) -> Order {
    Order {
        side: if draft.buy { Side::Buy } else { Side::Sell },
        price: Price::new(Decimal::new(draft.cents, 2)).unwrap(),
        owner_id: draft.owner_id,
        created_at,
        ttl: draft.ttl_ms.map(Duration::from_millis),
    }
}

/// Price-time priority within the book holding `side` orders.
fn priority(side: Side, a: &Order, b: &Order) -> Ordering {
    let by_price = match side {
        Side::Buy => b.price.cmp(&a.price),
        Side::Sell => a.price.cmp(&b.price),
    };
    by_price.then(a.created_at.cmp(&b.created_at))
}

/// Exhaustive reference: every eligible crossing order, best one wins.
fn best_by_full_scan<'a>(resting: &'a [Order], incoming: &Order, now: u64) -> Option<&'a Order> {
    let book_side = incoming.side.opposite();
    resting
        .iter()
        .filter(|o| o.side == book_side)
        .filter(|o| o.owner_id != incoming.owner_id)
        .filter(|o| !o.is_expired(now))
        .filter(|o| o.crosses(incoming))
        .min_by(|a, b| priority(book_side, a, b))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_scan_agrees_with_full_scan(
        book_drafts in prop::collection::vec(draft_strategy(), 0..40),
        incoming in draft_strategy(),
        now_ms in 0u64..80,
    ) {
        let mut books = OrderBookStore::<MemoryStore>::in_memory();
        let records = InMemoryOrderRecords::new();

        let resting: Vec<Order> = book_drafts
            .iter()
            .enumerate()
            .map(|(i, draft)| to_order(draft, BASE + i as u64 * MS))
            .collect();
        for order in &resting {
            let (key, value) = encode_order(order).unwrap();
            books.book_mut(order.side).put(key, value).unwrap();
            records.insert(OrderRecord::new(key, order.clone())).unwrap();
        }

        let now = BASE + now_ms * MS;
        let incoming = to_order(&incoming, now);
        let book_side = incoming.side.opposite();
        let before = books.book(book_side).len();

        let (found, report) = MatchingEngine::find_match(&mut books, &records, &incoming, now).unwrap();
        let expected = best_by_full_scan(&resting, &incoming, now);

        prop_assert_eq!(found.as_ref().map(|m| &m.order), expected);

        // the match is reported, not removed
        if let Some(m) = &found {
            prop_assert!(books.book(book_side).contains(&m.key));
        }

        // only expired, non-self entries were deleted
        prop_assert_eq!(books.book(book_side).len() + report.evicted, before);
        for order in resting.iter().filter(|o| o.side == book_side) {
            let (key, _) = encode_order(order).unwrap();
            let present = books.book(book_side).contains(&key);
            if !order.is_expired(now) || order.owner_id == incoming.owner_id {
                prop_assert!(present, "live or self-owned entry was removed");
            } else if !present {
                prop_assert!(records.find_by_owner(order.owner_id).unwrap().iter().all(|r| r.key != key));
            }
        }

        // the other book is untouched
        prop_assert_eq!(
            books.book(incoming.side).len(),
            resting.iter().filter(|o| o.side == incoming.side).count()
        );
    }

    #[test]
    fn prop_scan_never_returns_self_or_expired(
        book_drafts in prop::collection::vec(draft_strategy(), 1..40),
        incoming in draft_strategy(),
        now_ms in 0u64..80,
    ) {
        let mut books = OrderBookStore::<MemoryStore>::in_memory();
        let records = InMemoryOrderRecords::new();
        for (i, draft) in book_drafts.iter().enumerate() {
            let order = to_order(draft, BASE + i as u64 * MS);
            let (key, value) = encode_order(&order).unwrap();
            books.book_mut(order.side).put(key, value).unwrap();
        }

        let now = BASE + now_ms * MS;
        let incoming = to_order(&incoming, now);
        let (found, report) = MatchingEngine::find_match(&mut books, &records, &incoming, now).unwrap();

        if let Some(m) = found {
            prop_assert_ne!(m.order.owner_id, incoming.owner_id);
            prop_assert!(!m.order.is_expired(now));
            prop_assert!(m.order.crosses(&incoming));
        }
        prop_assert!(report.visited >= report.self_trades_skipped + report.evicted);
    }
}
