use tracing::{debug, warn};

use crate::orderbook::codec::decode_order;
use crate::orderbook::error::{OrderBookError, OrderBookResult};
use crate::orderbook::records::OrderRecords;
use crate::orderbook::store::{OrderBookStore, OrderedStore, StoredValue};
use crate::orderbook::types::{Order, OrderKey, RestingOrder, Side, Timestamp};

/// What a matching scan passed over on its way to a decision.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanReport {
    pub visited: usize,
    pub self_trades_skipped: usize,
    pub evicted: usize,
    /// Record catalog deletes that failed after an eviction.
    pub mirror_failures: usize,
}

/// Matching algorithms over the ordered books
pub struct MatchingEngine;

impl MatchingEngine {
    /// Finds the best resting counter-order for `incoming`, walking the opposite book
    /// from its best key.
    ///
    /// Self-owned entries are skipped and left in place. Expired entries are deleted
    /// as they are passed. The first remaining entry decides: it either crosses and is
    /// returned (still in the book), or it does not and the scan stops, since every
    /// entry behind it has an equal or worse price.
    pub fn find_match<S: OrderedStore>(
        books: &mut OrderBookStore<S>,
        records: &dyn OrderRecords,
        incoming: &Order,
        now: Timestamp,
    ) -> OrderBookResult<(Option<RestingOrder>, ScanReport)> {
        let book_side = incoming.side.opposite();
        let mut report = ScanReport::default();
        let mut cursor = books.best_cursor(book_side);

        while let Some((key, value)) = cursor.entry() {
            report.visited += 1;
            let candidate = Self::decode_entry(book_side, &key, &value)?;

            if candidate.owner_id == incoming.owner_id {
                report.self_trades_skipped += 1;
                cursor.advance(books.book(book_side));
                continue;
            }

            let resting = RestingOrder {
                key,
                order: candidate,
            };

            if Self::evict_if_expired(books.book_mut(book_side), records, &resting, now, &mut report)? {
                cursor.advance(books.book(book_side));
                continue;
            }

            if resting.order.crosses(incoming) {
                debug!(
                    "Match found for {} @ {}: {} @ {} (owner {})",
                    incoming.side,
                    incoming.price,
                    book_side,
                    resting.order.price,
                    resting.order.owner_id
                );
                return Ok((Some(resting), report));
            }

            return Ok((None, report));
        }

        Ok((None, report))
    }

    /// Deletes `resting` from `book` if it has expired at `now`, mirroring the delete
    /// to the record catalog. Returns whether it was evicted.
    ///
    /// A failed book delete aborts; a failed catalog delete is logged and counted.
    pub fn evict_if_expired<S: OrderedStore + ?Sized>(
        book: &mut S,
        records: &dyn OrderRecords,
        resting: &RestingOrder,
        now: Timestamp,
        report: &mut ScanReport,
    ) -> OrderBookResult<bool> {
        if !resting.order.is_expired(now) {
            return Ok(false);
        }

        book.delete(&resting.key)?;
        report.evicted += 1;
        debug!(
            "Evicted expired {} order {} (owner {}, created {}, ttl {:?})",
            resting.order.side,
            resting.key,
            resting.order.owner_id,
            resting.order.created_at,
            resting.order.ttl
        );

        if let Err(e) = records.delete_by_key(&resting.key) {
            report.mirror_failures += 1;
            warn!(
                "Order record for evicted order {} not removed: {}",
                resting.key, e
            );
        }
        Ok(true)
    }

    fn decode_entry(side: Side, key: &OrderKey, value: &StoredValue) -> OrderBookResult<Order> {
        decode_order(side, key, value).map_err(|e| {
            OrderBookError::Storage(format!("undecodable {} book entry {}: {}", side, key, e))
        })
    }
}
