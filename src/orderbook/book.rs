use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::metrics::EngineMetrics;
use crate::orderbook::codec::{
    decode_key, decode_order, encode_order, fixed_to_price, price_to_fixed,
};
use crate::orderbook::error::{OrderBookError, OrderBookResult};
use crate::orderbook::journal::{open_books, JournalStore};
use crate::orderbook::matching::{MatchingEngine, ScanReport};
use crate::orderbook::records::{InMemoryOrderRecords, OrderRecord, OrderRecords, RecordError};
use crate::orderbook::store::{
    BookCursor, MemoryStore, OrderBookStore, OrderedStore, ScanDirection,
};
use crate::orderbook::types::{
    NewOrder, OrderKey, OwnerId, PlaceOutcome, Price, RestingOrder, Side, Timestamp,
};
use crate::utils::time::{Clock, LatencyTimer, SystemClock};
use crate::utils::format_ttl;

/// Everything a place or cancel reads and writes, behind one lock.
struct BookState<S> {
    books: OrderBookStore<S>,
    last_created_at: Timestamp,
}

impl<S: OrderedStore> BookState<S> {
    /// Creation times are strictly increasing so two orders never share a key.
    fn next_timestamp(&mut self, now: Timestamp) -> Timestamp {
        let created_at = now.max(self.last_created_at.saturating_add(1));
        self.last_created_at = created_at;
        created_at
    }

    fn resting_counts(&self) -> (u64, u64) {
        (
            self.books.book(Side::Buy).len() as u64,
            self.books.book(Side::Sell).len() as u64,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBookStats {
    pub resting_bids: usize,
    pub resting_asks: usize,
}

/// Outcome of re-deriving the record catalog from the books.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub inserted: usize,
    pub removed: usize,
}

/// Bid and ask books with price-time matching.
///
/// Every place and cancel runs its scan, decision and writes (books and record
/// catalog) under a single lock shared by both books, so no two placements can
/// select the same resting order.
pub struct OrderBook<S: OrderedStore> {
    state: Mutex<BookState<S>>,
    records: Arc<dyn OrderRecords>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    metrics: Arc<EngineMetrics>,
}

impl OrderBook<MemoryStore> {
    /// In-memory books with an in-process record catalog and the system clock.
    pub fn in_memory() -> Self {
        Self::new(
            OrderBookStore::in_memory(),
            Arc::new(InMemoryOrderRecords::new()),
            Arc::new(SystemClock),
            EngineConfig::default(),
        )
    }
}

impl OrderBook<JournalStore> {
    /// Opens journal-backed books under `config.data_dir`.
    pub fn open(
        config: EngineConfig,
        records: Arc<dyn OrderRecords>,
        clock: Arc<dyn Clock>,
    ) -> OrderBookResult<Self> {
        let books = open_books(&config.data_dir, config.sync_writes, config.compact_on_open)?;
        info!(
            "Opened books in {}: {} bids, {} asks",
            config.data_dir.display(),
            books.book(Side::Buy).len(),
            books.book(Side::Sell).len()
        );
        Ok(Self::new(books, records, clock, config))
    }
}

impl<S: OrderedStore> OrderBook<S> {
    pub fn new(
        books: OrderBookStore<S>,
        records: Arc<dyn OrderRecords>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let state = BookState {
            books,
            last_created_at: 0,
        };
        let metrics = Arc::new(EngineMetrics::new());
        let (bids, asks) = state.resting_counts();
        metrics.set_resting(bids, asks);

        Self {
            state: Mutex::new(state),
            records,
            clock,
            config,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    /// Places an order: matches it against the best eligible resting counter-order,
    /// or rests it in its own book.
    pub fn place(&self, request: NewOrder) -> OrderBookResult<PlaceOutcome> {
        let timer = LatencyTimer::start();
        debug!(
            "Placing {} @ {} for owner {} (ttl {})",
            request.side,
            request.price,
            request.owner_id,
            format_ttl(request.ttl)
        );

        // Validation happens before the guard is taken. The price is cut to the key's
        // precision here so crossing, the stored key and the record agree.
        let price = fixed_to_price(price_to_fixed(&request.price)?)?;
        let ttl = self.config.effective_ttl(request.ttl)?;
        let request = NewOrder {
            price,
            ttl,
            ..request
        };

        let mut state = self.state.lock();
        let now = self.clock.now();
        let order = request.stamp(state.next_timestamp(now));

        let scan_timer = LatencyTimer::start();
        let (matched, report) =
            MatchingEngine::find_match(&mut state.books, self.records.as_ref(), &order, now)?;
        self.metrics.record_match_scan(scan_timer.stop());
        self.record_scan(&report);

        let outcome = match matched {
            Some(resting) => {
                state
                    .books
                    .book_mut(resting.order.side)
                    .delete(&resting.key)?;
                self.mirror(|records| records.delete_by_key(&resting.key), "delete", &resting.key);

                info!(
                    "{} @ {} (owner {}) matched resting {} {} @ {} (owner {})",
                    order.side,
                    order.price,
                    order.owner_id,
                    resting.order.side,
                    resting.key,
                    resting.order.price,
                    resting.order.owner_id
                );
                self.metrics.increment_orders_matched();
                PlaceOutcome::Matched(resting)
            }
            None => {
                let (key, value) = encode_order(&order)?;
                state.books.book_mut(order.side).put(key, value)?;
                let record = OrderRecord::new(key, order.clone());
                self.mirror(|records| records.insert(record), "insert", &key);

                info!(
                    "{} @ {} (owner {}) resting as {} at {}",
                    order.side,
                    order.price,
                    order.owner_id,
                    key,
                    order.created_at_utc().to_rfc3339()
                );
                self.metrics.increment_orders_rested();
                PlaceOutcome::Rested(key)
            }
        };

        let (bids, asks) = state.resting_counts();
        drop(state);

        self.metrics.set_resting(bids, asks);
        self.metrics.increment_orders_placed();
        self.metrics.record_place(timer.stop());
        Ok(outcome)
    }

    /// Cancels a resting order of `side` owned by `owner_id`.
    ///
    /// An order owned by someone else is reported exactly like a missing one.
    pub fn cancel(&self, side: Side, key: &OrderKey, owner_id: OwnerId) -> OrderBookResult<OrderKey> {
        let timer = LatencyTimer::start();
        debug!("Cancelling {} order {} for owner {}", side, key, owner_id);

        let fields = decode_key(side, key.as_bytes())?;

        let mut state = self.state.lock();
        if fields.owner_id != owner_id || !state.books.book(side).contains(key) {
            return Err(OrderBookError::OrderNotFound);
        }
        self.remove_locked(&mut state, side, key, owner_id)?;

        let (bids, asks) = state.resting_counts();
        drop(state);

        self.metrics.set_resting(bids, asks);
        self.metrics.record_cancel(timer.stop());
        Ok(*key)
    }

    /// Cancels by key alone, looking the order up in both books.
    pub fn cancel_by_key(&self, key: &OrderKey, owner_id: OwnerId) -> OrderBookResult<OrderKey> {
        let side = {
            let state = self.state.lock();
            [Side::Buy, Side::Sell]
                .into_iter()
                .find(|side| state.books.book(*side).contains(key))
        };
        match side {
            Some(side) => self.cancel(side, key, owner_id),
            None => Err(OrderBookError::OrderNotFound),
        }
    }

    /// Cancels through the record catalog's opaque id.
    pub fn cancel_by_record_id(&self, id: &Uuid, owner_id: OwnerId) -> OrderBookResult<OrderKey> {
        let record = self
            .records
            .find_by_id(id)?
            .filter(|record| record.order.owner_id == owner_id)
            .ok_or(OrderBookError::OrderNotFound)?;

        match self.cancel(record.order.side, &record.key, owner_id) {
            Err(OrderBookError::OrderNotFound) => {
                // the book no longer holds it; drop the stale record
                warn!("Record {} points at missing order {}", id, record.key);
                self.mirror(|records| records.delete_by_key(&record.key), "delete", &record.key);
                Err(OrderBookError::OrderNotFound)
            }
            other => other,
        }
    }

    /// Resting, non-expired orders of `owner_id` as held by the record catalog,
    /// oldest first.
    pub fn list(&self, owner_id: OwnerId) -> OrderBookResult<Vec<OrderRecord>> {
        let now = self.clock.now();
        let mut records: Vec<OrderRecord> = self
            .records
            .find_by_owner(owner_id)?
            .into_iter()
            .filter(|record| !record.order.is_expired(now))
            .collect();
        records.sort_by_key(|record| record.order.created_at);
        Ok(records)
    }

    /// Best non-expired price resting in the `side` book. Does not evict.
    pub fn best(&self, side: Side) -> OrderBookResult<Option<Price>> {
        let now = self.clock.now();
        let state = self.state.lock();
        let book = state.books.book(side);
        let mut cursor = state.books.best_cursor(side);
        while let Some((key, value)) = cursor.entry() {
            let order = decode_order(side, &key, &value)?;
            if !order.is_expired(now) {
                return Ok(Some(order.price));
            }
            cursor.advance(book);
        }
        Ok(None)
    }

    /// Up to `limit` entries of the `side` book in matching priority, expired ones included.
    pub fn resting(&self, side: Side, limit: usize) -> OrderBookResult<Vec<RestingOrder>> {
        let state = self.state.lock();
        let book = state.books.book(side);
        let mut cursor = state.books.best_cursor(side);
        let mut orders = Vec::new();
        while let Some((key, value)) = cursor.entry() {
            if orders.len() >= limit {
                break;
            }
            orders.push(RestingOrder {
                key,
                order: decode_order(side, &key, &value)?,
            });
            cursor.advance(book);
        }
        Ok(orders)
    }

    pub fn stats(&self) -> OrderBookStats {
        let state = self.state.lock();
        OrderBookStats {
            resting_bids: state.books.book(Side::Buy).len(),
            resting_asks: state.books.book(Side::Sell).len(),
        }
    }

    /// Re-derives the record catalog from the books: inserts records for keys the
    /// catalog lacks and removes records whose key is no longer resting.
    pub fn reconcile_records(&self) -> OrderBookResult<ReconcileReport> {
        let state = self.state.lock();
        let mut report = ReconcileReport::default();

        let existing: HashSet<OrderKey> = self
            .records
            .all()?
            .into_iter()
            .map(|record| record.key)
            .collect();

        let mut live = HashSet::new();
        for side in [Side::Buy, Side::Sell] {
            let book = state.books.book(side);
            let mut cursor = BookCursor::seek(book, ScanDirection::Ascending, &OrderKey::MIN);
            while let Some((key, value)) = cursor.entry() {
                live.insert(key);
                if !existing.contains(&key) {
                    let order = decode_order(side, &key, &value)?;
                    self.records.insert(RestingOrder { key, order }.into())?;
                    report.inserted += 1;
                }
                cursor.advance(book);
            }
        }

        for key in existing.difference(&live) {
            self.records.delete_by_key(key)?;
            report.removed += 1;
        }

        info!(
            "Reconciled order records: {} inserted, {} removed",
            report.inserted, report.removed
        );
        Ok(report)
    }

    /// Flushes both books; call on shutdown.
    pub fn flush(&self) -> OrderBookResult<()> {
        self.state.lock().books.flush()?;
        Ok(())
    }

    fn remove_locked(
        &self,
        state: &mut BookState<S>,
        side: Side,
        key: &OrderKey,
        owner_id: OwnerId,
    ) -> OrderBookResult<()> {
        state.books.book_mut(side).delete(key)?;
        self.mirror(
            |records| records.delete_by_owner_and_key(owner_id, key).map(|_| ()),
            "delete",
            key,
        );
        info!("Cancelled {} order {} for owner {}", side, key, owner_id);
        self.metrics.increment_orders_cancelled();
        Ok(())
    }

    /// Runs a catalog call after the book write succeeded. Failures leave the
    /// catalog behind the book until `reconcile_records` runs.
    fn mirror<F>(&self, call: F, action: &str, key: &OrderKey)
    where
        F: FnOnce(&dyn OrderRecords) -> Result<(), RecordError>,
    {
        if let Err(e) = call(self.records.as_ref()) {
            warn!("Order record {} for {} failed: {}", action, key, e);
            self.metrics.increment_mirror_failures();
        }
    }

    fn record_scan(&self, report: &ScanReport) {
        self.metrics.add_orders_evicted(report.evicted as u64);
        self.metrics
            .add_self_trades_skipped(report.self_trades_skipped as u64);
        for _ in 0..report.mirror_failures {
            self.metrics.increment_mirror_failures();
        }
    }
}
