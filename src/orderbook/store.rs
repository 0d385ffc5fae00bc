//! Ordered key-value books
//!
//! A book is a sorted map from 32-byte keys to 8-byte values with point writes and
//! ranged seeks. All ordering semantics come from the key codec; nothing here knows
//! about prices or owners.

use std::collections::BTreeMap;
use std::io;
use std::ops::Bound;
use thiserror::Error;

use crate::orderbook::codec::VALUE_LEN;
use crate::orderbook::types::{OrderKey, Side};

pub type StoredValue = [u8; VALUE_LEN];

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("journal corrupt at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },
}

/// One ordered key space.
pub trait OrderedStore: Send {
    /// Insert or overwrite.
    fn put(&mut self, key: OrderKey, value: StoredValue) -> Result<(), StoreError>;

    /// Remove if present; absent keys are not an error.
    fn delete(&mut self, key: &OrderKey) -> Result<(), StoreError>;

    fn get(&self, key: &OrderKey) -> Option<StoredValue>;

    /// Smallest entry lying above `bound`.
    fn first_after(&self, bound: Bound<&OrderKey>) -> Option<(OrderKey, StoredValue)>;

    /// Largest entry lying below `bound`.
    fn last_before(&self, bound: Bound<&OrderKey>) -> Option<(OrderKey, StoredValue)>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, key: &OrderKey) -> bool {
        self.get(key).is_some()
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// In-memory book.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: BTreeMap<OrderKey, StoredValue>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&OrderKey, &StoredValue)> {
        self.entries.iter()
    }

    pub(crate) fn apply_put(&mut self, key: OrderKey, value: StoredValue) {
        self.entries.insert(key, value);
    }

    pub(crate) fn apply_delete(&mut self, key: &OrderKey) -> bool {
        self.entries.remove(key).is_some()
    }
}

impl OrderedStore for MemoryStore {
    fn put(&mut self, key: OrderKey, value: StoredValue) -> Result<(), StoreError> {
        self.apply_put(key, value);
        Ok(())
    }

    fn delete(&mut self, key: &OrderKey) -> Result<(), StoreError> {
        self.apply_delete(key);
        Ok(())
    }

    fn get(&self, key: &OrderKey) -> Option<StoredValue> {
        self.entries.get(key).copied()
    }

    fn first_after(&self, bound: Bound<&OrderKey>) -> Option<(OrderKey, StoredValue)> {
        self.entries
            .range((bound, Bound::Unbounded))
            .next()
            .map(|(k, v)| (*k, *v))
    }

    fn last_before(&self, bound: Bound<&OrderKey>) -> Option<(OrderKey, StoredValue)> {
        self.entries
            .range((Bound::Unbounded, bound))
            .next_back()
            .map(|(k, v)| (*k, *v))
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Direction in which a book is walked from its best entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    Ascending,
    Descending,
}

impl ScanDirection {
    /// Bids are best at the maximum key, asks at the minimum.
    pub fn for_book(side: Side) -> Self {
        match side {
            Side::Buy => ScanDirection::Descending,
            Side::Sell => ScanDirection::Ascending,
        }
    }
}

/// Position in a book. Holds a copy of the current entry rather than a borrow, so
/// the store can be mutated (including deleting the current key) between steps.
#[derive(Debug, Clone)]
pub struct BookCursor {
    direction: ScanDirection,
    current: Option<(OrderKey, StoredValue)>,
}

impl BookCursor {
    /// Positions at the best-priority entry of the book holding `side` orders.
    pub fn seek_to_best<S: OrderedStore + ?Sized>(store: &S, side: Side) -> Self {
        let direction = ScanDirection::for_book(side);
        let current = match direction {
            ScanDirection::Ascending => store.first_after(Bound::Unbounded),
            ScanDirection::Descending => store.last_before(Bound::Unbounded),
        };
        Self { direction, current }
    }

    /// Positions at `from` or the first entry past it in `direction`.
    pub fn seek<S: OrderedStore + ?Sized>(
        store: &S,
        direction: ScanDirection,
        from: &OrderKey,
    ) -> Self {
        let current = match direction {
            ScanDirection::Ascending => store.first_after(Bound::Included(from)),
            ScanDirection::Descending => store.last_before(Bound::Included(from)),
        };
        Self { direction, current }
    }

    pub fn valid(&self) -> bool {
        self.current.is_some()
    }

    pub fn entry(&self) -> Option<(OrderKey, StoredValue)> {
        self.current
    }

    pub fn key(&self) -> Option<&OrderKey> {
        self.current.as_ref().map(|(key, _)| key)
    }

    /// Steps to the next entry strictly past the current key.
    pub fn advance<S: OrderedStore + ?Sized>(&mut self, store: &S) {
        let Some((key, _)) = self.current else {
            return;
        };
        self.current = match self.direction {
            ScanDirection::Ascending => store.first_after(Bound::Excluded(&key)),
            ScanDirection::Descending => store.last_before(Bound::Excluded(&key)),
        };
    }
}

/// The bid book and the ask book, kept in separate key spaces.
#[derive(Debug)]
pub struct OrderBookStore<S> {
    bids: S,
    asks: S,
}

impl<S: OrderedStore> OrderBookStore<S> {
    pub fn new(bids: S, asks: S) -> Self {
        Self { bids, asks }
    }

    pub fn book(&self, side: Side) -> &S {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    pub fn book_mut(&mut self, side: Side) -> &mut S {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    pub fn best_cursor(&self, side: Side) -> BookCursor {
        BookCursor::seek_to_best(self.book(side), side)
    }

    /// Plain ascending listing starting at `from` (inclusive), not in matching order.
    pub fn scan(
        &self,
        side: Side,
        from: Option<&OrderKey>,
        limit: usize,
    ) -> Vec<(OrderKey, StoredValue)> {
        let book = self.book(side);
        let mut cursor = BookCursor::seek(book, ScanDirection::Ascending, from.unwrap_or(&OrderKey::MIN));
        let mut entries = Vec::new();
        while let Some(entry) = cursor.entry() {
            if entries.len() >= limit {
                break;
            }
            entries.push(entry);
            cursor.advance(book);
        }
        entries
    }

    pub fn flush(&mut self) -> Result<(), StoreError> {
        self.bids.flush()?;
        self.asks.flush()
    }
}

impl OrderBookStore<MemoryStore> {
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new(), MemoryStore::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::codec::{encode_key, encode_value, KEY_LEN};

    fn key(byte: u8) -> OrderKey {
        OrderKey::from_bytes([byte; KEY_LEN])
    }

    fn walk<S: OrderedStore>(store: &S, mut cursor: BookCursor) -> Vec<OrderKey> {
        let mut keys = Vec::new();
        while let Some(k) = cursor.key().copied() {
            keys.push(k);
            cursor.advance(store);
        }
        keys
    }

    #[test]
    fn test_put_overwrites_and_delete_is_idempotent() {
        let mut store = MemoryStore::new();
        store.put(key(1), [1; 8]).unwrap();
        store.put(key(1), [2; 8]).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&key(1)), Some([2; 8]));

        store.delete(&key(1)).unwrap();
        store.delete(&key(1)).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_best_cursor_direction_per_book() {
        let mut store = MemoryStore::new();
        for b in [3u8, 1, 2] {
            store.put(key(b), [0; 8]).unwrap();
        }

        let asks = walk(&store, BookCursor::seek_to_best(&store, Side::Sell));
        assert_eq!(asks, vec![key(1), key(2), key(3)]);

        let bids = walk(&store, BookCursor::seek_to_best(&store, Side::Buy));
        assert_eq!(bids, vec![key(3), key(2), key(1)]);
    }

    #[test]
    fn test_cursor_survives_deleting_current_key() {
        let mut store = MemoryStore::new();
        for b in 1u8..=4 {
            store.put(key(b), [0; 8]).unwrap();
        }

        let mut cursor = BookCursor::seek_to_best(&store, Side::Sell);
        let mut seen = Vec::new();
        while let Some(k) = cursor.key().copied() {
            seen.push(k);
            store.delete(&k).unwrap();
            cursor.advance(&store);
        }
        assert_eq!(seen, vec![key(1), key(2), key(3), key(4)]);
        assert!(store.is_empty());
    }

    #[test]
    fn test_seek_is_inclusive() {
        let mut store = MemoryStore::new();
        for b in [10u8, 20, 30] {
            store.put(key(b), [0; 8]).unwrap();
        }
        let up = BookCursor::seek(&store, ScanDirection::Ascending, &key(20));
        assert_eq!(up.key(), Some(&key(20)));
        let up = BookCursor::seek(&store, ScanDirection::Ascending, &key(21));
        assert_eq!(up.key(), Some(&key(30)));
        let down = BookCursor::seek(&store, ScanDirection::Descending, &key(19));
        assert_eq!(down.key(), Some(&key(10)));
        let none = BookCursor::seek(&store, ScanDirection::Descending, &key(9));
        assert!(!none.valid());
    }

    #[test]
    fn test_books_are_independent() {
        let mut books = OrderBookStore::in_memory();
        let price = "100".parse().unwrap();
        let bid = encode_key(Side::Buy, &price, 1, 1).unwrap();
        books.book_mut(Side::Buy).put(bid, encode_value(None)).unwrap();

        assert!(books.book(Side::Buy).contains(&bid));
        assert!(!books.book(Side::Sell).contains(&bid));
        assert!(!books.best_cursor(Side::Sell).valid());
        assert_eq!(books.best_cursor(Side::Buy).key(), Some(&bid));
    }

    #[test]
    fn test_scan_limit_and_start() {
        let mut books = OrderBookStore::in_memory();
        for b in 1u8..=5 {
            books.book_mut(Side::Sell).put(key(b), [b; 8]).unwrap();
        }
        let page = books.scan(Side::Sell, None, 2);
        assert_eq!(page.iter().map(|(k, _)| *k).collect::<Vec<_>>(), vec![key(1), key(2)]);

        let rest = books.scan(Side::Sell, Some(&key(3)), 10);
        assert_eq!(rest.len(), 3);
        assert_eq!(rest[0], (key(3), [3; 8]));
    }
}
