//! Core order book module
//!
//! Byte-ordered key codec, the two ordered books, the matching scan and the
//! guarded place/cancel orchestration.

pub mod book;
pub mod codec;
pub mod error;
pub mod journal;
pub mod matching;
pub mod records;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use book::{OrderBook, OrderBookStats, ReconcileReport};
pub use error::{OrderBookError, OrderBookResult};
pub use journal::JournalStore;
pub use matching::{MatchingEngine, ScanReport};
pub use records::{InMemoryOrderRecords, OrderRecord, OrderRecords, RecordError};
pub use store::{BookCursor, MemoryStore, OrderBookStore, OrderedStore, StoreError};
pub use types::{
    NewOrder, Order, OrderKey, OwnerId, PlaceOutcome, Price, RestingOrder, Side, Timestamp,
};
