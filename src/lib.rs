//! Keyed Matching Engine
//!
//! A price-time priority matching engine whose two books are ordered key-value
//! stores. Each resting order is a single 32-byte key whose byte order is the
//! book's priority order, so matching is a walk from one end of a sorted map.
//!
//! # Features
//!
//! - **Sortable keys**: price, creation time and owner packed big-endian; bid time complemented
//! - **Early termination**: a scan stops at the first eligible counter-order that does not cross
//! - **Self-trade prevention**: an owner's own resting orders are skipped, never matched
//! - **Lazy expiry**: orders with a TTL are evicted when a scan passes over them
//! - **Atomic operations**: place and cancel run under one lock across both books
//! - **Persistence**: journal-backed books with CRC32C records and compaction
//!
//! # Quick Start
//!
//! ```rust
//! use keyed_matching_engine::{NewOrder, OrderBook, PlaceOutcome};
//!
//! let book = OrderBook::in_memory();
//!
//! // A resting ask from user 1
//! let ask = book.place(NewOrder::sell(1, "100.5".parse()?))?;
//! assert!(matches!(ask, PlaceOutcome::Rested(_)));
//!
//! // A crossing bid from user 2 takes it
//! let outcome = book.place(NewOrder::buy(2, "101".parse()?))?;
//! assert_eq!(outcome.matched().map(|m| m.order.owner_id), Some(1));
//!
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Architecture
//!
//! 1. **Key codec** (`orderbook::codec`): order fields to/from 32-byte keys
//! 2. **Books** (`orderbook::store`, `orderbook::journal`): ordered key spaces with cursors
//! 3. **Matching** (`orderbook::matching`): best-first scan of the opposite book
//! 4. **Orchestration** (`orderbook::book`): the guard, placement and cancellation
//! 5. **Record catalog** (`orderbook::records`): per-owner listing mirror

pub mod config;
pub mod metrics;
pub mod orderbook;
pub mod utils;

// Re-export commonly used types
pub use config::EngineConfig;
pub use orderbook::{
    error::{OrderBookError, OrderBookResult},
    types::{NewOrder, Order, OrderKey, OwnerId, PlaceOutcome, Price, RestingOrder, Side},
    InMemoryOrderRecords, OrderBook, OrderRecord, OrderRecords,
};

pub use metrics::EngineMetrics;
pub use utils::time::{Clock, ManualClock, SystemClock};
