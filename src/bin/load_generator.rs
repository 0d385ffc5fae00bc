//! Load Generator
//!
//! Places a deterministic stream of orders from many threads at once and reports
//! throughput and matching statistics.

use clap::Parser;
use rayon::prelude::*;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use keyed_matching_engine::metrics::MetricsReporter;
use keyed_matching_engine::orderbook::OrderedStore;
use keyed_matching_engine::{
    EngineConfig, InMemoryOrderRecords, NewOrder, OrderBook, PlaceOutcome, Price, Side,
    SystemClock,
};

#[derive(Parser, Debug)]
#[command(name = "load_generator", about = "Parallel placement throughput run")]
struct Args {
    /// Orders to place
    #[arg(long, default_value_t = 100_000)]
    orders: u64,

    /// Distinct owners cycling through the stream
    #[arg(long, default_value_t = 64)]
    owners: u64,

    /// Percentage of orders carrying a 1ms TTL
    #[arg(long, default_value_t = 10)]
    ttl_percent: u64,

    /// Use journal-backed books in this directory instead of memory
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Args::parse();

    match &args.data_dir {
        Some(dir) => {
            let config = EngineConfig {
                data_dir: dir.clone(),
                ..EngineConfig::default()
            };
            let book = OrderBook::open(
                config,
                Arc::new(InMemoryOrderRecords::new()),
                Arc::new(SystemClock),
            )?;
            run(&book, &args);
            book.flush()?;
        }
        None => run(&OrderBook::in_memory(), &args),
    }
    Ok(())
}

/// Order `i` of the stream: alternating sides around a 100.00 mid.
fn request(i: u64, args: &Args) -> Option<NewOrder> {
    let side = if i % 2 == 0 { Side::Buy } else { Side::Sell };
    let offset = (i.wrapping_mul(7_919) % 200) as i64 - 100;
    let price = Price::new(Decimal::new(10_000 + offset, 2)).ok()?;
    let mut order = NewOrder::new(side, price, i % args.owners.max(1) + 1);
    if args.ttl_percent > 0 && i % 100 < args.ttl_percent {
        order = order.with_ttl(Duration::from_millis(1));
    }
    Some(order)
}

fn run<S: OrderedStore>(book: &OrderBook<S>, args: &Args) {
    let matched = AtomicU64::new(0);
    let rested = AtomicU64::new(0);
    let failed = AtomicU64::new(0);

    let start = Instant::now();
    (0..args.orders).into_par_iter().for_each(|i| {
        let Some(order) = request(i, args) else {
            failed.fetch_add(1, Ordering::Relaxed);
            return;
        };
        match book.place(order) {
            Ok(PlaceOutcome::Matched(_)) => {
                matched.fetch_add(1, Ordering::Relaxed);
            }
            Ok(PlaceOutcome::Rested(_)) => {
                rested.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                failed.fetch_add(1, Ordering::Relaxed);
                error!("Order {} failed: {}", i, e);
            }
        }
    });
    let elapsed = start.elapsed();

    let stats = book.stats();
    info!(
        "Placed {} orders in {:?} ({:.0} orders/s): {} matched, {} rested, {} failed; book {} bids / {} asks",
        args.orders,
        elapsed,
        args.orders as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        matched.load(Ordering::Relaxed),
        rested.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        stats.resting_bids,
        stats.resting_asks
    );
    MetricsReporter::new(Arc::clone(book.metrics()), Duration::from_secs(1)).report();
}
