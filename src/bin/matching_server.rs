//! Matching Server
//!
//! A demonstration server that opens journal-backed books, drives them with
//! simulated users and reports engine metrics, with a Prometheus endpoint.

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use keyed_matching_engine::metrics::MetricsReporter;
use keyed_matching_engine::orderbook::JournalStore;
use keyed_matching_engine::{
    EngineConfig, InMemoryOrderRecords, NewOrder, OrderBook, OrderBookError, OwnerId,
    PlaceOutcome, Price, Side, SystemClock,
};

#[derive(Parser, Debug)]
#[command(name = "matching_server", about = "Runs the matching engine against simulated users")]
struct Args {
    /// JSON engine configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the configured book directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// fsync the journals after every write
    #[arg(long)]
    sync_writes: bool,

    /// Number of simulated users
    #[arg(long, default_value_t = 8)]
    users: u64,

    /// Milliseconds between orders of one user
    #[arg(long, default_value_t = 50)]
    order_interval_ms: u64,

    /// Prometheus listen address
    #[arg(long, default_value = "0.0.0.0:9000")]
    metrics_addr: SocketAddr,

    /// Seconds between metrics log lines
    #[arg(long, default_value_t = 5)]
    report_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    info!("Starting Matching Server...");

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_str(&std::fs::read_to_string(path)?)?,
        None => EngineConfig::default(),
    };
    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    config.sync_writes |= args.sync_writes;

    // Start Prometheus metrics server
    PrometheusBuilder::new()
        .with_http_listener(args.metrics_addr)
        .install()?;
    info!("Prometheus metrics on http://{}/metrics", args.metrics_addr);

    let records = Arc::new(InMemoryOrderRecords::new());
    let book = Arc::new(OrderBook::open(config, records, Arc::new(SystemClock))?);

    // The catalog is in-process, so it starts empty and is rebuilt from the books
    let rebuilt = book.reconcile_records()?;
    let stats = book.stats();
    info!(
        "Books ready: {} bids, {} asks ({} records rebuilt)",
        stats.resting_bids, stats.resting_asks, rebuilt.inserted
    );

    // Start metrics reporting
    let reporter = MetricsReporter::new(
        Arc::clone(book.metrics()),
        Duration::from_secs(args.report_secs),
    );
    tokio::spawn(async move {
        reporter.run().await;
    });

    // Start simulated users
    for owner in 1..=args.users {
        let book = Arc::clone(&book);
        let pace = Duration::from_millis(args.order_interval_ms);
        tokio::spawn(async move {
            simulate_user(book, owner, pace).await;
        });
    }

    info!("Matching server is running. Press Ctrl+C to stop.");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutting down matching server...");
    if let Err(e) = book.flush() {
        error!("Failed to flush books: {}", e);
    }

    let stats = book.stats();
    info!(
        "Final book: {} bids, {} asks, best bid {:?}, best ask {:?}",
        stats.resting_bids,
        stats.resting_asks,
        book.best(Side::Buy)?.map(|p| p.to_string()),
        book.best(Side::Sell)?.map(|p| p.to_string())
    );

    Ok(())
}

async fn simulate_user(book: Arc<OrderBook<JournalStore>>, owner: OwnerId, pace: Duration) {
    let mut rng = StdRng::from_entropy();
    let mut ticker = interval(pace);

    loop {
        ticker.tick().await;

        // Occasionally pull one of our own resting orders
        if rng.gen_bool(0.1) {
            cancel_one(&book, owner);
            continue;
        }

        let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
        let cents: i64 = rng.gen_range(9_900..=10_100);
        let price = match Price::new(Decimal::new(cents, 2)) {
            Ok(price) => price,
            Err(e) => {
                warn!("Generated invalid price: {}", e);
                continue;
            }
        };

        let mut request = NewOrder::new(side, price, owner);
        if rng.gen_bool(0.3) {
            request = request.with_ttl(Duration::from_millis(rng.gen_range(100..2_000)));
        }

        match book.place(request) {
            Ok(PlaceOutcome::Matched(resting)) => {
                info!(
                    "User {} {} @ {} filled against {} (user {})",
                    owner, side, price, resting.key, resting.order.owner_id
                );
            }
            Ok(PlaceOutcome::Rested(_)) => {}
            Err(e) => error!("User {} placement failed: {}", owner, e),
        }
    }
}

fn cancel_one(book: &OrderBook<JournalStore>, owner: OwnerId) {
    let oldest = match book.list(owner) {
        Ok(records) => records.into_iter().next(),
        Err(e) => {
            warn!("Listing orders for user {} failed: {}", owner, e);
            return;
        }
    };
    if let Some(record) = oldest {
        match book.cancel_by_record_id(&record.id, owner) {
            Ok(key) => info!("User {} cancelled {}", owner, key),
            Err(OrderBookError::OrderNotFound) => {}
            Err(e) => error!("User {} cancel failed: {}", owner, e),
        }
    }
}
