//! Stats runtime: tails the trade event log and sweeps swap state
//!
//! The networking layer appends events to the stats log and drains the
//! outbound channel; this binary stands in for both ends while running the
//! engine the way the node does, one sweep per interval tick.

use std::sync::{Arc, Mutex};

use swapflow::broadcast::ChannelBroadcaster;
use swapflow::config::Config;
use swapflow::stats_core::engine::{SnapshotFilter, StatsEngine};
use swapflow::stats_core::pubkeys::SwapCountTrust;
use tokio::time::{interval, Duration};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let config = Config::from_env();

    // Write logs to stderr so piped report output stays clean
    let mut builder = if config.rust_log.is_some() {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
    } else {
        env_logger::Builder::from_default_env()
    };
    builder.target(env_logger::Target::Stderr).init();

    log::info!("🚀 Starting swapflow stats runtime...");
    log::info!("📊 Configuration:");
    log::info!("   STATS_LOG: {}", config.stats_log_path.display());
    log::info!("   Sweep interval: {}s", config.sweep_interval_secs);
    log::info!("   Default lock time: {}s", config.locktime_secs);

    let (broadcaster, mut outbound) = ChannelBroadcaster::new();

    let mut engine = StatsEngine::new(
        config.stats_log_path.clone(),
        config.locktimes(),
        Arc::new(broadcaster),
        Arc::new(SwapCountTrust),
    );
    if let Some(secs) = config.requery_secs {
        engine = engine.with_requery_secs(secs);
    }
    let engine = Arc::new(Mutex::new(engine));

    // Drain fire-and-forget broadcasts; the p2p transport takes over here
    tokio::spawn(async move {
        while let Some(payload) = outbound.recv().await {
            log::info!("📤 outbound {}", payload);
        }
    });

    log::info!("⏰ Starting sweep loop (interval: {}s)", config.sweep_interval_secs);
    let mut timer = interval(Duration::from_secs(config.sweep_interval_secs.max(1)));
    loop {
        timer.tick().await;

        let report = {
            let mut engine = engine.lock().unwrap();
            engine.snapshot(&SnapshotFilter::default())
        };

        if report.newlines > 0 {
            log::info!(
                "✅ ingested {} lines, RT.{} completed.{} uniques.{}",
                report.newlines,
                report.rt_count,
                report.swaps_count,
                report.counters.uniques
            );
        } else {
            log::debug!(
                "sweep idle, RT.{} completed.{}",
                report.rt_count,
                report.swaps_count
            );
        }
    }
}
