use std::env;
use std::path::PathBuf;

use crate::locktime::{LocktimeTable, DEFAULT_LOCKTIME_SECS};

/// Configuration loaded from environment variables
pub struct Config {
    pub stats_log_path: PathBuf,
    pub sweep_interval_secs: u64,
    pub requery_secs: Option<i64>,
    pub locktime_secs: i64,
    pub coin_locktimes: Vec<(String, i64)>,
    pub rust_log: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Everything defaults to something workable; set STATS_LOG to point at
    /// the transport layer's event log and COIN_LOCKTIMES (comma-separated
    /// COIN=SECS pairs) for chains slower than the default lock time.
    pub fn from_env() -> Self {
        let stats_log_path = env::var("STATS_LOG")
            .unwrap_or_else(|_| "stats.log".to_string())
            .into();

        let sweep_interval_secs = env::var("SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let requery_secs = env::var("REQUERY_SECS").ok().and_then(|s| s.parse().ok());

        let locktime_secs = env::var("LOCKTIME_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_LOCKTIME_SECS);

        let coin_locktimes = env::var("COIN_LOCKTIMES")
            .map(|s| parse_coin_locktimes(&s))
            .unwrap_or_default();

        let rust_log = env::var("RUST_LOG").ok();

        Self {
            stats_log_path,
            sweep_interval_secs,
            requery_secs,
            locktime_secs,
            coin_locktimes,
            rust_log,
        }
    }

    pub fn locktimes(&self) -> LocktimeTable {
        let mut table = LocktimeTable::new(self.locktime_secs);
        for (coin, secs) in &self.coin_locktimes {
            table.set_locktime(coin, *secs);
        }
        table
    }
}

fn parse_coin_locktimes(s: &str) -> Vec<(String, i64)> {
    s.split(',')
        .filter_map(|pair| {
            let (coin, secs) = pair.split_once('=')?;
            let secs = secs.trim().parse().ok()?;
            let coin = coin.trim();
            if coin.is_empty() {
                None
            } else {
                Some((coin.to_string(), secs))
            }
        })
        .collect()
}
