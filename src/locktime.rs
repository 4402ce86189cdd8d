//! Per-coin settlement lock times
//!
//! The wallet subsystem owns the real per-chain parameters; this table is
//! the engine-facing view with a default and per-coin overrides. A pair's
//! lock time is the slower side's, since that chain bounds settlement.

use std::collections::HashMap;

pub const DEFAULT_LOCKTIME_SECS: i64 = 3600;

#[derive(Debug, Clone)]
pub struct LocktimeTable {
    default_secs: i64,
    overrides: HashMap<String, i64>,
}

impl Default for LocktimeTable {
    fn default() -> Self {
        Self::new(DEFAULT_LOCKTIME_SECS)
    }
}

impl LocktimeTable {
    pub fn new(default_secs: i64) -> Self {
        Self {
            default_secs,
            overrides: HashMap::new(),
        }
    }

    pub fn set_locktime(&mut self, coin: &str, secs: i64) {
        self.overrides.insert(coin.to_string(), secs);
    }

    pub fn coin_locktime(&self, coin: &str) -> i64 {
        self.overrides.get(coin).copied().unwrap_or(self.default_secs)
    }

    pub fn pair_locktime(&self, base: &str, rel: &str) -> i64 {
        self.coin_locktime(base).max(self.coin_locktime(rel))
    }
}
