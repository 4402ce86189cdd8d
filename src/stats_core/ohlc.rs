//! Fixed-width OHLC bars over finalized swap volume

use serde::Serialize;
use thiserror::Error;

/// Shortest supported bucket width.
pub const MIN_BAR_TIMESCALE_SECS: i64 = 60;

/// Default number of buckets when the caller leaves the window open, sized
/// to one chart screen.
pub const DEFAULT_BAR_SPAN: i64 = 1024;

/// Volumes below this are chart noise and produce no output bar.
pub const SMALLVAL: f64 = 1e-9;

#[derive(Debug, Error)]
pub enum BarsError {
    #[error("one minute is the shortest timescale, got {0}s")]
    TimescaleTooSmall(i64),
}

/// One time bucket of aggregated trades.
#[derive(Debug, Clone, Serialize)]
pub struct OhlcBar {
    /// Bucket start.
    pub timestamp: i64,
    #[serde(skip)]
    pub firsttime: i64,
    #[serde(skip)]
    pub lasttime: i64,
    pub high: f64,
    pub low: f64,
    pub open: f64,
    pub close: f64,
    /// Cumulative quote-asset volume.
    pub relsum: f64,
    /// Cumulative base-asset volume.
    pub basesum: f64,
    pub numtrades: u32,
}

impl OhlcBar {
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            firsttime: 0,
            lasttime: 0,
            high: 0.0,
            low: 0.0,
            open: 0.0,
            close: 0.0,
            relsum: 0.0,
            basesum: 0.0,
            numtrades: 0,
        }
    }

    /// Fold one trade into the bar. Open tracks the earliest timestamp seen,
    /// close the latest, so out-of-order arrival does not skew either.
    pub fn update(&mut self, timestamp: i64, basevol: f64, relvol: f64) {
        if basevol <= SMALLVAL || relvol <= SMALLVAL {
            return;
        }
        let price = relvol / basevol;
        if self.firsttime == 0 || timestamp < self.firsttime {
            self.firsttime = timestamp;
            self.open = price;
        }
        if self.lasttime == 0 || timestamp > self.lasttime {
            self.lasttime = timestamp;
            self.close = price;
        }
        if self.low == 0.0 || price < self.low {
            self.low = price;
        }
        if self.high == 0.0 || price > self.high {
            self.high = price;
        }
        self.basesum += basevol;
        self.relsum += relvol;
        self.numtrades += 1;
    }

    /// Bars with no trades or negligible volume are omitted from output.
    pub fn is_populated(&self) -> bool {
        self.numtrades != 0 && self.relsum > SMALLVAL && self.basesum > SMALLVAL
    }

    pub fn average_price(&self) -> f64 {
        if self.basesum > SMALLVAL {
            self.relsum / self.basesum
        } else {
            0.0
        }
    }
}

/// Resolve the queried window and allocate one empty bar per bucket
/// spanning it, inclusive.
pub fn allocate_bars(
    starttime: i64,
    endtime: i64,
    timescale: i64,
    now: i64,
) -> Result<(i64, i64, Vec<OhlcBar>), BarsError> {
    if timescale < MIN_BAR_TIMESCALE_SECS {
        return Err(BarsError::TimescaleTooSmall(timescale));
    }
    let end = if endtime == 0 {
        (now / timescale) * timescale
    } else {
        endtime
    };
    let start = if starttime == 0 || starttime >= end {
        end - DEFAULT_BAR_SPAN * timescale
    } else {
        starttime
    };
    let numbars = ((end - start) / timescale + 1) as usize;
    let bars = (0..numbars)
        .map(|i| OhlcBar::new(start + i as i64 * timescale))
        .collect();
    Ok((start, end, bars))
}
