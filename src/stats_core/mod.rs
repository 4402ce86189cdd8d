//! Stats Core - Swap Lifecycle Tracking Engine
//!
//! Reconstructs the state of every atomic swap from the append-only stats
//! log plus live peer callbacks, and aggregates finished volume into OHLC
//! bars.
//!
//! # Architecture
//!
//! ```text
//! stats.log → StatsLogCursor → classify (MethodKind + counters)
//!     ↓
//! SwapStore (active / finalized partitions, quote reconciliation)
//!     ↓
//! expiry sweep + stale re-query + PubkeyTrustIndex refresh
//!     ↓
//! SnapshotReport → OhlcBar series
//! ```

pub mod engine;
pub mod log;
pub mod ohlc;
pub mod pubkeys;
pub mod record;
pub mod store;
pub mod types;

pub use engine::{EventCounters, SnapshotFilter, SnapshotReport, StatsEngine, StatusUpdate};
pub use log::{StatsLogCursor, TradeLogWriter};
pub use ohlc::{BarsError, OhlcBar};
pub use pubkeys::{PubkeyTrustIndex, TrustScorer};
pub use record::{derive_swap_id, RecordSummary, SwapRecord};
pub use store::SwapStore;
pub use types::{MethodKind, RawEvent, SwapQuote, TxidSlot};
