//! swapflow: swap-lifecycle tracking and aggregation for a p2p atomic-swap node
//!
//! The transport layer appends protocol events (request, reserved, connect,
//! connected, tradestatus) to an append-only stats log; [`StatsEngine`]
//! replays that log plus live peer callbacks into a queryable picture of
//! every swap, expires stale trades, and folds finished volume into
//! time-bucketed OHLC bars.

pub mod broadcast;
pub mod config;
pub mod locktime;
pub mod stats_core;

pub use broadcast::{Broadcaster, ChannelBroadcaster, NullBroadcaster};
pub use config::Config;
pub use locktime::LocktimeTable;
pub use stats_core::engine::{SnapshotFilter, SnapshotReport, StatsEngine, StatusUpdate};
