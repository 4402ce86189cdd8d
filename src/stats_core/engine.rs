//! Swap stats engine
//!
//! Facade over the log cursor, record store, pubkey index, and OHLC builder.
//! All state lives on the engine instance; every query call is also a
//! maintenance tick (log poll, expiry sweep, stale re-query, trust refresh),
//! run synchronously under whatever lock the caller wraps the engine in.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::log::StatsLogCursor;
use super::ohlc::{allocate_bars, BarsError, OhlcBar};
use super::pubkeys::{PubkeyTrustIndex, TrustScorer};
use super::record::{derive_swap_id, RecordSummary, SwapRecord};
use super::store::SwapStore;
use super::types::{MethodKind, RawEvent, SwapQuote, SATS_PER_COIN};
use crate::broadcast::Broadcaster;
use crate::locktime::LocktimeTable;

/// Records considered stale after this long without activity are echoed to
/// peers when queried directly.
const ECHO_STALE_SECS: i64 = 60;

/// Cumulative since-start event counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EventCounters {
    pub requests: u32,
    pub reserveds: u32,
    pub connects: u32,
    pub connecteds: u32,
    pub tradestatuses: u32,
    pub duplicates: u32,
    pub parse_errors: u32,
    pub unknowns: u32,
    pub unexpected: u32,
    pub store_drops: u32,
    /// Distinct swap identifiers seen.
    pub uniques: u32,
}

/// Snapshot request filters. Zero time bounds mean unrestricted; a start in
/// the future with end == start selects still-open swaps only. Coin, gui,
/// and pubkey filters match either side of the trade.
#[derive(Debug, Default, Clone)]
pub struct SnapshotFilter {
    pub starttime: i64,
    pub endtime: i64,
    pub gui: Option<String>,
    pub pubkey: Option<String>,
    pub base: Option<String>,
    pub rel: Option<String>,
}

/// Per-coin volume totals over the records a snapshot matched.
#[derive(Debug, Clone, Serialize)]
pub struct CoinVolume {
    pub coin: String,
    pub srcvol: f64,
    pub destvol: f64,
    pub numtrades: u32,
}

impl CoinVolume {
    fn new(coin: &str) -> Self {
        Self {
            coin: coin.to_string(),
            srcvol: 0.0,
            destvol: 0.0,
            numtrades: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotReport {
    /// Lines ingested by the poll this snapshot ran.
    pub newlines: usize,
    pub swaps: Vec<RecordSummary>,
    /// Active records after the sweep.
    pub rt_count: usize,
    /// Finalized records after the sweep.
    pub swaps_count: usize,
    pub volumes: Vec<CoinVolume>,
    pub counters: EventCounters,
}

/// Out-of-band status update delivered by a peer, mirroring the
/// `swapstatus` echo payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusUpdate {
    #[serde(default)]
    pub aliceid: u64,
    #[serde(default)]
    pub ind: u32,
    #[serde(default)]
    pub finished: i64,
    #[serde(default)]
    pub expired: i64,
}

pub struct StatsEngine {
    cursor: StatsLogCursor,
    store: SwapStore,
    pubkeys: PubkeyTrustIndex,
    counters: EventCounters,
    locktimes: LocktimeTable,
    broadcaster: Arc<dyn Broadcaster>,
    trust: Arc<dyn TrustScorer>,
    /// Staleness threshold for re-query broadcasts, chosen once per engine.
    requery_secs: i64,
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl StatsEngine {
    pub fn new(
        log_path: PathBuf,
        locktimes: LocktimeTable,
        broadcaster: Arc<dyn Broadcaster>,
        trust: Arc<dyn TrustScorer>,
    ) -> Self {
        let requery_secs = rand::thread_rng().gen_range(60..360);
        Self {
            cursor: StatsLogCursor::new(log_path),
            store: SwapStore::default(),
            pubkeys: PubkeyTrustIndex::default(),
            counters: EventCounters::default(),
            locktimes,
            broadcaster,
            trust,
            requery_secs,
            now_fn: Box::new(|| chrono::Utc::now().timestamp()),
        }
    }

    /// Override the clock, for deterministic tests.
    pub fn with_now_fn(mut self, now_fn: Box<dyn Fn() -> i64 + Send + Sync>) -> Self {
        self.now_fn = now_fn;
        self
    }

    pub fn with_requery_secs(mut self, secs: i64) -> Self {
        self.requery_secs = secs;
        self
    }

    pub fn counters(&self) -> &EventCounters {
        &self.counters
    }

    pub fn store(&self) -> &SwapStore {
        &self.store
    }

    pub fn pubkeys(&self) -> &PubkeyTrustIndex {
        &self.pubkeys
    }

    pub fn log_offset(&self) -> u64 {
        self.cursor.offset()
    }

    /// Read and ingest every line appended since the last poll. Returns the
    /// number of lines that parsed as structured events.
    pub fn poll_log(&mut self) -> usize {
        let lines = match self.cursor.poll() {
            Ok(lines) => lines,
            Err(e) => {
                log::error!("stats log poll failed: {}", e);
                return 0;
            }
        };
        let mut parsed = 0;
        for line in &lines {
            if self.ingest_line(line) {
                parsed += 1;
            }
        }
        parsed
    }

    /// Classify one raw log line and apply it. Returns false when the line
    /// is not a well-formed structured payload.
    pub fn ingest_line(&mut self, line: &str) -> bool {
        let ev: RawEvent = match serde_json::from_str(line) {
            Ok(ev) => ev,
            Err(e) => {
                self.counters.parse_errors += 1;
                log::debug!("dropping malformed stats line: {}", e);
                return false;
            }
        };
        let kind = match MethodKind::parse(&ev.method) {
            Some(kind) => kind,
            None => {
                self.counters.unknowns += 1;
                log::warn!("unrecognized method {:?} in stats line", ev.method);
                MethodKind::Unknown
            }
        };
        match kind {
            MethodKind::Request => self.counters.requests += 1,
            MethodKind::Reserved => self.counters.reserveds += 1,
            MethodKind::Connect => self.counters.connects += 1,
            MethodKind::Connected => self.counters.connecteds += 1,
            MethodKind::Tradestatus => self.counters.tradestatuses += 1,
            MethodKind::Unknown => {}
        }
        self.apply_event(kind, &ev);
        true
    }

    fn apply_event(&mut self, kind: MethodKind, ev: &RawEvent) {
        let now = (self.now_fn)();
        if kind == MethodKind::Tradestatus {
            self.apply_tradestatus(ev, now);
            return;
        }

        let body = ev.quote_body();
        let quote = match SwapQuote::from_event(body) {
            Some(quote) => quote,
            None => {
                self.counters.parse_errors += 1;
                log::warn!("unusable {} quote, dropping event", kind.as_str());
                return;
            }
        };
        let aliceid = derive_swap_id(&body.desttxid, body.destvout, &body.feetxid, body.feevout);
        let iambob = body.iambob != 0;
        let gui = quote.gui.clone();

        if let Some(rec) = self.store.find_mut(aliceid) {
            if rec.ratchet(kind) {
                rec.replace_quote(quote);
                rec.last_activity = now;
            } else {
                self.counters.duplicates += 1;
            }
            rec.set_gui(&gui, iambob);
            return;
        }

        // New identifier: seed a record from the quote. A replayed line that
        // already carries a finished status starts in the finalized partition.
        let start_active = body.status != "finished";
        let mut rec = SwapRecord::new(aliceid, quote, self.counters.uniques, now);
        rec.kind = kind;
        rec.set_gui(&gui, iambob);
        let terminal = rec.is_terminal();
        let srchash = rec.quote.srchash.clone();
        let desthash = rec.quote.desthash.clone();
        match self.store.insert(rec, start_active) {
            Ok(()) => {
                self.counters.uniques += 1;
                if !terminal {
                    self.pubkeys.register_swap(&srchash, &desthash, aliceid);
                }
            }
            Err(e) => {
                self.counters.store_drops += 1;
                log::error!("{}", e);
            }
        }
    }

    fn apply_tradestatus(&mut self, ev: &RawEvent, now: i64) {
        let pair_locktime = self.locktimes.pair_locktime(&ev.bob, &ev.alice);
        let mut matched = None;

        if let Some(rec) = self.store.find_mut(ev.aliceid) {
            if rec.matches_tradestatus(ev) {
                if rec.kind == MethodKind::Tradestatus {
                    self.counters.duplicates += 1;
                }
                rec.apply_tradestatus(ev, now, pair_locktime);
                matched = Some(rec.aliceid);
            } else if rec.quote.requestid == ev.requestid && rec.quote.quoteid == ev.quoteid {
                log::warn!(
                    "mismatched tradestatus for swap {}: {}/{} {}/{} {:.8}/{:.8} -> {:.8}/{:.8}",
                    ev.aliceid,
                    ev.bob,
                    rec.quote.base,
                    ev.alice,
                    rec.quote.rel,
                    ev.srcamount,
                    rec.quote.satoshis as f64 / SATS_PER_COIN,
                    ev.destamount,
                    rec.quote.destsatoshis as f64 / SATS_PER_COIN,
                );
            }
        }

        // Identifier derivation can disagree between the two parties; recover
        // by the request/quote id pair before giving up on the event.
        if matched.is_none() {
            if let Some(rec) = self.store.fallback_match_mut(ev.requestid, ev.quoteid) {
                if rec.matches_tradestatus(ev) {
                    if rec.kind == MethodKind::Tradestatus {
                        self.counters.duplicates += 1;
                    }
                    rec.apply_tradestatus(ev, now, pair_locktime);
                    matched = Some(rec.aliceid);
                } else {
                    log::warn!(
                        "tradestatus mismatched after delayed match, requestid {} quoteid {}",
                        ev.requestid,
                        ev.quoteid
                    );
                }
            }
        }

        match matched {
            Some(aliceid) => {
                let terminal = self.store.find(aliceid).map(|r| r.is_terminal()).unwrap_or(false);
                if terminal {
                    self.store.finalize(aliceid);
                }
            }
            None => {
                self.counters.unexpected += 1;
                log::warn!(
                    "unexpected tradestatus, swap {} requestid {} quoteid {}",
                    ev.aliceid,
                    ev.requestid,
                    ev.quoteid
                );
            }
        }
    }

    /// Poll, sweep, and answer a filtered snapshot. Expired records migrate,
    /// stale active records trigger a `gettradestatus` re-query, and every
    /// pubkey's trust score is refreshed.
    pub fn snapshot(&mut self, filter: &SnapshotFilter) -> SnapshotReport {
        let mut filter = filter.clone();
        if filter.starttime > filter.endtime {
            filter.starttime = filter.endtime;
        }
        let newlines = self.poll_log();
        let now = (self.now_fn)();

        for aliceid in self.store.active_ids() {
            let mut terminal = false;
            let mut requery = false;
            if let Some(rec) = self.store.find_mut(aliceid) {
                let locktime = self.locktimes.pair_locktime(&rec.quote.base, &rec.quote.rel);
                rec.check_expiry(now, locktime);
                terminal = rec.is_terminal();
                requery = !terminal && now > rec.last_activity + self.requery_secs;
            }
            if terminal {
                self.store.finalize(aliceid);
            } else if requery {
                self.broadcaster.send(serde_json::json!({
                    "method": "gettradestatus",
                    "aliceid": aliceid,
                }));
            }
        }

        // A record seeded straight into the finalized partition by a replayed
        // finished line carries no terminal timestamp yet; expiry still
        // applies to it.
        for aliceid in self.store.finalized_ids() {
            if let Some(rec) = self.store.find_mut(aliceid) {
                let locktime = self.locktimes.pair_locktime(&rec.quote.base, &rec.quote.rel);
                rec.check_expiry(now, locktime);
            }
        }

        let mut matched: Vec<(u32, RecordSummary)> = Vec::new();
        let mut volumes: HashMap<String, CoinVolume> = HashMap::new();
        for rec in self.store.iter_all() {
            if !record_matches(rec, &filter, now) {
                continue;
            }
            let summary = rec.summary();
            let base = volumes
                .entry(summary.base.clone())
                .or_insert_with(|| CoinVolume::new(&summary.base));
            base.srcvol += summary.basevol;
            base.numtrades += 1;
            let rel = volumes
                .entry(summary.rel.clone())
                .or_insert_with(|| CoinVolume::new(&summary.rel));
            rel.destvol += summary.relvol;
            rel.numtrades += 1;
            matched.push((rec.seq, summary));
        }
        matched.sort_by_key(|(seq, _)| *seq);

        self.pubkeys.recompute(self.trust.as_ref());

        let mut volumes: Vec<CoinVolume> = volumes.into_values().collect();
        volumes.sort_by(|a, b| a.coin.cmp(&b.coin));

        SnapshotReport {
            newlines,
            swaps: matched.into_iter().map(|(_, summary)| summary).collect(),
            rt_count: self.store.active_len(),
            swaps_count: self.store.finalized_len(),
            volumes,
            counters: self.counters,
        }
    }

    /// Direct record lookup. A record idle past the echo threshold is also
    /// broadcast to peers as a `swapstatus` payload.
    pub fn get_trade_status(&self, aliceid: u64) -> Option<RecordSummary> {
        let now = (self.now_fn)();
        let rec = self.store.find(aliceid)?;
        let summary = rec.summary();
        if now > rec.last_activity + ECHO_STALE_SECS {
            if let Ok(serde_json::Value::Object(mut obj)) = serde_json::to_value(&summary) {
                obj.insert("method".into(), "swapstatus".into());
                self.broadcaster.send(serde_json::Value::Object(obj));
            }
        }
        Some(summary)
    }

    /// Out-of-band peer status: trusts the reported stage and terminal
    /// flags, but only when the stage strictly advances. Terminal markers
    /// stay mutually exclusive and set-once.
    pub fn report_status(&mut self, update: &StatusUpdate) {
        let now = (self.now_fn)();
        let terminal = match self.store.find_mut(update.aliceid) {
            Some(rec) => {
                rec.last_activity = now;
                if let Some(kind) = MethodKind::from_index(update.ind) {
                    if rec.ratchet(kind) {
                        log::info!(
                            "peer status advanced swap {} to {}",
                            update.aliceid,
                            kind.as_str()
                        );
                        if update.finished != 0 {
                            rec.mark_finished(update.finished);
                        } else if update.expired != 0 {
                            rec.mark_expired(update.expired);
                        }
                    }
                }
                rec.is_terminal()
            }
            None => {
                log::debug!("status report for unknown swap {}", update.aliceid);
                return;
            }
        };
        if terminal {
            self.store.finalize(update.aliceid);
        }
    }

    /// Time-bucketed OHLC bars for a coin pair over the queried window.
    pub fn trades_series(
        &mut self,
        base: &str,
        rel: &str,
        starttime: i64,
        endtime: i64,
        timescale: i64,
    ) -> Result<Vec<OhlcBar>, BarsError> {
        let now = (self.now_fn)();
        let (start, end, mut bars) = allocate_bars(starttime, endtime, timescale, now)?;
        let filter = SnapshotFilter {
            starttime: start,
            endtime: end,
            base: Some(base.to_string()),
            rel: Some(rel.to_string()),
            ..Default::default()
        };
        let report = self.snapshot(&filter);
        for swap in &report.swaps {
            if swap.timestamp != 0 && swap.timestamp >= start && swap.timestamp <= end {
                let bucket = ((swap.timestamp - start) / timescale) as usize;
                if let Some(bar) = bars.get_mut(bucket) {
                    bar.update(swap.timestamp, swap.basevol, swap.relvol);
                }
            } else {
                log::debug!("swap {} outside bar window", swap.aliceid);
            }
        }
        Ok(bars.into_iter().filter(|bar| bar.is_populated()).collect())
    }
}

/// Snapshot filter evaluation for one record.
fn record_matches(rec: &SwapRecord, filter: &SnapshotFilter, now: i64) -> bool {
    let in_window = if filter.starttime == 0 && filter.endtime == 0 {
        true
    } else if filter.starttime > now && filter.endtime == filter.starttime {
        !rec.is_terminal()
    } else {
        rec.quote.timestamp >= filter.starttime && rec.quote.timestamp <= filter.endtime
    };
    if !in_window {
        return false;
    }
    for coin in [&filter.base, &filter.rel].into_iter().flatten() {
        if !coin.is_empty() && *coin != rec.quote.base && *coin != rec.quote.rel {
            return false;
        }
    }
    if let Some(gui) = &filter.gui {
        if !gui.is_empty() && *gui != rec.bob_gui && *gui != rec.alice_gui {
            return false;
        }
    }
    if let Some(pubkey) = &filter.pubkey {
        if !pubkey.is_empty() && *pubkey != rec.quote.srchash && *pubkey != rec.quote.desthash {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::ChannelBroadcaster;
    use crate::stats_core::pubkeys::SwapCountTrust;
    use std::sync::atomic::{AtomicI64, Ordering};
    use tokio::sync::mpsc::UnboundedReceiver;

    const NOW: i64 = 1_600_000_000;
    const ALICEID: u64 = 0x0201_0001_0403_0002;

    struct TestRig {
        engine: StatsEngine,
        outbound: UnboundedReceiver<serde_json::Value>,
        clock: Arc<AtomicI64>,
        _dir: tempfile::TempDir,
    }

    fn rig() -> TestRig {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(AtomicI64::new(NOW));
        let tick = clock.clone();
        let (broadcaster, outbound) = ChannelBroadcaster::new();
        let engine = StatsEngine::new(
            dir.path().join("stats.log"),
            LocktimeTable::default(),
            Arc::new(broadcaster),
            Arc::new(SwapCountTrust),
        )
        .with_now_fn(Box::new(move || tick.load(Ordering::Relaxed)))
        .with_requery_secs(120);
        TestRig {
            engine,
            outbound,
            clock,
            _dir: dir,
        }
    }

    fn quote_event(method: &str, timestamp: i64) -> serde_json::Value {
        serde_json::json!({
            "method": method,
            "base": "BEER",
            "rel": "KMD",
            "srchash": "aa".repeat(32),
            "desthash": "bb".repeat(32),
            "satoshis": 200_000_000u64,
            "destsatoshis": 2_000_000_000u64,
            "txfee": 1_000_000u64,
            "desttxfee": 1_000_000u64,
            "timestamp": timestamp,
            "requestid": 10,
            "quoteid": 20,
            "gui": "tradeapp",
            "iambob": 1,
            "desttxid": format!("0102{}", "cd".repeat(30)),
            "destvout": 1,
            "feetxid": format!("0304{}", "cd".repeat(30)),
            "feevout": 2,
        })
    }

    fn tradestatus_event(aliceid: u64, status: &str, timestamp: i64) -> serde_json::Value {
        serde_json::json!({
            "method": "tradestatus",
            "aliceid": aliceid,
            "requestid": 10,
            "quoteid": 20,
            "bob": "BEER",
            "alice": "KMD",
            "srcamount": 1.98,
            "destamount": 19.98,
            "status": status,
            "timestamp": timestamp,
            "bobdeposit": "11".repeat(32),
            "alicepayment": "22".repeat(32),
        })
    }

    fn ingest(engine: &mut StatsEngine, value: &serde_json::Value) {
        assert!(engine.ingest_line(&value.to_string()));
    }

    #[test]
    fn test_full_swap_scenario() {
        let mut rig = rig();
        ingest(&mut rig.engine, &quote_event("request", NOW - 90));
        ingest(&mut rig.engine, &quote_event("connected", NOW - 60));
        ingest(&mut rig.engine, &tradestatus_event(ALICEID, "finished", NOW - 10));

        let rec = rig.engine.store().find(ALICEID).unwrap();
        assert_eq!(rec.kind, MethodKind::Tradestatus);
        assert_eq!(rec.finished, NOW - 10);
        assert_eq!(rec.expired, 0);
        assert!(rec.bobdeposit.is_set());

        // Terminal record migrated out of the active partition
        assert_eq!(rig.engine.store().active_len(), 0);
        assert_eq!(rig.engine.store().finalized_len(), 1);

        let counters = rig.engine.counters();
        assert_eq!(counters.requests, 1);
        assert_eq!(counters.connecteds, 1);
        assert_eq!(counters.tradestatuses, 1);
        assert_eq!(counters.uniques, 1);
        assert_eq!(counters.duplicates, 0);
        assert_eq!(counters.unexpected, 0);

        // Both counterparties are indexed for trust scoring
        assert_eq!(rig.engine.pubkeys().len(), 2);
        let maker = rig.engine.pubkeys().get(&"aa".repeat(32)).unwrap();
        assert_eq!(maker.maker_swaps, vec![ALICEID]);
    }

    #[test]
    fn test_duplicate_event_counts_without_regressing_kind() {
        let mut rig = rig();
        ingest(&mut rig.engine, &quote_event("connected", NOW - 60));
        ingest(&mut rig.engine, &quote_event("request", NOW - 90));

        let rec = rig.engine.store().find(ALICEID).unwrap();
        assert_eq!(rec.kind, MethodKind::Connected);
        assert_eq!(rig.engine.counters().duplicates, 1);
        assert_eq!(rig.engine.counters().uniques, 1);
    }

    #[test]
    fn test_tradestatus_idempotence() {
        let mut rig = rig();
        ingest(&mut rig.engine, &quote_event("request", NOW - 90));
        ingest(&mut rig.engine, &tradestatus_event(ALICEID, "finished", NOW - 10));
        assert_eq!(rig.engine.counters().duplicates, 0);

        ingest(&mut rig.engine, &tradestatus_event(ALICEID, "finished", NOW - 5));
        let rec = rig.engine.store().find(ALICEID).unwrap();
        // Terminal timestamp set exactly once, duplicate counted on replay
        assert_eq!(rec.finished, NOW - 10);
        assert_eq!(rec.expired, 0);
        assert_eq!(rig.engine.counters().duplicates, 1);
        assert_eq!(rig.engine.store().finalized_len(), 1);
    }

    #[test]
    fn test_fallback_match_recovers_id_collision() {
        let mut rig = rig();
        ingest(&mut rig.engine, &quote_event("request", NOW - 90));

        // An unrelated swap that must stay untouched
        let mut other = quote_event("request", NOW - 80);
        other["requestid"] = 77.into();
        other["quoteid"] = 88.into();
        other["desttxid"] = format!("9999{}", "cd".repeat(30)).into();
        ingest(&mut rig.engine, &other);

        // Peer derived a different identifier for the first swap
        ingest(&mut rig.engine, &tradestatus_event(0xdead, "finished", NOW - 10));

        let rec = rig.engine.store().find(ALICEID).unwrap();
        assert_eq!(rec.finished, NOW - 10);
        assert_eq!(rig.engine.counters().unexpected, 0);

        let other_id = derive_swap_id(&format!("9999{}", "cd".repeat(30)), 1, &format!("0304{}", "cd".repeat(30)), 2);
        let other_rec = rig.engine.store().find(other_id).unwrap();
        assert_eq!(other_rec.finished, 0);
        assert_eq!(other_rec.quote.requestid, 77);
    }

    #[test]
    fn test_unmatched_tradestatus_counts_unexpected() {
        let mut rig = rig();
        ingest(&mut rig.engine, &tradestatus_event(0xdead, "finished", NOW - 10));
        assert_eq!(rig.engine.counters().unexpected, 1);
        assert!(rig.engine.store().is_empty());
    }

    #[test]
    fn test_expiry_sweep_migrates_record() {
        let mut rig = rig();
        // Negotiated three hours ago against a one-hour pair lock time
        ingest(&mut rig.engine, &quote_event("connected", NOW - 3 * 3600));

        let report = rig.engine.snapshot(&SnapshotFilter::default());
        assert_eq!(report.rt_count, 0);
        assert_eq!(report.swaps_count, 1);

        let rec = rig.engine.store().find(ALICEID).unwrap();
        assert_eq!(rec.expired, NOW);
        assert_eq!(rec.finished, 0);

        // A second sweep does not expire it again
        let expired_at = rec.expired;
        rig.clock.store(NOW + 500, Ordering::Relaxed);
        rig.engine.snapshot(&SnapshotFilter::default());
        assert_eq!(rig.engine.store().find(ALICEID).unwrap().expired, expired_at);
    }

    #[test]
    fn test_snapshot_repoll_is_noop() {
        let mut rig = rig();
        let writer =
            crate::stats_core::log::TradeLogWriter::open(&rig._dir.path().join("stats.log"))
                .unwrap();
        writer.append(&quote_event("request", NOW - 90)).unwrap();
        writer.append(&quote_event("connected", NOW - 60)).unwrap();

        let report = rig.engine.snapshot(&SnapshotFilter::default());
        assert_eq!(report.newlines, 2);
        let counters = *rig.engine.counters();
        let offset = rig.engine.log_offset();

        let report = rig.engine.snapshot(&SnapshotFilter::default());
        assert_eq!(report.newlines, 0);
        assert_eq!(*rig.engine.counters(), counters);
        assert_eq!(rig.engine.log_offset(), offset);
    }

    #[test]
    fn test_malformed_line_does_not_block_later_lines() {
        let mut rig = rig();
        let writer =
            crate::stats_core::log::TradeLogWriter::open(&rig._dir.path().join("stats.log"))
                .unwrap();
        writer.append(&serde_json::json!("not an object")).unwrap();
        writer.append(&quote_event("request", NOW - 90)).unwrap();

        assert_eq!(rig.engine.poll_log(), 1);
        assert_eq!(rig.engine.counters().parse_errors, 1);
        assert_eq!(rig.engine.counters().requests, 1);
    }

    #[test]
    fn test_unknown_method_counted_and_forwarded() {
        let mut rig = rig();
        ingest(&mut rig.engine, &quote_event("swapdebug", NOW - 90));
        assert_eq!(rig.engine.counters().unknowns, 1);
        // Forwarded with the lowest rank: the record exists but never outranks
        let rec = rig.engine.store().find(ALICEID).unwrap();
        assert_eq!(rec.kind, MethodKind::Unknown);
    }

    #[test]
    fn test_coin_filter_is_symmetric() {
        let mut rig = rig();
        ingest(&mut rig.engine, &quote_event("request", NOW - 90));
        let mut other = quote_event("request", NOW - 80);
        other["base"] = "LTC".into();
        other["rel"] = "DOGE".into();
        other["desttxid"] = format!("9999{}", "cd".repeat(30)).into();
        ingest(&mut rig.engine, &other);

        let beer = rig.engine.snapshot(&SnapshotFilter {
            base: Some("BEER".into()),
            ..Default::default()
        });
        assert_eq!(beer.swaps.len(), 1);
        assert_eq!(beer.swaps[0].base, "BEER");

        // Filter matches either side of the pair
        let kmd = rig.engine.snapshot(&SnapshotFilter {
            base: Some("KMD".into()),
            ..Default::default()
        });
        assert_eq!(kmd.swaps.len(), 1);
        assert_eq!(kmd.swaps[0].aliceid, ALICEID);

        let none = rig.engine.snapshot(&SnapshotFilter {
            base: Some("BTC".into()),
            ..Default::default()
        });
        assert!(none.swaps.is_empty());
    }

    #[test]
    fn test_still_open_window_selects_live_swaps() {
        let mut rig = rig();
        ingest(&mut rig.engine, &quote_event("request", NOW - 90));
        let mut other = quote_event("request", NOW - 80);
        other["requestid"] = 77.into();
        other["quoteid"] = 88.into();
        other["desttxid"] = format!("9999{}", "cd".repeat(30)).into();
        ingest(&mut rig.engine, &other);
        let other_id = derive_swap_id(&format!("9999{}", "cd".repeat(30)), 1, &format!("0304{}", "cd".repeat(30)), 2);
        ingest(&mut rig.engine, &tradestatus_event(ALICEID, "finished", NOW - 10));

        let live = rig.engine.snapshot(&SnapshotFilter {
            starttime: NOW + 1000,
            endtime: NOW + 1000,
            ..Default::default()
        });
        assert_eq!(live.swaps.len(), 1);
        assert_eq!(live.swaps[0].aliceid, other_id);
    }

    #[test]
    fn test_replayed_finished_line_seeds_finalized_partition() {
        let mut rig = rig();
        let mut ev = quote_event("connected", NOW - 90);
        ev["status"] = "finished".into();
        ingest(&mut rig.engine, &ev);

        // Partition placement comes from the replayed status string; the
        // record itself carries no terminal timestamp yet
        assert_eq!(rig.engine.store().active_len(), 0);
        assert_eq!(rig.engine.store().finalized_len(), 1);
        assert_eq!(rig.engine.store().find(ALICEID).unwrap().finished, 0);

        // Expiry still reaches it during a sweep once it ages out
        rig.clock.store(NOW + 3 * 3600, Ordering::Relaxed);
        rig.engine.snapshot(&SnapshotFilter::default());
        let rec = rig.engine.store().find(ALICEID).unwrap();
        assert_eq!(rec.expired, NOW + 3 * 3600);
        assert_eq!(rec.finished, 0);
    }

    #[test]
    fn test_snapshot_volumes_and_report_counts() {
        let mut rig = rig();
        ingest(&mut rig.engine, &quote_event("request", NOW - 90));
        let report = rig.engine.snapshot(&SnapshotFilter::default());

        assert_eq!(report.rt_count, 1);
        assert_eq!(report.swaps_count, 0);
        assert_eq!(report.volumes.len(), 2);
        let beer = report.volumes.iter().find(|v| v.coin == "BEER").unwrap();
        assert_eq!(beer.srcvol, 2.0);
        assert_eq!(beer.numtrades, 1);
        let kmd = report.volumes.iter().find(|v| v.coin == "KMD").unwrap();
        assert_eq!(kmd.destvol, 20.0);
    }

    #[test]
    fn test_stale_active_record_triggers_requery() {
        let mut rig = rig();
        ingest(&mut rig.engine, &quote_event("connected", NOW - 30));

        // Not yet stale
        rig.engine.snapshot(&SnapshotFilter::default());
        assert!(rig.outbound.try_recv().is_err());

        rig.clock.store(NOW + 200, Ordering::Relaxed);
        rig.engine.snapshot(&SnapshotFilter::default());
        let msg = rig.outbound.try_recv().unwrap();
        assert_eq!(msg["method"], "gettradestatus");
        assert_eq!(msg["aliceid"], ALICEID);
    }

    #[test]
    fn test_get_trade_status_echoes_stale_record() {
        let mut rig = rig();
        ingest(&mut rig.engine, &quote_event("connected", NOW - 30));

        assert!(rig.engine.get_trade_status(ALICEID).is_some());
        assert!(rig.outbound.try_recv().is_err());

        rig.clock.store(NOW + 90, Ordering::Relaxed);
        let summary = rig.engine.get_trade_status(ALICEID).unwrap();
        assert_eq!(summary.aliceid, ALICEID);
        let msg = rig.outbound.try_recv().unwrap();
        assert_eq!(msg["method"], "swapstatus");
        assert_eq!(msg["ind"], MethodKind::Connected.index());

        assert!(rig.engine.get_trade_status(0xdead).is_none());
    }

    #[test]
    fn test_report_status_trusts_advancing_peer() {
        let mut rig = rig();
        ingest(&mut rig.engine, &quote_event("request", NOW - 90));

        rig.engine.report_status(&StatusUpdate {
            aliceid: ALICEID,
            ind: MethodKind::Tradestatus.index(),
            finished: NOW - 5,
            expired: NOW - 4,
        });
        let rec = rig.engine.store().find(ALICEID).unwrap();
        assert_eq!(rec.kind, MethodKind::Tradestatus);
        // Finished wins; expired stays zero even though the peer sent both
        assert_eq!(rec.finished, NOW - 5);
        assert_eq!(rec.expired, 0);
        assert_eq!(rig.engine.store().finalized_len(), 1);

        // Non-advancing report changes nothing
        rig.engine.report_status(&StatusUpdate {
            aliceid: ALICEID,
            ind: MethodKind::Connected.index(),
            finished: NOW - 1,
            expired: 0,
        });
        assert_eq!(rig.engine.store().find(ALICEID).unwrap().finished, NOW - 5);
    }

    #[test]
    fn test_trades_series_single_trade_bar() {
        let mut rig = rig();
        ingest(&mut rig.engine, &quote_event("request", NOW - 90));
        ingest(&mut rig.engine, &tradestatus_event(ALICEID, "finished", NOW - 10));

        let bars = rig.engine.trades_series("BEER", "KMD", 0, 0, 60).unwrap();
        assert_eq!(bars.len(), 1);
        let bar = &bars[0];
        assert_eq!(bar.open, 10.0);
        assert_eq!(bar.close, 10.0);
        assert_eq!(bar.high, 10.0);
        assert_eq!(bar.low, 10.0);
        assert_eq!(bar.basesum, 2.0);
        assert_eq!(bar.relsum, 20.0);
        assert_eq!(bar.numtrades, 1);
        // The bar sits on the bucket containing the negotiation timestamp
        assert!(bar.timestamp <= NOW - 90 && NOW - 90 < bar.timestamp + 60);
    }

    #[test]
    fn test_trades_series_rejects_short_timescale() {
        let mut rig = rig();
        assert!(rig.engine.trades_series("BEER", "KMD", 0, 0, 30).is_err());
    }
}
