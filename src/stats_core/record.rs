//! Per-swap tracking record and identifier derivation

use serde::{Deserialize, Serialize};

use super::types::{MethodKind, RawEvent, SwapQuote, TxidSlot, DEFAULT_GUI, SATS_PER_COIN};

/// Derive the 64-bit swap identifier from the destination and fee outpoints.
///
/// Packs a 16-bit slice of each txid with each output index:
/// bits 48-63 destination txid slice, 32-47 destination vout, 16-31 fee txid
/// slice, 0-15 fee vout. Intentionally lossy; collisions are recovered by the
/// request/quote-id fallback match, never assumed impossible.
pub fn derive_swap_id(desttxid: &str, destvout: u32, feetxid: &str, feevout: u32) -> u64 {
    (txid_slice16(desttxid) << 48)
        | ((destvout as u64 & 0xffff) << 32)
        | (txid_slice16(feetxid) << 16)
        | (feevout as u64 & 0xffff)
}

/// First two little-endian bytes of a hex txid, zero when undecodable.
fn txid_slice16(txid: &str) -> u64 {
    let mut bytes = [0u8; 2];
    match txid.get(..4) {
        Some(head) if hex::decode_to_slice(head, &mut bytes).is_ok() => {
            u16::from_le_bytes(bytes) as u64
        }
        _ => 0,
    }
}

/// Mutable tracking entity for one derived swap identifier.
#[derive(Debug, Clone)]
pub struct SwapRecord {
    pub aliceid: u64,
    pub quote: SwapQuote,
    /// Quoted price captured from the accepted quote.
    pub price: f64,
    /// Highest protocol stage seen so far; only ever advances.
    pub kind: MethodKind,

    pub bobdeposit: TxidSlot,
    pub alicepayment: TxidSlot,
    pub bobpayment: TxidSlot,
    pub paymentspent: TxidSlot,
    pub apaymentspent: TxidSlot,
    pub depositspent: TxidSlot,

    /// Completion timestamp, 0 while unfinished.
    pub finished: i64,
    /// Expiry timestamp, 0 while live. Mutually exclusive with `finished`.
    pub expired: i64,

    pub bob_gui: String,
    pub alice_gui: String,

    /// Last time any event or peer update touched this record.
    pub last_activity: i64,
    /// Assignment order, for stable display ordering.
    pub seq: u32,
}

impl SwapRecord {
    pub fn new(aliceid: u64, quote: SwapQuote, seq: u32, now: i64) -> Self {
        let price = quote.price();
        Self {
            aliceid,
            quote,
            price,
            kind: MethodKind::Unknown,
            bobdeposit: TxidSlot::Unset,
            alicepayment: TxidSlot::Unset,
            bobpayment: TxidSlot::Unset,
            paymentspent: TxidSlot::Unset,
            apaymentspent: TxidSlot::Unset,
            depositspent: TxidSlot::Unset,
            finished: 0,
            expired: 0,
            bob_gui: DEFAULT_GUI.to_string(),
            alice_gui: DEFAULT_GUI.to_string(),
            last_activity: now,
            seq,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.finished != 0 || self.expired != 0
    }

    /// Advance the stage ratchet; returns whether it moved.
    pub fn ratchet(&mut self, kind: MethodKind) -> bool {
        if kind > self.kind {
            self.kind = kind;
            true
        } else {
            false
        }
    }

    pub fn mark_finished(&mut self, timestamp: i64) {
        if !self.is_terminal() {
            self.finished = timestamp;
        }
    }

    pub fn mark_expired(&mut self, now: i64) {
        if !self.is_terminal() {
            self.expired = now;
        }
    }

    /// Expire the record once its age exceeds twice the pair lock time.
    pub fn check_expiry(&mut self, now: i64, pair_locktime: i64) {
        if !self.is_terminal() && now > self.quote.timestamp + 2 * pair_locktime {
            self.mark_expired(now);
        }
    }

    /// Replace the stored quote on a stage advance. A default incoming gui
    /// tag does not clobber a previously known one.
    pub fn replace_quote(&mut self, mut quote: SwapQuote) {
        if quote.gui.is_empty() || quote.gui == DEFAULT_GUI {
            quote.gui = self.quote.gui.clone();
        }
        self.price = quote.price();
        self.quote = quote;
    }

    /// Attribute a non-default display tag to the role reporting it.
    pub fn set_gui(&mut self, gui: &str, iambob: bool) {
        if gui.is_empty() || gui == DEFAULT_GUI {
            return;
        }
        if iambob {
            self.bob_gui = gui.to_string();
        } else {
            self.alice_gui = gui.to_string();
        }
    }

    /// Whether a tradestatus event is consistent with the stored quote:
    /// same coin pair, same request/quote ids, and per-side amounts within
    /// one fee of the quote after adding back the doubled fee.
    pub fn matches_tradestatus(&self, ev: &RawEvent) -> bool {
        let q = &self.quote;
        if ev.bob != q.base || ev.alice != q.rel {
            return false;
        }
        if ev.requestid != q.requestid || ev.quoteid != q.quoteid {
            return false;
        }
        let src_sats = (ev.srcamount * SATS_PER_COIN).round() as i64;
        let dest_sats = (ev.destamount * SATS_PER_COIN).round() as i64;
        let src_diff = src_sats + 2 * q.txfee as i64 - q.satoshis as i64;
        let dest_diff = dest_sats + 2 * q.desttxfee as i64 - q.destsatoshis as i64;
        src_diff.abs() <= q.txfee as i64 && dest_diff.abs() <= q.desttxfee as i64
    }

    /// Fold a validated tradestatus event into the record: merge newly
    /// reported txids, evaluate the terminal conditions, advance the ratchet.
    pub fn apply_tradestatus(&mut self, ev: &RawEvent, now: i64, pair_locktime: i64) {
        self.last_activity = now;
        self.bobdeposit.absorb(ev.bobdeposit.as_deref());
        self.alicepayment.absorb(ev.alicepayment.as_deref());
        self.bobpayment.absorb(ev.bobpayment.as_deref());
        self.paymentspent.absorb(ev.paymentspent.as_deref());
        self.apaymentspent.absorb(ev.apaymentspent.as_deref());
        self.depositspent.absorb(ev.depositspent.as_deref());
        if ev.status == "finished" {
            let ts = if ev.timestamp != 0 { ev.timestamp } else { now };
            self.mark_finished(ts);
        }
        self.check_expiry(now, pair_locktime);
        self.ratchet(MethodKind::Tradestatus);
    }

    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            timestamp: self.quote.timestamp,
            aliceid: self.aliceid,
            src: self.quote.srchash.clone(),
            base: self.quote.base.clone(),
            basevol: self.quote.satoshis as f64 / SATS_PER_COIN,
            dest: self.quote.desthash.clone(),
            rel: self.quote.rel.clone(),
            relvol: self.quote.destsatoshis as f64 / SATS_PER_COIN,
            price: self.price,
            requestid: self.quote.requestid,
            quoteid: self.quote.quoteid,
            finished: self.finished,
            expired: self.expired,
            ind: self.kind.index(),
        }
    }
}

/// Peer-visible projection of a swap record, also used as the `swapstatus`
/// echo payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSummary {
    pub timestamp: i64,
    pub aliceid: u64,
    pub src: String,
    pub base: String,
    pub basevol: f64,
    pub dest: String,
    pub rel: String,
    pub relvol: f64,
    pub price: f64,
    pub requestid: u32,
    pub quoteid: u32,
    pub finished: i64,
    pub expired: i64,
    pub ind: u32,
}
