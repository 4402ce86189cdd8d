//! Wire types for the swap event log

use serde::{Deserialize, Serialize};

/// Default display tag for a trading role with no client label.
pub const DEFAULT_GUI: &str = "nogui";

/// Base units per whole coin, used when a peer reports decimal amounts.
pub const SATS_PER_COIN: f64 = 100_000_000.0;

/// Sentinel txid some peers emit for a transaction they know is gone.
const PLACEHOLDER_TXID: &str =
    "deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef";

/// Protocol stage reported by an event, ordered by progression.
///
/// The declaration order is the ratchet order: a record's kind only ever
/// advances through `Unknown < Request < Reserved < Connect < Connected <
/// Tradestatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MethodKind {
    Unknown,
    Request,
    Reserved,
    Connect,
    Connected,
    Tradestatus,
}

impl MethodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MethodKind::Unknown => "unknown",
            MethodKind::Request => "request",
            MethodKind::Reserved => "reserved",
            MethodKind::Connect => "connect",
            MethodKind::Connected => "connected",
            MethodKind::Tradestatus => "tradestatus",
        }
    }

    /// Exact-match lookup against the fixed method vocabulary.
    /// Returns `None` for methods outside the vocabulary.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "request" => Some(MethodKind::Request),
            "reserved" => Some(MethodKind::Reserved),
            "connect" => Some(MethodKind::Connect),
            "connected" => Some(MethodKind::Connected),
            "tradestatus" => Some(MethodKind::Tradestatus),
            _ => None,
        }
    }

    pub fn index(&self) -> u32 {
        *self as u32
    }

    /// Inverse of [`index`](Self::index); peers exchange the numeric form.
    pub fn from_index(ind: u32) -> Option<Self> {
        match ind {
            0 => Some(MethodKind::Unknown),
            1 => Some(MethodKind::Request),
            2 => Some(MethodKind::Reserved),
            3 => Some(MethodKind::Connect),
            4 => Some(MethodKind::Connected),
            5 => Some(MethodKind::Tradestatus),
            _ => None,
        }
    }
}

/// One deserialized stats-log line.
///
/// Every field is optional on the wire; absent fields default to zero/empty
/// and unknown extra fields are ignored. Quote-bearing methods populate the
/// first block, `tradestatus` lines the second.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub base: String,
    #[serde(default)]
    pub rel: String,
    #[serde(default)]
    pub gui: String,
    #[serde(default)]
    pub srchash: String,
    #[serde(default)]
    pub desthash: String,
    #[serde(default)]
    pub satoshis: u64,
    #[serde(default)]
    pub destsatoshis: u64,
    #[serde(default)]
    pub txfee: u64,
    #[serde(default)]
    pub desttxfee: u64,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub requestid: u32,
    #[serde(default)]
    pub quoteid: u32,
    #[serde(default)]
    pub iambob: i64,
    #[serde(default)]
    pub desttxid: String,
    #[serde(default)]
    pub destvout: u32,
    #[serde(default)]
    pub feetxid: String,
    #[serde(default)]
    pub feevout: u32,

    // tradestatus fields
    #[serde(default)]
    pub aliceid: u64,
    #[serde(default)]
    pub bob: String,
    #[serde(default)]
    pub alice: String,
    #[serde(default)]
    pub srcamount: f64,
    #[serde(default)]
    pub destamount: f64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub bobdeposit: Option<String>,
    #[serde(default)]
    pub alicepayment: Option<String>,
    #[serde(default)]
    pub bobpayment: Option<String>,
    #[serde(default)]
    pub paymentspent: Option<String>,
    #[serde(default, rename = "Apaymentspent")]
    pub apaymentspent: Option<String>,
    #[serde(default)]
    pub depositspent: Option<String>,

    /// `connect` lines from some peers nest the quote under this key.
    #[serde(default)]
    pub trade: Option<Box<RawEvent>>,
}

impl RawEvent {
    /// The object carrying the quote fields: the nested `trade` payload on a
    /// connect line when present, otherwise the line itself.
    pub fn quote_body(&self) -> &RawEvent {
        self.trade.as_deref().unwrap_or(self)
    }
}

/// Immutable-once-accepted snapshot of a negotiated trade.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwapQuote {
    pub base: String,
    pub rel: String,
    pub srchash: String,
    pub desthash: String,
    pub satoshis: u64,
    pub destsatoshis: u64,
    pub txfee: u64,
    pub desttxfee: u64,
    pub timestamp: i64,
    pub requestid: u32,
    pub quoteid: u32,
    pub gui: String,
}

impl SwapQuote {
    /// Extract a quote from an event. A line with an empty coin pair or zero
    /// source amount is not a usable quote and counts as a parse error.
    pub fn from_event(ev: &RawEvent) -> Option<Self> {
        if ev.base.is_empty() || ev.rel.is_empty() || ev.satoshis == 0 {
            return None;
        }
        let gui = if ev.gui.is_empty() {
            DEFAULT_GUI.to_string()
        } else {
            ev.gui.clone()
        };
        Some(Self {
            base: ev.base.clone(),
            rel: ev.rel.clone(),
            srchash: ev.srchash.clone(),
            desthash: ev.desthash.clone(),
            satoshis: ev.satoshis,
            destsatoshis: ev.destsatoshis,
            txfee: ev.txfee,
            desttxfee: ev.desttxfee,
            timestamp: ev.timestamp,
            requestid: ev.requestid,
            quoteid: ev.quoteid,
            gui,
        })
    }

    /// Quoted price: destination volume over source volume net of the fee.
    pub fn price(&self) -> f64 {
        if self.satoshis > self.txfee {
            self.destsatoshis as f64 / (self.satoshis - self.txfee) as f64
        } else {
            0.0
        }
    }
}

/// One role-specific transaction-id field of a swap record.
///
/// `Placeholder` records that a peer reported the sentinel txid; it fills an
/// unset slot but never replaces a concrete txid, and a concrete txid always
/// replaces it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TxidSlot {
    #[default]
    Unset,
    Placeholder,
    Txid(String),
}

impl TxidSlot {
    /// Merge an incoming wire value into this slot.
    pub fn absorb(&mut self, incoming: Option<&str>) {
        let txid = match incoming {
            Some(t) if !is_zero_txid(t) => t,
            _ => return,
        };
        if txid.eq_ignore_ascii_case(PLACEHOLDER_TXID) {
            if *self == TxidSlot::Unset {
                *self = TxidSlot::Placeholder;
            }
        } else {
            *self = TxidSlot::Txid(txid.to_string());
        }
    }

    pub fn is_set(&self) -> bool {
        *self != TxidSlot::Unset
    }
}

fn is_zero_txid(txid: &str) -> bool {
    txid.is_empty() || txid.bytes().all(|b| b == b'0')
}
