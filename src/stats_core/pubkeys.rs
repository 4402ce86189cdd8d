//! Counterparty pubkey index with role-partitioned swap lists
//!
//! Entries hold swap identifiers, not record references; the owning store
//! resolves them, so a record migrating between partitions never invalidates
//! an entry. Entries are created on first reference and live for the
//! process lifetime.

use std::collections::HashMap;

/// External reputation algorithm, consumed as an opaque function. The core
/// supplies the pubkey and its two role-partitioned swap lists.
pub trait TrustScorer: Send + Sync {
    fn compute_trust(&self, pubkey: &str, maker_swaps: &[u64], taker_swaps: &[u64]) -> f64;
}

/// Stand-in scorer counting swaps across both roles. The node's real
/// reputation algorithm plugs in through the trait.
pub struct SwapCountTrust;

impl TrustScorer for SwapCountTrust {
    fn compute_trust(&self, _pubkey: &str, maker_swaps: &[u64], taker_swaps: &[u64]) -> f64 {
        (maker_swaps.len() + taker_swaps.len()) as f64
    }
}

#[derive(Debug, Default, Clone)]
pub struct PubkeyTrustEntry {
    /// Swaps where this key was the source/maker side.
    pub maker_swaps: Vec<u64>,
    /// Swaps where this key was the destination/taker side.
    pub taker_swaps: Vec<u64>,
    /// Cached score from the last sweep.
    pub trust: f64,
}

#[derive(Default)]
pub struct PubkeyTrustIndex {
    entries: HashMap<String, PubkeyTrustEntry>,
}

impl PubkeyTrustIndex {
    /// Record both endpoints of a newly tracked swap.
    pub fn register_swap(&mut self, srchash: &str, desthash: &str, aliceid: u64) {
        if !srchash.is_empty() {
            self.entries
                .entry(srchash.to_string())
                .or_default()
                .maker_swaps
                .push(aliceid);
        }
        if !desthash.is_empty() {
            self.entries
                .entry(desthash.to_string())
                .or_default()
                .taker_swaps
                .push(aliceid);
        }
    }

    /// Refresh every cached score; called at the end of each sweep.
    pub fn recompute(&mut self, scorer: &dyn TrustScorer) {
        for (pubkey, entry) in self.entries.iter_mut() {
            entry.trust = scorer.compute_trust(pubkey, &entry.maker_swaps, &entry.taker_swaps);
        }
    }

    pub fn get(&self, pubkey: &str) -> Option<&PubkeyTrustEntry> {
        self.entries.get(pubkey)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
