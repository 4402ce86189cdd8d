//! Two-partition swap record store
//!
//! Active records (in-flight swaps) and finalized records (finished or
//! expired) live in separate maps keyed by the derived identifier. The store
//! is the single owner of every record; other indices hold identifiers and
//! resolve them here.

use std::collections::HashMap;

use thiserror::Error;

use super::record::SwapRecord;

/// Upper bound on tracked swaps across both partitions. Creation beyond this
/// drops the event and surfaces resource exhaustion to the operator.
pub const MAX_TRACKED_SWAPS: usize = 65_536;

#[derive(Debug, Error)]
#[error("swap store full ({capacity} records), dropping swap {aliceid}")]
pub struct StoreFull {
    pub aliceid: u64,
    pub capacity: usize,
}

pub struct SwapStore {
    active: HashMap<u64, SwapRecord>,
    finalized: HashMap<u64, SwapRecord>,
    capacity: usize,
}

impl Default for SwapStore {
    fn default() -> Self {
        Self::with_capacity(MAX_TRACKED_SWAPS)
    }
}

impl SwapStore {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            active: HashMap::new(),
            finalized: HashMap::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.active.len() + self.finalized.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn finalized_len(&self) -> usize {
        self.finalized.len()
    }

    /// Lookup by identifier, active partition first.
    pub fn find(&self, aliceid: u64) -> Option<&SwapRecord> {
        self.active.get(&aliceid).or_else(|| self.finalized.get(&aliceid))
    }

    pub fn find_mut(&mut self, aliceid: u64) -> Option<&mut SwapRecord> {
        if self.active.contains_key(&aliceid) {
            self.active.get_mut(&aliceid)
        } else {
            self.finalized.get_mut(&aliceid)
        }
    }

    /// Insert a freshly created record into the requested partition.
    pub fn insert(&mut self, record: SwapRecord, active: bool) -> Result<(), StoreFull> {
        if self.len() >= self.capacity {
            return Err(StoreFull {
                aliceid: record.aliceid,
                capacity: self.capacity,
            });
        }
        if active {
            self.active.insert(record.aliceid, record);
        } else {
            self.finalized.insert(record.aliceid, record);
        }
        Ok(())
    }

    /// Linear fallback scan of the active partition for a record whose
    /// stored request and quote ids both match. First match wins, same as
    /// the original's list walk; swap volume stays small enough that this
    /// is not worth an index.
    pub fn fallback_match_mut(&mut self, requestid: u32, quoteid: u32) -> Option<&mut SwapRecord> {
        self.active
            .values_mut()
            .find(|rec| rec.quote.requestid == requestid && rec.quote.quoteid == quoteid)
    }

    /// Migrate a record from the active to the finalized partition.
    pub fn finalize(&mut self, aliceid: u64) {
        if let Some(rec) = self.active.remove(&aliceid) {
            self.finalized.insert(aliceid, rec);
        }
    }

    pub fn active_ids(&self) -> Vec<u64> {
        self.active.keys().copied().collect()
    }

    pub fn finalized_ids(&self) -> Vec<u64> {
        self.finalized.keys().copied().collect()
    }

    pub fn iter_all(&self) -> impl Iterator<Item = &SwapRecord> {
        self.active.values().chain(self.finalized.values())
    }
}
