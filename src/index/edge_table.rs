//! Concurrent multiplicity table for read-discovered edges.
//!
//! Maps canonical (k'+1)-mers to a saturating `u16` counter. The map is
//! sharded (lock-striped): an increment takes only the lock of the shard
//! holding the key, so worker threads contend only when they hit the same
//! stripe. Keys must already be canonical — callers insert
//! `min(kmer, revcomp(kmer))` and nothing else.
//!
//! Counters saturate at a ceiling instead of overflowing; saturation is a
//! documented truncation, not an error. An absent key means a count of zero,
//! so every stored counter is at least 1.

use ahash::RandomState;
use dashmap::DashMap;

use crate::kmer::PackedKmer;

/// Default saturating ceiling for edge multiplicities.
pub const MAX_MULTI: u16 = u16::MAX;

/// Bits reserved for the multiplicity in the packed edge record.
pub const MULTI_BITS: usize = 16;

fn fixed_hash_state() -> RandomState {
    RandomState::with_seeds(
        0x243f6a8885a308d3,
        0x13198a2e03707344,
        0xa4093822299f31d0,
        0x082efa98ec4e6c89,
    )
}

/// Sharded map from canonical (k'+1)-mer to saturating multiplicity.
pub struct EdgeMultiplicityTable {
    map: DashMap<PackedKmer, u16, RandomState>,
    ceiling: u16,
}

impl EdgeMultiplicityTable {
    /// Create a table with pre-reserved capacity and the given ceiling.
    ///
    /// Capacity should be generous (roughly 10x the crucial-k-mer count) so
    /// the shards never rehash while workers are inserting.
    pub fn with_capacity(capacity: usize, ceiling: u16) -> Self {
        Self {
            map: DashMap::with_capacity_and_hasher(capacity, fixed_hash_state()),
            ceiling,
        }
    }

    /// Increment the counter for `key`, inserting it at 1 if absent.
    /// The counter never exceeds the ceiling. `key` must be canonical.
    #[inline]
    pub fn saturating_increment(&self, key: &PackedKmer) {
        debug_assert!(*key <= key.reverse_complement());
        let ceiling = self.ceiling;
        self.map
            .entry(*key)
            .and_modify(|m| {
                if *m < ceiling {
                    *m += 1;
                }
            })
            .or_insert(1);
    }

    /// Number of distinct edges discovered.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether no edge has been discovered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Visit every `(edge, multiplicity)` pair.
    ///
    /// Only meaningful after all writers have quiesced; iteration order is
    /// unspecified.
    pub fn for_each(&self, mut f: impl FnMut(&PackedKmer, u16)) {
        for entry in self.map.iter() {
            f(entry.key(), *entry.value());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical(seq: &[u8]) -> PackedKmer {
        let codes: Vec<u8> = seq
            .iter()
            .map(|&b| crate::kmer::DNA_CODE[b as usize])
            .collect();
        let k = PackedKmer::from_codes(&codes);
        let rc = k.reverse_complement();
        if k < rc { k } else { rc }
    }

    #[test]
    fn test_increment_inserts_at_one() {
        let table = EdgeMultiplicityTable::with_capacity(16, MAX_MULTI);
        let key = canonical(b"ACGTAC");
        table.saturating_increment(&key);
        assert_eq!(table.len(), 1);
        let mut got = None;
        table.for_each(|k, m| {
            assert_eq!(*k, key);
            got = Some(m);
        });
        assert_eq!(got, Some(1));
    }

    #[test]
    fn test_saturation_at_ceiling() {
        let table = EdgeMultiplicityTable::with_capacity(16, 3);
        let key = canonical(b"ACGTAC");
        for _ in 0..1000 {
            table.saturating_increment(&key);
        }
        let mut got = None;
        table.for_each(|_, m| got = Some(m));
        assert_eq!(got, Some(3));
    }

    #[test]
    fn test_counters_are_positive() {
        let table = EdgeMultiplicityTable::with_capacity(16, MAX_MULTI);
        for seq in [&b"ACGTAC"[..], b"AAAACC", b"ACGTAC", b"TTTGGG"] {
            table.saturating_increment(&canonical(seq));
        }
        table.for_each(|_, m| assert!(m >= 1));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_concurrent_increments() {
        let table = EdgeMultiplicityTable::with_capacity(64, MAX_MULTI);
        let key = canonical(b"ACGTAC");
        crossbeam::scope(|scope| {
            for _ in 0..4 {
                let table = &table;
                let key = &key;
                scope.spawn(move |_| {
                    for _ in 0..250 {
                        table.saturating_increment(key);
                    }
                });
            }
        })
        .unwrap();
        let mut got = None;
        table.for_each(|_, m| got = Some(m));
        assert_eq!(got, Some(1000));
    }
}
