//! Crucial k-mer index — contig endpoints used as probes into reads.
//!
//! For every primary contig, the forward k-mer at its start and the
//! reverse-complement k-mer at its end are "crucial": a read containing one
//! of them overlaps a contig boundary and may support a longer edge. Each
//! crucial k-mer carries a [`TailSpec`] describing the up-to-`s` bases that
//! follow it inside its contig, so the read scan can extend a hit without
//! touching the contig again.
//!
//! The map is built under a coarse mutex while contig batches are processed
//! in parallel, then frozen into an immutable table for the read pass.
//! Insertions overwrite: distinct contigs sharing an endpoint k-mer are rare
//! and the last writer wins.

use std::collections::HashMap;
use std::sync::Mutex;

use ahash::RandomState;

use crate::kmer::PackedKmer;

/// Create a deterministic `RandomState` for the crucial-k-mer map.
/// Fixed seeds ensure identical iteration order across runs.
fn fixed_hash_state() -> RandomState {
    RandomState::with_seeds(
        0x517cc1b727220a95,
        0x6c62272e07bb0142,
        0x62b821756295c58d,
        0x30b4d5bd83fac2e9,
    )
}

// ---------------------------------------------------------------------------
// TailSpec
// ---------------------------------------------------------------------------

/// Packed successor bases of a crucial k-mer.
///
/// Base `j` (0-based, up to 29 bases) sits in bits `2*(31-j)..2*(31-j)+2`;
/// the low 6 bits hold the base count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailSpec(u64);

impl TailSpec {
    /// Maximum number of tail bases a spec can carry.
    pub const MAX_LEN: usize = 29;

    /// Build a spec from 2-bit codes. At most [`TailSpec::MAX_LEN`] bases.
    pub fn from_codes(codes: &[u8]) -> Self {
        debug_assert!(codes.len() <= Self::MAX_LEN);
        let mut raw = 0u64;
        for (j, &c) in codes.iter().enumerate() {
            raw |= (c as u64 & 3) << (2 * (31 - j));
        }
        Self(raw | codes.len() as u64)
    }

    /// Wrap an already-packed word.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Number of tail bases.
    #[inline]
    pub fn len(&self) -> usize {
        (self.0 & 63) as usize
    }

    /// Whether the tail holds no bases.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The 2-bit code of tail base `j`.
    #[inline]
    pub fn base(&self, j: usize) -> u8 {
        debug_assert!(j < self.len());
        ((self.0 >> (2 * (31 - j))) & 3) as u8
    }
}

// ---------------------------------------------------------------------------
// Builder / frozen map
// ---------------------------------------------------------------------------

/// Mutable, mutex-guarded crucial-k-mer map used while contigs stream in.
pub struct CrucialKmerMapBuilder {
    map: Mutex<HashMap<PackedKmer, TailSpec, RandomState>>,
}

impl CrucialKmerMapBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::with_hasher(fixed_hash_state())),
        }
    }

    /// Insert or overwrite the tail spec for `kmer`.
    pub fn insert(&self, kmer: PackedKmer, tail: TailSpec) {
        self.map.lock().unwrap().insert(kmer, tail);
    }

    /// Number of distinct crucial k-mers inserted so far.
    pub fn len(&self) -> usize {
        self.map.lock().unwrap().len()
    }

    /// Whether no k-mer has been inserted yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Freeze into an immutable map for the read pass.
    pub fn freeze(self) -> CrucialKmerMap {
        CrucialKmerMap {
            map: self.map.into_inner().unwrap(),
        }
    }
}

impl Default for CrucialKmerMapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable crucial-k-mer table, shared read-only across worker threads.
pub struct CrucialKmerMap {
    map: HashMap<PackedKmer, TailSpec, RandomState>,
}

impl CrucialKmerMap {
    /// Look up the tail spec for a k-mer.
    #[inline]
    pub fn get(&self, kmer: &PackedKmer) -> Option<TailSpec> {
        self.map.get(kmer).copied()
    }

    /// Whether `kmer` is crucial.
    #[inline]
    pub fn contains(&self, kmer: &PackedKmer) -> bool {
        self.map.contains_key(kmer)
    }

    /// Number of distinct crucial k-mers.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the map is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
