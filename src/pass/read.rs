//! Read pass: scan reads against the crucial-k-mer index and count the
//! (k'+1)-edges they support.
//!
//! Each read is scanned once with a rolling k-mer and its reverse
//! complement. A hit on a crucial k-mer marks the hit position and as many
//! following (or, for reverse hits, preceding) positions as the stored tail
//! matches exactly; a forward hit also lets the cursor jump past the matched
//! tail. A position is "covered" when the k-mer starting there is implied by
//! some contig endpoint.
//!
//! A run of at least `s + 2` covered positions pins a (k'+1)-edge: it
//! overlaps a crucial k-mer plus a full step. Each such edge is rebuilt
//! incrementally (cheap single-base appends for small gaps, a fresh rebuild
//! for large ones), canonicalized, and counted in the shared edge table.
//! Reads that contributed at least one edge are flagged and their packed
//! records are re-emitted for the next iteration.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use tracing::info;

use crate::config::{IterationConfig, ReadFormat};
use crate::index::{CrucialKmerMap, EdgeMultiplicityTable};
use crate::io::fastx::{BinaryReadSource, SeqReader};
use crate::io::package::{ReadPackage, READ_BATCH_SIZE};
use crate::io::threads::{parallel_for, run_double_buffered, AtomicBitVector};
use crate::kmer::{complement, PackedKmer};

/// Log a progress line every this many batches.
const LOG_EVERY_BATCHES: u64 = 16;

/// Gaps below this many positions are bridged by per-base appends to both
/// the k-mer and its reverse complement.
const SMALL_GAP: i64 = 8;

/// Totals accumulated over the read pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReadPassStats {
    pub num_total_reads: u64,
    pub num_aligned_reads: u64,
}

/// Source of read batches for the pass.
pub enum ReadSource {
    Fastx(SeqReader),
    Binary(BinaryReadSource),
}

impl ReadSource {
    fn fill(&mut self, pkg: &mut ReadPackage) -> Result<bool> {
        pkg.clear();
        match self {
            Self::Fastx(reader) => {
                while pkg.len() < READ_BATCH_SIZE {
                    if !reader.next_batch(|seq| pkg.push_seq(seq))? {
                        break;
                    }
                }
            }
            Self::Binary(source) => {
                source.fill(pkg, READ_BATCH_SIZE)?;
            }
        }
        Ok(!pkg.is_empty())
    }
}

/// Mark every read position whose k-mer is implied by a crucial k-mer.
fn mark_covered_positions(
    pkg: &ReadPackage,
    i: usize,
    k: usize,
    crucial: &CrucialKmerMap,
) -> Vec<bool> {
    let length = pkg.len_of(i);
    let mut exist = vec![false; length];

    let mut kmer = PackedKmer::new(k);
    for j in 0..k {
        kmer.shift_append(pkg.base(i, j));
    }
    let mut rev_kmer = kmer.reverse_complement();

    let mut cur_pos: usize = 0;
    let mut last_marked_pos: i64 = -1;
    while cur_pos + k <= length {
        let mut next_pos = cur_pos + 1;
        if !exist[cur_pos] {
            if let Some(tail) = crucial.get(&kmer) {
                exist[cur_pos] = true;
                let mut j = 0;
                while j < tail.len() && cur_pos + k + j < length {
                    if pkg.base(i, cur_pos + k + j) != tail.base(j) {
                        break;
                    }
                    exist[cur_pos + j + 1] = true;
                    j += 1;
                }
                last_marked_pos = (cur_pos + j) as i64;
                next_pos = cur_pos + j + 1;
            } else if let Some(tail) = crucial.get(&rev_kmer) {
                exist[cur_pos] = true;
                let mut j = 0;
                while j < tail.len() && cur_pos as i64 - 1 - j as i64 > last_marked_pos {
                    let p = cur_pos - 1 - j;
                    if complement(pkg.base(i, p)) != tail.base(j) {
                        break;
                    }
                    exist[p] = true;
                    j += 1;
                }
            }
        }

        if next_pos + k > length {
            break;
        }
        while cur_pos < next_pos {
            cur_pos += 1;
            let c = pkg.base(i, cur_pos + k - 1);
            kmer.shift_append(c);
            rev_kmer.shift_preappend(complement(c));
        }
    }

    exist
}

/// Scan one read and count every edge it supports.
///
/// Returns whether the read contributed at least one increment.
fn scan_read(
    pkg: &ReadPackage,
    i: usize,
    k: usize,
    step: usize,
    crucial: &CrucialKmerMap,
    edges: &EdgeMultiplicityTable,
) -> bool {
    let length = pkg.len_of(i);
    let edge_len = k + step + 1;
    if length < edge_len {
        return false;
    }
    let exist = mark_covered_positions(pkg, i, k, crucial);

    // The scan k-mers become the edge accumulators: widen them to k'+1 and
    // refill incrementally as emission points come up.
    let mut kmer = PackedKmer::new(k);
    for j in 0..k {
        kmer.shift_append(pkg.base(i, j));
    }
    let mut rev_kmer = kmer.reverse_complement();
    kmer.resize(edge_len);
    rev_kmer.resize(edge_len);

    let mut aligned = false;
    let mut last_j: i64 = -(k as i64);
    let mut acc_exist = 0usize;
    for j in 0..=(length - k) {
        acc_exist = if exist[j] { acc_exist + 1 } else { 0 };
        if acc_exist < step + 2 {
            continue;
        }

        // An edge of length k'+1 ends at read position j + k - 1. Rebuild
        // the accumulator by the cheapest route for the gap since the last
        // emission; the first emission always falls in the full-rebuild arm
        // or appends at least k'+1 bases, flushing the stale scan state.
        let delta = j as i64 - last_j;
        if delta < SMALL_GAP {
            for x in last_j + 1..=j as i64 {
                let c = pkg.base(i, (x + k as i64 - 1) as usize);
                kmer.shift_append(c);
                rev_kmer.shift_preappend(complement(c));
            }
        } else if delta < edge_len as i64 {
            for x in last_j + 1..=j as i64 {
                kmer.shift_append(pkg.base(i, (x + k as i64 - 1) as usize));
            }
            rev_kmer = kmer.reverse_complement();
        } else {
            for p in j - step - 1..j + k {
                kmer.shift_append(pkg.base(i, p));
            }
            rev_kmer = kmer.reverse_complement();
        }

        if kmer < rev_kmer {
            edges.saturating_increment(&kmer);
        } else {
            edges.saturating_increment(&rev_kmer);
        }
        last_j = j as i64;
        aligned = true;
    }
    aligned
}

/// Run the read pass, appending aligned reads' packed records to `aligned_out`.
pub fn run_read_pass(
    cfg: &IterationConfig,
    crucial: &CrucialKmerMap,
    edges: &EdgeMultiplicityTable,
    aligned_out: &mut impl Write,
) -> Result<ReadPassStats> {
    let k = cfg.kmer_k;
    let step = cfg.step;
    let num_workers = cfg.num_workers();

    let mut source = open_read_source(cfg)?;
    let fill = move |pkg: &mut ReadPackage| source.fill(pkg);

    let num_aligned = AtomicU64::new(0);
    let mut stats = ReadPassStats::default();
    let mut is_aligned = AtomicBitVector::new();
    let mut num_batches = 0u64;

    run_double_buffered(
        ReadPackage::new(cfg.max_read_len),
        ReadPackage::new(cfg.max_read_len),
        fill,
        |pkg: &mut ReadPackage| {
            is_aligned.reset(pkg.len());
            {
                let pkg = &*pkg;
                let is_aligned = &is_aligned;
                let num_aligned = &num_aligned;
                parallel_for(num_workers, pkg.len(), |i| {
                    if scan_read(pkg, i, k, step, crucial, edges) {
                        is_aligned.set(i);
                        num_aligned.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }

            for i in 0..pkg.len() {
                if is_aligned.get(i) {
                    for &w in pkg.record(i) {
                        aligned_out
                            .write_all(&w.to_le_bytes())
                            .context("failed to write aligned read")?;
                    }
                }
            }

            stats.num_total_reads += pkg.len() as u64;
            num_batches += 1;
            if num_batches % LOG_EVERY_BATCHES == 0 {
                info!(
                    "reads: {} total, {} aligned, {} edges so far",
                    stats.num_total_reads,
                    num_aligned.load(Ordering::Relaxed),
                    edges.len()
                );
            }
            Ok(())
        },
    )?;

    stats.num_aligned_reads = num_aligned.load(Ordering::Relaxed);
    info!(
        "read pass done: {} total, {} aligned, {} edges discovered",
        stats.num_total_reads,
        stats.num_aligned_reads,
        edges.len()
    );
    Ok(stats)
}

fn open_read_source(cfg: &IterationConfig) -> Result<ReadSource> {
    let raw = crate::io::fastx::open_read_input(&cfg.read_file)?;
    Ok(match cfg.read_format {
        ReadFormat::Fasta => ReadSource::Fastx(SeqReader::fasta(raw)),
        ReadFormat::Fastq => ReadSource::Fastx(SeqReader::fastq(raw)),
        ReadFormat::Binary => ReadSource::Binary(BinaryReadSource::new(
            raw,
            crate::io::package::words_per_read(cfg.max_read_len),
        )),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{CrucialKmerMapBuilder, TailSpec, MAX_MULTI};
    use crate::kmer::DNA_CODE;

    const K: usize = 3;
    const STEP: usize = 2;

    fn codes(seq: &[u8]) -> Vec<u8> {
        seq.iter().map(|&b| DNA_CODE[b as usize]).collect()
    }

    fn kmer(seq: &[u8]) -> PackedKmer {
        PackedKmer::from_codes(&codes(seq))
    }

    /// Crucial map as the contig pass would build it for one contig.
    fn map_for_contig(contig: &[u8]) -> CrucialKmerMap {
        let builder = CrucialKmerMapBuilder::new();
        let c = codes(contig);
        let len = c.len();
        let tail_len = STEP.min(len - K);
        builder.insert(
            kmer(&contig[..K]),
            TailSpec::from_codes(&c[K..K + tail_len]),
        );
        if len > K {
            let end: Vec<u8> = c[len - K..].iter().rev().map(|&b| complement(b)).collect();
            let tail: Vec<u8> = (0..tail_len)
                .map(|j| complement(c[len - K - 1 - j]))
                .collect();
            builder.insert(PackedKmer::from_codes(&end), TailSpec::from_codes(&tail));
        }
        builder.freeze()
    }

    fn one_read_package(seq: &[u8]) -> ReadPackage {
        let mut pkg = ReadPackage::new(64);
        pkg.push_seq(seq).unwrap();
        pkg
    }

    fn collect_edges(table: &EdgeMultiplicityTable) -> Vec<(PackedKmer, u16)> {
        let mut out = Vec::new();
        table.for_each(|k, m| out.push((*k, m)));
        out.sort();
        out
    }

    fn canonical(seq: &[u8]) -> PackedKmer {
        let k = kmer(seq);
        let rc = k.reverse_complement();
        if k < rc { k } else { rc }
    }

    #[test]
    fn test_read_retracing_contig_counts_all_windows() {
        // A read identical to a short contig is covered by the start k-mer's
        // tail on the left and the reverse-complement end k-mer's backward
        // extension on the right, pinning all three length-6 windows.
        let crucial = map_for_contig(b"AAAACCCC");
        let table = EdgeMultiplicityTable::with_capacity(64, MAX_MULTI);
        let pkg = one_read_package(b"AAAACCCC");

        assert!(scan_read(&pkg, 0, K, STEP, &crucial, &table));
        let edges = collect_edges(&table);
        assert_eq!(edges.len(), 3);
        let mut want: Vec<PackedKmer> = [&b"AAAACC"[..], b"AAACCC", b"AACCCC"]
            .iter()
            .map(|s| canonical(s))
            .collect();
        want.sort();
        let got: Vec<PackedKmer> = edges.iter().map(|&(k, _)| k).collect();
        assert_eq!(got, want);
        for &(_, m) in &edges {
            assert_eq!(m, 1);
        }
    }

    #[test]
    fn test_reverse_complement_read_aligns() {
        let crucial = map_for_contig(b"AAAACCCC");
        let table = EdgeMultiplicityTable::with_capacity(64, MAX_MULTI);

        // revcomp(AAAACCCC) = GGGGTTTT: hits only via the reverse k-mer path.
        let fwd = one_read_package(b"AAAACCCC");
        let rev = one_read_package(b"GGGGTTTT");
        assert!(scan_read(&fwd, 0, K, STEP, &crucial, &table));
        assert!(scan_read(&rev, 0, K, STEP, &crucial, &table));

        // Both orientations support the same canonical edges.
        for &(ref key, _) in &collect_edges(&table) {
            assert!(*key <= key.reverse_complement());
        }
    }

    #[test]
    fn test_short_read_skipped() {
        let crucial = map_for_contig(b"AAAACCCC");
        let table = EdgeMultiplicityTable::with_capacity(64, MAX_MULTI);
        let pkg = one_read_package(b"AAAAC"); // 5 < k+s+1 = 6
        assert!(!scan_read(&pkg, 0, K, STEP, &crucial, &table));
        assert!(table.is_empty());
    }

    #[test]
    fn test_unrelated_read_not_aligned() {
        let crucial = map_for_contig(b"ACGTACGT");
        let table = EdgeMultiplicityTable::with_capacity(64, MAX_MULTI);
        let pkg = one_read_package(b"GGGGGGGG");
        assert!(!scan_read(&pkg, 0, K, STEP, &crucial, &table));
        assert!(table.is_empty());
    }

    #[test]
    fn test_mismatched_tail_stops_extension() {
        // Read shares the contig's start k-mer and first tail base but then
        // diverges; the covered run is too short for any edge.
        let crucial = map_for_contig(b"ACGTACGT");
        let table = EdgeMultiplicityTable::with_capacity(64, MAX_MULTI);
        let pkg = one_read_package(b"ACGTGGGG");
        assert!(!scan_read(&pkg, 0, K, STEP, &crucial, &table));
        assert!(table.is_empty());
    }

    #[test]
    fn test_saturation_under_repeats() {
        let crucial = map_for_contig(b"AAAACCCC");
        let table = EdgeMultiplicityTable::with_capacity(64, 3);
        for _ in 0..1000 {
            let pkg = one_read_package(b"AAAACCCC");
            scan_read(&pkg, 0, K, STEP, &crucial, &table);
        }
        let edges = collect_edges(&table);
        assert_eq!(edges.len(), 3);
        for &(_, m) in &edges {
            assert_eq!(m, 3);
        }
    }

    #[test]
    fn test_mark_covered_positions_merged_runs() {
        let crucial = map_for_contig(b"AAAACCCC");
        let pkg = one_read_package(b"AAAACCCC");
        let exist = mark_covered_positions(&pkg, 0, K, &crucial);
        // Forward hit at 0 covers 0..=2; the reverse-complement end hit at 5
        // marks 5 and extends backward over 4 and 3.
        assert!(exist[..=5].iter().all(|&e| e));
        assert!(!exist[6] && !exist[7]);
    }

    #[test]
    fn test_isolated_hit_below_threshold() {
        // Only the start of the contig appears in the read: a single crucial
        // hit covers at most s+1 positions, one short of an edge.
        let crucial = map_for_contig(b"AAAACCCC");
        let table = EdgeMultiplicityTable::with_capacity(64, MAX_MULTI);
        let pkg = one_read_package(b"AAAACGTG");
        assert!(!scan_read(&pkg, 0, K, STEP, &crucial, &table));
        assert!(table.is_empty());
    }
}
