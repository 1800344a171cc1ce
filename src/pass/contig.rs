//! Contig pass: crucial-k-mer collection and contig-edge re-emission.
//!
//! Contig batches stream through the double-buffered pipeline. For primary
//! contigs, workers collect the crucial k-mers (the forward k-mer at each
//! contig start and the reverse-complement k-mer at each end) together with
//! their successor tails. Then, on the main thread, every (k'+1)-window of
//! every long-enough contig is re-emitted as an edge whose multiplicity is
//! rescaled from the contig's k-multiplicity.
//!
//! Additional-contig passes run the same emission but never touch the
//! crucial-k-mer map.

use anyhow::Result;
use tracing::info;

use crate::config::IterationConfig;
use crate::index::{CrucialKmerMapBuilder, TailSpec, MAX_MULTI};
use crate::io::edges::{EdgeFileWriter, PackedEdge};
use crate::io::fastx::{MultiplicityReader, SeqReader};
use crate::io::package::{ContigPackage, CONTIG_BATCH_SIZE};
use crate::io::threads::{parallel_for, run_double_buffered};
use crate::kmer::{complement, PackedKmer};

/// Totals accumulated over one contig pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContigPassStats {
    pub num_contigs: u64,
    pub total_bases: u64,
    pub num_edges: u64,
}

/// Rescale a contig's k-multiplicity to the (k'+1)-edge multiplicity.
///
/// Windows near the contig ends cover fewer k-mers than interior windows;
/// the expected k-mer count per window is computed from the contig length
/// and scaled back to a per-edge estimate, rounded half-up and clamped.
pub fn rescale_multiplicity(
    contig_len: usize,
    k: usize,
    next_k: usize,
    multi_k: f64,
    ceiling: u16,
) -> u16 {
    debug_assert!(contig_len >= next_k + 1);
    let num_kmer = (contig_len - k + 1) as f64;
    let num_nextk1 = (contig_len - (next_k + 1) + 1) as f64;
    let span = (next_k + 1 - k + 1) as f64;
    let internal_max = span.min(num_nextk1);
    let num_external = internal_max - 1.0;
    let num_internal = num_kmer - num_external * 2.0;

    let exp_num_kmer =
        (num_external * (num_external + 1.0) / span + internal_max / span * num_internal) * multi_k;
    let scaled = exp_num_kmer * k as f64 / (next_k + 1) as f64 / num_nextk1 + 0.5;
    if scaled >= ceiling as f64 {
        ceiling
    } else {
        scaled as u16
    }
}

/// Insert the crucial k-mers of contig `i` into the builder.
fn collect_crucial_kmers(
    pkg: &ContigPackage,
    i: usize,
    k: usize,
    step: usize,
    builder: &CrucialKmerMapBuilder,
) {
    let len = pkg.len_of(i);
    if len < k {
        return;
    }

    let mut kmer = PackedKmer::new(k);
    for j in 0..k {
        kmer.shift_append(pkg.base(i, j));
    }
    let tail_len = step.min(len - k);
    let mut raw = 0u64;
    for j in 0..tail_len {
        raw |= (pkg.base(i, k + j) as u64) << ((31 - j) * 2);
    }
    builder.insert(kmer, TailSpec::from_raw(raw | tail_len as u64));

    if len > k {
        // Reverse-complement k-mer at the contig end, with the tail walking
        // back into the contig.
        for j in 0..k {
            kmer.shift_append(complement(pkg.base(i, len - 1 - j)));
        }
        let mut raw = 0u64;
        for j in 0..tail_len {
            raw |= (complement(pkg.base(i, len - k - 1 - j)) as u64) << ((31 - j) * 2);
        }
        builder.insert(kmer, TailSpec::from_raw(raw | tail_len as u64));
    }
}

/// Emit every (k'+1)-window of every long-enough contig in the batch.
fn emit_contig_edges(
    pkg: &ContigPackage,
    k: usize,
    next_k: usize,
    edge: &mut PackedEdge,
    writer: &mut EdgeFileWriter,
) -> Result<u64> {
    let mut emitted = 0u64;
    for i in 0..pkg.len() {
        let len = pkg.len_of(i);
        if len < next_k + 1 {
            continue;
        }
        let multi = rescale_multiplicity(len, k, next_k, pkg.multiplicity(i), MAX_MULTI);

        edge.pack_with(multi, |p| pkg.base(i, p));
        writer.write_record(edge.words())?;
        emitted += 1;
        for j in next_k + 1..len {
            edge.slide(pkg.base(i, j));
            writer.write_record(edge.words())?;
            emitted += 1;
        }
    }
    Ok(emitted)
}

/// Run one contig pass over `contigs`/`multis`.
///
/// `builder` is `Some` for the primary pass (crucial k-mers are collected)
/// and `None` for additional contigs.
pub fn run_contig_pass(
    cfg: &IterationConfig,
    mut contigs: SeqReader,
    mut multis: MultiplicityReader,
    builder: Option<&CrucialKmerMapBuilder>,
    writer: &mut EdgeFileWriter,
) -> Result<ContigPassStats> {
    let k = cfg.kmer_k;
    let step = cfg.step;
    let next_k = cfg.next_k();
    let num_workers = cfg.num_workers();

    let mut stats = ContigPassStats::default();
    let mut edge = PackedEdge::new(next_k);

    let fill = move |pkg: &mut ContigPackage| -> Result<bool> {
        pkg.clear();
        while pkg.len() < CONTIG_BATCH_SIZE {
            let mut before = pkg.len();
            let more = contigs.next_batch(|seq| {
                pkg.push_seq(seq);
                Ok(())
            })?;
            if !more {
                break;
            }
            while before < pkg.len() {
                match multis.next_value()? {
                    Some(m) => pkg.push_multiplicity(m),
                    None => anyhow::bail!("multiplicity file has fewer entries than contigs"),
                }
                before += 1;
            }
        }
        Ok(!pkg.is_empty())
    };

    run_double_buffered(
        ContigPackage::new(),
        ContigPackage::new(),
        fill,
        |pkg: &mut ContigPackage| {
            if let Some(builder) = builder {
                let pkg = &*pkg;
                parallel_for(num_workers, pkg.len(), |i| {
                    collect_crucial_kmers(pkg, i, k, step, builder);
                });
            }
            stats.num_edges += emit_contig_edges(pkg, k, next_k, &mut edge, writer)?;
            stats.num_contigs += pkg.len() as u64;
            stats.total_bases += pkg.total_bases() as u64;
            Ok(())
        },
    )?;

    info!(
        "contig pass done: {} contigs, {} bases, {} edges",
        stats.num_contigs, stats.total_bases, stats.num_edges
    );
    Ok(stats)
}
