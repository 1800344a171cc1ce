//! Iteration orchestration.
//!
//! Drives one k → k+s iteration end to end: primary contig pass (crucial
//! k-mers + contig edges), optional additional-contig pass (edges only),
//! read pass (edge discovery + aligned-read re-emission), then the flush of
//! the discovered edges and a JSON run summary.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::IterationConfig;
use crate::index::{CrucialKmerMapBuilder, EdgeMultiplicityTable, MAX_MULTI};
use crate::io::edges::{EdgeFileWriter, PackedEdge};
use crate::io::fastx::{open_reader, MultiplicityReader, SeqReader};
use crate::pass::{run_contig_pass, run_read_pass};

/// Counters reported after a completed iteration.
#[derive(Debug, Clone, Copy)]
pub struct IterationSummary {
    pub num_contigs: u64,
    pub num_crucial_kmers: u64,
    pub num_contig_edges: u64,
    pub num_total_reads: u64,
    pub num_aligned_reads: u64,
    pub num_iterative_edges: u64,
    pub elapsed_secs: f64,
}

/// Run one iteration to completion.
pub fn run(cfg: &IterationConfig) -> Result<IterationSummary> {
    let start = Instant::now();
    cfg.validate()?;

    let next_k = cfg.next_k();
    info!(
        "advancing k: {} -> {} ({} threads)",
        cfg.kmer_k, next_k, cfg.num_threads
    );

    let mut edge_writer = EdgeFileWriter::create(&cfg.edges_path(), next_k)?;
    let reads_path = cfg.remaining_reads_path();
    let mut aligned_out = BufWriter::new(
        File::create(&reads_path)
            .with_context(|| format!("failed to create {}", reads_path.display()))?,
    );

    // Primary contigs: collect crucial k-mers and re-emit contig edges.
    info!("reading contigs from {}", cfg.contig_file.display());
    let builder = CrucialKmerMapBuilder::new();
    let contigs = SeqReader::open_auto(open_reader(&cfg.contig_file)?)?;
    let multis = MultiplicityReader::open(&cfg.contig_multi_file)?;
    let primary = run_contig_pass(cfg, contigs, multis, Some(&builder), &mut edge_writer)?;

    // Additional contigs contribute edges but never extend the crucial map.
    let mut num_contigs = primary.num_contigs;
    let mut num_contig_edges = primary.num_edges;
    if let (Some(contig_path), Some(multi_path)) = (&cfg.addi_contig_file, &cfg.addi_multi_file) {
        info!("reading additional contigs from {}", contig_path.display());
        let contigs = SeqReader::open_auto(open_reader(contig_path)?)?;
        let multis = MultiplicityReader::open(multi_path)?;
        let addi = run_contig_pass(cfg, contigs, multis, None, &mut edge_writer)?;
        num_contigs += addi.num_contigs;
        num_contig_edges += addi.num_edges;
    }

    let crucial = builder.freeze();
    info!("number of crucial k-mers: {}", crucial.len());

    // Read pass: discover edges supported by the reads.
    let edge_table = EdgeMultiplicityTable::with_capacity(crucial.len() * 10, MAX_MULTI);
    let read_stats = run_read_pass(cfg, &crucial, &edge_table, &mut aligned_out)?;
    aligned_out
        .flush()
        .context("failed to flush aligned reads file")?;

    // Flush the discovered edges after all workers have quiesced.
    info!("writing {} iterative edges", edge_table.len());
    let mut packed = PackedEdge::new(next_k);
    let mut flush_err = Ok(());
    edge_table.for_each(|kmer, multi| {
        if flush_err.is_ok() {
            packed.pack_with(multi, |p| kmer.get_base(p));
            flush_err = edge_writer.write_record(packed.words());
        }
    });
    flush_err?;
    let total_edges = edge_writer.finish()?;
    debug_assert_eq!(
        total_edges,
        num_contig_edges + edge_table.len() as u64
    );

    let summary = IterationSummary {
        num_contigs,
        num_crucial_kmers: crucial.len() as u64,
        num_contig_edges,
        num_total_reads: read_stats.num_total_reads,
        num_aligned_reads: read_stats.num_aligned_reads,
        num_iterative_edges: edge_table.len() as u64,
        elapsed_secs: start.elapsed().as_secs_f64(),
    };
    write_stats_json(cfg, &summary)?;
    Ok(summary)
}

/// Save the run summary next to the other outputs.
fn write_stats_json(cfg: &IterationConfig, summary: &IterationSummary) -> Result<()> {
    let stats = serde_json::json!({
        "kmer_k": cfg.kmer_k,
        "step": cfg.step,
        "next_k": cfg.next_k(),
        "num_contigs": summary.num_contigs,
        "num_crucial_kmers": summary.num_crucial_kmers,
        "num_contig_edges": summary.num_contig_edges,
        "num_total_reads": summary.num_total_reads,
        "num_aligned_reads": summary.num_aligned_reads,
        "num_iterative_edges": summary.num_iterative_edges,
        "elapsed_secs": summary.elapsed_secs,
    });
    let path = cfg.stats_path();
    let file =
        File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, &stats).context("failed to write run summary")?;
    Ok(())
}
