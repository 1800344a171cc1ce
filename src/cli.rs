//! Command-line surface.

use anyhow::{bail, Result};
use clap::Parser;
use tracing::info;

use crate::config::{IterationConfig, ReadFormat};
use crate::engine;

#[derive(Parser, Debug)]
#[command(name = "kstep")]
#[command(version)]
#[command(about = "Advance a de Bruijn assembly from k to k+s: re-emit contig edges and discover read-supported edges")]
pub struct Cli {
    /// Contigs file (FASTA/FASTQ, possibly gzipped)
    #[arg(short = 'c', long = "contig_file")]
    pub contig_file: std::path::PathBuf,
    /// Contig multiplicity file, one value per contig
    #[arg(short = 'm', long = "multi_file")]
    pub multi_file: std::path::PathBuf,
    /// Additional contigs file; edges only, no crucial k-mer updates
    #[arg(long = "addi_contig_file")]
    pub addi_contig_file: Option<std::path::PathBuf>,
    /// Multiplicity file for the additional contigs
    #[arg(long = "addi_multi_file")]
    pub addi_multi_file: Option<std::path::PathBuf>,
    /// Reads to be aligned; "-" for stdin; may be gzipped
    #[arg(short = 'r', long = "read_file")]
    pub read_file: String,
    /// Reads format: fasta, fastq or binary
    #[arg(short = 'f', long = "read_format")]
    pub read_format: String,
    /// CPU threads, at least 2; 0 for auto detect
    #[arg(short = 't', long = "num_cpu_threads", default_value = "0")]
    pub num_cpu_threads: usize,
    /// Current k-mer size
    #[arg(short = 'k', long = "kmer_k")]
    pub kmer_k: usize,
    /// Step for this iteration (at most 29): advances k to k + step
    #[arg(short = 's', long = "step")]
    pub step: usize,
    /// Output prefix: <prefix>.edges.0 and <prefix>.rr.pb are created
    #[arg(short = 'o', long = "output_prefix")]
    pub output_prefix: String,
    /// Maximum read length across all reads
    #[arg(short = 'l', long = "max_read_len")]
    pub max_read_len: usize,
}

/// Parse the command line, run one iteration, report the summary.
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let read_format = match cli.read_format.to_lowercase().as_str() {
        "fasta" => ReadFormat::Fasta,
        "fastq" => ReadFormat::Fastq,
        "binary" => ReadFormat::Binary,
        other => bail!("invalid read format: {other} (expected fasta, fastq or binary)"),
    };

    let num_threads = if cli.num_cpu_threads == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
            .max(2)
    } else {
        cli.num_cpu_threads
    };

    let cfg = IterationConfig {
        contig_file: cli.contig_file,
        contig_multi_file: cli.multi_file,
        addi_contig_file: cli.addi_contig_file,
        addi_multi_file: cli.addi_multi_file,
        read_file: cli.read_file,
        read_format,
        num_threads,
        kmer_k: cli.kmer_k,
        step: cli.step,
        max_read_len: cli.max_read_len,
        output_prefix: cli.output_prefix,
    };
    cfg.validate()?;

    let summary = engine::run(&cfg)?;
    info!(
        "done in {:.1}s: {} contig edges, {} iterative edges, {}/{} reads aligned",
        summary.elapsed_secs,
        summary.num_contig_edges,
        summary.num_iterative_edges,
        summary.num_aligned_reads,
        summary.num_total_reads,
    );
    Ok(())
}
