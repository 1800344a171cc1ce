//! Iteration configuration.
//!
//! All knobs for one k → k+s iteration, validated up front so the parallel
//! phases never see an inconsistent state.

use std::path::PathBuf;

use anyhow::{bail, Result};

use crate::io::package::MAX_SUPPORTED_READ_LEN;
use crate::kmer::MAX_KMER_BASES;

/// Input format of the reads file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFormat {
    Fasta,
    Fastq,
    /// Packed records as written to `<prefix>.rr.pb` by a previous iteration.
    Binary,
}

/// Largest supported step per iteration.
pub const MAX_STEP: usize = 29;

/// Configuration for one iteration of the extension engine.
#[derive(Debug, Clone)]
pub struct IterationConfig {
    /// Primary contigs (FASTA/FASTQ, possibly gzipped).
    pub contig_file: PathBuf,
    /// Multiplicities parallel to the primary contigs.
    pub contig_multi_file: PathBuf,
    /// Additional contigs; edges are emitted but the crucial-k-mer map is
    /// not extended.
    pub addi_contig_file: Option<PathBuf>,
    /// Multiplicities parallel to the additional contigs.
    pub addi_multi_file: Option<PathBuf>,
    /// Reads path, `-` for stdin.
    pub read_file: String,
    /// Format of the reads file.
    pub read_format: ReadFormat,
    /// Total CPU threads (producer + workers), at least 2.
    pub num_threads: usize,
    /// Current k-mer size.
    pub kmer_k: usize,
    /// Step for this iteration; the next k-mer size is `kmer_k + step`.
    pub step: usize,
    /// Maximum read length across all reads.
    pub max_read_len: usize,
    /// Output prefix; `<prefix>.edges.0` and `<prefix>.rr.pb` are created.
    pub output_prefix: String,
}

impl IterationConfig {
    /// The k-mer size this iteration advances to.
    #[inline]
    pub fn next_k(&self) -> usize {
        self.kmer_k + self.step
    }

    /// Path of the edge output file.
    pub fn edges_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.edges.0", self.output_prefix))
    }

    /// Path of the aligned-reads output file.
    pub fn remaining_reads_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.rr.pb", self.output_prefix))
    }

    /// Path of the run summary file.
    pub fn stats_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.stats.json", self.output_prefix))
    }

    /// Worker threads available once the producer thread is accounted for.
    #[inline]
    pub fn num_workers(&self) -> usize {
        self.num_threads.saturating_sub(1).max(1)
    }

    /// Check every precondition, reporting the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.kmer_k == 0 {
            bail!("invalid k-mer size: k must be positive");
        }
        if self.step == 0 || self.step > MAX_STEP {
            bail!("invalid step: must be in 1..={MAX_STEP}");
        }
        // The engine manipulates (k + step + 1)-mers.
        if self.kmer_k + self.step + 1 > MAX_KMER_BASES {
            bail!(
                "k + step must be less than {} (got {})",
                MAX_KMER_BASES,
                self.kmer_k + self.step
            );
        }
        if self.num_threads < 2 {
            bail!("at least 2 CPU threads are required (one producer, one worker)");
        }
        if self.max_read_len == 0 {
            bail!("invalid max read length: must be positive");
        }
        if self.max_read_len > MAX_SUPPORTED_READ_LEN {
            bail!("max read length {} exceeds the packed-read limit {MAX_SUPPORTED_READ_LEN}", self.max_read_len);
        }
        if self.output_prefix.is_empty() {
            bail!("no output prefix");
        }
        if self.addi_contig_file.is_some() != self.addi_multi_file.is_some() {
            bail!("--addi_contig_file and --addi_multi_file must be given together");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> IterationConfig {
        IterationConfig {
            contig_file: PathBuf::from("contigs.fa"),
            contig_multi_file: PathBuf::from("contigs.mul"),
            addi_contig_file: None,
            addi_multi_file: None,
            read_file: "reads.fq".to_string(),
            read_format: ReadFormat::Fastq,
            num_threads: 2,
            kmer_k: 21,
            step: 8,
            max_read_len: 150,
            output_prefix: "out".to_string(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(base_config().validate().is_ok());
        assert_eq!(base_config().next_k(), 29);
        assert_eq!(base_config().num_workers(), 1);
    }

    #[test]
    fn test_rejects_bad_k_and_step() {
        let mut cfg = base_config();
        cfg.kmer_k = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base_config();
        cfg.step = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base_config();
        cfg.step = MAX_STEP + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_capacity_overflow() {
        let mut cfg = base_config();
        cfg.kmer_k = MAX_KMER_BASES;
        cfg.step = 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_single_thread() {
        let mut cfg = base_config();
        cfg.num_threads = 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_mismatched_addi_files() {
        let mut cfg = base_config();
        cfg.addi_contig_file = Some(PathBuf::from("extra.fa"));
        assert!(cfg.validate().is_err());
        cfg.addi_multi_file = Some(PathBuf::from("extra.mul"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_output_paths() {
        let cfg = base_config();
        assert_eq!(cfg.edges_path(), PathBuf::from("out.edges.0"));
        assert_eq!(cfg.remaining_reads_path(), PathBuf::from("out.rr.pb"));
    }
}
