//! The two phases of an iteration: the contig pass and the read pass.

pub mod contig;
pub mod read;

pub use contig::{run_contig_pass, ContigPassStats};
pub use read::{run_read_pass, ReadPassStats};
