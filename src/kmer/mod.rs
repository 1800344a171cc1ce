//! DNA codes and bit-packed k-mers.

pub mod codec;
pub mod packed;

pub use codec::{complement, DNA_CODE};
pub use packed::{PackedKmer, KMER_LIMBS, MAX_KMER_BASES};
