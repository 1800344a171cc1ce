//! Index structures shared between the contig and read passes.

pub mod crucial;
pub mod edge_table;

pub use crucial::{CrucialKmerMap, CrucialKmerMapBuilder, TailSpec};
pub use edge_table::{EdgeMultiplicityTable, MAX_MULTI, MULTI_BITS};
