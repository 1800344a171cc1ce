//! Input parsing, packed-sequence batches, binary outputs, and the
//! double-buffered pipeline.

pub mod edges;
pub mod fastx;
pub mod package;
pub mod threads;
