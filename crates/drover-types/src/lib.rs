//! Pure data types for drover: summaries, collections, cases.
//!
//! This crate is a leaf dependency with no async runtime and no I/O.
//! It exists so that discovery and reporting code can build plans and read
//! results without pulling in drover-kernel's runtime dependencies.

pub mod collection;
pub mod summary;

// Flat re-exports for convenience
pub use collection::*;
pub use summary::*;
