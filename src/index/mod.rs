//! Index tier: answers reference queries from a pre-built SCIP index.
//!
//! The index is decoded once into flat arenas of documents and occurrences;
//! every lookup after that is in-memory and never touches an external process.
mod generate;
pub mod proto;
mod resolver;

pub use generate::{generate_if_stale, index_is_stale, GenerateOptions};
pub use resolver::{
    parse_range, IndexBatch, IndexResolver, IndexStats, IndexTables, OccurrenceRef, SymbolId,
};
