//! Graphvec - embedding consistency and hybrid retrieval for knowledge graphs
//!
//! Keeps the vectors stored on graph entities in line with the configured
//! embedding model: detects dimension drift, migrates and regenerates
//! embeddings in resumable batches, and serves vector, hybrid RRF and
//! reranked search with a deterministic fallback path.

pub mod cli;
pub mod config;
pub mod consistency;
pub mod embedding;
pub mod error;
pub mod migration;
pub mod reindex;
pub mod retrieval;
pub mod storage;

pub use error::{GraphvecError, Result};
