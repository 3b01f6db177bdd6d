//! Vector record storage and similarity ranking.
//!
//! # Architecture
//!
//! - `storage`: Append-only binary collection file
//! - `store`: Store handle with the initialize / insert / scan / clear lifecycle
//! - `index`: Cosine similarity and top-k ranking

mod index;
mod storage;
mod store;

pub use index::{QueryError, QueryResult, SearchFilter};
pub use storage::StorageError;
pub use store::{Record, StoreConfig, StoreError, VectorStore};

#[cfg(test)]
pub use index::cosine_similarity;
