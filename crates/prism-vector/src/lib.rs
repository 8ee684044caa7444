//! Prism Vector crate - vector store, embedding adapter, fusion ranking and
//! the multi-dimensional entity facade.
//!
//! Provides an in-memory vector store with brute-force cosine similarity
//! search and atomic snapshot persistence, an embedder trait with a
//! feature-hashing implementation, a weighted fusion ranker, and the
//! entity-level `MultiDimensionalStore` that ties them together.

pub mod embedding;
pub mod fusion;
pub mod multi;
pub mod persistence;
pub mod store;

pub use embedding::{embedder_from_config, Embedder, HashingEmbedder, MockEmbedding};
pub use fusion::{DimensionHits, FusionHit, FusionRanker, RankedEntity};
pub use multi::{
    BatchItem, BatchOutcome, DimensionStats, EntityInput, MultiDimensionalStore, RemovalReport,
    SkippedDimension, StoreOutcome, StoreStatistics,
};
pub use store::{cosine_similarity, SearchHit, SimilarityIndex, VectorStore};
