//! Hierarchical semantic index over files, members and methods.
//!
//! Files, their classes/interfaces/enums, and the methods of those members are
//! embedded as separate tiers, deduplicated by content hash, persisted as JSON
//! snapshots, and searched by cosine similarity.

pub mod cache;
pub mod embedding;
pub mod pipeline;
pub mod search;
pub mod store;
pub mod text;

pub use cache::{CacheStats, EmbeddingCache};
pub use embedding::{build_provider, EmbeddingProvider};
pub use pipeline::{IndexPipeline, IndexReport, IndexStats};
pub use search::SearchEngine;
pub use store::{EntityStore, SnapshotStore, StoreStats};
