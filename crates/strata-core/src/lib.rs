//! Core types, configuration, hashing and error handling for Strata.
//!
//! This crate provides the shared foundation used by the other Strata crates:
//! - [`StrataError`]: unified error type using `thiserror`
//! - [`StrataConfig`]: configuration loaded from `strata.toml`
//! - The three-tier entity model: [`FileEntity`], [`MemberEntity`], [`MethodEntity`]
//! - Search results: [`SearchHit`], [`SearchResponse`]
//! - [`hash`]: content addressing for every entity kind

mod config;
mod error;
pub mod hash;
mod types;

pub use config::{
    EmbeddingConfig, ExtractorConfig, IndexConfig, SearchConfig, StoreConfig, StrataConfig,
};
pub use error::StrataError;
pub use types::{
    EntityKind, FileEntity, MemberEntity, MemberKind, MethodEntity, OutputFormat, SearchHit,
    SearchResponse,
};

/// A convenience `Result` type for Strata operations.
pub type Result<T> = std::result::Result<T, StrataError>;
