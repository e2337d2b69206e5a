use std::path::PathBuf;

/// Errors that can occur across Strata.
///
/// Each variant wraps a specific error domain. Library crates use this type
/// directly; the binary converts to a `miette` diagnostic at the boundary.
///
/// # Examples
///
/// ```
/// use strata_core::StrataError;
///
/// let err = StrataError::Config("missing API key".into());
/// assert!(err.to_string().contains("missing API key"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum StrataError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration, including credentials.
    #[error("configuration error: {0}")]
    #[diagnostic(
        code(strata::config),
        help("check strata.toml or the OPENAI_API_KEY / VOYAGE_API_KEY environment variables")
    )]
    Config(String),

    /// Embedding provider call failed or returned an unusable vector.
    #[error("embedding provider error: {0}")]
    Provider(String),

    /// Structural extraction of a source file failed.
    #[error("extraction error: {0}")]
    Extraction(String),

    /// A collection snapshot could not be read or written.
    #[error("persistence error at {}: {message}", path.display())]
    Persistence {
        /// Snapshot file involved.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// Embedding cache database failure.
    #[error("database error: {0}")]
    Database(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
