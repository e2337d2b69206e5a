use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StrataError;

/// Top-level configuration loaded from `strata.toml`.
///
/// Every section and field is optional; missing values take their defaults.
///
/// # Examples
///
/// ```
/// use strata_core::StrataConfig;
///
/// let config = StrataConfig::default();
/// assert_eq!(config.search.max_results_per_type, 10);
/// assert!(config.indexing.resume);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrataConfig {
    /// Similarity search settings.
    #[serde(default)]
    pub search: SearchConfig,
    /// Indexing pipeline and file discovery settings.
    #[serde(default)]
    pub indexing: IndexConfig,
    /// Embedding provider settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Structural extractor settings.
    #[serde(default)]
    pub extractor: ExtractorConfig,
    /// Entity store settings.
    #[serde(default)]
    pub store: StoreConfig,
}

impl StrataConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Io`] if the file cannot be read, or
    /// [`StrataError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use strata_core::StrataConfig;
    /// use std::path::Path;
    ///
    /// let config = StrataConfig::from_file(Path::new("strata.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, StrataError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Toml`] if parsing fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use strata_core::StrataConfig;
    ///
    /// let toml = r#"
    /// [search]
    /// similarity_threshold = 0.4
    /// "#;
    /// let config = StrataConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.search.similarity_threshold, 0.4);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, StrataError> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }
}

/// Per-query search settings.
///
/// Doubles as the `[search]` config section and as the per-request
/// parameter handed to the search engine.
///
/// # Examples
///
/// ```
/// use strata_core::SearchConfig;
///
/// let config = SearchConfig::default();
/// assert!(config.use_files && config.use_members && config.use_methods);
/// assert_eq!(config.similarity_threshold, 0.25);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Search the file collection.
    #[serde(default = "default_true")]
    pub use_files: bool,
    /// Search the member (class/interface/enum) collection.
    #[serde(default = "default_true")]
    pub use_members: bool,
    /// Search the method collection.
    #[serde(default = "default_true")]
    pub use_methods: bool,
    /// Maximum hits returned per collection (default: 10).
    #[serde(default = "default_max_results_per_type")]
    pub max_results_per_type: usize,
    /// Minimum cosine similarity for a hit (default: 0.25).
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

fn default_true() -> bool {
    true
}

fn default_max_results_per_type() -> usize {
    10
}

fn default_similarity_threshold() -> f64 {
    0.25
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            use_files: true,
            use_members: true,
            use_methods: true,
            max_results_per_type: default_max_results_per_type(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

/// Indexing pipeline and file discovery configuration.
///
/// # Examples
///
/// ```
/// use strata_core::IndexConfig;
///
/// let config = IndexConfig::default();
/// assert!(config.resume);
/// assert_eq!(config.concurrency, 4);
/// assert!(config.extensions.iter().any(|e| e == "py"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Reuse stored entities whose content is unchanged (default: true).
    #[serde(default = "default_true")]
    pub resume: bool,
    /// Entities processed concurrently within a pass (default: 4, minimum 1).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// File extensions to index, without the leading dot.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Directory names skipped anywhere in the tree.
    #[serde(default = "default_excluded_dirs")]
    pub excluded_dirs: Vec<String>,
    /// Files larger than this many bytes are skipped (default: 1 MB).
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

fn default_concurrency() -> usize {
    4
}

fn default_extensions() -> Vec<String> {
    ["py", "rs", "ts", "tsx", "js", "jsx", "java", "go", "cs", "cpp"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

fn default_excluded_dirs() -> Vec<String> {
    [
        "venv",
        "env",
        "node_modules",
        "bower_components",
        "__pycache__",
        "bin",
        "obj",
        "build",
        "dist",
        "target",
        "packages",
        "vendor",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

fn default_max_file_bytes() -> u64 {
    1_048_576
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            resume: true,
            concurrency: default_concurrency(),
            extensions: default_extensions(),
            excluded_dirs: default_excluded_dirs(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

/// Configuration for the embedding provider.
///
/// # Examples
///
/// ```
/// use strata_core::EmbeddingConfig;
///
/// let config = EmbeddingConfig::default();
/// assert_eq!(config.provider, "openai");
/// assert_eq!(config.model, "text-embedding-3-large");
/// assert_eq!(config.dimensions, 3072);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider: `"openai"`, `"voyage"` or `"hashing"` (offline).
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    /// API key for the provider.
    pub api_key: Option<String>,
    /// Model name (default: `"text-embedding-3-large"`).
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Declared vector length (default: 3072).
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
    /// Custom base URL for the `/embeddings` endpoint.
    pub base_url: Option<String>,
    /// SQLite file for a persistent embedding cache. In-memory when unset.
    pub cache_path: Option<PathBuf>,
}

fn default_embedding_provider() -> String {
    "openai".into()
}

fn default_embedding_model() -> String {
    "text-embedding-3-large".into()
}

fn default_embedding_dimensions() -> usize {
    3072
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
            base_url: None,
            cache_path: None,
        }
    }
}

/// Configuration for the structural extractor.
///
/// # Examples
///
/// ```
/// use strata_core::ExtractorConfig;
///
/// let config = ExtractorConfig::default();
/// assert_eq!(config.kind, "syntax");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// `"syntax"` (tree-sitter, offline) or `"llm"` (chat completion).
    #[serde(default = "default_extractor_kind")]
    pub kind: String,
    /// Chat model used by the `llm` extractor.
    #[serde(default = "default_extractor_model")]
    pub model: String,
    /// API key for the `llm` extractor.
    pub api_key: Option<String>,
    /// Custom base URL for the `llm` extractor.
    pub base_url: Option<String>,
}

fn default_extractor_kind() -> String {
    "syntax".into()
}

fn default_extractor_model() -> String {
    "gpt-4o-mini".into()
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            kind: default_extractor_kind(),
            model: default_extractor_model(),
            api_key: None,
            base_url: None,
        }
    }
}

/// Entity store configuration.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use strata_core::StoreConfig;
///
/// assert_eq!(StoreConfig::default().path, PathBuf::from(".strata"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding one snapshot per collection, relative to the project root.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".strata")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = StrataConfig::default();
        assert_eq!(config.search.max_results_per_type, 10);
        assert_eq!(config.search.similarity_threshold, 0.25);
        assert!(config.search.use_files);
        assert!(config.indexing.resume);
        assert_eq!(config.indexing.max_file_bytes, 1_048_576);
        assert_eq!(config.embedding.provider, "openai");
        assert_eq!(config.embedding.dimensions, 3072);
        assert!(config.embedding.cache_path.is_none());
        assert_eq!(config.extractor.kind, "syntax");
        assert_eq!(config.store.path, PathBuf::from(".strata"));
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
[search]
use_files = false
max_results_per_type = 3
similarity_threshold = 0.6

[indexing]
resume = false
concurrency = 1
extensions = ["cs"]

[embedding]
provider = "voyage"
model = "voyage-code-3"
dimensions = 1024
cache_path = ".strata/cache.db"

[extractor]
kind = "llm"
model = "gpt-4o"

[store]
path = "vectordb"
"#;
        let config = StrataConfig::from_toml(toml).unwrap();
        assert!(!config.search.use_files);
        assert!(config.search.use_members);
        assert_eq!(config.search.max_results_per_type, 3);
        assert!(!config.indexing.resume);
        assert_eq!(config.indexing.concurrency, 1);
        assert_eq!(config.indexing.extensions, vec!["cs"]);
        assert!(!config.indexing.excluded_dirs.is_empty());
        assert_eq!(config.embedding.provider, "voyage");
        assert_eq!(config.embedding.dimensions, 1024);
        assert_eq!(
            config.embedding.cache_path.as_deref(),
            Some(Path::new(".strata/cache.db"))
        );
        assert_eq!(config.extractor.kind, "llm");
        assert_eq!(config.store.path, PathBuf::from("vectordb"));
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let config = StrataConfig::from_toml("").unwrap();
        assert_eq!(config.search.max_results_per_type, 10);
        assert_eq!(config.embedding.model, "text-embedding-3-large");
    }

    #[test]
    fn invalid_toml_returns_error() {
        let result = StrataConfig::from_toml("{{invalid}}");
        assert!(result.is_err());
    }
}
