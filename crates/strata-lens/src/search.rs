//! Similarity search across the three entity tiers.
//!
//! Every query variant reduces to one embedding vector that is scored against
//! each enabled collection. Failures never propagate: they are logged and
//! produce an empty [`SearchResponse`] that still carries the elapsed time.

use std::sync::Arc;
use std::time::Instant;

use strata_core::{SearchConfig, SearchResponse, StrataError};
use tracing::{debug, warn};

use crate::cache::EmbeddingCache;
use crate::store::EntityStore;

/// Snippet labels are cut to this many characters.
const LABEL_CHARS: usize = 100;

/// Query front-end over an [`EntityStore`].
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use strata_core::{FileEntity, SearchConfig};
/// use strata_lens::cache::EmbeddingCache;
/// use strata_lens::embedding::HashingEmbedder;
/// use strata_lens::search::SearchEngine;
/// use strata_lens::store::{EntityStore, SnapshotStore};
///
/// # #[tokio::main]
/// # async fn main() {
/// let embedder = HashingEmbedder::new(64);
/// let store = Arc::new(SnapshotStore::in_memory());
/// let mut file = FileEntity::new("mailer.py", "send mail");
/// file.embedding = Some(embedder.vector("File mailer.py containing Mailer"));
/// store.store_file(&file);
///
/// let engine = SearchEngine::new(store, Arc::new(EmbeddingCache::in_memory(Arc::new(embedder))));
/// let response = engine.search_text("mailer", &SearchConfig::default()).await;
/// assert_eq!(response.file_hits[0].name, "mailer.py");
/// # }
/// ```
pub struct SearchEngine {
    store: Arc<dyn EntityStore>,
    embedder: Arc<EmbeddingCache>,
}

impl SearchEngine {
    pub fn new(store: Arc<dyn EntityStore>, embedder: Arc<EmbeddingCache>) -> Self {
        Self { store, embedder }
    }

    /// Search with a free-text query.
    pub async fn search_text(&self, query: &str, config: &SearchConfig) -> SearchResponse {
        self.search_embedded(query.to_string(), query, config).await
    }

    /// Search for entities resembling a code snippet.
    pub async fn search_similar_code(&self, snippet: &str, config: &SearchConfig) -> SearchResponse {
        self.search_embedded(similar_label(snippet), snippet, config)
            .await
    }

    /// Search with several terms embedded together.
    pub async fn search_terms(&self, terms: &[String], config: &SearchConfig) -> SearchResponse {
        let label = format!("Multi-term: {}", terms.join(", "));
        self.search_embedded(label, &terms.join(" "), config).await
    }

    /// Search with a query qualified by surrounding context.
    pub async fn search_with_context(
        &self,
        query: &str,
        context: &str,
        config: &SearchConfig,
    ) -> SearchResponse {
        let text = format!("Context: {context}\nQuery: {query}");
        self.search_embedded(format!("{query} (with context)"), &text, config)
            .await
    }

    /// Score `vector` against every enabled collection.
    ///
    /// A vector whose length differs from the stored ones scores 0 everywhere.
    pub fn search_embedding(
        &self,
        query: impl Into<String>,
        vector: &[f32],
        config: &SearchConfig,
    ) -> SearchResponse {
        let start = Instant::now();
        let limit = config.max_results_per_type;
        let threshold = config.similarity_threshold;

        let mut response = SearchResponse {
            query: query.into(),
            ..SearchResponse::default()
        };
        if config.use_files {
            response.file_hits = self.store.search_files(vector, limit, threshold);
        }
        if config.use_members {
            response.member_hits = self.store.search_members(vector, limit, threshold);
        }
        if config.use_methods {
            response.method_hits = self.store.search_methods(vector, limit, threshold);
        }
        response.elapsed_ms = elapsed_ms(start);

        debug!(
            query = %response.query,
            files = response.file_hits.len(),
            members = response.member_hits.len(),
            methods = response.method_hits.len(),
            "search complete"
        );
        response
    }

    async fn search_embedded(
        &self,
        label: String,
        text: &str,
        config: &SearchConfig,
    ) -> SearchResponse {
        let start = Instant::now();
        match self.embed(text).await {
            Ok(vector) => {
                let mut response = self.search_embedding(label, &vector, config);
                response.elapsed_ms = elapsed_ms(start);
                response
            }
            Err(e) => {
                warn!(query = %label, error = %e, "search failed, returning no results");
                SearchResponse::empty(label, elapsed_ms(start))
            }
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, StrataError> {
        self.embedder.embed(text).await
    }
}

fn similar_label(snippet: &str) -> String {
    match snippet.char_indices().nth(LABEL_CHARS) {
        Some((end, _)) => format!("Similar to: {}...", &snippet[..end]),
        None => snippet.to_string(),
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use strata_core::{EntityKind, FileEntity, MemberEntity, MemberKind, MethodEntity};

    use crate::embedding::{EmbeddingProvider, HashingEmbedder};
    use crate::store::SnapshotStore;

    struct Broken;

    #[async_trait]
    impl EmbeddingProvider for Broken {
        fn dimensions(&self) -> usize {
            8
        }

        fn provider_name(&self) -> &str {
            "broken"
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, StrataError> {
            Err(StrataError::Provider("unreachable".into()))
        }
    }

    fn seeded() -> (Arc<SnapshotStore>, HashingEmbedder) {
        let embedder = HashingEmbedder::new(128);
        let store = Arc::new(SnapshotStore::in_memory());

        let mut file = FileEntity::new("src/user.py", "class User: ...");
        file.embedding = Some(embedder.vector("File user.py containing User"));
        let mut member = MemberEntity::new(&file.id, MemberKind::Class, "User", "A registered user.");
        member.embedding = Some(embedder.vector("User class - A registered user."));
        let mut method = MethodEntity::new(&member.id, "validate_email", "Validates email format.");
        method.embedding = Some(embedder.vector("validate_email method in User - Validates email format."));
        let mut other = MethodEntity::new(&member.id, "render", "Draws the avatar.");
        other.embedding = Some(embedder.vector("render method in User - Draws the avatar."));

        store.store_file(&file);
        store.store_member(&member);
        store.store_method(&method);
        store.store_method(&other);
        (store, embedder)
    }

    fn engine(store: Arc<SnapshotStore>, provider: Arc<dyn EmbeddingProvider>) -> SearchEngine {
        SearchEngine::new(store, Arc::new(EmbeddingCache::in_memory(provider)))
    }

    #[tokio::test]
    async fn text_search_ranks_relevant_method_first() {
        let (store, embedder) = seeded();
        let engine = engine(store, Arc::new(embedder));
        let config = SearchConfig {
            similarity_threshold: 0.2,
            ..SearchConfig::default()
        };

        let response = engine.search_text("validate email", &config).await;
        assert_eq!(response.query, "validate email");
        assert_eq!(response.method_hits[0].name, "validate_email");
        assert_eq!(response.method_hits[0].parent_name.as_deref(), Some("User"));
        assert_eq!(response.method_hits[0].path, "src/user.py");
        assert!(response.all_hits().iter().all(|h| h.score >= 0.2));
        assert_eq!(response.all_hits()[0].kind, EntityKind::Method);
    }

    #[tokio::test]
    async fn disabled_tiers_are_not_searched() {
        let (store, embedder) = seeded();
        let engine = engine(store, Arc::new(embedder));
        let config = SearchConfig {
            use_files: false,
            use_methods: false,
            similarity_threshold: -1.0,
            ..SearchConfig::default()
        };

        let response = engine.search_text("user", &config).await;
        assert!(response.file_hits.is_empty());
        assert!(response.method_hits.is_empty());
        assert_eq!(response.member_hits.len(), 1);
    }

    #[tokio::test]
    async fn limit_applies_per_type() {
        let (store, embedder) = seeded();
        let engine = engine(store, Arc::new(embedder));
        let config = SearchConfig {
            max_results_per_type: 1,
            similarity_threshold: -1.0,
            ..SearchConfig::default()
        };

        let response = engine.search_text("anything", &config).await;
        assert_eq!(response.method_hits.len(), 1);
        assert_eq!(response.total(), 3);
    }

    #[tokio::test]
    async fn query_labels() {
        let (store, embedder) = seeded();
        let engine = engine(store, Arc::new(embedder));
        let config = SearchConfig::default();

        let long = "x".repeat(150);
        let response = engine.search_similar_code(&long, &config).await;
        assert_eq!(response.query, format!("Similar to: {}...", "x".repeat(100)));

        let short = engine.search_similar_code("fn main() {}", &config).await;
        assert_eq!(short.query, "fn main() {}");

        let exact = "y".repeat(100);
        let response = engine.search_similar_code(&exact, &config).await;
        assert_eq!(response.query, exact);

        let terms = vec!["email".to_string(), "validation".to_string()];
        let response = engine.search_terms(&terms, &config).await;
        assert_eq!(response.query, "Multi-term: email, validation");

        let response = engine.search_with_context("validate", "user signup", &config).await;
        assert_eq!(response.query, "validate (with context)");
    }

    #[tokio::test]
    async fn embedding_failure_returns_empty_response() {
        let (store, _) = seeded();
        let engine = engine(store, Arc::new(Broken));

        let response = engine.search_text("validate email", &SearchConfig::default()).await;
        assert_eq!(response.query, "validate email");
        assert_eq!(response.total(), 0);
        assert!(response.elapsed_ms >= 0.0);
    }

    #[tokio::test]
    async fn blank_query_scores_zero() {
        let (store, embedder) = seeded();
        let engine = engine(store, Arc::new(embedder));

        let response = engine.search_text("   ", &SearchConfig::default()).await;
        assert_eq!(response.total(), 0);

        let permissive = SearchConfig {
            similarity_threshold: 0.0,
            ..SearchConfig::default()
        };
        let response = engine.search_text("", &permissive).await;
        assert!(response.all_hits().iter().all(|h| h.score == 0.0));
    }
}
