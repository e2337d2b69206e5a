//! Indexing and search against an on-disk snapshot store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use strata_core::{IndexConfig, MemberKind, SearchConfig, StrataError};
use strata_extract::{ExtractedMember, ExtractedMethod, SourceFile, StructuralExtractor};
use strata_lens::embedding::{EmbeddingProvider, HashingEmbedder};
use strata_lens::{EmbeddingCache, EntityStore, IndexPipeline, SearchEngine, SnapshotStore};

struct Counting {
    inner: HashingEmbedder,
    texts: AtomicUsize,
}

impl Counting {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: HashingEmbedder::new(256),
            texts: AtomicUsize::new(0),
        })
    }

    fn count(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for Counting {
    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn provider_name(&self) -> &str {
        "counting"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StrataError> {
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        self.inner.embed_batch(texts).await
    }
}

struct Scripted(HashMap<&'static str, Vec<ExtractedMember>>);

#[async_trait]
impl StructuralExtractor for Scripted {
    fn supports(&self, path: &str) -> bool {
        self.0.contains_key(path)
    }

    async fn extract(&self, _content: &str, path: &str) -> Result<Vec<ExtractedMember>, StrataError> {
        Ok(self.0.get(path).cloned().unwrap_or_default())
    }
}

fn class(name: &str, summary: &str, methods: &[(&str, &str)]) -> ExtractedMember {
    ExtractedMember {
        kind: MemberKind::Class,
        name: name.into(),
        summary: summary.into(),
        methods: methods
            .iter()
            .map(|(n, s)| ExtractedMethod {
                name: (*n).into(),
                summary: (*s).into(),
            })
            .collect(),
    }
}

fn extractor() -> Arc<Scripted> {
    Arc::new(Scripted(HashMap::from([
        (
            "a.py",
            vec![class("Foo", "Holds user records.", &[("Bar", "Validates email format.")])],
        ),
        (
            "b.py",
            vec![class(
                "Renderer",
                "Draws charts on a canvas.",
                &[("plot", "Plots a line series."), ("clear", "Erases the canvas.")],
            )],
        ),
    ])))
}

fn source(path: &str, content: &str) -> SourceFile {
    SourceFile {
        path: path.into(),
        content: content.into(),
    }
}

fn pipeline(store: Arc<SnapshotStore>, provider: Arc<Counting>) -> IndexPipeline {
    IndexPipeline::new(
        store,
        Arc::new(EmbeddingCache::in_memory(provider)),
        extractor(),
        IndexConfig::default(),
    )
}

#[tokio::test]
async fn unchanged_tree_reindexes_without_embedding() {
    let dir = tempfile::tempdir().unwrap();
    let sources = || vec![source("a.py", "class Foo: ..."), source("b.py", "class Renderer: ...")];

    let provider = Counting::new();
    let first = {
        let store = Arc::new(SnapshotStore::open(dir.path()).unwrap());
        pipeline(store, provider.clone()).index_files(sources()).await
    };
    assert_eq!(first.stats.embeddings_generated, 7);
    let hashes_before = SnapshotStore::open(dir.path()).unwrap().file_hashes();

    // Fresh store and cache: only the snapshots carry state across runs.
    let provider = Counting::new();
    let store = Arc::new(SnapshotStore::open(dir.path()).unwrap());
    let second = pipeline(store.clone(), provider.clone()).index_files(sources()).await;

    assert_eq!(provider.count(), 0);
    assert_eq!(second.stats.embeddings_generated, 0);
    assert_eq!(second.stats.files_skipped, 2);
    assert_eq!(second.stats.members_skipped, 2);
    assert_eq!(second.stats.methods_skipped, 3);
    assert_eq!(store.file_hashes(), hashes_before);
    let stats = store.stats();
    assert_eq!((stats.files, stats.members, stats.methods), (2, 2, 3));
}

#[tokio::test]
async fn new_file_is_indexed_and_found() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store = Arc::new(SnapshotStore::open(dir.path()).unwrap());
        pipeline(store, Counting::new())
            .index_files(vec![source("b.py", "class Renderer: ...")])
            .await;
    }

    let store = Arc::new(SnapshotStore::open(dir.path()).unwrap());
    let provider = Counting::new();
    let report = pipeline(store.clone(), provider.clone())
        .index_files(vec![
            source("a.py", "class Foo:\n    def Bar(self): ..."),
            source("b.py", "class Renderer: ..."),
        ])
        .await;

    assert_eq!(report.stats.files_processed, 1);
    assert_eq!(report.stats.members_processed, 1);
    assert_eq!(report.stats.methods_processed, 1);
    assert_eq!(provider.count(), 3);
    let stats = store.stats();
    assert_eq!((stats.files, stats.members, stats.methods), (2, 2, 3));

    let engine = SearchEngine::new(
        store,
        Arc::new(EmbeddingCache::in_memory(Arc::new(HashingEmbedder::new(256)))),
    );
    let config = SearchConfig {
        similarity_threshold: 0.2,
        ..SearchConfig::default()
    };
    let response = engine.search_text("validate email", &config).await;

    let top = response.all_hits()[0];
    assert_eq!(top.name, "Bar");
    assert_eq!(top.parent_name.as_deref(), Some("Foo"));
    assert_eq!(top.path, "a.py");
    assert!(response.method_hits.iter().all(|h| h.name != "plot" && h.name != "clear"));
}
