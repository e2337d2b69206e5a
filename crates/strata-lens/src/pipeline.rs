//! Three-tier indexing: files, then members, then methods.
//!
//! Every entity is content-addressed. With resume enabled an entity whose
//! hash is already stored is reused as-is, so re-running on an unchanged tree
//! makes no embedding calls and no writes.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use strata_core::{FileEntity, IndexConfig, MemberEntity, MethodEntity, StrataError};
use strata_extract::{walk_project, ExtractedMember, ExtractedMethod, SourceFile, StructuralExtractor};
use tracing::{debug, info, warn};

use crate::cache::EmbeddingCache;
use crate::store::EntityStore;
use crate::text::{file_text, member_text, method_text};

/// Counters for one indexing run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    /// Files embedded this run.
    pub files_processed: usize,
    /// Files reused from the store.
    pub files_skipped: usize,
    /// Members embedded this run.
    pub members_processed: usize,
    /// Members reused from the store.
    pub members_skipped: usize,
    /// Methods embedded this run.
    pub methods_processed: usize,
    /// Methods reused from the store.
    pub methods_skipped: usize,
    /// Successful embedding requests.
    pub embeddings_generated: usize,
    /// Extractions or embeddings that failed and were skipped.
    pub failures: usize,
    /// Wall-clock duration of the run.
    pub elapsed_ms: u64,
}

/// Result of an indexing run: counters plus the file tree that was indexed,
/// members and methods nested.
#[derive(Debug, Clone, Default)]
pub struct IndexReport {
    pub stats: IndexStats,
    pub files: Vec<FileEntity>,
}

#[derive(Default)]
struct Counters {
    files_processed: AtomicUsize,
    files_skipped: AtomicUsize,
    members_processed: AtomicUsize,
    members_skipped: AtomicUsize,
    methods_processed: AtomicUsize,
    methods_skipped: AtomicUsize,
    embeddings_generated: AtomicUsize,
    failures: AtomicUsize,
}

impl Counters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, elapsed_ms: u64) -> IndexStats {
        IndexStats {
            files_processed: self.files_processed.load(Ordering::Relaxed),
            files_skipped: self.files_skipped.load(Ordering::Relaxed),
            members_processed: self.members_processed.load(Ordering::Relaxed),
            members_skipped: self.members_skipped.load(Ordering::Relaxed),
            methods_processed: self.methods_processed.load(Ordering::Relaxed),
            methods_skipped: self.methods_skipped.load(Ordering::Relaxed),
            embeddings_generated: self.embeddings_generated.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            elapsed_ms,
        }
    }
}

/// Drives discovery, extraction, embedding and storage.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use strata_core::IndexConfig;
/// use strata_extract::syntax::SyntaxExtractor;
/// use strata_extract::SourceFile;
/// use strata_lens::cache::EmbeddingCache;
/// use strata_lens::embedding::HashingEmbedder;
/// use strata_lens::pipeline::IndexPipeline;
/// use strata_lens::store::{EntityStore, SnapshotStore};
///
/// # #[tokio::main]
/// # async fn main() {
/// let store = Arc::new(SnapshotStore::in_memory());
/// let pipeline = IndexPipeline::new(
///     store.clone(),
///     Arc::new(EmbeddingCache::in_memory(Arc::new(HashingEmbedder::new(64)))),
///     Arc::new(SyntaxExtractor::new()),
///     IndexConfig::default(),
/// );
///
/// let source = "class Greeter:\n    def hello(self):\n        \"\"\"Say hello.\"\"\"\n";
/// let report = pipeline
///     .index_files(vec![SourceFile { path: "greet.py".into(), content: source.into() }])
///     .await;
///
/// assert_eq!(report.stats.files_processed, 1);
/// assert_eq!(report.stats.methods_processed, 1);
/// assert_eq!(store.stats().members, 1);
/// # }
/// ```
pub struct IndexPipeline {
    store: Arc<dyn EntityStore>,
    embedder: Arc<EmbeddingCache>,
    extractor: Arc<dyn StructuralExtractor>,
    config: IndexConfig,
}

impl IndexPipeline {
    pub fn new(
        store: Arc<dyn EntityStore>,
        embedder: Arc<EmbeddingCache>,
        extractor: Arc<dyn StructuralExtractor>,
        config: IndexConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            extractor,
            config,
        }
    }

    /// Override the configured resume flag.
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.config.resume = resume;
        self
    }

    /// Discover the sources under `root` and index them.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Io`] if `root` is not a readable directory.
    /// Per-entity failures are counted, not returned.
    pub async fn index_project(&self, root: &Path) -> Result<IndexReport, StrataError> {
        let files = walk_project(root, &self.config)?;
        info!(root = %root.display(), files = files.len(), "discovered source files");
        Ok(self.index_files(files).await)
    }

    /// Index an explicit list of sources.
    pub async fn index_files(&self, sources: Vec<SourceFile>) -> IndexReport {
        let start = Instant::now();
        let counters = Counters::default();
        let concurrency = self.config.concurrency.max(1);

        if self.config.resume {
            let known = self.store.file_hashes();
            info!(known_files = known.len(), "resuming from existing index");
        }

        let files: Vec<(FileEntity, Vec<ExtractedMember>)> = stream::iter(sources)
            .map(|source| self.index_file(source, &counters))
            .buffered(concurrency)
            .filter_map(|r| async move { r })
            .collect()
            .await;
        info!(files = files.len(), "file pass complete");

        let member_jobs: Vec<(usize, ExtractedMember)> = files
            .iter()
            .enumerate()
            .flat_map(|(i, (_, members))| members.iter().cloned().map(move |m| (i, m)))
            .collect();
        let members: Vec<(usize, MemberEntity, Vec<ExtractedMethod>)> = stream::iter(member_jobs)
            .map(|(file_idx, extracted)| {
                let file_id = files[file_idx].0.id.clone();
                let counters = &counters;
                async move {
                    let methods = extracted.methods.clone();
                    self.index_member(&file_id, extracted, counters)
                        .await
                        .map(|member| (file_idx, member, methods))
                }
            })
            .buffered(concurrency)
            .filter_map(|r| async move { r })
            .collect()
            .await;
        info!(members = members.len(), "member pass complete");

        let method_jobs: Vec<(usize, ExtractedMethod)> = members
            .iter()
            .enumerate()
            .flat_map(|(i, (_, _, methods))| methods.iter().cloned().map(move |m| (i, m)))
            .collect();
        let methods: Vec<(usize, MethodEntity)> = stream::iter(method_jobs)
            .map(|(member_idx, extracted)| {
                let member = &members[member_idx].1;
                let counters = &counters;
                async move {
                    self.index_method(member, extracted, counters)
                        .await
                        .map(|method| (member_idx, method))
                }
            })
            .buffered(concurrency)
            .filter_map(|r| async move { r })
            .collect()
            .await;
        info!(methods = methods.len(), "method pass complete");

        let mut members: Vec<(usize, MemberEntity)> =
            members.into_iter().map(|(i, m, _)| (i, m)).collect();
        for (member_idx, method) in methods {
            members[member_idx].1.methods.push(method);
        }
        let mut files: Vec<FileEntity> = files.into_iter().map(|(f, _)| f).collect();
        for (file_idx, member) in members {
            files[file_idx].members.push(member);
        }

        let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        let stats = counters.snapshot(elapsed_ms);
        info!(
            files = stats.files_processed,
            members = stats.members_processed,
            methods = stats.methods_processed,
            skipped = stats.files_skipped + stats.members_skipped + stats.methods_skipped,
            embeddings = stats.embeddings_generated,
            failures = stats.failures,
            elapsed_ms,
            "indexing complete"
        );
        IndexReport { stats, files }
    }

    async fn index_file(
        &self,
        source: SourceFile,
        counters: &Counters,
    ) -> Option<(FileEntity, Vec<ExtractedMember>)> {
        let mut file = FileEntity::new(source.path, source.content);

        let reused = if self.config.resume {
            self.store.file_exists(&file.path, &file.content_hash)
        } else {
            None
        };
        let extracted = self.extract(&file, counters).await;

        if let Some(stored) = reused {
            debug!(path = %stored.path, "file unchanged, reusing");
            Counters::bump(&counters.files_skipped);
            return Some((stored, extracted));
        }

        let names: Vec<&str> = extracted.iter().map(|m| m.name.as_str()).collect();
        let text = file_text(file.file_name(), &names);
        // Members of an unembedded file have no stored parent, so the subtree goes too.
        file.embedding = Some(self.embed(&text, &file.path, counters).await?);

        if !self.store.store_file(&file) {
            if let Some(stored) = self.store.file_exists(&file.path, &file.content_hash) {
                file = stored;
            }
        }
        debug!(path = %file.path, members = extracted.len(), "indexed file");
        Counters::bump(&counters.files_processed);
        Some((file, extracted))
    }

    async fn index_member(
        &self,
        file_id: &str,
        extracted: ExtractedMember,
        counters: &Counters,
    ) -> Option<MemberEntity> {
        let mut member = MemberEntity::new(file_id, extracted.kind, extracted.name, extracted.summary);

        if self.config.resume {
            if let Some(stored) = self.store.member_exists(&member.content_hash) {
                debug!(member = %stored.name, "member unchanged, reusing");
                Counters::bump(&counters.members_skipped);
                return Some(stored);
            }
        }

        let text = member_text(&member.name, member.kind, &member.summary);
        member.embedding = Some(self.embed(&text, &member.name, counters).await?);

        if !self.store.store_member(&member) {
            if let Some(stored) = self.store.member_exists(&member.content_hash) {
                member = stored;
            }
        }
        debug!(member = %member.name, "indexed member");
        Counters::bump(&counters.members_processed);
        Some(member)
    }

    async fn index_method(
        &self,
        parent: &MemberEntity,
        extracted: ExtractedMethod,
        counters: &Counters,
    ) -> Option<MethodEntity> {
        let mut method = MethodEntity::new(&parent.id, extracted.name, extracted.summary);

        if self.config.resume {
            if let Some(stored) = self.store.method_exists(&method.content_hash) {
                debug!(method = %stored.name, "method unchanged, reusing");
                Counters::bump(&counters.methods_skipped);
                return Some(stored);
            }
        }

        let text = method_text(&method.name, &parent.name, &method.summary);
        method.embedding = Some(self.embed(&text, &method.name, counters).await?);

        if !self.store.store_method(&method) {
            if let Some(stored) = self.store.method_exists(&method.content_hash) {
                method = stored;
            }
        }
        debug!(method = %method.name, parent = %parent.name, "indexed method");
        Counters::bump(&counters.methods_processed);
        Some(method)
    }

    async fn extract(&self, file: &FileEntity, counters: &Counters) -> Vec<ExtractedMember> {
        if !self.extractor.supports(&file.path) {
            return Vec::new();
        }
        match self.extractor.extract(&file.content, &file.path).await {
            Ok(members) => members,
            Err(e) => {
                warn!(path = %file.path, error = %e, "extraction failed, indexing file without members");
                Counters::bump(&counters.failures);
                Vec::new()
            }
        }
    }

    async fn embed(&self, text: &str, label: &str, counters: &Counters) -> Option<Vec<f32>> {
        match self.embedder.embed(text).await {
            Ok(vector) => {
                Counters::bump(&counters.embeddings_generated);
                Some(vector)
            }
            Err(e) => {
                warn!(entity = label, error = %e, "embedding failed, skipping");
                Counters::bump(&counters.failures);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use async_trait::async_trait;
    use strata_core::MemberKind;

    use crate::embedding::{EmbeddingProvider, HashingEmbedder};
    use crate::store::SnapshotStore;

    struct Scripted(HashMap<String, Vec<ExtractedMember>>);

    #[async_trait]
    impl StructuralExtractor for Scripted {
        fn supports(&self, path: &str) -> bool {
            path.ends_with(".py")
        }

        async fn extract(&self, _content: &str, path: &str) -> Result<Vec<ExtractedMember>, StrataError> {
            self.0
                .get(path)
                .cloned()
                .ok_or_else(|| StrataError::Extraction(format!("no script for {path}")))
        }
    }

    /// Records every text it is asked for and fails on any mentioning "poison".
    struct Flaky {
        inner: HashingEmbedder,
        seen: std::sync::Mutex<Vec<String>>,
    }

    impl Flaky {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                inner: HashingEmbedder::new(64),
                seen: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EmbeddingProvider for Flaky {
        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }

        fn provider_name(&self) -> &str {
            "flaky"
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StrataError> {
            self.seen.lock().unwrap().extend(texts.iter().cloned());
            if texts.iter().any(|t| t.contains("poison")) {
                return Err(StrataError::Provider("poisoned input".into()));
            }
            self.inner.embed_batch(texts).await
        }
    }

    fn member(name: &str, summary: &str, methods: &[(&str, &str)]) -> ExtractedMember {
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

    fn source(path: &str, content: &str) -> SourceFile {
        SourceFile {
            path: path.into(),
            content: content.into(),
        }
    }

    fn pipeline(
        store: Arc<SnapshotStore>,
        script: HashMap<String, Vec<ExtractedMember>>,
    ) -> IndexPipeline {
        pipeline_with(store, script, Flaky::new())
    }

    fn pipeline_with(
        store: Arc<SnapshotStore>,
        script: HashMap<String, Vec<ExtractedMember>>,
        provider: Arc<Flaky>,
    ) -> IndexPipeline {
        IndexPipeline::new(
            store,
            Arc::new(EmbeddingCache::in_memory(provider)),
            Arc::new(Scripted(script)),
            IndexConfig::default(),
        )
    }

    #[tokio::test]
    async fn builds_nested_tree_with_parent_ids() {
        let store = Arc::new(SnapshotStore::in_memory());
        let script = HashMap::from([(
            "user.py".to_string(),
            vec![member("User", "A user.", &[("save", "Persists."), ("load", "Loads.")])],
        )]);
        let report = pipeline(store.clone(), script)
            .index_files(vec![source("user.py", "class User: ...")])
            .await;

        assert_eq!(report.stats.files_processed, 1);
        assert_eq!(report.stats.members_processed, 1);
        assert_eq!(report.stats.methods_processed, 2);
        assert_eq!(report.stats.embeddings_generated, 4);
        assert_eq!(report.stats.failures, 0);

        let file = &report.files[0];
        let user = &file.members[0];
        assert_eq!(user.file_id, file.id);
        let names: Vec<&str> = user.methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["save", "load"]);
        assert!(user.methods.iter().all(|m| m.member_id == user.id));
        assert_eq!(store.methods_of_member(&user.id).len(), 2);
    }

    #[tokio::test]
    async fn extraction_failure_keeps_file() {
        let store = Arc::new(SnapshotStore::in_memory());
        let report = pipeline(store.clone(), HashMap::new())
            .index_files(vec![source("broken.py", "def ("), source("notes.md", "# notes")])
            .await;

        assert_eq!(report.stats.files_processed, 2);
        assert_eq!(report.stats.members_processed, 0);
        assert_eq!(report.stats.failures, 1);
        assert_eq!(store.stats().files, 2);
    }

    #[tokio::test]
    async fn embedding_failure_skips_only_that_entity() {
        let store = Arc::new(SnapshotStore::in_memory());
        let script = HashMap::from([(
            "a.py".to_string(),
            vec![
                member("Good", "Fine.", &[("run", "Runs.")]),
                member("Bad", "Has poison inside.", &[("never", "Unreached.")]),
            ],
        )]);
        let report = pipeline(store.clone(), script)
            .index_files(vec![source("a.py", "...")])
            .await;

        assert_eq!(report.stats.failures, 1);
        assert_eq!(report.stats.members_processed, 1);
        assert_eq!(report.stats.methods_processed, 1);
        assert_eq!(report.files[0].members.len(), 1);
        let stats = store.stats();
        assert_eq!((stats.files, stats.members, stats.methods), (1, 1, 1));
    }

    #[tokio::test]
    async fn file_text_names_first_three_members() {
        let store = Arc::new(SnapshotStore::in_memory());
        let provider = Flaky::new();
        let script = HashMap::from([(
            "x.py".to_string(),
            ["A", "B", "C", "D", "E"]
                .iter()
                .map(|name| member(name, "", &[]))
                .collect(),
        )]);
        let report = pipeline_with(store, script, provider.clone())
            .index_files(vec![source("x.py", "...")])
            .await;

        assert_eq!(report.stats.members_processed, 5);
        assert_eq!(provider.seen()[0], "File x.py containing A, B, C");
    }

    #[tokio::test]
    async fn failed_file_embedding_drops_its_subtree() {
        let store = Arc::new(SnapshotStore::in_memory());
        let script = HashMap::from([
            (
                "poison.py".to_string(),
                vec![member("Lost", "Never stored.", &[("gone", "Never stored.")])],
            ),
            ("ok.py".to_string(), vec![member("Kept", "Stored.", &[("here", "Stored.")])]),
        ]);
        let report = pipeline(store.clone(), script)
            .index_files(vec![source("poison.py", "..."), source("ok.py", "...")])
            .await;

        assert_eq!(report.stats.failures, 1);
        assert_eq!(report.stats.files_processed, 1);
        assert_eq!(report.stats.members_processed, 1);
        assert_eq!(report.stats.methods_processed, 1);
        assert_eq!(report.files.len(), 1);
        assert_eq!(report.files[0].path, "ok.py");
        let stats = store.stats();
        assert_eq!((stats.files, stats.members, stats.methods), (1, 1, 1));
        assert!(store
            .search_members(&HashingEmbedder::new(64).vector("Lost class - Never stored."), 10, -1.0)
            .iter()
            .all(|h| h.name != "Lost"));
    }

    #[tokio::test]
    async fn resume_reuses_everything() {
        let store = Arc::new(SnapshotStore::in_memory());
        let script = HashMap::from([(
            "a.py".to_string(),
            vec![member("A", "Does a.", &[("go", "Goes.")])],
        )]);
        let first = pipeline(store.clone(), script.clone())
            .index_files(vec![source("a.py", "class A: ...")])
            .await;
        let second = pipeline(store.clone(), script)
            .index_files(vec![source("a.py", "class A: ...")])
            .await;

        assert_eq!(second.stats.embeddings_generated, 0);
        assert_eq!(second.stats.files_skipped, 1);
        assert_eq!(second.stats.members_skipped, 1);
        assert_eq!(second.stats.methods_skipped, 1);
        assert_eq!(second.files[0].id, first.files[0].id);
        assert_eq!(second.files[0].members[0].methods[0].id, first.files[0].members[0].methods[0].id);
    }

    #[tokio::test]
    async fn no_resume_reembeds_without_duplicates() {
        let store = Arc::new(SnapshotStore::in_memory());
        let script = HashMap::from([(
            "a.py".to_string(),
            vec![member("A", "Does a.", &[("go", "Goes.")])],
        )]);
        let first = pipeline(store.clone(), script.clone())
            .index_files(vec![source("a.py", "class A: ...")])
            .await;
        let second = pipeline(store.clone(), script)
            .with_resume(false)
            .index_files(vec![source("a.py", "class A: ...")])
            .await;

        assert_eq!(second.stats.embeddings_generated, 3);
        assert_eq!(second.stats.files_skipped, 0);
        assert_eq!(second.files[0].id, first.files[0].id);
        let stats = store.stats();
        assert_eq!((stats.files, stats.members, stats.methods), (1, 1, 1));
    }

    #[tokio::test]
    async fn sequential_and_concurrent_runs_agree() {
        let script = HashMap::from([
            ("a.py".to_string(), vec![member("A", "Alpha.", &[("x", "X.")])]),
            ("b.py".to_string(), vec![member("B", "Beta.", &[("y", "Y.")])]),
        ]);
        let sources = || vec![source("a.py", "a"), source("b.py", "b"), source("c.py", "c")];

        let mut reports = Vec::new();
        for concurrency in [1, 8] {
            let store = Arc::new(SnapshotStore::in_memory());
            let mut p = pipeline(store, script.clone());
            p.config.concurrency = concurrency;
            reports.push(p.index_files(sources()).await);
        }

        let paths = |r: &IndexReport| r.files.iter().map(|f| f.path.clone()).collect::<Vec<_>>();
        assert_eq!(paths(&reports[0]), paths(&reports[1]));
        assert_eq!(
            IndexStats { elapsed_ms: 0, ..reports[0].stats.clone() },
            IndexStats { elapsed_ms: 0, ..reports[1].stats.clone() }
        );
    }
}
