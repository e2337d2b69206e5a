//! Entity storage with JSON snapshot persistence.
//!
//! Files, members and methods live in three independent collections. Each
//! collection is held in memory behind its own lock and mirrored to one JSON
//! snapshot (`files.json`, `members.json`, `methods.json`). Cosine similarity
//! is computed in Rust over every stored vector.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use strata_core::{EntityKind, FileEntity, MemberEntity, MethodEntity, SearchHit, StrataError};
use tracing::{debug, warn};

/// Substituted when a hit's parent cannot be resolved.
pub const UNKNOWN: &str = "Unknown";

/// File hit summaries are cut to this many characters.
const PREVIEW_CHARS: usize = 200;

/// Record counts per collection.
///
/// # Examples
///
/// ```
/// use strata_lens::store::{EntityStore, SnapshotStore};
///
/// let stats = SnapshotStore::in_memory().stats();
/// assert_eq!(stats.files + stats.members + stats.methods, 0);
/// assert!(stats.location.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    /// Stored file entities.
    pub files: usize,
    /// Stored member entities.
    pub members: usize,
    /// Stored method entities.
    pub methods: usize,
    /// Snapshot directory, if persistent.
    pub location: Option<PathBuf>,
}

/// Persistent storage for the three entity collections.
///
/// `store_*` calls are idempotent on content hash: storing an entity whose hash
/// is already present, or which has no embedding, does nothing and returns
/// `false`. Search results are ordered by descending cosine similarity, ties
/// kept in insertion order.
pub trait EntityStore: Send + Sync {
    /// Store a file entity. Its in-memory `members` are not persisted.
    fn store_file(&self, file: &FileEntity) -> bool;
    /// Store a member entity. Its in-memory `methods` are not persisted.
    fn store_member(&self, member: &MemberEntity) -> bool;
    /// Store a method entity.
    fn store_method(&self, method: &MethodEntity) -> bool;

    /// Stored file at `path` with `content_hash`, if any.
    fn file_exists(&self, path: &str, content_hash: &str) -> Option<FileEntity>;
    /// Stored member with `content_hash`, if any.
    fn member_exists(&self, content_hash: &str) -> Option<MemberEntity>;
    /// Stored method with `content_hash`, if any.
    fn method_exists(&self, content_hash: &str) -> Option<MethodEntity>;

    /// Files scoring at least `threshold` against `query`, best first.
    fn search_files(&self, query: &[f32], limit: usize, threshold: f64) -> Vec<SearchHit>;
    /// Members scoring at least `threshold` against `query`, best first.
    fn search_members(&self, query: &[f32], limit: usize, threshold: f64) -> Vec<SearchHit>;
    /// Methods scoring at least `threshold` against `query`, best first.
    fn search_methods(&self, query: &[f32], limit: usize, threshold: f64) -> Vec<SearchHit>;

    /// File by id.
    fn file_by_id(&self, id: &str) -> Option<FileEntity>;
    /// Member by id.
    fn member_by_id(&self, id: &str) -> Option<MemberEntity>;
    /// Members whose `file_id` is `file_id`, in insertion order.
    fn members_of_file(&self, file_id: &str) -> Vec<MemberEntity>;
    /// Methods whose `member_id` is `member_id`, in insertion order.
    fn methods_of_member(&self, member_id: &str) -> Vec<MethodEntity>;

    /// Content hashes of every stored file.
    fn file_hashes(&self) -> HashSet<String>;
    /// Record counts and location.
    fn stats(&self) -> StoreStats;
}

trait Record: Clone + Serialize + DeserializeOwned {
    fn id(&self) -> &str;
    fn content_hash(&self) -> &str;
    fn embedding(&self) -> Option<&[f32]>;
    /// Copy without in-memory children.
    fn detached(&self) -> Self;
}

impl Record for FileEntity {
    fn id(&self) -> &str {
        &self.id
    }
    fn content_hash(&self) -> &str {
        &self.content_hash
    }
    fn embedding(&self) -> Option<&[f32]> {
        self.embedding.as_deref()
    }
    fn detached(&self) -> Self {
        Self {
            members: Vec::new(),
            ..self.clone()
        }
    }
}

impl Record for MemberEntity {
    fn id(&self) -> &str {
        &self.id
    }
    fn content_hash(&self) -> &str {
        &self.content_hash
    }
    fn embedding(&self) -> Option<&[f32]> {
        self.embedding.as_deref()
    }
    fn detached(&self) -> Self {
        Self {
            methods: Vec::new(),
            ..self.clone()
        }
    }
}

impl Record for MethodEntity {
    fn id(&self) -> &str {
        &self.id
    }
    fn content_hash(&self) -> &str {
        &self.content_hash
    }
    fn embedding(&self) -> Option<&[f32]> {
        self.embedding.as_deref()
    }
    fn detached(&self) -> Self {
        self.clone()
    }
}

struct Collection<T> {
    name: &'static str,
    records: Vec<T>,
    by_hash: HashMap<String, usize>,
    by_id: HashMap<String, usize>,
}

impl<T: Record> Collection<T> {
    fn new(name: &'static str, records: Vec<T>) -> Self {
        let mut collection = Self {
            name,
            records: Vec::with_capacity(records.len()),
            by_hash: HashMap::new(),
            by_id: HashMap::new(),
        };
        for record in records {
            if !collection.by_hash.contains_key(record.content_hash()) {
                collection.push(record);
            }
        }
        collection
    }

    fn push(&mut self, record: T) {
        let idx = self.records.len();
        self.by_hash.insert(record.content_hash().to_string(), idx);
        self.by_id.insert(record.id().to_string(), idx);
        self.records.push(record);
    }

    fn by_hash(&self, hash: &str) -> Option<&T> {
        self.by_hash.get(hash).map(|&i| &self.records[i])
    }

    fn by_id(&self, id: &str) -> Option<&T> {
        self.by_id.get(id).map(|&i| &self.records[i])
    }

    /// Records scoring at least `threshold`, best first, stable on ties.
    fn rank(&self, query: &[f32], limit: usize, threshold: f64) -> Vec<(f64, &T)> {
        let mut scored: Vec<(f64, &T)> = self
            .records
            .iter()
            .filter_map(|r| r.embedding().map(|e| (cosine_similarity(query, e), r)))
            .filter(|(score, _)| *score >= threshold)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(limit);
        scored
    }
}

#[derive(Serialize)]
struct SnapshotRef<'a, T> {
    version: u32,
    saved_at: DateTime<Utc>,
    records: &'a [T],
}

#[derive(Deserialize)]
struct Snapshot<T> {
    records: Vec<T>,
}

const SNAPSHOT_VERSION: u32 = 1;

/// [`EntityStore`] that mirrors each collection to a JSON snapshot.
///
/// Every successful `store_*` call rewrites the whole snapshot of that
/// collection through a temporary sibling file that is renamed over the
/// target. Write failures are logged and the in-memory state stays
/// authoritative for the rest of the process.
///
/// # Examples
///
/// ```
/// use strata_core::FileEntity;
/// use strata_lens::store::{EntityStore, SnapshotStore};
///
/// let store = SnapshotStore::in_memory();
/// let mut file = FileEntity::new("src/app.py", "class App: pass");
/// file.embedding = Some(vec![1.0, 0.0]);
///
/// assert!(store.store_file(&file));
/// assert!(!store.store_file(&file));
/// assert!(store.file_exists("src/app.py", &file.content_hash).is_some());
/// ```
pub struct SnapshotStore {
    dir: Option<PathBuf>,
    files: RwLock<Collection<FileEntity>>,
    members: RwLock<Collection<MemberEntity>>,
    methods: RwLock<Collection<MethodEntity>>,
}

impl SnapshotStore {
    /// Open (or create) a store in `dir`, loading any existing snapshots.
    ///
    /// A missing or unreadable snapshot loads as an empty collection.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Persistence`] if `dir` cannot be created.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::path::Path;
    /// use strata_lens::store::SnapshotStore;
    ///
    /// let store = SnapshotStore::open(Path::new(".strata")).unwrap();
    /// ```
    pub fn open(dir: &Path) -> Result<Self, StrataError> {
        std::fs::create_dir_all(dir).map_err(|e| StrataError::Persistence {
            path: dir.to_path_buf(),
            message: format!("failed to create store directory: {e}"),
        })?;

        let store = Self {
            dir: Some(dir.to_path_buf()),
            files: RwLock::new(Collection::new("files", load_snapshot(dir, "files"))),
            members: RwLock::new(Collection::new("members", load_snapshot(dir, "members"))),
            methods: RwLock::new(Collection::new("methods", load_snapshot(dir, "methods"))),
        };
        let stats = store.stats();
        debug!(
            dir = %dir.display(),
            files = stats.files,
            members = stats.members,
            methods = stats.methods,
            "opened snapshot store"
        );
        Ok(store)
    }

    /// A store that keeps everything in memory and writes nothing.
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            files: RwLock::new(Collection::new("files", Vec::new())),
            members: RwLock::new(Collection::new("members", Vec::new())),
            methods: RwLock::new(Collection::new("methods", Vec::new())),
        }
    }

    /// Delete the snapshot directory `dir`. Returns `false` if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Persistence`] if the directory cannot be removed.
    pub fn remove(dir: &Path) -> Result<bool, StrataError> {
        if !dir.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(dir).map_err(|e| StrataError::Persistence {
            path: dir.to_path_buf(),
            message: format!("failed to remove store: {e}"),
        })?;
        Ok(true)
    }

    fn insert<T: Record>(&self, lock: &RwLock<Collection<T>>, record: &T) -> bool {
        if record.embedding().is_none() {
            return false;
        }
        let mut collection = write(lock);
        if collection.by_hash(record.content_hash()).is_some() {
            return false;
        }
        collection.push(record.detached());
        self.persist(&*collection);
        true
    }

    fn persist<T: Record>(&self, collection: &Collection<T>) {
        let Some(dir) = &self.dir else {
            return;
        };
        let path = snapshot_path(dir, collection.name);
        if let Err(e) = write_snapshot(&path, &collection.records) {
            warn!(error = %e, "snapshot write failed, keeping in-memory state");
        }
    }
}

impl EntityStore for SnapshotStore {
    fn store_file(&self, file: &FileEntity) -> bool {
        self.insert(&self.files, file)
    }

    fn store_member(&self, member: &MemberEntity) -> bool {
        self.insert(&self.members, member)
    }

    fn store_method(&self, method: &MethodEntity) -> bool {
        self.insert(&self.methods, method)
    }

    fn file_exists(&self, path: &str, content_hash: &str) -> Option<FileEntity> {
        read(&self.files)
            .by_hash(content_hash)
            .filter(|f| f.path == path)
            .cloned()
    }

    fn member_exists(&self, content_hash: &str) -> Option<MemberEntity> {
        read(&self.members).by_hash(content_hash).cloned()
    }

    fn method_exists(&self, content_hash: &str) -> Option<MethodEntity> {
        read(&self.methods).by_hash(content_hash).cloned()
    }

    fn search_files(&self, query: &[f32], limit: usize, threshold: f64) -> Vec<SearchHit> {
        let files = read(&self.files);
        files
            .rank(query, limit, threshold)
            .into_iter()
            .map(|(score, file)| SearchHit {
                id: file.id.clone(),
                kind: EntityKind::File,
                name: file.path.clone(),
                summary: preview(&file.content),
                path: file.path.clone(),
                parent_name: None,
                score,
                content: file.content.clone(),
            })
            .collect()
    }

    fn search_members(&self, query: &[f32], limit: usize, threshold: f64) -> Vec<SearchHit> {
        let members = read(&self.members);
        let files = read(&self.files);
        members
            .rank(query, limit, threshold)
            .into_iter()
            .map(|(score, member)| SearchHit {
                id: member.id.clone(),
                kind: EntityKind::Member,
                name: member.name.clone(),
                summary: member.summary.clone(),
                path: files
                    .by_id(&member.file_id)
                    .map_or_else(|| UNKNOWN.to_string(), |f| f.path.clone()),
                parent_name: None,
                score,
                content: member.summary.clone(),
            })
            .collect()
    }

    fn search_methods(&self, query: &[f32], limit: usize, threshold: f64) -> Vec<SearchHit> {
        let methods = read(&self.methods);
        let members = read(&self.members);
        let files = read(&self.files);
        methods
            .rank(query, limit, threshold)
            .into_iter()
            .map(|(score, method)| {
                let parent = members.by_id(&method.member_id);
                let path = parent
                    .and_then(|m| files.by_id(&m.file_id))
                    .map_or_else(|| UNKNOWN.to_string(), |f| f.path.clone());
                SearchHit {
                    id: method.id.clone(),
                    kind: EntityKind::Method,
                    name: method.name.clone(),
                    summary: method.summary.clone(),
                    path,
                    parent_name: Some(
                        parent.map_or_else(|| UNKNOWN.to_string(), |m| m.name.clone()),
                    ),
                    score,
                    content: method.summary.clone(),
                }
            })
            .collect()
    }

    fn file_by_id(&self, id: &str) -> Option<FileEntity> {
        read(&self.files).by_id(id).cloned()
    }

    fn member_by_id(&self, id: &str) -> Option<MemberEntity> {
        read(&self.members).by_id(id).cloned()
    }

    fn members_of_file(&self, file_id: &str) -> Vec<MemberEntity> {
        read(&self.members)
            .records
            .iter()
            .filter(|m| m.file_id == file_id)
            .cloned()
            .collect()
    }

    fn methods_of_member(&self, member_id: &str) -> Vec<MethodEntity> {
        read(&self.methods)
            .records
            .iter()
            .filter(|m| m.member_id == member_id)
            .cloned()
            .collect()
    }

    fn file_hashes(&self) -> HashSet<String> {
        read(&self.files).by_hash.keys().cloned().collect()
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            files: read(&self.files).records.len(),
            members: read(&self.members).records.len(),
            methods: read(&self.methods).records.len(),
            location: self.dir.clone(),
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn snapshot_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.json"))
}

fn load_snapshot<T: DeserializeOwned>(dir: &Path, name: &str) -> Vec<T> {
    let path = snapshot_path(dir, name);
    if !path.exists() {
        return Vec::new();
    }
    let bytes = match std::fs::read(&path) {
        Ok(b) => b,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable snapshot, starting empty");
            return Vec::new();
        }
    };
    match serde_json::from_slice::<Snapshot<T>>(&bytes) {
        Ok(snapshot) => snapshot.records,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt snapshot, starting empty");
            Vec::new()
        }
    }
}

fn write_snapshot<T: Serialize>(path: &Path, records: &[T]) -> Result<(), StrataError> {
    let snapshot = SnapshotRef {
        version: SNAPSHOT_VERSION,
        saved_at: Utc::now(),
        records,
    };
    let bytes = serde_json::to_vec(&snapshot)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes).map_err(|e| StrataError::Persistence {
        path: tmp.clone(),
        message: e.to_string(),
    })?;
    std::fs::rename(&tmp, path).map_err(|e| StrataError::Persistence {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(())
}

/// First 200 characters of `content`, with `"..."` appended when cut.
fn preview(content: &str) -> String {
    match content.char_indices().nth(PREVIEW_CHARS) {
        Some((end, _)) => format!("{}...", &content[..end]),
        None => content.to_string(),
    }
}

/// Cosine similarity; 0 when the lengths differ or either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }

    dot / denom
}
