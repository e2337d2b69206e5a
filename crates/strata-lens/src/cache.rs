//! Content-addressed embedding cache.
//!
//! Vectors are keyed by the SHA-256 of the trimmed text, so the same text is
//! sent to the provider at most once per cache lifetime. The default backend
//! lives in memory; [`SqliteCache`] keeps vectors across runs.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rusqlite::{params, Connection};
use serde::Serialize;
use strata_core::hash::text_hash;
use strata_core::StrataError;
use tracing::{debug, warn};

use crate::embedding::EmbeddingProvider;

/// Key-value storage for cached vectors.
pub trait VectorCache: Send {
    /// Look up a vector by key.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Database`] if the backend cannot be read.
    fn get(&self, key: &str) -> Result<Option<Vec<f32>>, StrataError>;

    /// Store a vector under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Database`] if the backend cannot be written.
    fn put(&mut self, key: &str, vector: &[f32]) -> Result<(), StrataError>;

    /// Remove every entry.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Database`] if the backend cannot be written.
    fn clear(&mut self) -> Result<(), StrataError>;

    /// Number of cached vectors.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Database`] if the backend cannot be read.
    fn len(&self) -> Result<usize, StrataError>;
}

/// In-process cache backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: HashMap<String, Vec<f32>>,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

impl VectorCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Vec<f32>>, StrataError> {
        Ok(self.entries.get(key).cloned())
    }

    fn put(&mut self, key: &str, vector: &[f32]) -> Result<(), StrataError> {
        self.entries.insert(key.to_string(), vector.to_vec());
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StrataError> {
        self.entries.clear();
        Ok(())
    }

    fn len(&self) -> Result<usize, StrataError> {
        Ok(self.entries.len())
    }
}

/// Persistent cache in a SQLite database, vectors stored as little-endian
/// `f32` BLOBs.
///
/// # Examples
///
/// ```
/// use strata_lens::cache::{SqliteCache, VectorCache};
///
/// let mut cache = SqliteCache::in_memory().unwrap();
/// cache.put("k", &[1.0, 2.0]).unwrap();
/// assert_eq!(cache.get("k").unwrap(), Some(vec![1.0, 2.0]));
/// assert_eq!(cache.len().unwrap(), 1);
/// ```
pub struct SqliteCache {
    conn: Connection,
}

impl SqliteCache {
    /// Open or create a cache database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Database`] if the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self, StrataError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StrataError::Database(format!("failed to create cache directory: {e}"))
            })?;
        }
        let conn = Connection::open(path)
            .map_err(|e| StrataError::Database(format!("failed to open cache database: {e}")))?;
        let cache = Self { conn };
        cache.init_schema()?;
        Ok(cache)
    }

    /// Create a cache that lives only as long as this value.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Database`] if schema creation fails.
    pub fn in_memory() -> Result<Self, StrataError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            StrataError::Database(format!("failed to create in-memory database: {e}"))
        })?;
        let cache = Self { conn };
        cache.init_schema()?;
        Ok(cache)
    }

    fn init_schema(&self) -> Result<(), StrataError> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS embeddings (
                    key TEXT PRIMARY KEY,
                    vector BLOB NOT NULL
                );",
            )
            .map_err(|e| StrataError::Database(format!("failed to create schema: {e}")))
    }
}

impl VectorCache for SqliteCache {
    fn get(&self, key: &str) -> Result<Option<Vec<f32>>, StrataError> {
        let result = self.conn.query_row(
            "SELECT vector FROM embeddings WHERE key = ?1",
            params![key],
            |row| row.get::<_, Vec<u8>>(0),
        );
        match result {
            Ok(bytes) => Ok(Some(bytes_to_floats(&bytes))),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StrataError::Database(format!(
                "failed to read cached embedding: {e}"
            ))),
        }
    }

    fn put(&mut self, key: &str, vector: &[f32]) -> Result<(), StrataError> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO embeddings (key, vector) VALUES (?1, ?2)",
                params![key, floats_to_bytes(vector)],
            )
            .map_err(|e| StrataError::Database(format!("failed to cache embedding: {e}")))?;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), StrataError> {
        self.conn
            .execute("DELETE FROM embeddings", [])
            .map_err(|e| StrataError::Database(format!("failed to clear cache: {e}")))?;
        Ok(())
    }

    fn len(&self) -> Result<usize, StrataError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))
            .map_err(|e| StrataError::Database(format!("failed to count cache: {e}")))?;
        Ok(count as usize)
    }
}

fn floats_to_bytes(floats: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(floats.len() * 4);
    for f in floats {
        bytes.extend_from_slice(&f.to_le_bytes());
    }
    bytes
}

fn bytes_to_floats(bytes: &[u8]) -> Vec<f32> {
    let mut floats = Vec::with_capacity(bytes.len() / 4);
    for chunk in bytes.chunks_exact(4) {
        let arr: [u8; 4] = [chunk[0], chunk[1], chunk[2], chunk[3]];
        floats.push(f32::from_le_bytes(arr));
    }
    floats
}

/// Cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Vectors currently cached.
    pub entries: usize,
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that went to the provider.
    pub misses: u64,
}

/// An [`EmbeddingProvider`] fronted by a [`VectorCache`].
///
/// Blank text maps to a zero vector without touching the provider or the
/// cache. Vectors whose length differs from the provider's declared
/// dimensionality are rejected.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use strata_lens::cache::EmbeddingCache;
/// use strata_lens::embedding::HashingEmbedder;
///
/// # #[tokio::main]
/// # async fn main() {
/// let cache = EmbeddingCache::in_memory(Arc::new(HashingEmbedder::new(64)));
/// let first = cache.embed("parse config").await.unwrap();
/// let second = cache.embed("  parse config  ").await.unwrap();
/// assert_eq!(first, second);
/// assert_eq!(cache.stats().hits, 1);
/// # }
/// ```
pub struct EmbeddingCache {
    provider: Arc<dyn EmbeddingProvider>,
    backend: Mutex<Box<dyn VectorCache>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    /// Wrap `provider` with the given backend.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, backend: Box<dyn VectorCache>) -> Self {
        Self {
            provider,
            backend: Mutex::new(backend),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Wrap `provider` with a [`MemoryCache`].
    pub fn in_memory(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self::new(provider, Box::new(MemoryCache::new()))
    }

    /// Wrap `provider` with a [`SqliteCache`] at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Database`] if the database cannot be opened.
    pub fn persistent(
        provider: Arc<dyn EmbeddingProvider>,
        path: &Path,
    ) -> Result<Self, StrataError> {
        Ok(Self::new(provider, Box::new(SqliteCache::open(path)?)))
    }

    /// Dimensionality of the wrapped provider.
    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    /// Name of the wrapped provider.
    pub fn provider_name(&self) -> &str {
        self.provider.provider_name()
    }

    /// Embed one text, consulting the cache first.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Provider`] if the provider fails or returns a
    /// vector of the wrong length.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, StrataError> {
        let normalized = text.trim();
        if normalized.is_empty() {
            return Ok(vec![0.0; self.dimensions()]);
        }

        let key = text_hash(normalized);
        if let Some(vector) = self.lookup(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(vector);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let vector = self.provider.embed(normalized).await?;
        self.check_length(&vector)?;
        self.remember(&key, &vector);
        Ok(vector)
    }

    /// Embed several texts. The output is index-aligned with `texts`.
    ///
    /// Only texts missing from the cache reach the provider, in one batch call,
    /// and a text repeated within `texts` is requested once.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Provider`] if the provider fails, returns the
    /// wrong number of vectors, or a vector of the wrong length.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StrataError> {
        let dimensions = self.dimensions();
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut pending: Vec<(String, String)> = Vec::new();
        let mut waiting: HashMap<String, Vec<usize>> = HashMap::new();

        for (i, text) in texts.iter().enumerate() {
            let normalized = text.trim();
            if normalized.is_empty() {
                results[i] = Some(vec![0.0; dimensions]);
                continue;
            }
            let key = text_hash(normalized);
            if let Some(vector) = self.lookup(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                results[i] = Some(vector);
                continue;
            }
            let slots = waiting.entry(key.clone()).or_default();
            if slots.is_empty() {
                pending.push((key, normalized.to_string()));
            }
            slots.push(i);
        }

        if !pending.is_empty() {
            self.misses
                .fetch_add(pending.len() as u64, Ordering::Relaxed);
            let request: Vec<String> = pending.iter().map(|(_, t)| t.clone()).collect();
            let vectors = self.provider.embed_batch(&request).await?;
            if vectors.len() != request.len() {
                return Err(StrataError::Provider(format!(
                    "expected {} embeddings, got {}",
                    request.len(),
                    vectors.len()
                )));
            }
            debug!(requested = request.len(), "embedded cache misses");

            for ((key, _), vector) in pending.iter().zip(vectors) {
                self.check_length(&vector)?;
                self.remember(key, &vector);
                for &slot in waiting.get(key).map(Vec::as_slice).unwrap_or_default() {
                    results[slot] = Some(vector.clone());
                }
            }
        }

        results
            .into_iter()
            .map(|v| v.ok_or_else(|| StrataError::Provider("missing embedding in batch".into())))
            .collect()
    }

    /// Drop every cached vector.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Database`] if the backend cannot be cleared.
    pub fn clear(&self) -> Result<(), StrataError> {
        self.backend().clear()
    }

    /// Number of cached vectors.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Database`] if the backend cannot be read.
    pub fn len(&self) -> Result<usize, StrataError> {
        self.backend().len()
    }

    /// Whether the cache holds no vectors.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Database`] if the backend cannot be read.
    pub fn is_empty(&self) -> Result<bool, StrataError> {
        Ok(self.len()? == 0)
    }

    /// Entry count plus hit/miss counters since construction.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len().unwrap_or(0),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn backend(&self) -> MutexGuard<'_, Box<dyn VectorCache>> {
        self.backend.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, key: &str) -> Option<Vec<f32>> {
        match self.backend().get(key) {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "embedding cache read failed, treating as miss");
                None
            }
        }
    }

    fn remember(&self, key: &str, vector: &[f32]) {
        if let Err(e) = self.backend().put(key, vector) {
            warn!(error = %e, "embedding cache write failed");
        }
    }

    fn check_length(&self, vector: &[f32]) -> Result<(), StrataError> {
        let expected = self.dimensions();
        if vector.len() != expected {
            return Err(StrataError::Provider(format!(
                "{} returned a vector of length {}, expected {expected}",
                self.provider_name(),
                vector.len()
            )));
        }
        Ok(())
    }
}
