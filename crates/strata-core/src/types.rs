use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::hash;

/// Structural member kind produced by the extractor.
///
/// # Examples
///
/// ```
/// use strata_core::MemberKind;
///
/// assert_eq!("Interface".parse::<MemberKind>().unwrap(), MemberKind::Interface);
/// assert!("struct".parse::<MemberKind>().is_err());
/// assert_eq!(MemberKind::Enum.to_string(), "enum");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberKind {
    /// A class, struct or record type.
    Class,
    /// An interface, trait or protocol.
    Interface,
    /// An enumeration.
    Enum,
}

impl fmt::Display for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberKind::Class => write!(f, "class"),
            MemberKind::Interface => write!(f, "interface"),
            MemberKind::Enum => write!(f, "enum"),
        }
    }
}

impl FromStr for MemberKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "class" => Ok(MemberKind::Class),
            "interface" => Ok(MemberKind::Interface),
            "enum" => Ok(MemberKind::Enum),
            other => Err(format!("unknown member kind: {other}")),
        }
    }
}

/// Which collection an entity or hit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Whole source file.
    File,
    /// Class, interface or enum.
    Member,
    /// Method of a member.
    Method,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::File => write!(f, "file"),
            EntityKind::Member => write!(f, "member"),
            EntityKind::Method => write!(f, "method"),
        }
    }
}

/// An indexed source file.
///
/// `content_hash` covers the path and the full content and is fixed at
/// construction. `members` is only populated in memory during an indexing run;
/// the store keeps members in their own collection.
///
/// # Examples
///
/// ```
/// use strata_core::FileEntity;
///
/// let a = FileEntity::new("src/app.py", "class App: pass");
/// let b = FileEntity::new("src/app.py", "class App: pass");
/// assert_eq!(a.content_hash, b.content_hash);
/// assert_ne!(a.id, b.id);
/// assert!(a.embedding.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntity {
    /// Unique id (UUID v4).
    pub id: String,
    /// Path relative to the project root, `/`-separated.
    pub path: String,
    /// Full UTF-8 content.
    pub content: String,
    /// Digest of path and content.
    pub content_hash: String,
    /// Embedding vector, once generated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Members extracted from this file during the current run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<MemberEntity>,
}

impl FileEntity {
    /// Create a file entity with a fresh id and its content hash.
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        let content = content.into();
        let content_hash = hash::file_hash(&path, &content);
        Self {
            id: new_id(),
            path,
            content,
            content_hash,
            embedding: None,
            members: Vec::new(),
        }
    }

    /// Last path component, e.g. `"app.py"` for `"src/app.py"`.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// A class, interface or enum found in a file.
///
/// # Examples
///
/// ```
/// use strata_core::{MemberEntity, MemberKind};
///
/// let m = MemberEntity::new("file-1", MemberKind::Class, "Foo", "Holds foo state.");
/// assert_eq!(m.file_id, "file-1");
/// assert_eq!(
///     m.content_hash,
///     MemberEntity::new("file-1", MemberKind::Class, "Foo", "Holds foo state.").content_hash
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberEntity {
    /// Unique id (UUID v4).
    pub id: String,
    /// Id of the owning [`FileEntity`].
    pub file_id: String,
    /// Member kind.
    pub kind: MemberKind,
    /// Declared name.
    pub name: String,
    /// Natural-language summary.
    pub summary: String,
    /// Digest of file id, name and summary.
    pub content_hash: String,
    /// Embedding vector, once generated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Methods extracted for this member during the current run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<MethodEntity>,
}

impl MemberEntity {
    /// Create a member entity scoped to `file_id`.
    pub fn new(
        file_id: impl Into<String>,
        kind: MemberKind,
        name: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        let file_id = file_id.into();
        let name = name.into();
        let summary = summary.into();
        let content_hash = hash::member_hash(&file_id, &name, &summary);
        Self {
            id: new_id(),
            file_id,
            kind,
            name,
            summary,
            content_hash,
            embedding: None,
            methods: Vec::new(),
        }
    }
}

/// A method belonging to a member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodEntity {
    /// Unique id (UUID v4).
    pub id: String,
    /// Id of the owning [`MemberEntity`].
    pub member_id: String,
    /// Declared name.
    pub name: String,
    /// Natural-language summary.
    pub summary: String,
    /// Digest of member id, name and summary.
    pub content_hash: String,
    /// Embedding vector, once generated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl MethodEntity {
    /// Create a method entity scoped to `member_id`.
    pub fn new(
        member_id: impl Into<String>,
        name: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        let member_id = member_id.into();
        let name = name.into();
        let summary = summary.into();
        let content_hash = hash::method_hash(&member_id, &name, &summary);
        Self {
            id: new_id(),
            member_id,
            name,
            summary,
            content_hash,
            embedding: None,
        }
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A single similarity match.
///
/// # Examples
///
/// ```
/// use strata_core::{EntityKind, SearchHit};
///
/// let hit = SearchHit {
///     id: "m-1".into(),
///     kind: EntityKind::Method,
///     name: "validate".into(),
///     summary: "Validates email format.".into(),
///     path: "src/user.py".into(),
///     parent_name: Some("User".into()),
///     score: 0.82,
///     content: "Validates email format.".into(),
/// };
/// assert!(hit.score > 0.8);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    /// Entity id.
    pub id: String,
    /// Collection the hit came from.
    pub kind: EntityKind,
    /// Entity name (file path for files).
    pub name: String,
    /// Summary, or a content preview for files.
    pub summary: String,
    /// Path of the file the entity lives in.
    pub path: String,
    /// Owning member name, for method hits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_name: Option<String>,
    /// Cosine similarity to the query.
    pub score: f64,
    /// Full file content for files, the summary otherwise.
    pub content: String,
}

/// Result of one search: per-collection hits plus timing.
///
/// # Examples
///
/// ```
/// use strata_core::SearchResponse;
///
/// let response = SearchResponse::empty("nothing", 1.5);
/// assert_eq!(response.total(), 0);
/// assert!(response.all_hits().is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    /// Human-readable label of the query that produced this response.
    pub query: String,
    /// Hits from the file collection.
    pub file_hits: Vec<SearchHit>,
    /// Hits from the member collection.
    pub member_hits: Vec<SearchHit>,
    /// Hits from the method collection.
    pub method_hits: Vec<SearchHit>,
    /// Wall-clock time spent, in milliseconds.
    pub elapsed_ms: f64,
}

impl SearchResponse {
    /// A response with no hits, used when a search fails.
    pub fn empty(query: impl Into<String>, elapsed_ms: f64) -> Self {
        Self {
            query: query.into(),
            elapsed_ms,
            ..Self::default()
        }
    }

    /// Number of hits across all collections.
    pub fn total(&self) -> usize {
        self.file_hits.len() + self.member_hits.len() + self.method_hits.len()
    }

    /// All hits merged, highest score first.
    ///
    /// Equal scores keep collection order (files, members, methods) and the
    /// order within each collection.
    pub fn all_hits(&self) -> Vec<&SearchHit> {
        let mut hits: Vec<&SearchHit> = self
            .file_hits
            .iter()
            .chain(&self.member_hits)
            .chain(&self.method_hits)
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits
    }
}

/// Output format for CLI subcommands.
///
/// Implements [`FromStr`] so it can be used directly with `clap` argument parsing.
///
/// # Examples
///
/// ```
/// use strata_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
///
/// let fmt: OutputFormat = "md".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Markdown);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable summaries.
    #[default]
    Text,
    /// Machine-readable JSON with camelCase keys.
    Json,
    /// Markdown-formatted output.
    Markdown,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}
