use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strata_core::{MemberKind, StrataError};

/// A class, interface or enum found in a source file.
///
/// The pipeline turns these into member entities keyed to the file they came
/// from.
///
/// # Examples
///
/// ```
/// use strata_core::MemberKind;
/// use strata_extract::extractor::{ExtractedMember, ExtractedMethod};
///
/// let member = ExtractedMember {
///     kind: MemberKind::Class,
///     name: "User".into(),
///     summary: "A registered account.".into(),
///     methods: vec![ExtractedMethod {
///         name: "validate".into(),
///         summary: "Validates email format.".into(),
///     }],
/// };
/// assert_eq!(member.method_names(), vec!["validate"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedMember {
    /// Member kind.
    pub kind: MemberKind,
    /// Declared name.
    pub name: String,
    /// Natural-language summary.
    pub summary: String,
    /// Methods declared on this member, in source order.
    #[serde(default)]
    pub methods: Vec<ExtractedMethod>,
}

impl ExtractedMember {
    /// Names of this member's methods, in order.
    pub fn method_names(&self) -> Vec<&str> {
        self.methods.iter().map(|m| m.name.as_str()).collect()
    }
}

/// A method declared on an [`ExtractedMember`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedMethod {
    /// Declared name.
    pub name: String,
    /// Natural-language summary.
    pub summary: String,
}

/// Turns raw source text into structural members with per-method summaries.
///
/// Implementations must be cheap to share across tasks. A failure for one
/// file is reported as an error; the indexing pipeline logs it and treats
/// the file as having no members.
#[async_trait]
pub trait StructuralExtractor: Send + Sync {
    /// Whether this extractor can parse the file at `path`.
    fn supports(&self, path: &str) -> bool;

    /// Extract the members declared in `content`.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Extraction`] (or a transport error) when the
    /// source cannot be analysed.
    async fn extract(&self, content: &str, path: &str) -> Result<Vec<ExtractedMember>, StrataError>;
}
