//! Source discovery and structural extraction.
//!
//! Walks a project tree with the `ignore` crate and turns each source file
//! into classes, interfaces and enums with per-method summaries, either
//! offline via tree-sitter or through an OpenAI-compatible chat model.

pub mod extractor;
pub mod llm;
pub mod syntax;
pub mod walker;

use std::sync::Arc;

use strata_core::{ExtractorConfig, StrataError};

pub use extractor::{ExtractedMember, ExtractedMethod, StructuralExtractor};
pub use walker::{walk_project, SourceFile};

/// Build the extractor selected by `config.kind`.
///
/// # Errors
///
/// Returns [`StrataError::Config`] for an unknown kind or when the `llm`
/// extractor has no credentials.
///
/// # Examples
///
/// ```
/// use strata_core::ExtractorConfig;
/// use strata_extract::build_extractor;
///
/// let extractor = build_extractor(&ExtractorConfig::default()).unwrap();
/// assert!(extractor.supports("src/main.rs"));
///
/// let bad = ExtractorConfig { kind: "regex".into(), ..ExtractorConfig::default() };
/// assert!(build_extractor(&bad).is_err());
/// ```
pub fn build_extractor(
    config: &ExtractorConfig,
) -> Result<Arc<dyn StructuralExtractor>, StrataError> {
    match config.kind.as_str() {
        "syntax" => Ok(Arc::new(syntax::SyntaxExtractor::new())),
        "llm" => Ok(Arc::new(llm::LlmExtractor::new(config)?)),
        other => Err(StrataError::Config(format!(
            "unknown extractor kind: {other} (expected \"syntax\" or \"llm\")"
        ))),
    }
}
