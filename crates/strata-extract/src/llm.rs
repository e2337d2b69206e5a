use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strata_core::{ExtractorConfig, MemberKind, StrataError};
use tracing::debug;

use crate::extractor::{ExtractedMember, ExtractedMethod, StructuralExtractor};

/// Source is cut to this many characters before it is sent to the model.
const MAX_SOURCE_CHARS: usize = 60_000;

/// File extensions the model is asked to analyse.
const SOURCE_EXTENSIONS: &[&str] = &[
    "py", "rs", "ts", "tsx", "js", "jsx", "java", "go", "cs", "cpp", "cc", "c", "h", "hpp", "kt",
    "swift", "rb", "php", "scala",
];

const SYSTEM_PROMPT: &str = "You analyse source files. List every class, interface and enum \
declared in the file with a one-sentence summary, and every method declared on each of them \
with a one-sentence summary. Respond with JSON only, in the form \
{\"members\": [{\"type\": \"class|interface|enum\", \"name\": \"...\", \"summary\": \"...\", \
\"methods\": [{\"name\": \"...\", \"summary\": \"...\"}]}]}. \
Use an empty members array when the file declares none.";

/// A message in a chat conversation with the LLM.
///
/// # Examples
///
/// ```
/// use strata_extract::llm::{ChatMessage, Role};
///
/// let msg = ChatMessage {
///     role: Role::User,
///     content: "Summarize this file".into(),
/// };
/// assert!(matches!(msg.role, Role::User));
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// Role of the message sender.
    pub role: Role,
    /// Text content of the message.
    pub content: String,
}

/// Role in the chat conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System-level instructions.
    System,
    /// User input.
    User,
}

#[derive(Debug, Deserialize)]
struct MembersPayload {
    #[serde(default)]
    members: Vec<RawMember>,
}

#[derive(Debug, Deserialize)]
struct RawMember {
    #[serde(rename = "type", alias = "kind")]
    kind: String,
    name: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    methods: Vec<RawMethod>,
}

#[derive(Debug, Deserialize)]
struct RawMethod {
    name: String,
    #[serde(default)]
    summary: String,
}

/// Structural extractor that asks an OpenAI-compatible chat model.
///
/// Works with any provider that exposes `/v1/chat/completions`: OpenAI,
/// Ollama, vLLM, LiteLLM, etc.
///
/// # Examples
///
/// ```
/// use strata_core::ExtractorConfig;
/// use strata_extract::llm::LlmExtractor;
///
/// let config = ExtractorConfig {
///     kind: "llm".into(),
///     api_key: Some("test-key".into()),
///     ..ExtractorConfig::default()
/// };
/// let extractor = LlmExtractor::new(&config).unwrap();
/// assert_eq!(extractor.model(), "gpt-4o-mini");
/// ```
pub struct LlmExtractor {
    client: reqwest::Client,
    model: String,
    api_key: Option<String>,
    base_url: String,
}

impl LlmExtractor {
    /// Create an extractor from configuration.
    ///
    /// The API key falls back to `OPENAI_API_KEY`. A key is required unless a
    /// custom `base_url` points at a local server.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Config`] when no credentials are available, or
    /// [`StrataError::Extraction`] if the HTTP client cannot be built.
    pub fn new(config: &ExtractorConfig) -> Result<Self, StrataError> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        if api_key.is_none() && config.base_url.is_none() {
            return Err(StrataError::Config(
                "llm extractor requires extractor.api_key or OPENAI_API_KEY".into(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| StrataError::Extraction(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            model: config.model.clone(),
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".into()),
        })
    }

    /// Return the chat model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send a chat completion request and return the text response.
    ///
    /// Uses temperature 0.1 and the JSON response format.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Extraction`] on HTTP errors or response parsing failures.
    pub async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String, StrataError> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0.1,
            "response_format": { "type": "json_object" },
        });

        let mut request = self.client.post(&url);
        if let Some(api_key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {api_key}"));
        }
        request = request.header("Content-Type", "application/json");

        let response = request
            .json(&body)
            .send()
            .await
            .map_err(|e| StrataError::Extraction(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(StrataError::Extraction(format!(
                "LLM API error {status}: {body_text}"
            )));
        }

        let response_body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| StrataError::Extraction(format!("failed to parse response: {e}")))?;

        let content = response_body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| {
                StrataError::Extraction(format!("unexpected response structure: {response_body}"))
            })?;

        Ok(content.to_string())
    }
}

#[async_trait]
impl StructuralExtractor for LlmExtractor {
    fn supports(&self, path: &str) -> bool {
        let name = path.rsplit('/').next().unwrap_or(path);
        name.rsplit_once('.')
            .is_some_and(|(_, ext)| SOURCE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
    }

    async fn extract(
        &self,
        content: &str,
        path: &str,
    ) -> Result<Vec<ExtractedMember>, StrataError> {
        let source: String = content.chars().take(MAX_SOURCE_CHARS).collect();
        let messages = vec![
            ChatMessage {
                role: Role::System,
                content: SYSTEM_PROMPT.into(),
            },
            ChatMessage {
                role: Role::User,
                content: format!("File: {path}\n\n{source}"),
            },
        ];
        let reply = self.chat(messages).await?;
        let members = parse_members(&reply)?;
        debug!(path, members = members.len(), model = %self.model, "llm extraction");
        Ok(members)
    }
}

/// Parse a model reply of the form `{"members": [...]}`.
///
/// Markdown code fences around the JSON are tolerated. Members whose type is
/// not class, interface or enum are dropped, as are entries without a name.
///
/// # Errors
///
/// Returns [`StrataError::Extraction`] if the reply is not valid JSON of that shape.
///
/// # Examples
///
/// ```
/// use strata_extract::llm::parse_members;
///
/// let reply = r#"{"members": [{"type": "class", "name": "Foo", "summary": "Does foo.",
///   "methods": [{"name": "bar", "summary": "Returns bar."}]}]}"#;
/// let members = parse_members(reply).unwrap();
/// assert_eq!(members[0].methods[0].name, "bar");
/// ```
pub fn parse_members(reply: &str) -> Result<Vec<ExtractedMember>, StrataError> {
    let json = strip_code_fence(reply);
    let payload: MembersPayload = serde_json::from_str(json)
        .map_err(|e| StrataError::Extraction(format!("invalid extractor reply: {e}")))?;

    let mut members = Vec::new();
    for raw in payload.members {
        let kind = match raw.kind.parse::<MemberKind>() {
            Ok(kind) => kind,
            Err(e) => {
                debug!(name = %raw.name, error = %e, "dropping member");
                continue;
            }
        };
        let name = raw.name.trim();
        if name.is_empty() {
            continue;
        }
        members.push(ExtractedMember {
            kind,
            name: name.to_string(),
            summary: raw.summary.trim().to_string(),
            methods: raw
                .methods
                .into_iter()
                .filter(|m| !m.name.trim().is_empty())
                .map(|m| ExtractedMethod {
                    name: m.name.trim().to_string(),
                    summary: m.summary.trim().to_string(),
                })
                .collect(),
        });
    }
    Ok(members)
}

fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence.
    let rest = rest.split_once('\n').map_or(rest, |(_, body)| body);
    rest.trim_end().trim_end_matches("```").trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_key() -> ExtractorConfig {
        ExtractorConfig {
            kind: "llm".into(),
            api_key: Some("test-key".into()),
            ..ExtractorConfig::default()
        }
    }

    #[test]
    fn construction_with_key_succeeds() {
        let extractor = LlmExtractor::new(&config_with_key()).unwrap();
        assert_eq!(extractor.model(), "gpt-4o-mini");
    }

    #[test]
    fn local_base_url_needs_no_key() {
        let config = ExtractorConfig {
            base_url: Some("http://localhost:11434".into()),
            ..ExtractorConfig::default()
        };
        assert!(LlmExtractor::new(&config).is_ok());
    }

    #[test]
    fn supports_common_source_extensions() {
        let extractor = LlmExtractor::new(&config_with_key()).unwrap();
        assert!(extractor.supports("src/Service.cs"));
        assert!(extractor.supports("lib/util.PY"));
        assert!(!extractor.supports("README.md"));
        assert!(!extractor.supports("Makefile"));
    }

    #[test]
    fn parse_drops_unknown_kinds() {
        let reply = r#"{"members": [
            {"type": "Class", "name": "User", "summary": "An account.", "methods": []},
            {"type": "function", "name": "helper", "summary": "Helps."},
            {"type": "enum", "name": "  ", "summary": "Nameless."}
        ]}"#;
        let members = parse_members(reply).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].kind, MemberKind::Class);
        assert_eq!(members[0].name, "User");
    }

    #[test]
    fn parse_tolerates_code_fences() {
        let reply = "```json\n{\"members\": [{\"type\": \"interface\", \"name\": \"Repo\", \
                     \"summary\": \"Stores things.\"}]}\n```";
        let members = parse_members(reply).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].kind, MemberKind::Interface);
        assert!(members[0].methods.is_empty());
    }

    #[test]
    fn parse_empty_object_yields_no_members() {
        assert!(parse_members("{}").unwrap().is_empty());
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = parse_members("not json").unwrap_err();
        assert!(matches!(err, StrataError::Extraction(_)));
    }

    #[test]
    fn chat_message_serializes() {
        let msg = ChatMessage {
            role: Role::System,
            content: "hello".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "system");
        assert_eq!(json["content"], "hello");
    }
}
