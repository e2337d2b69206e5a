//! Embedding providers.
//!
//! [`HttpEmbeddingClient`] speaks the `/embeddings` shape shared by OpenAI and
//! Voyage AI. [`HashingEmbedder`] is a deterministic offline provider based on
//! feature hashing, used by tests and air-gapped runs.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strata_core::{EmbeddingConfig, StrataError};

/// Turns text into fixed-length vectors.
///
/// `embed_batch` must return exactly one vector per input, in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Length of every vector this provider returns.
    fn dimensions(&self) -> usize;

    /// Short identifier, e.g. `"openai"`.
    fn provider_name(&self) -> &str;

    /// Embed a single text.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Provider`] if the provider call fails.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, StrataError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StrataError::Provider("provider returned no embedding".into()))
    }

    /// Embed several texts in one call.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Provider`] if the provider call fails.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StrataError>;
}

/// Build the provider selected by `config.provider`.
///
/// # Errors
///
/// Returns [`StrataError::Config`] for an unknown provider, zero dimensions,
/// or missing credentials.
///
/// # Examples
///
/// ```
/// use strata_core::EmbeddingConfig;
/// use strata_lens::embedding::build_provider;
///
/// let config = EmbeddingConfig {
///     provider: "hashing".into(),
///     dimensions: 256,
///     ..EmbeddingConfig::default()
/// };
/// let provider = build_provider(&config).unwrap();
/// assert_eq!(provider.dimensions(), 256);
/// ```
pub fn build_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>, StrataError> {
    if config.dimensions == 0 {
        return Err(StrataError::Config(
            "embedding.dimensions must be greater than zero".into(),
        ));
    }
    match config.provider.as_str() {
        "openai" | "voyage" => Ok(Arc::new(HttpEmbeddingClient::with_config(config)?)),
        "hashing" => Ok(Arc::new(HashingEmbedder::new(config.dimensions))),
        other => Err(StrataError::Config(format!(
            "unknown embedding provider: {other} (expected \"openai\", \"voyage\" or \"hashing\")"
        ))),
    }
}

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const VOYAGE_BASE_URL: &str = "https://api.voyageai.com/v1";
const BATCH_SIZE: usize = 64;
const BATCH_DELAY_MS: u64 = 200;

/// Wire dialect of an `/embeddings` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiFlavor {
    /// OpenAI (and compatible servers): `dimensions` request field.
    OpenAi,
    /// Voyage AI: `input_type` and `output_dimension` request fields.
    Voyage,
}

#[derive(Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dimension: Option<usize>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDataItem>,
}

#[derive(Deserialize)]
struct EmbedDataItem {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Client for OpenAI- and Voyage-style embedding APIs.
///
/// # Examples
///
/// ```
/// use strata_lens::embedding::{ApiFlavor, HttpEmbeddingClient};
///
/// let client = HttpEmbeddingClient::new(ApiFlavor::OpenAi, "test-key", "text-embedding-3-small", 1536);
/// assert_eq!(client.model(), "text-embedding-3-small");
/// ```
pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    flavor: ApiFlavor,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
}

impl std::fmt::Debug for HttpEmbeddingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmbeddingClient")
            .field("flavor", &self.flavor)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

impl HttpEmbeddingClient {
    /// Create a client against the flavor's public endpoint.
    pub fn new(flavor: ApiFlavor, api_key: &str, model: &str, dimensions: usize) -> Self {
        let base_url = match flavor {
            ApiFlavor::OpenAi => OPENAI_BASE_URL,
            ApiFlavor::Voyage => VOYAGE_BASE_URL,
        };
        Self {
            client: reqwest::Client::new(),
            flavor,
            api_key: api_key.to_string(),
            base_url: base_url.to_string(),
            model: model.to_string(),
            dimensions,
        }
    }

    /// Create a client from an [`EmbeddingConfig`].
    ///
    /// Falls back to `OPENAI_API_KEY` or `VOYAGE_API_KEY` if no key is configured.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Config`] if no API key is available or the
    /// provider is not `openai`/`voyage`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use strata_core::EmbeddingConfig;
    /// use strata_lens::embedding::HttpEmbeddingClient;
    ///
    /// let client = HttpEmbeddingClient::with_config(&EmbeddingConfig::default()).unwrap();
    /// ```
    pub fn with_config(config: &EmbeddingConfig) -> Result<Self, StrataError> {
        let (flavor, env_var) = match config.provider.as_str() {
            "openai" => (ApiFlavor::OpenAi, "OPENAI_API_KEY"),
            "voyage" => (ApiFlavor::Voyage, "VOYAGE_API_KEY"),
            other => {
                return Err(StrataError::Config(format!(
                    "provider {other} is not served over HTTP"
                )))
            }
        };

        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(env_var).ok())
            .ok_or_else(|| {
                StrataError::Config(format!(
                    "embedding API key not found: set embedding.api_key in strata.toml or {env_var} env var"
                ))
            })?;

        let mut client = Self::new(flavor, &api_key, &config.model, config.dimensions);
        if let Some(base_url) = &config.base_url {
            client.base_url = base_url.trim_end_matches('/').to_string();
        }
        Ok(client)
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, texts: &[String]) -> EmbedRequest {
        match self.flavor {
            ApiFlavor::OpenAi => EmbedRequest {
                model: self.model.clone(),
                input: texts.to_vec(),
                dimensions: Some(self.dimensions),
                input_type: None,
                output_dimension: None,
            },
            ApiFlavor::Voyage => EmbedRequest {
                model: self.model.clone(),
                input: texts.to_vec(),
                dimensions: None,
                input_type: Some("document".to_string()),
                output_dimension: Some(self.dimensions),
            },
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingClient {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn provider_name(&self) -> &str {
        match self.flavor {
            ApiFlavor::OpenAi => "openai",
            ApiFlavor::Voyage => "voyage",
        }
    }

    /// Splits into sub-batches of 64 with 200ms delays for rate limiting.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StrataError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all_embeddings = Vec::with_capacity(texts.len());

        for (i, batch) in texts.chunks(BATCH_SIZE).enumerate() {
            if i > 0 {
                tokio::time::sleep(tokio::time::Duration::from_millis(BATCH_DELAY_MS)).await;
            }

            let response = self
                .client
                .post(format!("{}/embeddings", self.base_url))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&self.build_request(batch))
                .send()
                .await
                .map_err(|e| StrataError::Provider(format!("HTTP request failed: {e}")))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unable to read response body".into());
                return Err(StrataError::Provider(format!(
                    "{} API returned {status}: {body}",
                    self.provider_name()
                )));
            }

            let embed_response: EmbedResponse = response
                .json()
                .await
                .map_err(|e| StrataError::Provider(format!("failed to parse response: {e}")))?;

            all_embeddings.extend(ordered_embeddings(embed_response, batch.len())?);
        }

        Ok(all_embeddings)
    }
}

/// Response vectors in request order, checked for count.
fn ordered_embeddings(
    mut response: EmbedResponse,
    expected: usize,
) -> Result<Vec<Vec<f32>>, StrataError> {
    if response.data.len() != expected {
        return Err(StrataError::Provider(format!(
            "expected {expected} embeddings, got {}",
            response.data.len()
        )));
    }
    if response.data.iter().all(|d| d.index.is_some()) {
        response.data.sort_by_key(|d| d.index);
    }
    Ok(response.data.into_iter().map(|d| d.embedding).collect())
}

/// Offline embedder using signed feature hashing.
///
/// Text is lowercased and split into alphanumeric tokens; each token is cut to
/// its first five characters so that "validate", "validates" and "validation"
/// land in the same bucket. The result is L2-normalized, so cosine similarity
/// reflects shared vocabulary.
///
/// # Examples
///
/// ```
/// use strata_lens::embedding::HashingEmbedder;
///
/// let embedder = HashingEmbedder::new(128);
/// let v = embedder.vector("Validates email format.");
/// assert_eq!(v.len(), 128);
/// assert_eq!(v, embedder.vector("validate EMAIL formats"));
/// ```
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

const STEM_CHARS: usize = 5;

impl HashingEmbedder {
    /// Create an embedder producing vectors of length `dimensions`.
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    /// Embed `text` synchronously.
    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        if self.dimensions == 0 {
            return v;
        }

        let lowered = text.to_lowercase();
        for token in lowered.split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            let stem: String = token.chars().take(STEM_CHARS).collect();
            let digest = Sha256::digest(stem.as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let idx = (u64::from_le_bytes(bucket) % self.dimensions as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn provider_name(&self) -> &str {
        "hashing"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StrataError> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}
