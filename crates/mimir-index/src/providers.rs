//! Embedding and vision providers.
//!
//! The HTTP provider speaks the OpenAI-compatible embeddings API, which
//! also covers self-hosted gateways. The hash provider is deterministic and
//! offline, for tests and for running the pipeline without a model.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use mimir_core::{
    EmbeddingProvider, EmbeddingProviderKind, EmbeddingSettings, MimirError, Result, VisionProvider,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub fn build_provider(
    settings: &EmbeddingSettings,
    tls_no_verify: bool,
) -> Result<Option<Arc<dyn EmbeddingProvider>>> {
    match settings.provider {
        EmbeddingProviderKind::Disabled => Ok(None),
        EmbeddingProviderKind::Openai => Ok(Some(Arc::new(OpenAiEmbeddingProvider::new(
            settings.clone(),
            tls_no_verify,
        )?))),
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

pub struct OpenAiEmbeddingProvider {
    client: Client,
    settings: EmbeddingSettings,
}

impl OpenAiEmbeddingProvider {
    pub fn new(settings: EmbeddingSettings, tls_no_verify: bool) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .danger_accept_invalid_certs(tls_no_verify)
            .build()
            .map_err(|e| MimirError::Configuration(format!("http client: {}", e)))?;
        Ok(Self { client, settings })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn model(&self) -> &str {
        &self.settings.model
    }

    fn dimension(&self) -> usize {
        self.settings.dimension
    }

    fn max_batch(&self) -> usize {
        self.settings.max_batch
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut request = self
            .client
            .post(&self.settings.endpoint)
            .json(&EmbeddingsRequest {
                model: &self.settings.model,
                input: texts,
            });
        if let Some(key) = &self.settings.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                MimirError::Timeout(format!("embedding call timed out: {}", e))
            } else {
                MimirError::Storage(format!("embedding call failed: {}", e))
            }
        })?;
        if !response.status().is_success() {
            return Err(MimirError::Vector(format!(
                "embedding endpoint returned {}",
                response.status()
            )));
        }
        let body: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| MimirError::Vector(format!("bad embedding response: {}", e)))?;
        if body.data.len() != texts.len() {
            return Err(MimirError::Vector(format!(
                "embedding count mismatch: sent {}, got {}",
                texts.len(),
                body.data.len()
            )));
        }

        let mut ordered = body.data;
        ordered.sort_by_key(|d| d.index);
        for datum in &ordered {
            if datum.embedding.len() != self.settings.dimension {
                return Err(MimirError::Vector(format!(
                    "dimension mismatch: expected {}, got {}",
                    self.settings.dimension,
                    datum.embedding.len()
                )));
            }
        }
        debug!(count = ordered.len(), model = %self.settings.model, "embeddings generated");
        Ok(ordered.into_iter().map(|d| d.embedding).collect())
    }
}

/// Deterministic offline embeddings: a seeded pseudo-random unit vector per
/// text. Identical texts embed identically, so similarity search behaves
/// consistently in tests.
pub struct HashEmbeddingProvider {
    dimension: usize,
}

impl HashEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut state = fnv1a(text);
        let mut vector = Vec::with_capacity(self.dimension);
        for _ in 0..self.dimension {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let unit = ((state >> 33) as f32 / (u32::MAX >> 1) as f32) - 1.0;
            vector.push(unit);
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    fn model(&self) -> &str {
        "hash-embed"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn fnv1a(text: &str) -> u64 {
    let mut hash = 0xcbf29ce484222325u64;
    for byte in text.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Largest image accepted for description; bigger binaries are skipped.
pub const MAX_IMAGE_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Serialize)]
struct VisionRequest {
    model: String,
    messages: Vec<VisionMessage>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct VisionMessage {
    role: &'static str,
    content: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct VisionResponse {
    choices: Vec<VisionChoice>,
}

#[derive(Debug, Deserialize)]
struct VisionChoice {
    message: VisionChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct VisionChoiceMessage {
    content: String,
}

/// Describes images through an OpenAI-compatible VL chat endpoint. The
/// binary is base64-encoded as a data URI; the scaling hint travels with
/// the request so the endpoint can downsample.
pub struct OpenAiVisionProvider {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiVisionProvider {
    pub fn new(
        endpoint: String,
        model: String,
        api_key: Option<String>,
        timeout: Duration,
        tls_no_verify: bool,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(tls_no_verify)
            .build()
            .map_err(|e| MimirError::Configuration(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            endpoint,
            model,
            api_key,
        })
    }
}

#[async_trait]
impl VisionProvider for OpenAiVisionProvider {
    async fn describe_image(&self, bytes: &[u8], mime: &str, max_dimension: u32) -> Result<String> {
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(MimirError::Validation(format!(
                "image too large to describe: {} bytes",
                bytes.len()
            )));
        }
        let data_uri = format!("data:{};base64,{}", mime, BASE64.encode(bytes));
        let request = VisionRequest {
            model: self.model.clone(),
            messages: vec![VisionMessage {
                role: "user",
                content: vec![
                    serde_json::json!({
                        "type": "text",
                        "text": format!(
                            "Describe this image in detail for a search index. \
                             Render it at no more than {}px on the long side.",
                            max_dimension
                        ),
                    }),
                    serde_json::json!({
                        "type": "image_url",
                        "image_url": { "url": data_uri },
                    }),
                ],
            }],
            max_tokens: 512,
        };

        let mut call = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }
        let response = call
            .send()
            .await
            .map_err(|e| MimirError::Storage(format!("vision call failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(MimirError::Vector(format!(
                "vision endpoint returned {}",
                response.status()
            )));
        }
        let body: VisionResponse = response
            .json()
            .await
            .map_err(|e| MimirError::Vector(format!("bad vision response: {}", e)))?;
        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| MimirError::Vector("vision response had no choices".into()))
    }
}
