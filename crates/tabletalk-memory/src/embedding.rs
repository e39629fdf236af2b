use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    pub embeddings: Vec<Vec<f32>>,
    pub model: String,
    pub dimensions: usize,
}

/// Text-to-vector backend used by the document store. Implementations must
/// return one vector per input text, in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<EmbeddingResult>;
    fn model_id(&self) -> &str;
    fn dimensions(&self) -> usize;
    /// False for deterministic offline providers whose vectors carry no
    /// semantic meaning.
    fn is_semantic(&self) -> bool {
        true
    }
}

/// Gemini `batchEmbedContents` client.
#[derive(Clone)]
pub struct GeminiEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimensions: usize,
    base_url: String,
}

impl GeminiEmbeddingProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model: "gemini-embedding-001".to_string(),
            dimensions: 768,
            base_url: GEMINI_API_BASE.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>, dimensions: usize) -> Self {
        self.model = model.into();
        self.dimensions = dimensions;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn batch_payload(&self, texts: &[String]) -> BatchEmbedRequest {
        BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|text| EmbedEntry {
                    model: format!("models/{}", self.model),
                    content: TextContent {
                        parts: vec![TextPart { text: text.clone() }],
                    },
                })
                .collect(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult {
                embeddings: Vec::new(),
                model: self.model.clone(),
                dimensions: self.dimensions,
            });
        }

        let url = format!(
            "{}/v1beta/models/{}:batchEmbedContents?key={}",
            self.base_url.trim_end_matches('/'),
            self.model,
            self.api_key
        );

        let parsed: BatchEmbedResponse = self
            .client
            .post(&url)
            .json(&self.batch_payload(texts))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if parsed.embeddings.len() != texts.len() {
            return Err(anyhow!(
                "gemini returned {} embeddings for {} inputs",
                parsed.embeddings.len(),
                texts.len()
            ));
        }

        let embeddings: Vec<Vec<f32>> =
            parsed.embeddings.into_iter().map(|e| e.values).collect();
        // The API decides the actual width; the store adapts its vec table.
        let dimensions = embeddings
            .first()
            .map_or(self.dimensions, |vector| vector.len());

        Ok(EmbeddingResult {
            embeddings,
            model: self.model.clone(),
            dimensions,
        })
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[derive(Serialize)]
struct BatchEmbedRequest {
    requests: Vec<EmbedEntry>,
}

#[derive(Serialize)]
struct EmbedEntry {
    model: String,
    content: TextContent,
}

#[derive(Serialize)]
struct TextContent {
    parts: Vec<TextPart>,
}

#[derive(Serialize)]
struct TextPart {
    text: String,
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

/// Deterministic offline embedder: each text maps to a pseudo-random unit
/// cube point seeded from its sha256 digest. Identical texts always get
/// identical vectors, which is all the tests need.
#[derive(Clone)]
pub struct StubEmbeddingProvider {
    dims: usize,
}

impl StubEmbeddingProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        // Seed from the first 8 digest bytes; xorshift needs a nonzero state.
        let mut state = u64::from_le_bytes([
            digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
        ]) | 1;

        (0..self.dims)
            .map(|_| {
                // xorshift64
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                ((state >> 40) as f32 / (1u32 << 24) as f32) * 2.0 - 1.0
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for StubEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<EmbeddingResult> {
        Ok(EmbeddingResult {
            embeddings: texts.iter().map(|text| self.vector_for(text)).collect(),
            model: "stub".to_string(),
            dimensions: self.dims,
        })
    }

    fn model_id(&self) -> &str {
        "stub"
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn is_semantic(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_vectors_have_configured_width() {
        let provider = StubEmbeddingProvider::new(8);
        let result = provider
            .embed(&["region: north".to_string(), "region: south".to_string()])
            .await
            .unwrap();

        assert_eq!(result.embeddings.len(), 2);
        assert!(result.embeddings.iter().all(|v| v.len() == 8));
        assert_eq!(result.dimensions, 8);
    }

    #[tokio::test]
    async fn stub_is_deterministic_and_text_sensitive() {
        let provider = StubEmbeddingProvider::new(6);
        let a1 = provider.embed(&["same".to_string()]).await.unwrap();
        let a2 = provider.embed(&["same".to_string()]).await.unwrap();
        let b = provider.embed(&["other".to_string()]).await.unwrap();

        assert_eq!(a1.embeddings, a2.embeddings);
        assert_ne!(a1.embeddings, b.embeddings);
    }

    #[tokio::test]
    async fn stub_components_stay_in_unit_range() {
        let provider = StubEmbeddingProvider::new(32);
        let result = provider.embed(&["bounds check".to_string()]).await.unwrap();
        assert!(result.embeddings[0]
            .iter()
            .all(|c| (-1.0..=1.0).contains(c)));
    }

    #[tokio::test]
    async fn stub_empty_input_yields_no_vectors() {
        let provider = StubEmbeddingProvider::new(4);
        let result = provider.embed(&[]).await.unwrap();
        assert!(result.embeddings.is_empty());
    }

    #[test]
    fn stub_is_not_semantic() {
        let provider = StubEmbeddingProvider::new(16);
        assert_eq!(provider.model_id(), "stub");
        assert!(!provider.is_semantic());
    }

    #[test]
    fn gemini_defaults_and_builders() {
        let provider = GeminiEmbeddingProvider::new("k".to_string());
        assert_eq!(provider.model_id(), "gemini-embedding-001");
        assert_eq!(provider.dimensions(), 768);
        assert!(provider.is_semantic());

        let provider = provider.with_model("custom-embed", 256);
        assert_eq!(provider.model_id(), "custom-embed");
        assert_eq!(provider.dimensions(), 256);
    }

    #[test]
    fn gemini_batch_payload_shape() {
        let provider = GeminiEmbeddingProvider::new("k".to_string());
        let payload =
            provider.batch_payload(&["file: sales.csv | region: north".to_string()]);
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["requests"][0]["model"], "models/gemini-embedding-001");
        assert_eq!(
            json["requests"][0]["content"]["parts"][0]["text"],
            "file: sales.csv | region: north"
        );
    }

    #[test]
    fn gemini_batch_response_parsing() {
        let raw = r#"{
            "embeddings": [
                {"values": [0.1, 0.2, 0.3]},
                {"values": [0.4, 0.5, 0.6]}
            ]
        }"#;
        let parsed: BatchEmbedResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.embeddings.len(), 2);
        assert_eq!(parsed.embeddings[1].values, vec![0.4, 0.5, 0.6]);
    }
}
