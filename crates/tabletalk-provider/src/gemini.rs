//! Google Gemini API provider
//!
//! https://ai.google.dev/api/generate-content

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_core::Stream;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use crate::{LlmMessage, LlmProvider, LlmRequest, LlmResponse, LlmStream, StreamChunk};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            base_url: GEMINI_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/models/{model}:{method}?key={}", self.base_url, self.api_key)
    }

    async fn send(&self, url: &str, payload: &GenerateRequest) -> Result<reqwest::Response> {
        let resp = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if status != StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            return Err(api_error(status, &body));
        }
        Ok(resp)
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse> {
        let url = self.endpoint(&request.model, "generateContent");
        let resp = self.send(&url, &wire_request(&request)).await?;
        let body: GenerateResponse = resp.json().await?;
        into_llm_response(body)
    }

    async fn stream(&self, request: LlmRequest) -> Result<LlmStream> {
        let url = format!(
            "{}&alt=sse",
            self.endpoint(&request.model, "streamGenerateContent")
        );
        let resp = self.send(&url, &wire_request(&request)).await?;
        Ok(Box::pin(parse_sse_stream(resp.bytes_stream())))
    }
}

fn wire_request(request: &LlmRequest) -> GenerateRequest {
    let contents = request
        .messages
        .iter()
        .filter(|msg| !msg.content.is_empty())
        .map(|msg| Content {
            role: wire_role(msg).to_string(),
            parts: vec![Part {
                text: msg.content.clone(),
            }],
        })
        .collect();

    GenerateRequest {
        contents,
        system_instruction: request.system.as_ref().map(|text| Content {
            role: "user".to_string(),
            parts: vec![Part { text: text.clone() }],
        }),
        generation_config: Some(GenerationConfig {
            max_output_tokens: Some(request.max_tokens),
        }),
    }
}

fn wire_role(msg: &LlmMessage) -> &'static str {
    if msg.role == "assistant" {
        "model"
    } else {
        "user"
    }
}

fn into_llm_response(body: GenerateResponse) -> Result<LlmResponse> {
    let candidate = body
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("gemini api error: empty candidates"))?;

    let text: String = candidate
        .content
        .parts
        .iter()
        .map(|part| part.text.as_str())
        .collect();

    let (input_tokens, output_tokens) = usage_counts(body.usage_metadata.as_ref());
    Ok(LlmResponse {
        text,
        input_tokens,
        output_tokens,
        stop_reason: normalize_finish_reason(candidate.finish_reason.as_deref()),
    })
}

fn usage_counts(usage: Option<&UsageMetadata>) -> (Option<u32>, Option<u32>) {
    match usage {
        Some(u) => (Some(u.prompt_token_count), Some(u.candidates_token_count)),
        None => (None, None),
    }
}

fn normalize_finish_reason(reason: Option<&str>) -> Option<String> {
    reason.map(|r| match r {
        "STOP" => "end_turn".to_string(),
        "MAX_TOKENS" => "max_tokens".to_string(),
        "SAFETY" => "safety".to_string(),
        other => other.to_lowercase(),
    })
}

fn transport_error(e: reqwest::Error) -> anyhow::Error {
    if e.is_timeout() {
        anyhow!("gemini api error (timeout) [retryable]: request timed out")
    } else if e.is_connect() {
        anyhow!("gemini api error (connect) [retryable]: {e}")
    } else {
        e.into()
    }
}

fn api_error(status: StatusCode, body: &str) -> anyhow::Error {
    if matches!(status.as_u16(), 429 | 500..=599) {
        anyhow!("gemini api error ({status}) [retryable]: {body}")
    } else {
        anyhow!("gemini api error ({status}): {body}")
    }
}

/// Take the next complete `\n\n`-terminated SSE frame out of the buffer.
fn next_frame(buffer: &mut String) -> Option<String> {
    let end = buffer.find("\n\n")?;
    let frame = buffer[..end].to_string();
    buffer.drain(..end + 2);
    Some(frame)
}

/// `data:` payloads within one SSE frame.
fn frame_payloads(frame: &str) -> Vec<&str> {
    frame
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .collect()
}

/// Translate one decoded event into zero or more stream chunks: a delta per
/// non-empty part, and a final chunk when a finish reason is present.
fn chunks_from_event(event: GenerateResponse) -> Vec<StreamChunk> {
    let Some(candidate) = event.candidates.first() else {
        return Vec::new();
    };

    let mut chunks: Vec<StreamChunk> = candidate
        .content
        .parts
        .iter()
        .filter(|part| !part.text.is_empty())
        .map(|part| StreamChunk::delta(part.text.clone()))
        .collect();

    if candidate.finish_reason.is_some() {
        let (input_tokens, output_tokens) = usage_counts(event.usage_metadata.as_ref());
        chunks.push(StreamChunk {
            delta: String::new(),
            is_final: true,
            input_tokens,
            output_tokens,
            stop_reason: normalize_finish_reason(candidate.finish_reason.as_deref()),
        });
    }
    chunks
}

fn parse_sse_stream<E>(
    byte_stream: impl Stream<Item = std::result::Result<bytes::Bytes, E>> + Send + 'static,
) -> impl Stream<Item = Result<StreamChunk>> + Send
where
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        tokio::pin!(byte_stream);
        let mut buffer = String::new();

        while let Some(received) = byte_stream.next().await {
            let bytes = match received {
                Ok(bytes) => bytes,
                Err(e) => {
                    yield Err(anyhow!("stream error: {e}"));
                    return;
                }
            };
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(frame) = next_frame(&mut buffer) {
                for payload in frame_payloads(&frame) {
                    let event = match serde_json::from_str::<GenerateResponse>(payload) {
                        Ok(event) => event,
                        Err(e) => {
                            yield Err(anyhow!("invalid sse event payload: {e}"));
                            return;
                        }
                    };
                    for chunk in chunks_from_event(event) {
                        yield Ok(chunk);
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Content,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}
