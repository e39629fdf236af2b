pub mod gemini;
pub mod types;

use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures_core::Stream;

pub use gemini::GeminiProvider;
pub use types::{LlmMessage, LlmRequest, LlmResponse, StreamChunk};

pub type LlmStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse>;
    async fn stream(&self, _request: LlmRequest) -> Result<LlmStream> {
        anyhow::bail!("streaming not supported by this provider")
    }
    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

/// Offline provider for tests and the server's --stub mode. Replies echo
/// the last user message; the streaming variant delivers the reply in
/// fixed-width character windows so callers always see multiple chunks.
pub struct StubProvider;

const STUB_WINDOW: usize = 8;

impl StubProvider {
    fn reply_to(request: &LlmRequest) -> String {
        let question = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map_or("", |m| m.content.as_str());
        format!("[stub:{}] {question}", request.model)
    }
}

#[async_trait]
impl LlmProvider for StubProvider {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse> {
        Ok(LlmResponse {
            text: Self::reply_to(&request),
            input_tokens: None,
            output_tokens: None,
            stop_reason: Some("end_turn".into()),
        })
    }

    async fn stream(&self, request: LlmRequest) -> Result<LlmStream> {
        let reply = Self::reply_to(&request);

        let mut chunks: Vec<Result<StreamChunk>> = Vec::new();
        let mut rest = reply.as_str();
        while !rest.is_empty() {
            let cut = rest
                .char_indices()
                .nth(STUB_WINDOW)
                .map_or(rest.len(), |(i, _)| i);
            chunks.push(Ok(StreamChunk::delta(&rest[..cut])));
            rest = &rest[cut..];
        }
        chunks.push(Ok(StreamChunk::finished("end_turn")));

        Ok(Box::pin(tokio_stream::iter(chunks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn stub_reply_names_model_and_echoes_question() {
        let req = LlmRequest::simple("test-model".into(), None, "ping".into());
        let resp = StubProvider.chat(req).await.unwrap();

        assert_eq!(resp.text, "[stub:test-model] ping");
        assert_eq!(resp.stop_reason.as_deref(), Some("end_turn"));
    }

    #[tokio::test]
    async fn stub_reply_uses_last_user_message() {
        let req = LlmRequest {
            model: "m".into(),
            system: None,
            messages: vec![
                LlmMessage::user("first"),
                LlmMessage::assistant("reply"),
                LlmMessage::user("second"),
            ],
            max_tokens: 100,
        };
        let resp = StubProvider.chat(req).await.unwrap();
        assert!(resp.text.ends_with("second"));
    }

    #[tokio::test]
    async fn stub_stream_windows_reassemble_to_full_reply() {
        let req = LlmRequest::simple("m".into(), None, "hello world out there".into());
        let expected = StubProvider::reply_to(&req);

        let mut stream = StubProvider.stream(req).await.unwrap();
        let mut assembled = String::new();
        let mut deltas = 0;
        let mut finished = false;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            if chunk.is_final {
                finished = true;
                assert!(chunk.delta.is_empty());
            } else {
                assembled.push_str(&chunk.delta);
                deltas += 1;
            }
        }

        assert!(finished);
        assert!(deltas > 1);
        assert_eq!(assembled, expected);
    }

    #[tokio::test]
    async fn stub_with_no_messages_still_replies() {
        let req = LlmRequest {
            model: "m".into(),
            system: None,
            messages: vec![],
            max_tokens: 100,
        };
        let resp = StubProvider.chat(req).await.unwrap();
        assert_eq!(resp.text, "[stub:m] ");
    }

    #[tokio::test]
    async fn default_health_is_ok() {
        assert!(StubProvider.health().await.is_ok());
    }
}
