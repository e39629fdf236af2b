use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use futures_core::Stream;
use tokio_stream::StreamExt;

use tabletalk_memory::ContextStore;
use tabletalk_provider::{LlmProvider, LlmRequest};

use crate::prompt::{self, TOP_K};
use crate::session::SessionStore;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub model: String,
    pub max_tokens: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash".to_string(),
            max_tokens: 2048,
        }
    }
}

/// Events produced by a streaming exchange. Tokens arrive in order; the
/// terminal event is either `Done` or an `Err` item on the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Token(String),
    Done { session_id: String },
}

pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatEvent>> + Send>>;

/// Retrieval-augmented chat orchestrator: retrieves context, assembles the
/// prompt with windowed history, invokes the model and records the turn.
#[derive(Clone)]
pub struct ChatEngine {
    context: Arc<dyn ContextStore>,
    provider: Arc<dyn LlmProvider>,
    sessions: Arc<SessionStore>,
    options: EngineOptions,
}

impl ChatEngine {
    pub fn new(
        context: Arc<dyn ContextStore>,
        provider: Arc<dyn LlmProvider>,
        sessions: Arc<SessionStore>,
        options: EngineOptions,
    ) -> Self {
        Self {
            context,
            provider,
            sessions,
            options,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    async fn build_request(&self, question: &str, session_id: &str) -> Result<LlmRequest> {
        let docs = self.context.similarity_search(question, TOP_K).await?;
        let context = prompt::join_context(&docs);
        tracing::debug!(
            session_id,
            retrieved = docs.len(),
            "assembled retrieval context"
        );

        let history = self.sessions.history(session_id).await;
        Ok(LlmRequest {
            model: self.options.model.clone(),
            system: Some(prompt::system_prompt(&context)),
            messages: prompt::build_messages(&history, question),
            max_tokens: self.options.max_tokens,
        })
    }

    /// Blocking exchange: returns the complete answer. The turn is recorded
    /// only when the model call succeeds.
    pub async fn chat(&self, question: &str, session_id: &str) -> Result<String> {
        let request = self.build_request(question, session_id).await?;
        let response = self.provider.chat(request).await?;
        self.sessions
            .append(session_id, question, &response.text)
            .await;
        Ok(response.text)
    }

    /// Streaming exchange: yields each non-empty fragment as it arrives,
    /// then commits the turn and yields `Done`. A mid-stream model failure
    /// surfaces as a terminal `Err` item and commits nothing; dropping the
    /// stream early likewise commits nothing.
    pub fn chat_stream(&self, question: String, session_id: String) -> ChatStream {
        let engine = self.clone();
        Box::pin(async_stream::try_stream! {
            let request = engine.build_request(&question, &session_id).await?;
            let mut upstream = engine.provider.stream(request).await?;

            let mut answer = String::new();
            while let Some(chunk) = upstream.next().await {
                let chunk = chunk?;
                if !chunk.delta.is_empty() {
                    answer.push_str(&chunk.delta);
                    yield ChatEvent::Token(chunk.delta);
                }
                if chunk.is_final {
                    break;
                }
            }

            // Commit only after the full sequence resolved.
            engine.sessions.append(&session_id, &question, &answer).await;
            yield ChatEvent::Done {
                session_id: session_id.clone(),
            };
        })
    }
}
