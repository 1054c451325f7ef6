//! Reasoning layer: wraps an LLM provider with capability selection,
//! structured extraction and streaming.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;

use crate::error::LlmError;
use crate::llm::{
    ChatMessage, CompletionRequest, LlmProvider, LlmStream, ToolCall, ToolCompletionRequest,
    ToolDefinition,
};

/// Matches a fenced block (```json ... ```), capturing the body.
static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[a-zA-Z0-9_-]*\s*\n?(.*?)```").expect("valid fence regex")
});

/// Outcome of asking the backend which capabilities to run.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Zero or more capability calls, in the order they should run.
    Calls {
        calls: Vec<ToolCall>,
        content: Option<String>,
    },
    /// The backend answered directly.
    Direct(String),
}

impl Selection {
    /// Selected calls, empty for a direct answer.
    pub fn calls(&self) -> &[ToolCall] {
        match self {
            Self::Calls { calls, .. } => calls,
            Self::Direct(_) => &[],
        }
    }
}

/// The reasoning backend the dispatcher and workflows consult.
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    /// Choose capabilities for the conversation, or answer directly.
    async fn select(
        &self,
        conversation: &[ChatMessage],
        candidates: &[ToolDefinition],
    ) -> Result<Selection, LlmError>;

    /// Produce a JSON value conforming to `schema` for `instruction`.
    ///
    /// Must fail on malformed output instead of inventing defaults.
    async fn extract(
        &self,
        instruction: &str,
        schema: &serde_json::Value,
    ) -> Result<serde_json::Value, LlmError>;

    /// Stream a free-text completion of the conversation.
    async fn stream(&self, conversation: &[ChatMessage]) -> Result<LlmStream, LlmError>;
}

/// Extract and deserialize into `T`, failing loudly on shape mismatch.
pub async fn extract_as<T: DeserializeOwned>(
    backend: &dyn ReasoningBackend,
    instruction: &str,
    schema: &serde_json::Value,
) -> Result<T, LlmError> {
    let value = backend.extract(instruction, schema).await?;
    serde_json::from_value(value.clone()).map_err(|e| LlmError::InvalidResponse {
        provider: "extract".to_string(),
        reason: format!("{e} in {value}"),
    })
}

/// Pull a JSON document out of model output that may be fenced or surrounded by prose.
pub fn parse_json_output(raw: &str) -> Result<serde_json::Value, serde_json::Error> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }
    if let Some(body) = FENCED_BLOCK.captures(trimmed).and_then(|c| c.get(1))
        && let Ok(value) = serde_json::from_str(body.as_str().trim())
    {
        return Ok(value);
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => serde_json::from_str(&trimmed[start..=end]),
        _ => serde_json::from_str(trimmed),
    }
}

/// Reasoning layer backed by an `LlmProvider`.
pub struct Reasoning {
    llm: Arc<dyn LlmProvider>,
    system_prompt: Option<String>,
}

impl Reasoning {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: String) -> Self {
        self.system_prompt = Some(prompt);
        self
    }

    fn with_prompt(&self, conversation: &[ChatMessage]) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(conversation.len() + 1);
        if let Some(ref prompt) = self.system_prompt {
            messages.push(ChatMessage::system(prompt));
        }
        messages.extend_from_slice(conversation);
        messages
    }
}

#[async_trait]
impl ReasoningBackend for Reasoning {
    async fn select(
        &self,
        conversation: &[ChatMessage],
        candidates: &[ToolDefinition],
    ) -> Result<Selection, LlmError> {
        let messages = self.with_prompt(conversation);

        // No candidates: a plain completion is the only possible answer.
        if candidates.is_empty() {
            let response = self.llm.complete(CompletionRequest::new(messages)).await?;
            tracing::debug!(
                input_tokens = response.input_tokens,
                output_tokens = response.output_tokens,
                "Direct completion"
            );
            return Ok(Selection::Direct(response.content));
        }

        let request = ToolCompletionRequest::new(messages, candidates.to_vec());
        let response = self.llm.complete_with_tools(request).await?;
        tracing::debug!(
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            tool_calls = response.tool_calls.len(),
            "Selection completion"
        );

        if response.tool_calls.is_empty() {
            Ok(Selection::Direct(response.content.unwrap_or_default()))
        } else {
            Ok(Selection::Calls {
                calls: response.tool_calls,
                content: response.content,
            })
        }
    }

    async fn extract(
        &self,
        instruction: &str,
        schema: &serde_json::Value,
    ) -> Result<serde_json::Value, LlmError> {
        let schema_text = serde_json::to_string_pretty(schema)?;
        let messages = vec![
            ChatMessage::system(format!(
                "Respond with a single JSON object that conforms to this JSON schema and \
                 nothing else. Do not wrap it in prose.\n{schema_text}"
            )),
            ChatMessage::user(instruction),
        ];
        let response = self
            .llm
            .complete(CompletionRequest::new(messages).with_temperature(0.0))
            .await?;

        parse_json_output(&response.content).map_err(|e| LlmError::InvalidResponse {
            provider: self.llm.model_name().to_string(),
            reason: format!("expected JSON matching schema: {e}"),
        })
    }

    async fn stream(&self, conversation: &[ChatMessage]) -> Result<LlmStream, LlmError> {
        let messages = self.with_prompt(conversation);
        self.llm.complete_stream(CompletionRequest::new(messages)).await
    }
}
