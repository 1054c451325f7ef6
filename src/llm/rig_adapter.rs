//! Bridges rig-core's `CompletionModel` to our `LlmProvider` trait.

use async_trait::async_trait;
use futures::StreamExt;
use rig::completion::message::{AssistantContent, Message as RigMessage};
use rig::completion::{CompletionError, CompletionModel};
use rig::streaming::StreamedAssistantContent;

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, LlmStream,
    Role, ToolCall, ToolCompletionRequest, ToolCompletionResponse, ToolDefinition,
};

/// Wraps any rig completion model.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
}

impl<M> RigAdapter<M> {
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
        }
    }
}

/// Conversation split into the pieces rig's request builder expects.
struct RigConversation {
    preamble: Option<String>,
    history: Vec<RigMessage>,
    prompt: RigMessage,
}

/// Function results are folded into user turns so no tool-call pairing is required.
fn to_rig_message(message: &ChatMessage) -> RigMessage {
    match message.role {
        Role::Assistant => RigMessage::assistant(message.content.clone()),
        Role::Function => RigMessage::user(format!(
            "[result of {}]\n{}",
            message.name.as_deref().unwrap_or("function"),
            message.content
        )),
        Role::User | Role::System => RigMessage::user(message.content.clone()),
    }
}

fn split_conversation(messages: &[ChatMessage]) -> Result<RigConversation, LlmError> {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let preamble = (!system.is_empty()).then(|| system.join("\n\n"));

    let mut rest: Vec<RigMessage> = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(to_rig_message)
        .collect();

    let prompt = rest.pop().ok_or_else(|| LlmError::RequestFailed {
        provider: "rig".to_string(),
        reason: "conversation has no non-system messages".to_string(),
    })?;

    Ok(RigConversation {
        preamble,
        history: rest,
        prompt,
    })
}

fn map_completion_error(model: &str, e: CompletionError) -> LlmError {
    LlmError::RequestFailed {
        provider: model.to_string(),
        reason: e.to_string(),
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
    M::StreamingResponse: Send + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let response = self
            .complete_with_tools(ToolCompletionRequest::new(request.messages, Vec::new()))
            .await?;
        Ok(CompletionResponse {
            content: response.content.unwrap_or_default(),
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
            finish_reason: response.finish_reason,
        })
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let conversation = split_conversation(&request.messages)?;
        let tools: Vec<rig::completion::ToolDefinition> = request
            .tools
            .into_iter()
            .map(|ToolDefinition { name, description, parameters }| {
                rig::completion::ToolDefinition {
                    name,
                    description,
                    parameters,
                }
            })
            .collect();

        let mut builder = self
            .model
            .completion_request(conversation.prompt)
            .messages(conversation.history)
            .tools(tools);
        if let Some(preamble) = conversation.preamble {
            builder = builder.preamble(preamble);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_completion_error(&self.model_name, e))?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for content in response.choice.into_iter() {
            match content {
                AssistantContent::Text(t) => text.push_str(&t.text),
                AssistantContent::ToolCall(call) => tool_calls.push(ToolCall {
                    id: call.id,
                    name: call.function.name,
                    arguments: call.function.arguments,
                }),
                _ => {}
            }
        }

        let finish_reason = if tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolUse
        };

        Ok(ToolCompletionResponse {
            content: (!text.is_empty()).then_some(text),
            tool_calls,
            input_tokens: response.usage.input_tokens as u32,
            output_tokens: response.usage.output_tokens as u32,
            finish_reason,
        })
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<LlmStream, LlmError> {
        let conversation = split_conversation(&request.messages)?;
        let mut builder = self
            .model
            .completion_request(conversation.prompt)
            .messages(conversation.history);
        if let Some(preamble) = conversation.preamble {
            builder = builder.preamble(preamble);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(temperature);
        }

        let stream = builder
            .stream()
            .await
            .map_err(|e| map_completion_error(&self.model_name, e))?;

        let provider = self.model_name.clone();
        let fragments = stream.filter_map(move |item| {
            let provider = provider.clone();
            async move {
                match item {
                    Ok(StreamedAssistantContent::Text(t)) => Some(Ok(t.text)),
                    Ok(_) => None,
                    Err(e) => Some(Err(LlmError::StreamFailed {
                        provider,
                        reason: e.to_string(),
                    })),
                }
            }
        });

        Ok(fragments.boxed())
    }
}
