//! Capability dispatch for one conversational turn.
//!
//! The reasoning backend chooses among the capabilities whose tags match the
//! turn; selections run sequentially in backend order and every result lands
//! in the conversation as a function message. Capability failures (bad
//! arguments, runtime errors, panics) become error-content messages and never
//! stop sibling selections. Only a failed selection aborts the turn.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};

use crate::capabilities::{
    Capability, CapabilityContext, CapabilityOutput, CapabilityRegistry, TextStream,
    coerce_arguments,
};
use crate::conversation::Conversation;
use crate::error::{CapabilityError, DispatchError};
use crate::llm::{ChatMessage, ReasoningBackend, Selection, ToolCall};
use crate::stream_bridge::{StreamBridge, StreamHandle};

/// Per-turn routing options.
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Candidate filter. Empty means every capability.
    pub tags: Vec<String>,
    /// Invoked once when the backend selects nothing.
    pub fallback: Option<String>,
    /// Bridge key for the first streaming result. Without one, streams are drained inline.
    pub stream_key: Option<String>,
}

impl DispatchOptions {
    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_fallback(mut self, name: impl Into<String>) -> Self {
        self.fallback = Some(name.into());
        self
    }

    pub fn with_stream_key(mut self, key: impl Into<String>) -> Self {
        self.stream_key = Some(key.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationStatus {
    /// Result appended to the conversation.
    Completed,
    /// Published to the stream bridge; appended once drained.
    Streaming { key: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRecord {
    pub capability: String,
    pub status: InvocationStatus,
    /// Whether this was the fallback invocation.
    pub fallback: bool,
}

/// What happened during a turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub invocations: Vec<InvocationRecord>,
    /// Backend's own answer when nothing was selected and no fallback is configured.
    pub direct_answer: Option<String>,
    /// Key of the stream published this turn, if any.
    pub stream_key: Option<String>,
}

/// Selects and invokes capabilities.
pub struct Dispatcher {
    registry: Arc<CapabilityRegistry>,
    backend: Arc<dyn ReasoningBackend>,
    bridge: Arc<StreamBridge>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        backend: Arc<dyn ReasoningBackend>,
        bridge: Arc<StreamBridge>,
    ) -> Self {
        Self {
            registry,
            backend,
            bridge,
        }
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn bridge(&self) -> &Arc<StreamBridge> {
        &self.bridge
    }

    /// Run one turn. On a selection error the conversation is left untouched.
    pub async fn dispatch(
        &self,
        conversation: &mut Conversation,
        thread_id: &str,
        options: &DispatchOptions,
    ) -> Result<DispatchOutcome, DispatchError> {
        let candidates = self.registry.find_by_tags(&options.tags).await;
        let definitions = CapabilityRegistry::definitions(&candidates);
        tracing::debug!(
            thread_id,
            tags = ?options.tags,
            candidates = candidates.len(),
            "Selecting capabilities"
        );

        let selection = self
            .backend
            .select(conversation.messages(), &definitions)
            .await
            .map_err(|e| {
                tracing::warn!(thread_id, error = %e, "Capability selection failed");
                DispatchError::Selection(e)
            })?;

        let mut turn = Turn {
            bridge: &self.bridge,
            thread_id,
            stream_key: options.stream_key.as_deref(),
            outcome: DispatchOutcome::default(),
        };

        let direct = match selection {
            Selection::Calls { calls, .. } if !calls.is_empty() => {
                for call in &calls {
                    let capability = candidates.iter().find(|c| c.name() == call.name);
                    turn.run(conversation, call, capability, false).await;
                }
                return Ok(turn.outcome);
            }
            Selection::Calls { content, .. } => content.unwrap_or_default(),
            Selection::Direct(answer) => answer,
        };

        match options.fallback.as_deref() {
            Some(name) => {
                let fallback = self.registry.find_by_name(name).await;
                let call = ToolCall {
                    id: format!("fallback-{}", uuid::Uuid::new_v4()),
                    name: name.to_string(),
                    arguments: serde_json::json!({}),
                };
                tracing::debug!(thread_id, capability = %name, "No selection, invoking fallback");
                turn.run(conversation, &call, fallback.as_ref(), true).await;
            }
            None => turn.outcome.direct_answer = Some(direct),
        }
        Ok(turn.outcome)
    }
}

/// Mutable bookkeeping for one dispatch.
struct Turn<'a> {
    bridge: &'a StreamBridge,
    thread_id: &'a str,
    /// Taken by the first stream of the turn.
    stream_key: Option<&'a str>,
    outcome: DispatchOutcome,
}

impl Turn<'_> {
    async fn run(
        &mut self,
        conversation: &mut Conversation,
        call: &ToolCall,
        capability: Option<&Arc<dyn Capability>>,
        fallback: bool,
    ) {
        let status = match self.invoke(conversation, call, capability).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(
                    thread_id = self.thread_id,
                    capability = %call.name,
                    error = %e,
                    "Capability invocation failed"
                );
                conversation.push(ChatMessage::function_result(
                    Some(call.id.clone()),
                    &call.name,
                    format!("Error: {e}"),
                ));
                InvocationStatus::Failed {
                    error: e.to_string(),
                }
            }
        };
        self.outcome.invocations.push(InvocationRecord {
            capability: call.name.clone(),
            status,
            fallback,
        });
    }

    async fn invoke(
        &mut self,
        conversation: &mut Conversation,
        call: &ToolCall,
        capability: Option<&Arc<dyn Capability>>,
    ) -> Result<InvocationStatus, CapabilityError> {
        let name = call.name.as_str();
        let capability = capability.ok_or_else(|| CapabilityError::NotCandidate {
            name: name.to_string(),
        })?;

        let args = coerce_arguments(&capability.parameters(), &call.arguments).map_err(|source| {
            CapabilityError::InvalidArguments {
                name: name.to_string(),
                source,
            }
        })?;

        let ctx = CapabilityContext::new(self.thread_id, conversation.clone());
        let output = AssertUnwindSafe(capability.invoke(args, &ctx))
            .catch_unwind()
            .await
            .map_err(|_| CapabilityError::Panicked {
                name: name.to_string(),
            })??;

        let content = match output {
            CapabilityOutput::Stream(stream) => match self.stream_key.take() {
                Some(key) => {
                    let handle = StreamHandle::new(key, name, self.thread_id, stream)
                        .with_tool_call_id(Some(call.id.clone()));
                    self.bridge
                        .publish(handle)
                        .map_err(|e| CapabilityError::Stream {
                            name: name.to_string(),
                            reason: e.to_string(),
                        })?;
                    self.outcome.stream_key = Some(key.to_string());
                    return Ok(InvocationStatus::Streaming {
                        key: key.to_string(),
                    });
                }
                None => drain(name, stream).await?,
            },
            eager => eager.render().unwrap_or_default(),
        };

        conversation.push(ChatMessage::function_result(
            Some(call.id.clone()),
            name,
            content,
        ));
        Ok(InvocationStatus::Completed)
    }
}

/// Collect a stream into one string, treating a panic mid-stream like an error.
pub async fn drain(capability: &str, stream: TextStream) -> Result<String, CapabilityError> {
    let mut stream = AssertUnwindSafe(stream).catch_unwind();
    let mut text = String::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(Ok(fragment)) => text.push_str(&fragment),
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(CapabilityError::Panicked {
                    name: capability.to_string(),
                });
            }
        }
    }
    Ok(text)
}
