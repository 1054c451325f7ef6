//! General question answering, streamed from the reasoning backend.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;

use crate::capabilities::capability::{
    Arguments, Capability, CapabilityContext, CapabilityOutput, ParameterSchema,
};
use crate::error::CapabilityError;
use crate::llm::ReasoningBackend;

/// Answers from the conversation so far. Used as the default fallback.
pub struct AnswerQuestion {
    backend: Arc<dyn ReasoningBackend>,
}

impl AnswerQuestion {
    pub fn new(backend: Arc<dyn ReasoningBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Capability for AnswerQuestion {
    fn name(&self) -> &str {
        "answer_question"
    }

    fn description(&self) -> &str {
        "Answer a general question or chat with the user when no other capability fits."
    }

    fn tags(&self) -> &[&str] {
        &["chat"]
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
    }

    async fn invoke(
        &self,
        _args: Arguments,
        ctx: &CapabilityContext,
    ) -> Result<CapabilityOutput, CapabilityError> {
        let stream = self
            .backend
            .stream(ctx.conversation.messages())
            .await
            .map_err(|e| CapabilityError::Stream {
                name: self.name().to_string(),
                reason: e.to_string(),
            })?;

        let name = self.name().to_string();
        Ok(CapabilityOutput::Stream(
            stream
                .map(move |fragment| {
                    fragment.map_err(|e| CapabilityError::Stream {
                        name: name.clone(),
                        reason: e.to_string(),
                    })
                })
                .boxed(),
        ))
    }
}
