//! Entry point into the create-capability workflow.

use std::sync::Arc;

use async_trait::async_trait;

use crate::capabilities::capability::{
    Arguments, Capability, CapabilityContext, CapabilityOutput, ParamType, ParameterSchema,
};
use crate::error::CapabilityError;
use crate::workflow::create_capability::WORKFLOW_NAME;
use crate::workflow::{WorkflowHost, WorkflowReply, error_chain};

/// Starts (or, given a session id, resumes) the create-capability workflow.
pub struct CreateCapability {
    host: Arc<WorkflowHost>,
}

impl CreateCapability {
    pub fn new(host: Arc<WorkflowHost>) -> Self {
        Self { host }
    }
}

/// Text shown to the human. Suspensions carry the id to echo back.
pub fn render_reply(reply: &WorkflowReply) -> String {
    match reply {
        WorkflowReply::Suspended {
            session_id, prompt, ..
        } => format!("session_id: {session_id}\n\n{prompt}"),
        WorkflowReply::Completed { message, .. } => message.clone(),
    }
}

#[async_trait]
impl Capability for CreateCapability {
    fn name(&self) -> &str {
        "create_capability"
    }

    fn description(&self) -> &str {
        "Create a NEW capability (tool/agent) from a description of what it should do. \
         Only call this when the user specifically asks to build a new capability."
    }

    fn tags(&self) -> &[&str] {
        &["agent"]
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
            .optional(
                "request",
                ParamType::String,
                "What the new capability should do. Defaults to the user's last message.",
            )
            .optional(
                "session_id",
                ParamType::String,
                "Session id of a suspended creation to continue",
            )
    }

    async fn invoke(
        &self,
        args: Arguments,
        ctx: &CapabilityContext,
    ) -> Result<CapabilityOutput, CapabilityError> {
        drive_workflow(&self.host, WORKFLOW_NAME, self.name(), &args, ctx).await
    }
}

/// Start `workflow` from the `request` argument (or the last user message),
/// or resume it when a `session_id` argument is given.
pub(crate) async fn drive_workflow(
    host: &WorkflowHost,
    workflow: &str,
    capability: &str,
    args: &Arguments,
    ctx: &CapabilityContext,
) -> Result<CapabilityOutput, CapabilityError> {
    let failed = |reason: String| CapabilityError::ExecutionFailed {
        name: capability.to_string(),
        reason,
    };
    let last_user = ctx
        .conversation
        .last_user()
        .map(|m| m.content.clone())
        .unwrap_or_default();

    let reply = if let Some(session_id) = args.get("session_id").and_then(|v| v.as_str()) {
        host.resume(session_id, &last_user).await
    } else {
        let request = args
            .get("request")
            .and_then(|v| v.as_str())
            .filter(|r| !r.trim().is_empty())
            .map(str::to_string)
            .unwrap_or(last_user);
        if request.trim().is_empty() {
            return Err(failed(format!("no request to start {workflow} from")));
        }
        host.start(workflow, &request, &ctx.thread_id).await
    };

    reply
        .map(|reply| CapabilityOutput::Text(render_reply(&reply)))
        .map_err(|e| failed(error_chain(&e)))
}
