//! Entry point into the edit-capability workflow.

use std::sync::Arc;

use async_trait::async_trait;

use crate::capabilities::builtin::create_capability::drive_workflow;
use crate::capabilities::capability::{
    Arguments, Capability, CapabilityContext, CapabilityOutput, ParamType, ParameterSchema,
};
use crate::error::CapabilityError;
use crate::workflow::WorkflowHost;
use crate::workflow::edit_capability::WORKFLOW_NAME;

/// Starts (or, given a session id, resumes) a revision of a generated capability.
pub struct EditCapability {
    host: Arc<WorkflowHost>,
}

impl EditCapability {
    pub fn new(host: Arc<WorkflowHost>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Capability for EditCapability {
    fn name(&self) -> &str {
        "edit_capability"
    }

    fn description(&self) -> &str {
        "Update the code of a capability (tool/agent) that was created earlier. \
         Call this when the user wants to change, fix or extend an existing capability."
    }

    fn tags(&self) -> &[&str] {
        &["agent"]
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
            .optional(
                "request",
                ParamType::String,
                "Which capability to change and how. Defaults to the user's last message.",
            )
            .optional(
                "session_id",
                ParamType::String,
                "Session id of a suspended edit to continue",
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
