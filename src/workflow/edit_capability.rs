//! Revise a capability written earlier, with the same review loop as creation.
//!
//! ```text
//! find_capability -> get_feedback --confirmed--> update_code -> get_feedback
//!       ^               |                           ^              |
//!       +---rejected----+                           +--rejected----+
//!
//! get_feedback (code approved) -> generate_dependencies -> get_feedback
//! get_feedback (dependencies approved) -> write_dependencies -> write_code
//!                                      \-> write_code (when none are needed)
//! get_feedback (rejected max_rejections times) -> gave_up
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;
use crate::llm::{ReasoningBackend, extract_as};
use crate::workflow::create_capability::{
    CapabilityName, GeneratedCode, propose_dependencies, read_review, snake_case,
};
use crate::workflow::engine::{Engine, WorkflowState};
use crate::workflow::graph::{GraphBuilder, NodeResult, Target};
use crate::workflow::prompts;
use crate::workspace::CapabilityWorkspace;

pub const WORKFLOW_NAME: &str = "edit_capability";

pub mod nodes {
    pub const FIND_CAPABILITY: &str = "find_capability";
    pub const GET_FEEDBACK: &str = "get_feedback";
    pub const UPDATE_CODE: &str = "update_code";
    pub const GENERATE_DEPENDENCIES: &str = "generate_dependencies";
    pub const WRITE_DEPENDENCIES: &str = "write_dependencies";
    pub const WRITE_CODE: &str = "write_code";
    pub const GAVE_UP: &str = "gave_up";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditStep {
    #[default]
    New,
    Confirm,
    Code,
    Dependencies,
    Done,
    GaveUp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditCapabilityState {
    pub request: String,
    pub capability_name: String,
    pub current_code: String,
    pub generated_code: String,
    pub dependencies: Vec<String>,
    pub step: EditStep,
    pub approve: Option<bool>,
    pub user_feedback: String,
    pub rejections: u32,
    pub max_rejections: u32,
    pub message: String,
}

impl EditCapabilityState {
    pub fn new(request: &str, max_rejections: u32) -> Self {
        Self {
            request: request.to_string(),
            capability_name: String::new(),
            current_code: String::new(),
            generated_code: String::new(),
            dependencies: Vec::new(),
            step: EditStep::New,
            approve: None,
            user_feedback: String::new(),
            rejections: 0,
            max_rejections,
            message: String::new(),
        }
    }
}

impl WorkflowState for EditCapabilityState {
    const NAME: &'static str = WORKFLOW_NAME;
    const VERSION: u32 = 1;

    fn completion_message(&self) -> String {
        self.message.clone()
    }
}

// ── Nodes ───────────────────────────────────────────────────────────

/// Longest capability name mentioned in `text`, with or without underscores.
fn mentioned<'a>(text: &str, names: &'a [String]) -> Option<&'a String> {
    let text = text.to_lowercase();
    names
        .iter()
        .filter(|name| text.contains(name.as_str()) || text.contains(&name.replace('_', " ")))
        .max_by_key(|name| name.len())
}

async fn find_capability(
    backend: Arc<dyn ReasoningBackend>,
    workspace: Arc<CapabilityWorkspace>,
    mut state: EditCapabilityState,
) -> anyhow::Result<NodeResult<EditCapabilityState>> {
    // After "that's not the one", the human's correction is the new lookup.
    let lookup = match state.step {
        EditStep::Confirm => state.user_feedback.clone(),
        _ => state.request.clone(),
    };
    let names = workspace.list_capabilities().await?;

    let mut found = mentioned(&lookup, &names).cloned();
    if found.is_none() && !names.is_empty() {
        let suggestion: CapabilityName = extract_as(
            backend.as_ref(),
            &prompts::find_capability(&lookup, &names),
            &prompts::name_schema(),
        )
        .await?;
        let name = snake_case(&suggestion.name);
        found = names.into_iter().find(|n| *n == name);
    }

    let Some(name) = found else {
        state.step = EditStep::Done;
        state.message = format!("No generated capability matches \"{}\".", lookup.trim());
        return Ok(NodeResult::Done(state));
    };
    let Some(code) = workspace.read_capability(&name).await? else {
        anyhow::bail!("capability `{name}` disappeared from the workspace");
    };

    tracing::debug!(capability = %name, "Found capability to edit");
    state.capability_name = name;
    state.current_code = code;
    state.step = EditStep::Confirm;
    state.approve = None;
    Ok(NodeResult::Continue(state))
}

async fn get_feedback(
    backend: Arc<dyn ReasoningBackend>,
    mut state: EditCapabilityState,
    answer: Option<String>,
) -> anyhow::Result<NodeResult<EditCapabilityState>> {
    let Some(answer) = answer else {
        let prompt = match state.step {
            EditStep::Confirm => {
                prompts::confirm_capability(&state.capability_name, &state.current_code)
            }
            EditStep::Code => prompts::code_review(&state.generated_code),
            EditStep::Dependencies if !state.dependencies.is_empty() => {
                prompts::dependency_review(&state.dependencies)
            }
            EditStep::Dependencies => {
                state.approve = Some(true);
                return Ok(NodeResult::Continue(state));
            }
            other => anyhow::bail!("nothing to review at step {other:?}"),
        };
        return Ok(NodeResult::Suspend { prompt, state });
    };

    let review = read_review(backend.as_ref(), &answer).await?;
    state.approve = Some(review.approve);
    if !review.approve {
        state.user_feedback = review.feedback;
        state.rejections += 1;
        tracing::info!(step = ?state.step, rejections = state.rejections, "Edit review rejected");
    }
    Ok(NodeResult::Continue(state))
}

fn route_feedback(state: &EditCapabilityState) -> Result<Target, String> {
    use nodes::*;

    match (state.approve, state.step) {
        (Some(false), _) if state.rejections >= state.max_rejections => Ok(Target::Node(GAVE_UP)),
        (Some(true), EditStep::Confirm) => Ok(Target::Node(UPDATE_CODE)),
        (Some(false), EditStep::Confirm) => Ok(Target::Node(FIND_CAPABILITY)),
        (Some(true), EditStep::Code) => Ok(Target::Node(GENERATE_DEPENDENCIES)),
        (Some(false), EditStep::Code | EditStep::Dependencies) => Ok(Target::Node(UPDATE_CODE)),
        (Some(true), EditStep::Dependencies) if !state.dependencies.is_empty() => {
            Ok(Target::Node(WRITE_DEPENDENCIES))
        }
        (Some(true), EditStep::Dependencies) => Ok(Target::Node(WRITE_CODE)),
        (approve, step) => Err(format!("unhandled state: approve={approve:?}, step={step:?}")),
    }
}

async fn update_code(
    backend: Arc<dyn ReasoningBackend>,
    mut state: EditCapabilityState,
) -> anyhow::Result<NodeResult<EditCapabilityState>> {
    let instructions = match state.step {
        EditStep::Code | EditStep::Dependencies => {
            prompts::revision_instructions(&state.generated_code, &state.user_feedback)
        }
        _ => prompts::edit_code(&state.current_code, &state.request),
    };
    let generated: GeneratedCode = extract_as(
        backend.as_ref(),
        &prompts::generate_code(&instructions),
        &prompts::code_schema(),
    )
    .await?;

    state.generated_code = generated.code;
    state.step = EditStep::Code;
    state.approve = None;
    Ok(NodeResult::Continue(state))
}

async fn generate_dependencies(
    backend: Arc<dyn ReasoningBackend>,
    workspace: Arc<CapabilityWorkspace>,
    mut state: EditCapabilityState,
) -> anyhow::Result<NodeResult<EditCapabilityState>> {
    state.dependencies =
        propose_dependencies(backend.as_ref(), &workspace, &state.generated_code).await?;
    state.step = EditStep::Dependencies;
    state.approve = None;
    Ok(NodeResult::Continue(state))
}

async fn write_dependencies(
    workspace: Arc<CapabilityWorkspace>,
    state: EditCapabilityState,
) -> anyhow::Result<NodeResult<EditCapabilityState>> {
    workspace.append_dependencies(&state.dependencies).await?;
    Ok(NodeResult::Continue(state))
}

async fn write_code(
    workspace: Arc<CapabilityWorkspace>,
    mut state: EditCapabilityState,
) -> anyhow::Result<NodeResult<EditCapabilityState>> {
    let path = workspace
        .write_capability(&state.capability_name, &state.generated_code)
        .await?;
    state.step = EditStep::Done;
    state.message = format!(
        "Capability `{}` has been updated at {}.",
        state.capability_name,
        path.display()
    );
    Ok(NodeResult::Done(state))
}

async fn gave_up(mut state: EditCapabilityState) -> anyhow::Result<NodeResult<EditCapabilityState>> {
    state.step = EditStep::GaveUp;
    state.message = format!(
        "Stopped after {} rejected revisions. `{}` was left unchanged.",
        state.rejections, state.capability_name
    );
    Ok(NodeResult::Done(state))
}

// ── Graph ───────────────────────────────────────────────────────────

/// Build the edit-capability engine.
pub fn edit_capability_engine(
    backend: Arc<dyn ReasoningBackend>,
    workspace: Arc<CapabilityWorkspace>,
    max_rejections: u32,
) -> Result<Engine<EditCapabilityState>, WorkflowError> {
    use nodes::*;

    let graph = GraphBuilder::new()
        .set_entry(FIND_CAPABILITY)
        .add_node(FIND_CAPABILITY, {
            let backend = backend.clone();
            let workspace = workspace.clone();
            move |state, _| find_capability(backend.clone(), workspace.clone(), state)
        })
        .add_node(GET_FEEDBACK, {
            let backend = backend.clone();
            move |state, answer| get_feedback(backend.clone(), state, answer)
        })
        .add_node(UPDATE_CODE, {
            let backend = backend.clone();
            move |state, _| update_code(backend.clone(), state)
        })
        .add_node(GENERATE_DEPENDENCIES, {
            let backend = backend.clone();
            let workspace = workspace.clone();
            move |state, _| generate_dependencies(backend.clone(), workspace.clone(), state)
        })
        .add_node(WRITE_DEPENDENCIES, {
            let workspace = workspace.clone();
            move |state, _| write_dependencies(workspace.clone(), state)
        })
        .add_node(WRITE_CODE, {
            let workspace = workspace.clone();
            move |state, _| write_code(workspace.clone(), state)
        })
        .add_node(GAVE_UP, |state, _| gave_up(state))
        .add_edge(FIND_CAPABILITY, Target::Node(GET_FEEDBACK))
        .add_conditional_edges(
            GET_FEEDBACK,
            route_feedback,
            &[
                Target::Node(FIND_CAPABILITY),
                Target::Node(UPDATE_CODE),
                Target::Node(GENERATE_DEPENDENCIES),
                Target::Node(WRITE_DEPENDENCIES),
                Target::Node(WRITE_CODE),
                Target::Node(GAVE_UP),
            ],
        )
        .add_edge(UPDATE_CODE, Target::Node(GET_FEEDBACK))
        .add_edge(GENERATE_DEPENDENCIES, Target::Node(GET_FEEDBACK))
        .add_edge(WRITE_DEPENDENCIES, Target::Node(WRITE_CODE))
        .add_edge(WRITE_CODE, Target::End)
        .add_edge(GAVE_UP, Target::End)
        .compile()?;

    Ok(Engine::new(graph, move |request: &str| {
        EditCapabilityState::new(request, max_rejections)
    }))
}
