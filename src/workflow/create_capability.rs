//! Create a capability from a natural-language request, with human review
//! of the generated code and of any new dependencies.
//!
//! ```text
//! generate_code -> get_feedback --approved--> generate_dependencies -> get_feedback
//!      ^               |                                                  |
//!      +---rejected----+<--------------------rejected--------------------+
//!
//! get_feedback (dependencies approved) -> write_dependencies -> generate_name -> write_code
//!                                      \-> generate_name (when none are needed)
//! get_feedback (rejected max_rejections times) -> gave_up
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;
use crate::llm::{ReasoningBackend, extract_as};
use crate::workflow::engine::{Engine, WorkflowState};
use crate::workflow::graph::{GraphBuilder, NodeResult, Target};
use crate::workflow::prompts;
use crate::workspace::CapabilityWorkspace;

pub const WORKFLOW_NAME: &str = "create_capability";

/// Rejections tolerated before the workflow gives up.
pub const DEFAULT_MAX_REJECTIONS: u32 = 5;

pub mod nodes {
    pub const GENERATE_CODE: &str = "generate_code";
    pub const GET_FEEDBACK: &str = "get_feedback";
    pub const GENERATE_DEPENDENCIES: &str = "generate_dependencies";
    pub const WRITE_DEPENDENCIES: &str = "write_dependencies";
    pub const GENERATE_NAME: &str = "generate_name";
    pub const WRITE_CODE: &str = "write_code";
    pub const GAVE_UP: &str = "gave_up";
}

/// Which artifact is under review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    #[default]
    New,
    Code,
    Dependencies,
    Name,
    Done,
    GaveUp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateCapabilityState {
    pub code_instructions: String,
    pub generated_code: String,
    pub dependencies: Vec<String>,
    pub step: Step,
    pub approve: Option<bool>,
    pub user_feedback: String,
    pub capability_name: String,
    pub rejections: u32,
    pub max_rejections: u32,
    pub message: String,
}

impl CreateCapabilityState {
    pub fn new(request: &str, max_rejections: u32) -> Self {
        Self {
            code_instructions: request.to_string(),
            generated_code: String::new(),
            dependencies: Vec::new(),
            step: Step::New,
            approve: None,
            user_feedback: String::new(),
            capability_name: String::new(),
            rejections: 0,
            max_rejections,
            message: String::new(),
        }
    }
}

impl WorkflowState for CreateCapabilityState {
    const NAME: &'static str = WORKFLOW_NAME;
    const VERSION: u32 = 1;

    fn completion_message(&self) -> String {
        self.message.clone()
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeneratedCode {
    pub code: String,
}

#[derive(Debug, Deserialize)]
struct UserFeedback {
    approve: bool,
    #[serde(default)]
    user_feedback: String,
}

#[derive(Debug, Deserialize)]
struct DependencyUpdate {
    update: bool,
    #[serde(default)]
    dependencies: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CapabilityName {
    pub name: String,
}

// ── Nodes ───────────────────────────────────────────────────────────

async fn generate_code(
    backend: Arc<dyn ReasoningBackend>,
    mut state: CreateCapabilityState,
) -> anyhow::Result<NodeResult<CreateCapabilityState>> {
    let instructions = match state.step {
        Step::Code | Step::Dependencies => {
            prompts::revision_instructions(&state.generated_code, &state.user_feedback)
        }
        _ => state.code_instructions.clone(),
    };

    let generated: GeneratedCode = extract_as(
        backend.as_ref(),
        &prompts::generate_code(&instructions),
        &prompts::code_schema(),
    )
    .await?;

    state.generated_code = generated.code;
    state.step = Step::Code;
    state.approve = None;
    Ok(NodeResult::Continue(state))
}

/// The revision request as the human wrote it. Extracted text that is not a
/// literal part of the answer is discarded in favour of the raw answer.
pub(crate) fn verbatim_feedback(extracted: &str, answer: &str) -> String {
    let extracted = extracted.trim();
    if !extracted.is_empty() && answer.contains(extracted) {
        extracted.to_string()
    } else {
        answer.trim().to_string()
    }
}

async fn get_feedback(
    backend: Arc<dyn ReasoningBackend>,
    mut state: CreateCapabilityState,
    answer: Option<String>,
) -> anyhow::Result<NodeResult<CreateCapabilityState>> {
    let Some(answer) = answer else {
        return match state.step {
            Step::Code => Ok(NodeResult::Suspend {
                prompt: prompts::code_review(&state.generated_code),
                state,
            }),
            Step::Dependencies if !state.dependencies.is_empty() => Ok(NodeResult::Suspend {
                prompt: prompts::dependency_review(&state.dependencies),
                state,
            }),
            Step::Dependencies => {
                state.approve = Some(true);
                Ok(NodeResult::Continue(state))
            }
            other => anyhow::bail!("nothing to review at step {other:?}"),
        };
    };

    let review = read_review(backend.as_ref(), &answer).await?;
    state.approve = Some(review.approve);
    if !review.approve {
        state.user_feedback = review.feedback;
        state.rejections += 1;
        tracing::info!(
            step = ?state.step,
            rejections = state.rejections,
            "Review rejected"
        );
    }
    Ok(NodeResult::Continue(state))
}

/// A human's verdict on something under review.
pub(crate) struct Review {
    pub approve: bool,
    /// Verbatim revision request; empty when approved.
    pub feedback: String,
}

pub(crate) async fn read_review(
    backend: &dyn ReasoningBackend,
    answer: &str,
) -> anyhow::Result<Review> {
    let feedback: UserFeedback =
        extract_as(backend, &prompts::feedback(answer), &prompts::feedback_schema()).await?;
    Ok(Review {
        approve: feedback.approve,
        feedback: if feedback.approve {
            String::new()
        } else {
            verbatim_feedback(&feedback.user_feedback, answer)
        },
    })
}

/// Dependencies `code` needs beyond those already in the manifest.
pub(crate) async fn propose_dependencies(
    backend: &dyn ReasoningBackend,
    workspace: &CapabilityWorkspace,
    code: &str,
) -> anyhow::Result<Vec<String>> {
    let existing = workspace.dependencies().await?;
    let update: DependencyUpdate = extract_as(
        backend,
        &prompts::generate_dependencies(code, &existing),
        &prompts::dependencies_schema(),
    )
    .await?;
    if !update.update {
        return Ok(Vec::new());
    }
    Ok(update
        .dependencies
        .into_iter()
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty() && !existing.contains(d))
        .collect())
}

fn route_feedback(state: &CreateCapabilityState) -> Result<Target, String> {
    use nodes::*;

    match (state.approve, state.step) {
        (Some(false), Step::Code | Step::Dependencies)
            if state.rejections >= state.max_rejections =>
        {
            Ok(Target::Node(GAVE_UP))
        }
        (Some(true), Step::Code) => Ok(Target::Node(GENERATE_DEPENDENCIES)),
        (Some(false), Step::Code) => Ok(Target::Node(GENERATE_CODE)),
        (Some(true), Step::Dependencies) if !state.dependencies.is_empty() => {
            Ok(Target::Node(WRITE_DEPENDENCIES))
        }
        (Some(true), Step::Dependencies) => Ok(Target::Node(GENERATE_NAME)),
        (Some(false), Step::Dependencies) => Ok(Target::Node(GENERATE_CODE)),
        (approve, step) => Err(format!("unhandled state: approve={approve:?}, step={step:?}")),
    }
}

async fn generate_dependencies(
    backend: Arc<dyn ReasoningBackend>,
    workspace: Arc<CapabilityWorkspace>,
    mut state: CreateCapabilityState,
) -> anyhow::Result<NodeResult<CreateCapabilityState>> {
    state.dependencies =
        propose_dependencies(backend.as_ref(), &workspace, &state.generated_code).await?;
    state.step = Step::Dependencies;
    state.approve = None;
    Ok(NodeResult::Continue(state))
}

async fn write_dependencies(
    workspace: Arc<CapabilityWorkspace>,
    state: CreateCapabilityState,
) -> anyhow::Result<NodeResult<CreateCapabilityState>> {
    workspace.append_dependencies(&state.dependencies).await?;
    Ok(NodeResult::Continue(state))
}

/// Lowercase snake_case identifier usable as a file stem.
pub(crate) fn snake_case(raw: &str) -> String {
    let mut name = String::with_capacity(raw.len());
    let mut prev_lower = false;
    for c in raw.trim().chars() {
        if c.is_ascii_alphanumeric() {
            if c.is_ascii_uppercase() && prev_lower {
                name.push('_');
            }
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
            name.push(c.to_ascii_lowercase());
        } else {
            if !name.ends_with('_') {
                name.push('_');
            }
            prev_lower = false;
        }
    }
    let name = name.trim_matches('_').to_string();
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        format!("capability_{name}")
    } else {
        name
    }
}

async fn generate_name(
    backend: Arc<dyn ReasoningBackend>,
    mut state: CreateCapabilityState,
) -> anyhow::Result<NodeResult<CreateCapabilityState>> {
    let suggestion: CapabilityName = extract_as(
        backend.as_ref(),
        &prompts::generate_name(&state.generated_code, &state.user_feedback),
        &prompts::name_schema(),
    )
    .await?;

    let name = snake_case(&suggestion.name);
    if name.is_empty() {
        anyhow::bail!("backend suggested an unusable name: {:?}", suggestion.name);
    }
    state.capability_name = name;
    state.step = Step::Name;
    Ok(NodeResult::Continue(state))
}

async fn write_code(
    workspace: Arc<CapabilityWorkspace>,
    mut state: CreateCapabilityState,
) -> anyhow::Result<NodeResult<CreateCapabilityState>> {
    let path = workspace
        .write_capability(&state.capability_name, &state.generated_code)
        .await?;
    state.step = Step::Done;
    state.message = format!(
        "Capability `{}` has been created at {}.",
        state.capability_name,
        path.display()
    );
    Ok(NodeResult::Done(state))
}

async fn gave_up(mut state: CreateCapabilityState) -> anyhow::Result<NodeResult<CreateCapabilityState>> {
    state.step = Step::GaveUp;
    state.message = format!(
        "Stopped after {} rejected revisions. Start again with new instructions when you're ready.",
        state.rejections
    );
    Ok(NodeResult::Done(state))
}

// ── Graph ───────────────────────────────────────────────────────────

/// Build the create-capability engine.
pub fn create_capability_engine(
    backend: Arc<dyn ReasoningBackend>,
    workspace: Arc<CapabilityWorkspace>,
    max_rejections: u32,
) -> Result<Engine<CreateCapabilityState>, WorkflowError> {
    use nodes::*;

    let graph = GraphBuilder::new()
        .set_entry(GENERATE_CODE)
        .add_node(GENERATE_CODE, {
            let backend = backend.clone();
            move |state, _| generate_code(backend.clone(), state)
        })
        .add_node(GET_FEEDBACK, {
            let backend = backend.clone();
            move |state, answer| get_feedback(backend.clone(), state, answer)
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
        .add_node(GENERATE_NAME, {
            let backend = backend.clone();
            move |state, _| generate_name(backend.clone(), state)
        })
        .add_node(WRITE_CODE, {
            let workspace = workspace.clone();
            move |state, _| write_code(workspace.clone(), state)
        })
        .add_node(GAVE_UP, |state, _| gave_up(state))
        .add_edge(GENERATE_CODE, Target::Node(GET_FEEDBACK))
        .add_conditional_edges(
            GET_FEEDBACK,
            route_feedback,
            &[
                Target::Node(GENERATE_CODE),
                Target::Node(GENERATE_DEPENDENCIES),
                Target::Node(WRITE_DEPENDENCIES),
                Target::Node(GENERATE_NAME),
                Target::Node(GAVE_UP),
            ],
        )
        .add_edge(GENERATE_DEPENDENCIES, Target::Node(GET_FEEDBACK))
        .add_edge(WRITE_DEPENDENCIES, Target::Node(GENERATE_NAME))
        .add_edge(GENERATE_NAME, Target::Node(WRITE_CODE))
        .add_edge(WRITE_CODE, Target::End)
        .add_edge(GAVE_UP, Target::End)
        .compile()?;

    Ok(Engine::new(graph, move |request: &str| {
        CreateCapabilityState::new(request, max_rejections)
    }))
}
