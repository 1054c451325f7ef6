//! Suspend/resume execution of a workflow graph.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::WorkflowError;
use crate::workflow::checkpoint::Checkpoint;
use crate::workflow::graph::{Graph, NodeResult, Target};

/// Default guard against runaway cycles.
pub const DEFAULT_MAX_STEPS: usize = 64;

/// State record of one workflow definition.
pub trait WorkflowState: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Workflow name recorded in checkpoints.
    const NAME: &'static str;
    /// Bumped whenever the serialized shape changes.
    const VERSION: u32;

    /// User-facing summary once the workflow is done.
    fn completion_message(&self) -> String;
}

/// Where a run stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome<S> {
    Suspended {
        node: String,
        prompt: String,
        state: S,
    },
    Done(S),
}

type InitFn<S> = Arc<dyn Fn(&str) -> S + Send + Sync>;

/// Runs one workflow definition.
pub struct Engine<S> {
    graph: Graph<S>,
    init: InitFn<S>,
    max_steps: usize,
}

impl<S: WorkflowState> Engine<S> {
    /// `init` builds the initial state from the request that starts a run.
    pub fn new<F>(graph: Graph<S>, init: F) -> Self
    where
        F: Fn(&str) -> S + Send + Sync + 'static,
    {
        Self {
            graph,
            init: Arc::new(init),
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Start a new run at the entry node.
    pub async fn start(&self, request: &str) -> Result<RunOutcome<S>, WorkflowError> {
        let state = (self.init)(request);
        self.run(self.graph.entry().to_string(), state, None).await
    }

    /// Re-enter the node that suspended, handing it `answer`.
    pub async fn resume(
        &self,
        checkpoint: &Checkpoint,
        answer: String,
    ) -> Result<RunOutcome<S>, WorkflowError> {
        if checkpoint.workflow != S::NAME || checkpoint.version != S::VERSION {
            return Err(WorkflowError::CheckpointMismatch {
                expected: S::NAME.to_string(),
                expected_version: S::VERSION,
                found: checkpoint.workflow.clone(),
                found_version: checkpoint.version,
            });
        }
        if !self.graph.contains(&checkpoint.node) {
            return Err(WorkflowError::UnknownNode {
                node: checkpoint.node.clone(),
            });
        }

        let state: S = serde_json::from_value(checkpoint.state.clone())?;
        self.run(checkpoint.node.clone(), state, Some(answer)).await
    }

    async fn run(
        &self,
        mut node: String,
        mut state: S,
        mut answer: Option<String>,
    ) -> Result<RunOutcome<S>, WorkflowError> {
        for _ in 0..self.max_steps {
            tracing::debug!(workflow = S::NAME, node = %node, "Entering node");
            match self.graph.run_node(&node, state, answer.take()).await? {
                NodeResult::Continue(next) => match self.graph.next(&node, &next)? {
                    Target::End => return Ok(RunOutcome::Done(next)),
                    Target::Node(to) => {
                        node = to.to_string();
                        state = next;
                    }
                },
                NodeResult::Suspend { prompt, state } => {
                    tracing::debug!(workflow = S::NAME, node = %node, "Suspended");
                    return Ok(RunOutcome::Suspended { node, prompt, state });
                }
                NodeResult::Done(done) => return Ok(RunOutcome::Done(done)),
            }
        }
        Err(WorkflowError::StepLimitExceeded {
            limit: self.max_steps,
        })
    }
}

/// Outcome of a type-erased run.
#[derive(Debug, Clone, PartialEq)]
pub enum ErasedOutcome {
    Suspended {
        node: String,
        prompt: String,
        state: serde_json::Value,
    },
    Done {
        message: String,
    },
}

/// Object-safe view of an engine, so hosts can hold workflows of different state types.
#[async_trait]
pub trait WorkflowRunner: Send + Sync {
    fn name(&self) -> &'static str;

    fn version(&self) -> u32;

    async fn start(&self, request: &str) -> Result<ErasedOutcome, WorkflowError>;

    async fn resume(
        &self,
        checkpoint: &Checkpoint,
        answer: String,
    ) -> Result<ErasedOutcome, WorkflowError>;
}

fn erase<S: WorkflowState>(outcome: RunOutcome<S>) -> Result<ErasedOutcome, WorkflowError> {
    Ok(match outcome {
        RunOutcome::Suspended {
            node,
            prompt,
            state,
        } => ErasedOutcome::Suspended {
            node,
            prompt,
            state: serde_json::to_value(&state)?,
        },
        RunOutcome::Done(state) => ErasedOutcome::Done {
            message: state.completion_message(),
        },
    })
}

#[async_trait]
impl<S: WorkflowState> WorkflowRunner for Engine<S> {
    fn name(&self) -> &'static str {
        S::NAME
    }

    fn version(&self) -> u32 {
        S::VERSION
    }

    async fn start(&self, request: &str) -> Result<ErasedOutcome, WorkflowError> {
        erase(Engine::start(self, request).await?)
    }

    async fn resume(
        &self,
        checkpoint: &Checkpoint,
        answer: String,
    ) -> Result<ErasedOutcome, WorkflowError> {
        erase(Engine::resume(self, checkpoint, answer).await?)
    }
}
