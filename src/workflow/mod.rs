//! Suspend/resume workflow engine.
//!
//! A workflow is a graph of async nodes over a serializable state. A node may
//! suspend with a prompt for the human; the host checkpoints the state in the
//! session registry and re-enters that node with the answer on resume.

pub mod checkpoint;
pub mod create_capability;
pub mod edit_capability;
pub mod engine;
pub mod graph;
pub mod host;
pub mod prompts;

pub use checkpoint::Checkpoint;
pub use engine::{Engine, ErasedOutcome, RunOutcome, WorkflowRunner, WorkflowState};
pub use graph::{Graph, GraphBuilder, NodeResult, Target};
pub use host::{WorkflowHost, WorkflowReply, error_chain};
