//! Error types for hive-mind.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Stream from {provider} failed: {reason}")]
    StreamFailed { provider: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised while invoking a single capability.
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("Capability {name} not found")]
    NotFound { name: String },

    #[error("Capability {name} is not available for this turn")]
    NotCandidate { name: String },

    #[error("Invalid arguments for capability {name}: {source}")]
    InvalidArguments {
        name: String,
        #[source]
        source: CoercionError,
    },

    #[error("Capability {name} failed: {reason}")]
    ExecutionFailed { name: String, reason: String },

    #[error("Capability {name} panicked")]
    Panicked { name: String },

    #[error("Capability {name} is not authorized: {reason}")]
    NotAuthorized { name: String, reason: String },

    #[error("Capability {name} stream failed: {reason}")]
    Stream { name: String, reason: String },
}

/// Argument coercion failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoercionError {
    #[error("arguments must be a JSON object, got {found}")]
    NotAnObject { found: String },

    #[error("missing required argument `{name}`")]
    MissingArgument { name: String },

    #[error("argument `{name}` expected {expected}, got {found}")]
    InvalidType {
        name: String,
        expected: String,
        found: String,
    },
}

/// Capability registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Capability {name} is already registered")]
    Duplicate { name: String },
}

/// Errors that abort a whole dispatch turn.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Capability selection failed: {0}")]
    Selection(#[source] LlmError),
}

/// Session registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Session {id} not found")]
    NotFound { id: String },

    #[error("Session {id} is already being resumed")]
    Busy { id: String },

    #[error("Session {id} is not waiting for input")]
    NotSuspended { id: String },
}

/// Workflow engine and host errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Workflow {name} is not registered")]
    UnknownWorkflow { name: String },

    #[error("Invalid workflow graph: {0}")]
    InvalidGraph(String),

    #[error("Node {node} does not exist")]
    UnknownNode { node: String },

    #[error("No route from node {from}: {detail}")]
    Unroutable { from: String, detail: String },

    #[error("Workflow exceeded {limit} steps")]
    StepLimitExceeded { limit: usize },

    #[error("Node {node} failed: {source}")]
    Node {
        node: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Checkpoint for workflow {found} v{found_version} cannot resume {expected} v{expected_version}")]
    CheckpointMismatch {
        expected: String,
        expected_version: u32,
        found: String,
        found_version: u32,
    },

    #[error("Checkpoint state could not be (de)serialized: {0}")]
    CheckpointState(#[from] serde_json::Error),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

impl WorkflowError {
    /// Whether the caller referenced a session that does not exist (or no longer does).
    pub fn is_session_not_found(&self) -> bool {
        matches!(self, Self::Session(SessionError::NotFound { .. }))
    }
}

/// Stream bridge errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamBridgeError {
    #[error("A stream is already published under key {key}")]
    Occupied { key: String },
}

/// Capability workspace errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("Invalid capability name: {0}")]
    InvalidName(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
