//! Top-level invoker for workflows: owns sessions and turns engine outcomes
//! into checkpoints, completions or logged failures.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use crate::error::WorkflowError;
use crate::session::SessionRegistry;
use crate::workflow::checkpoint::Checkpoint;
use crate::workflow::engine::{ErasedOutcome, WorkflowRunner};

/// What the caller gets back from a start or resume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowReply {
    /// Waiting on the human. Echo `session_id` to resume.
    Suspended {
        session_id: String,
        thread_id: String,
        prompt: String,
    },
    Completed {
        session_id: String,
        message: String,
    },
}

impl WorkflowReply {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Suspended { session_id, .. } | Self::Completed { session_id, .. } => session_id,
        }
    }
}

/// Registered workflows plus the sessions running them.
pub struct WorkflowHost {
    sessions: Arc<SessionRegistry>,
    runners: HashMap<&'static str, Arc<dyn WorkflowRunner>>,
}

impl WorkflowHost {
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self {
            sessions,
            runners: HashMap::new(),
        }
    }

    pub fn register(&mut self, runner: Arc<dyn WorkflowRunner>) {
        tracing::debug!(workflow = runner.name(), "Registered workflow");
        self.runners.insert(runner.name(), runner);
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Start `workflow` for `request` in a fresh session.
    pub async fn start(
        &self,
        workflow: &str,
        request: &str,
        thread_id: &str,
    ) -> Result<WorkflowReply, WorkflowError> {
        let runner = self
            .runners
            .get(workflow)
            .cloned()
            .ok_or_else(|| WorkflowError::UnknownWorkflow {
                name: workflow.to_string(),
            })?;

        let session_id = self.sessions.create(runner.clone(), thread_id).await;
        let claim = Claim::new(self.sessions.clone(), &session_id);
        tracing::info!(workflow, session_id = %session_id, thread_id, "Starting workflow");
        let outcome = runner.start(request).await;
        let reply = self
            .settle(&session_id, thread_id, runner.as_ref(), outcome)
            .await;
        claim.disarm();
        reply
    }

    /// Resume a suspended session with the human's answer.
    pub async fn resume(&self, session_id: &str, answer: &str) -> Result<WorkflowReply, WorkflowError> {
        let (runner, checkpoint) = self.sessions.begin_resume(session_id).await?;
        let claim = Claim::new(self.sessions.clone(), session_id);
        tracing::info!(
            workflow = runner.name(),
            session_id,
            node = %checkpoint.node,
            "Resuming workflow"
        );
        let outcome = runner.resume(&checkpoint, answer.to_string()).await;
        let reply = self
            .settle(session_id, &checkpoint.thread_id, runner.as_ref(), outcome)
            .await;
        claim.disarm();
        reply
    }

    /// Drop a session without running it further.
    pub async fn abandon(&self, session_id: &str) -> bool {
        let removed = self.sessions.delete(session_id).await;
        if removed {
            tracing::info!(session_id, "Abandoned workflow session");
        }
        removed
    }

    async fn settle(
        &self,
        session_id: &str,
        thread_id: &str,
        runner: &dyn WorkflowRunner,
        outcome: Result<ErasedOutcome, WorkflowError>,
    ) -> Result<WorkflowReply, WorkflowError> {
        match outcome {
            Ok(ErasedOutcome::Suspended {
                node,
                prompt,
                state,
            }) => {
                let checkpoint = Checkpoint {
                    session_id: session_id.to_string(),
                    thread_id: thread_id.to_string(),
                    workflow: runner.name().to_string(),
                    version: runner.version(),
                    node,
                    prompt: prompt.clone(),
                    state,
                    created_at: Utc::now(),
                };
                self.sessions.suspend(session_id, checkpoint).await?;
                Ok(WorkflowReply::Suspended {
                    session_id: session_id.to_string(),
                    thread_id: thread_id.to_string(),
                    prompt,
                })
            }
            Ok(ErasedOutcome::Done { message }) => {
                self.sessions.delete(session_id).await;
                tracing::info!(workflow = runner.name(), session_id, "Workflow completed");
                Ok(WorkflowReply::Completed {
                    session_id: session_id.to_string(),
                    message,
                })
            }
            Err(e) => {
                let kept = self.sessions.release(session_id).await;
                tracing::error!(
                    workflow = runner.name(),
                    session_id,
                    checkpoint_kept = kept,
                    error = %error_chain(&e),
                    "Workflow run failed"
                );
                Err(e)
            }
        }
    }
}

/// A session marked `Running` by the current caller. If the caller goes away
/// before the run settles, the session is released back to its last checkpoint.
struct Claim {
    sessions: Arc<SessionRegistry>,
    session_id: String,
    armed: bool,
}

impl Claim {
    fn new(sessions: Arc<SessionRegistry>, session_id: &str) -> Self {
        Self {
            sessions,
            session_id: session_id.to_string(),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let sessions = Arc::clone(&self.sessions);
        let session_id = std::mem::take(&mut self.session_id);
        runtime.spawn(async move {
            let kept = sessions.release(&session_id).await;
            tracing::warn!(
                session_id = %session_id,
                checkpoint_kept = kept,
                "Workflow run cancelled before settling"
            );
        });
    }
}

/// `outer: inner: root` rendering of an error and its sources.
pub fn error_chain(error: &dyn std::error::Error) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;
    use crate::workflow::engine::{Engine, WorkflowState};
    use crate::workflow::graph::{GraphBuilder, NodeResult, Target};
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Approval {
        request: String,
        answers: Vec<String>,
    }

    impl WorkflowState for Approval {
        const NAME: &'static str = "approval";
        const VERSION: u32 = 1;

        fn completion_message(&self) -> String {
            format!("{} approved after {:?}", self.request, self.answers)
        }
    }

    async fn review(
        mut state: Approval,
        answer: Option<String>,
        fail: Arc<AtomicBool>,
    ) -> anyhow::Result<NodeResult<Approval>> {
        let Some(answer) = answer else {
            return Ok(NodeResult::Suspend {
                prompt: format!("approve {}?", state.request),
                state,
            });
        };
        if fail.load(Ordering::SeqCst) {
            anyhow::bail!("backend unavailable");
        }
        if answer == "hang" {
            std::future::pending::<()>().await;
        }
        state.answers.push(answer.clone());
        if answer == "yes" {
            Ok(NodeResult::Done(state))
        } else {
            Ok(NodeResult::Suspend {
                prompt: "try again?".into(),
                state,
            })
        }
    }

    fn host(fail: Arc<AtomicBool>) -> WorkflowHost {
        let graph = GraphBuilder::new()
            .set_entry("review")
            .add_node("review", move |s, a| review(s, a, fail.clone()))
            .add_edge("review", Target::End)
            .compile()
            .unwrap();
        let engine = Engine::new(graph, |request: &str| Approval {
            request: request.to_string(),
            answers: Vec::new(),
        });
        let mut host = WorkflowHost::new(Arc::new(SessionRegistry::new()));
        host.register(Arc::new(engine));
        host
    }

    fn suspended_id(reply: &WorkflowReply) -> String {
        match reply {
            WorkflowReply::Suspended { session_id, .. } => session_id.clone(),
            other => panic!("expected suspension, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn start_suspend_resume_complete() {
        let host = host(Arc::new(AtomicBool::new(false)));
        let reply = host.start("approval", "deploy", "thread-1").await.unwrap();
        let id = suspended_id(&reply);
        assert!(matches!(&reply, WorkflowReply::Suspended { prompt, .. } if prompt == "approve deploy?"));

        let reply = host.resume(&id, "no").await.unwrap();
        assert_eq!(suspended_id(&reply), id);

        let reply = host.resume(&id, "yes").await.unwrap();
        assert_eq!(
            reply,
            WorkflowReply::Completed {
                session_id: id.clone(),
                message: "deploy approved after [\"no\", \"yes\"]".into()
            }
        );

        // Completed sessions are gone.
        let err = host.resume(&id, "yes").await.unwrap_err();
        assert!(err.is_session_not_found());
    }

    #[tokio::test]
    async fn unknown_workflow_and_unknown_session() {
        let host = host(Arc::new(AtomicBool::new(false)));
        assert!(matches!(
            host.start("nope", "x", "t").await,
            Err(WorkflowError::UnknownWorkflow { .. })
        ));
        assert!(host.resume("nope", "x").await.unwrap_err().is_session_not_found());
    }

    #[tokio::test]
    async fn node_failure_keeps_the_checkpoint_for_retry() {
        let fail = Arc::new(AtomicBool::new(false));
        let host = host(fail.clone());
        let id = suspended_id(&host.start("approval", "deploy", "t").await.unwrap());

        fail.store(true, Ordering::SeqCst);
        let err = host.resume(&id, "yes").await.unwrap_err();
        assert!(matches!(err, WorkflowError::Node { .. }));
        assert!(error_chain(&err).contains("backend unavailable"));

        let session = host.sessions().get(&id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Suspended);
        assert_eq!(session.checkpoint.unwrap().node, "review");

        fail.store(false, Ordering::SeqCst);
        let reply = host.resume(&id, "yes").await.unwrap();
        assert!(matches!(reply, WorkflowReply::Completed { .. }));
    }

    #[tokio::test]
    async fn cancelled_resume_releases_the_session() {
        let host = host(Arc::new(AtomicBool::new(false)));
        let id = suspended_id(&host.start("approval", "deploy", "t").await.unwrap());

        let cancelled =
            tokio::time::timeout(std::time::Duration::from_millis(20), host.resume(&id, "hang")).await;
        assert!(cancelled.is_err());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let session = host.sessions().get(&id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Suspended);
        assert_eq!(session.checkpoint.unwrap().node, "review");

        let reply = host.resume(&id, "yes").await.unwrap();
        assert!(matches!(reply, WorkflowReply::Completed { .. }));
    }

    #[tokio::test]
    async fn abandon_removes_the_session() {
        let host = host(Arc::new(AtomicBool::new(false)));
        let id = suspended_id(&host.start("approval", "deploy", "t").await.unwrap());
        assert!(host.abandon(&id).await);
        assert!(!host.abandon(&id).await);
        assert!(host.resume(&id, "yes").await.unwrap_err().is_session_not_found());
    }
}
