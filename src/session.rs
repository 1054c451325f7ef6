//! Session registry: keeps suspended workflow runs addressable across requests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::SessionError;
use crate::workflow::{Checkpoint, WorkflowRunner};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// A caller is driving the workflow right now.
    Running,
    /// Waiting for human input; a checkpoint exists.
    Suspended,
}

/// One live workflow instance.
#[derive(Clone)]
pub struct Session {
    pub session_id: String,
    pub thread_id: String,
    pub runner: Arc<dyn WorkflowRunner>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub checkpoint: Option<Checkpoint>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("thread_id", &self.thread_id)
            .field("workflow", &self.runner.name())
            .field("status", &self.status)
            .field("last_active_at", &self.last_active_at)
            .finish()
    }
}

/// A running session idle this many TTLs is treated as abandoned by its caller.
pub const STALE_RUNNING_FACTOR: u32 = 4;

/// Registry of live sessions keyed by session id.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new running session. Returns its id.
    pub async fn create(&self, runner: Arc<dyn WorkflowRunner>, thread_id: &str) -> String {
        let session_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let session = Session {
            session_id: session_id.clone(),
            thread_id: thread_id.to_string(),
            runner,
            created_at: now,
            last_active_at: now,
            status: SessionStatus::Running,
            checkpoint: None,
        };
        tracing::debug!(session_id = %session_id, thread_id = %thread_id, "Created session");
        self.sessions.write().await.insert(session_id.clone(), session);
        session_id
    }

    pub async fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Most recently active suspended session of a thread.
    pub async fn find_by_thread(&self, thread_id: &str) -> Option<Session> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.thread_id == thread_id && s.status == SessionStatus::Suspended)
            .max_by_key(|s| s.last_active_at)
            .cloned()
    }

    /// Claim a suspended session for resumption.
    pub async fn begin_resume(
        &self,
        session_id: &str,
    ) -> Result<(Arc<dyn WorkflowRunner>, Checkpoint), SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound {
                id: session_id.to_string(),
            })?;

        if session.status == SessionStatus::Running {
            return Err(SessionError::Busy {
                id: session_id.to_string(),
            });
        }
        let checkpoint = session
            .checkpoint
            .clone()
            .ok_or_else(|| SessionError::NotSuspended {
                id: session_id.to_string(),
            })?;

        session.status = SessionStatus::Running;
        session.last_active_at = Utc::now();
        Ok((session.runner.clone(), checkpoint))
    }

    /// Record a new suspension point, replacing the previous checkpoint.
    pub async fn suspend(&self, session_id: &str, checkpoint: Checkpoint) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound {
                id: session_id.to_string(),
            })?;
        session.status = SessionStatus::Suspended;
        session.checkpoint = Some(checkpoint);
        session.last_active_at = Utc::now();
        Ok(())
    }

    /// Undo a claim after a failed run. The last good checkpoint stays in place;
    /// a session that never reached one is removed. Returns whether it survived.
    pub async fn release(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(session) if session.checkpoint.is_some() => {
                session.status = SessionStatus::Suspended;
                session.last_active_at = Utc::now();
                true
            }
            Some(_) => {
                sessions.remove(session_id);
                false
            }
            None => false,
        }
    }

    pub async fn delete(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(session_id).is_some();
        if removed {
            tracing::debug!(session_id = %session_id, "Deleted session");
        }
        removed
    }

    /// Drop suspended sessions idle for longer than `ttl`, and running ones
    /// idle for longer than `ttl * STALE_RUNNING_FACTOR`.
    pub async fn prune_expired(&self, ttl: Duration) -> Vec<String> {
        let cutoff = |ttl: Duration| {
            chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        };
        let Some(suspended_cutoff) = cutoff(ttl) else {
            return Vec::new();
        };
        let running_cutoff = ttl
            .checked_mul(STALE_RUNNING_FACTOR)
            .and_then(cutoff);

        let mut sessions = self.sessions.write().await;
        let expired: Vec<String> = sessions
            .values()
            .filter(|s| match s.status {
                SessionStatus::Suspended => s.last_active_at < suspended_cutoff,
                SessionStatus::Running => running_cutoff.is_some_and(|c| s.last_active_at < c),
            })
            .map(|s| s.session_id.clone())
            .collect();
        for id in &expired {
            sessions.remove(id);
        }
        expired
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
