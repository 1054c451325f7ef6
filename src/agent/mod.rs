//! Assistant front door: per-thread conversations, dispatch, workflow
//! resumption and bridged streams.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::capabilities::builtin::create_capability::render_reply;
use crate::capabilities::builtin::{
    AddNumbers, AnswerQuestion, CreateCapability, CryptoPrice, EditCapability, ReadFile,
    WriteFile,
};
use crate::capabilities::{CapabilityRegistry, TextStream};
use crate::config::HiveConfig;
use crate::conversation::Conversation;
use crate::dispatch::{DispatchOptions, Dispatcher};
use crate::error::{CapabilityError, Error, WorkspaceError};
use crate::llm::{ChatMessage, ReasoningBackend};
use crate::session::SessionRegistry;
use crate::stream_bridge::StreamBridge;
use crate::workflow::WorkflowHost;
use crate::workflow::create_capability::create_capability_engine;
use crate::workflow::edit_capability::edit_capability_engine;
use crate::workspace::CapabilityWorkspace;

/// What the assistant needs to wire itself up.
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub workspace_dir: PathBuf,
    pub files_dir: PathBuf,
    pub max_rejections: u32,
    pub max_steps: usize,
    pub default_tags: Vec<String>,
    pub fallback: Option<String>,
}

impl From<&HiveConfig> for AssistantConfig {
    fn from(config: &HiveConfig) -> Self {
        Self {
            workspace_dir: config.workspace_dir.clone(),
            files_dir: config.files_dir.clone(),
            max_rejections: config.max_rejections,
            max_steps: config.max_steps,
            default_tags: config.default_tags.clone(),
            fallback: config.fallback.clone(),
        }
    }
}

/// One inbound user turn.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TurnRequest {
    /// Omitted on the first turn of a new thread.
    #[serde(default)]
    pub thread_id: Option<String>,
    pub message: String,
    /// Overrides the default tags for this turn.
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// Echoed id of a suspended workflow to resume with `message`.
    #[serde(default)]
    pub session_id: Option<String>,
}

impl TurnRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn in_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn resuming(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnReply {
    pub thread_id: String,
    /// `None` when the whole answer is waiting behind `stream_key`.
    pub reply: Option<String>,
    /// Suspended workflow waiting on this thread, if any.
    pub session_id: Option<String>,
    pub stream_key: Option<String>,
}

struct Thread {
    conversation: Conversation,
    last_active_at: DateTime<Utc>,
}

type Threads = Arc<RwLock<HashMap<String, Thread>>>;

/// Append `messages` to a thread, creating it on first use.
async fn append(threads: &Threads, thread_id: &str, messages: Vec<ChatMessage>) {
    let mut threads = threads.write().await;
    let thread = threads
        .entry(thread_id.to_string())
        .or_insert_with(|| Thread {
            conversation: Conversation::new(),
            last_active_at: Utc::now(),
        });
    for message in messages {
        thread.conversation.push(message);
    }
    thread.last_active_at = Utc::now();
}

pub struct Assistant {
    dispatcher: Dispatcher,
    host: Arc<WorkflowHost>,
    threads: Threads,
    /// Serializes turns per thread. Conversations themselves are only appended to.
    turns: RwLock<HashMap<String, Arc<Mutex<()>>>>,
    default_tags: Vec<String>,
    fallback: Option<String>,
}

impl Assistant {
    pub fn new(
        dispatcher: Dispatcher,
        host: Arc<WorkflowHost>,
        default_tags: Vec<String>,
        fallback: Option<String>,
    ) -> Self {
        Self {
            dispatcher,
            host,
            threads: Arc::new(RwLock::new(HashMap::new())),
            turns: RwLock::new(HashMap::new()),
            default_tags,
            fallback,
        }
    }

    /// Build the registries, the capability workflows and the built-in capabilities.
    pub async fn from_config(
        config: &AssistantConfig,
        backend: Arc<dyn ReasoningBackend>,
    ) -> Result<Self, Error> {
        let workspace = Arc::new(CapabilityWorkspace::new(config.workspace_dir.clone()));
        workspace.ensure_dirs().await?;
        tokio::fs::create_dir_all(&config.files_dir)
            .await
            .map_err(WorkspaceError::from)?;

        let create =
            create_capability_engine(backend.clone(), workspace.clone(), config.max_rejections)?
                .with_max_steps(config.max_steps);
        let edit = edit_capability_engine(backend.clone(), workspace, config.max_rejections)?
            .with_max_steps(config.max_steps);
        let mut host = WorkflowHost::new(Arc::new(SessionRegistry::new()));
        host.register(Arc::new(create));
        host.register(Arc::new(edit));
        let host = Arc::new(host);

        let registry = Arc::new(CapabilityRegistry::new());
        registry.register(Arc::new(AddNumbers)).await?;
        registry.register(Arc::new(CryptoPrice::new())).await?;
        registry
            .register(Arc::new(ReadFile::new(config.files_dir.clone())))
            .await?;
        registry
            .register(Arc::new(WriteFile::new(config.files_dir.clone())))
            .await?;
        registry
            .register(Arc::new(AnswerQuestion::new(backend.clone())))
            .await?;
        registry
            .register(Arc::new(CreateCapability::new(host.clone())))
            .await?;
        registry
            .register(Arc::new(EditCapability::new(host.clone())))
            .await?;
        tracing::info!(capabilities = registry.count().await, "Capabilities registered");

        let dispatcher = Dispatcher::new(registry, backend, Arc::new(StreamBridge::new()));
        Ok(Self::new(
            dispatcher,
            host,
            config.default_tags.clone(),
            config.fallback.clone(),
        ))
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        self.dispatcher.registry()
    }

    pub fn host(&self) -> &Arc<WorkflowHost> {
        &self.host
    }

    pub fn bridge(&self) -> &Arc<StreamBridge> {
        self.dispatcher.bridge()
    }

    /// Copy of a thread's conversation.
    pub async fn conversation(&self, thread_id: &str) -> Option<Conversation> {
        self.threads
            .read()
            .await
            .get(thread_id)
            .map(|t| t.conversation.clone())
    }

    /// Handle one user turn.
    ///
    /// With a `session_id` the message answers that suspended workflow;
    /// otherwise it is dispatched. Turns on one thread run one at a time, and
    /// only a successful turn appends to it.
    pub async fn handle_turn(&self, request: TurnRequest) -> Result<TurnReply, Error> {
        let thread_id = request
            .thread_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let turn = self.turn_lock(&thread_id).await;
        let _turn = turn.lock().await;

        let mut conversation = self.conversation(&thread_id).await.unwrap_or_default();
        let base = conversation.len();
        conversation.push(ChatMessage::user(&request.message));

        if let Some(session_id) = request.session_id {
            let reply = self.host.resume(&session_id, &request.message).await?;
            let text = render_reply(&reply);
            conversation.push(ChatMessage::assistant(&text));
            append(&self.threads, &thread_id, conversation.since(base).to_vec()).await;
            return Ok(TurnReply {
                session_id: self.pending_session(&thread_id).await,
                thread_id,
                reply: Some(text),
                stream_key: None,
            });
        }

        // A new turn abandons a stream nobody picked up.
        if self.bridge().take(&thread_id).is_some() {
            tracing::debug!(thread_id = %thread_id, "Dropped unclaimed stream");
        }

        let start = conversation.len();
        let options = DispatchOptions {
            tags: request.tags.unwrap_or_else(|| self.default_tags.clone()),
            fallback: self.fallback.clone(),
            stream_key: Some(thread_id.clone()),
        };
        let outcome = self
            .dispatcher
            .dispatch(&mut conversation, &thread_id, &options)
            .await?;

        let reply = match outcome.direct_answer {
            Some(answer) => {
                conversation.push(ChatMessage::assistant(&answer));
                Some(answer)
            }
            None => {
                let parts: Vec<&str> = conversation
                    .since(start)
                    .iter()
                    .map(|m| m.content.as_str())
                    .collect();
                (!parts.is_empty()).then(|| parts.join("\n\n"))
            }
        };
        tracing::info!(
            thread_id = %thread_id,
            invocations = outcome.invocations.len(),
            streaming = outcome.stream_key.is_some(),
            "Turn handled"
        );

        append(&self.threads, &thread_id, conversation.since(base).to_vec()).await;
        Ok(TurnReply {
            session_id: self.pending_session(&thread_id).await,
            thread_id,
            reply,
            stream_key: outcome.stream_key,
        })
    }

    /// Take a bridged stream. Its function message is appended to the
    /// originating thread once the stream is read to the end.
    pub fn open_stream(&self, key: &str) -> Option<TextStream> {
        let handle = self.bridge().take(key)?;
        let relay = Relay {
            inner: AssertUnwindSafe(handle.stream).catch_unwind().boxed(),
            collected: String::new(),
            finished: false,
            threads: self.threads.clone(),
            thread_id: handle.thread_id,
            capability: handle.capability,
            tool_call_id: handle.tool_call_id,
        };
        Some(futures::stream::unfold(relay, Relay::next).boxed())
    }

    /// Drop a suspended workflow.
    pub async fn abandon(&self, session_id: &str) -> bool {
        self.host.abandon(session_id).await
    }

    /// Drop suspended sessions, unclaimed streams and idle threads older than `ttl`.
    pub async fn prune_expired(&self, ttl: Duration) {
        let sessions = self.host.sessions().prune_expired(ttl).await;
        let streams = self.bridge().prune_expired(ttl);
        let threads = match chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        {
            Some(cutoff) => {
                let mut threads = self.threads.write().await;
                let before = threads.len();
                threads.retain(|_, t| t.last_active_at >= cutoff);
                self.turns
                    .write()
                    .await
                    .retain(|id, lock| threads.contains_key(id) || Arc::strong_count(lock) > 1);
                before - threads.len()
            }
            None => 0,
        };
        if !sessions.is_empty() || !streams.is_empty() || threads > 0 {
            tracing::info!(
                sessions = sessions.len(),
                streams = streams.len(),
                threads,
                "Pruned expired state"
            );
        }
    }

    async fn turn_lock(&self, thread_id: &str) -> Arc<Mutex<()>> {
        self.turns
            .write()
            .await
            .entry(thread_id.to_string())
            .or_default()
            .clone()
    }

    async fn pending_session(&self, thread_id: &str) -> Option<String> {
        self.host
            .sessions()
            .find_by_thread(thread_id)
            .await
            .map(|s| s.session_id)
    }
}

/// Spawn the periodic reaper.
pub fn spawn_reaper(
    assistant: Arc<Assistant>,
    every: Duration,
    ttl: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            assistant.prune_expired(ttl).await;
        }
    })
}

/// Forwards a bridged stream and records the full text when it ends.
struct Relay {
    inner: futures::stream::BoxStream<
        'static,
        Result<Result<String, CapabilityError>, Box<dyn std::any::Any + Send>>,
    >,
    collected: String,
    finished: bool,
    threads: Threads,
    thread_id: String,
    capability: String,
    tool_call_id: Option<String>,
}

impl Relay {
    async fn next(mut self) -> Option<(Result<String, CapabilityError>, Self)> {
        if self.finished {
            return None;
        }
        let item = match self.inner.next().await {
            Some(Ok(Ok(fragment))) => {
                self.collected.push_str(&fragment);
                return Some((Ok(fragment), self));
            }
            Some(Ok(Err(e))) => Err(e),
            Some(Err(_)) => Err(CapabilityError::Panicked {
                name: self.capability.clone(),
            }),
            None => Ok(()),
        };

        self.finished = true;
        let content = match &item {
            Ok(()) => std::mem::take(&mut self.collected),
            Err(e) => {
                tracing::warn!(
                    thread_id = %self.thread_id,
                    capability = %self.capability,
                    error = %e,
                    "Bridged stream failed"
                );
                format!("Error: {e}")
            }
        };
        self.record(content).await;
        match item {
            Ok(()) => None,
            Err(e) => Some((Err(e), self)),
        }
    }

    async fn record(&mut self, content: String) {
        let message =
            ChatMessage::function_result(self.tool_call_id.clone(), &self.capability, content);
        let threads = Arc::clone(&self.threads);
        append(&threads, &self.thread_id, vec![message]).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{LlmStream, Role, Selection, ToolCall, ToolDefinition};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedBackend {
        selections: Mutex<Vec<Result<Selection, LlmError>>>,
        chunks: Vec<&'static str>,
        /// When set, every selection waits for a permit.
        gate: Option<Arc<tokio::sync::Semaphore>>,
    }

    #[async_trait]
    impl ReasoningBackend for ScriptedBackend {
        async fn select(
            &self,
            _conversation: &[ChatMessage],
            _candidates: &[ToolDefinition],
        ) -> Result<Selection, LlmError> {
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            self.selections.lock().unwrap().remove(0)
        }

        async fn extract(
            &self,
            _instruction: &str,
            _schema: &serde_json::Value,
        ) -> Result<serde_json::Value, LlmError> {
            Err(LlmError::InvalidResponse {
                provider: "scripted".into(),
                reason: "not scripted".into(),
            })
        }

        async fn stream(&self, _conversation: &[ChatMessage]) -> Result<LlmStream, LlmError> {
            let chunks: Vec<Result<String, LlmError>> =
                self.chunks.iter().map(|c| Ok(c.to_string())).collect();
            Ok(futures::stream::iter(chunks).boxed())
        }
    }

    async fn assistant(selections: Vec<Result<Selection, LlmError>>) -> (Assistant, tempfile::TempDir) {
        gated_assistant(selections, None).await
    }

    async fn gated_assistant(
        selections: Vec<Result<Selection, LlmError>>,
        gate: Option<Arc<tokio::sync::Semaphore>>,
    ) -> (Assistant, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = AssistantConfig {
            workspace_dir: dir.path().join("workspace"),
            files_dir: dir.path().join("files"),
            max_rejections: 3,
            max_steps: 32,
            default_tags: vec!["math".into()],
            fallback: Some("answer_question".into()),
        };
        let backend = Arc::new(ScriptedBackend {
            selections: Mutex::new(selections),
            chunks: vec!["Hel", "lo"],
            gate,
        });
        let assistant = Assistant::from_config(&config, backend).await.unwrap();
        (assistant, dir)
    }

    fn add(a: i64, b: i64) -> Result<Selection, LlmError> {
        Ok(Selection::Calls {
            calls: vec![ToolCall {
                id: "call-1".into(),
                name: "add_numbers".into(),
                arguments: serde_json::json!({ "a": a, "b": b }),
            }],
            content: None,
        })
    }

    #[tokio::test]
    async fn registers_builtin_capabilities() {
        let (assistant, _dir) = assistant(vec![]).await;
        assert_eq!(
            assistant.registry().list().await,
            vec![
                "add_numbers",
                "answer_question",
                "create_capability",
                "crypto_price",
                "edit_capability",
                "read_file",
                "write_file"
            ]
        );
    }

    #[tokio::test]
    async fn turns_accumulate_in_one_thread() {
        let (assistant, _dir) = assistant(vec![add(1, 2), add(3, 4)]).await;

        let first = assistant.handle_turn(TurnRequest::new("1 + 2")).await.unwrap();
        assert_eq!(first.reply.as_deref(), Some("3"));
        let second = assistant
            .handle_turn(TurnRequest::new("3 + 4").in_thread(&first.thread_id))
            .await
            .unwrap();
        assert_eq!(second.thread_id, first.thread_id);
        assert_eq!(second.reply.as_deref(), Some("7"));

        let conversation = assistant.conversation(&first.thread_id).await.unwrap();
        assert_eq!(conversation.len(), 4);
    }

    #[tokio::test]
    async fn selection_failure_leaves_thread_unmodified() {
        let (assistant, _dir) = assistant(vec![
            add(1, 1),
            Err(LlmError::RequestFailed {
                provider: "scripted".into(),
                reason: "down".into(),
            }),
        ])
        .await;

        let first = assistant.handle_turn(TurnRequest::new("1 + 1")).await.unwrap();
        let before = assistant.conversation(&first.thread_id).await.unwrap();
        let err = assistant
            .handle_turn(TurnRequest::new("again").in_thread(&first.thread_id))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Dispatch(_)));
        assert_eq!(assistant.conversation(&first.thread_id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn fallback_stream_is_recorded_once_drained() {
        let (assistant, _dir) = assistant(vec![Ok(Selection::Direct(String::new()))]).await;

        let reply = assistant.handle_turn(TurnRequest::new("hi")).await.unwrap();
        assert_eq!(reply.reply, None);
        let key = reply.stream_key.unwrap();

        let stream = assistant.open_stream(&key).unwrap();
        let text: Vec<String> = stream.map(|c| c.unwrap()).collect().await;
        assert_eq!(text.concat(), "Hello");
        assert!(assistant.open_stream(&key).is_none());

        let conversation = assistant.conversation(&reply.thread_id).await.unwrap();
        let last = conversation.last_function().unwrap();
        assert_eq!(last.role, Role::Function);
        assert_eq!(last.name.as_deref(), Some("answer_question"));
        assert_eq!(last.content, "Hello");
    }

    #[tokio::test]
    async fn stream_recorded_during_a_later_turn_is_kept() {
        let gate = Arc::new(tokio::sync::Semaphore::new(1));
        let (assistant, _dir) = gated_assistant(
            vec![Ok(Selection::Direct(String::new())), add(1, 2)],
            Some(gate.clone()),
        )
        .await;
        let assistant = Arc::new(assistant);

        let first = assistant
            .handle_turn(TurnRequest::new("hi").in_thread("t"))
            .await
            .unwrap();
        let stream = assistant.open_stream(&first.stream_key.unwrap()).unwrap();

        // The second turn is parked inside selection while the stream finishes.
        let second = tokio::spawn({
            let assistant = Arc::clone(&assistant);
            async move {
                assistant
                    .handle_turn(TurnRequest::new("1 + 2").in_thread("t"))
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let text: Vec<String> = stream.map(|c| c.unwrap()).collect().await;
        assert_eq!(text.concat(), "Hello");

        gate.add_permits(1);
        assert_eq!(second.await.unwrap().unwrap().reply.as_deref(), Some("3"));

        let conversation = assistant.conversation("t").await.unwrap();
        let contents: Vec<&str> = conversation
            .messages()
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(contents, ["hi", "Hello", "1 + 2", "3"]);
        assert_eq!(conversation.messages()[1].role, Role::Function);
    }

    #[tokio::test]
    async fn turns_on_one_thread_run_one_at_a_time() {
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let (assistant, _dir) =
            gated_assistant(vec![add(1, 2), add(3, 4)], Some(gate.clone())).await;
        let assistant = Arc::new(assistant);

        let turns: Vec<_> = ["1 + 2", "3 + 4"]
            .into_iter()
            .map(|message| {
                let assistant = Arc::clone(&assistant);
                tokio::spawn(async move {
                    assistant
                        .handle_turn(TurnRequest::new(message).in_thread("t"))
                        .await
                })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.add_permits(2);
        for turn in turns {
            turn.await.unwrap().unwrap();
        }

        // Neither turn overwrote the other.
        assert_eq!(assistant.conversation("t").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn resuming_an_unknown_session_is_not_found() {
        let (assistant, _dir) = assistant(vec![]).await;
        let err = assistant
            .handle_turn(TurnRequest::new("approved").resuming("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Workflow(ref e) if e.is_session_not_found()));
    }

    #[tokio::test]
    async fn prune_drops_idle_threads() {
        let (assistant, _dir) = assistant(vec![add(2, 2)]).await;
        let reply = assistant.handle_turn(TurnRequest::new("2 + 2")).await.unwrap();

        assistant.prune_expired(Duration::from_secs(3600)).await;
        assert!(assistant.conversation(&reply.thread_id).await.is_some());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assistant.prune_expired(Duration::from_millis(10)).await;
        assert!(assistant.conversation(&reply.thread_id).await.is_none());
    }
}
