//! End-to-end create- and edit-capability scenarios through the assistant front door.
//!
//! A scripted reasoning backend stands in for the model: it selects the
//! scripted workflow capability on the first turn and answers each structured
//! extraction from a per-test script, recording every instruction it saw.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::time::timeout;

use hive_mind::agent::{Assistant, AssistantConfig, TurnReply, TurnRequest};
use hive_mind::error::{Error, LlmError};
use hive_mind::llm::{ChatMessage, LlmStream, ReasoningBackend, Selection, ToolCall, ToolDefinition};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Script {
    /// Capability selected on every turn; `create_capability` when empty.
    tool: &'static str,
    codes: VecDeque<&'static str>,
    feedback: VecDeque<Value>,
    dependencies: Vec<&'static str>,
    name: &'static str,
}

struct ScriptedBackend {
    script: Mutex<Script>,
    instructions: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            instructions: Mutex::new(Vec::new()),
        })
    }

    fn instructions(&self) -> Vec<String> {
        self.instructions.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReasoningBackend for ScriptedBackend {
    async fn select(
        &self,
        _conversation: &[ChatMessage],
        _candidates: &[ToolDefinition],
    ) -> Result<Selection, LlmError> {
        let tool = match self.script.lock().unwrap().tool {
            "" => "create_capability",
            tool => tool,
        };
        Ok(Selection::Calls {
            calls: vec![ToolCall {
                id: format!("call-{tool}"),
                name: tool.into(),
                arguments: json!({}),
            }],
            content: None,
        })
    }

    async fn extract(&self, instruction: &str, schema: &Value) -> Result<Value, LlmError> {
        self.instructions.lock().unwrap().push(instruction.to_string());
        let mut script = self.script.lock().unwrap();
        let properties = &schema["properties"];
        let value = if properties.get("code").is_some() {
            json!({ "code": script.codes.pop_front().unwrap_or("fn fallback() {}") })
        } else if properties.get("approve").is_some() {
            script
                .feedback
                .pop_front()
                .unwrap_or_else(|| json!({ "approve": true, "user_feedback": "" }))
        } else if properties.get("update").is_some() {
            json!({
                "update": !script.dependencies.is_empty(),
                "dependencies": script.dependencies,
            })
        } else if properties.get("name").is_some() {
            json!({ "name": script.name })
        } else {
            return Err(LlmError::InvalidResponse {
                provider: "scripted".into(),
                reason: format!("unexpected schema {schema}"),
            });
        };
        Ok(value)
    }

    async fn stream(&self, _conversation: &[ChatMessage]) -> Result<LlmStream, LlmError> {
        Ok(futures::stream::empty().boxed())
    }
}

fn approve() -> Value {
    json!({ "approve": true, "user_feedback": "" })
}

fn reject(feedback: &str) -> Value {
    json!({ "approve": false, "user_feedback": feedback })
}

async fn assistant(
    backend: Arc<ScriptedBackend>,
    max_rejections: u32,
) -> (Assistant, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = AssistantConfig {
        workspace_dir: dir.path().join("workspace"),
        files_dir: dir.path().join("files"),
        max_rejections,
        max_steps: 64,
        default_tags: vec!["agent".into()],
        fallback: None,
    };
    let assistant = Assistant::from_config(&config, backend).await.unwrap();
    (assistant, dir)
}

async fn start(assistant: &Assistant) -> TurnReply {
    say(assistant, "make a capability that reports the weather").await
}

async fn say(assistant: &Assistant, text: &str) -> TurnReply {
    assistant
        .handle_turn(TurnRequest::new(text).in_thread("t1"))
        .await
        .unwrap()
}

async fn answer(assistant: &Assistant, session_id: &str, text: &str) -> Result<TurnReply, Error> {
    assistant
        .handle_turn(TurnRequest::new(text).in_thread("t1").resuming(session_id))
        .await
}

#[tokio::test]
async fn code_review_suspends_with_the_code_and_approval_moves_to_dependencies() {
    timeout(TEST_TIMEOUT, async {
        let backend = ScriptedBackend::new(Script {
            codes: VecDeque::from(["fn weather() -> String { \"sunny\".into() }"]),
            feedback: VecDeque::from([approve()]),
            dependencies: vec!["reqwest = \"0.12\""],
            name: "weather",
            ..Default::default()
        });
        let (assistant, _dir) = assistant(backend.clone(), 5).await;

        let first = start(&assistant).await;
        let session_id = first.session_id.clone().expect("workflow should be suspended");
        let prompt = first.reply.unwrap();
        assert!(prompt.starts_with(&format!("session_id: {session_id}")));
        assert!(prompt.contains("fn weather() -> String { \"sunny\".into() }"));
        assert!(prompt.contains("Do you approve this code?"));

        let second = answer(&assistant, &session_id, "approved").await.unwrap();
        let prompt = second.reply.unwrap();
        assert!(prompt.contains("Do you approve these additional dependencies"));
        assert!(prompt.contains("reqwest = \"0.12\""));
        assert_eq!(second.session_id.as_deref(), Some(session_id.as_str()));

        // The code was generated once; approval went straight to dependencies.
        let generated = backend
            .instructions()
            .iter()
            .filter(|i| i.contains("make a capability that reports the weather"))
            .count();
        assert_eq!(generated, 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rejection_feedback_reaches_the_next_generation_verbatim() {
    timeout(TEST_TIMEOUT, async {
        let backend = ScriptedBackend::new(Script {
            codes: VecDeque::from(["fn v1() {}", "fn v2() {}"]),
            feedback: VecDeque::from([reject("print it in ALL CAPS")]),
            ..Default::default()
        });
        let (assistant, _dir) = assistant(backend.clone(), 5).await;

        let session_id = start(&assistant).await.session_id.unwrap();
        let reply = answer(&assistant, &session_id, "nope, print it in ALL CAPS please")
            .await
            .unwrap();
        assert!(reply.reply.unwrap().contains("fn v2() {}"));

        let regenerate = backend
            .instructions()
            .into_iter()
            .find(|i| i.contains("update the code: fn v1() {}"))
            .expect("second generation should revise the first draft");
        assert!(regenerate.contains("to meet these updated instructions: print it in ALL CAPS"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rejecting_dependencies_revises_the_code_with_the_feedback() {
    timeout(TEST_TIMEOUT, async {
        let backend = ScriptedBackend::new(Script {
            codes: VecDeque::from(["fn v1() {}", "fn v2() {}"]),
            feedback: VecDeque::from([approve(), reject("use ureq instead of reqwest")]),
            dependencies: vec!["reqwest = \"0.12\""],
            ..Default::default()
        });
        let (assistant, dir) = assistant(backend.clone(), 5).await;

        let session_id = start(&assistant).await.session_id.unwrap();
        let review = answer(&assistant, &session_id, "approved").await.unwrap();
        assert!(review.reply.unwrap().contains("reqwest = \"0.12\""));

        let revised = answer(&assistant, &session_id, "no, use ureq instead of reqwest")
            .await
            .unwrap();
        let prompt = revised.reply.unwrap();
        assert!(prompt.contains("fn v2() {}"));
        assert!(prompt.contains("Do you approve this code?"));
        assert_eq!(revised.session_id.as_deref(), Some(session_id.as_str()));

        let regenerate = backend
            .instructions()
            .into_iter()
            .find(|i| i.contains("update the code: fn v1() {}"))
            .expect("rejected dependencies should send the code back for revision");
        assert!(regenerate.contains("to meet these updated instructions: use ureq instead of reqwest"));

        // Nothing was written for the rejected list.
        assert!(!dir.path().join("workspace/capabilities/DEPENDENCIES").exists());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn paraphrased_feedback_falls_back_to_the_raw_answer() {
    timeout(TEST_TIMEOUT, async {
        let backend = ScriptedBackend::new(Script {
            codes: VecDeque::from(["fn v1() {}", "fn v2() {}"]),
            feedback: VecDeque::from([reject("Output should be uppercase.")]),
            ..Default::default()
        });
        let (assistant, _dir) = assistant(backend.clone(), 5).await;

        let session_id = start(&assistant).await.session_id.unwrap();
        answer(&assistant, &session_id, "shout it").await.unwrap();

        let regenerate = backend
            .instructions()
            .into_iter()
            .find(|i| i.contains("update the code: fn v1() {}"))
            .unwrap();
        assert!(regenerate.contains("to meet these updated instructions: shout it"));
        assert!(!regenerate.contains("uppercase"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn approving_everything_writes_the_capability() {
    timeout(TEST_TIMEOUT, async {
        let backend = ScriptedBackend::new(Script {
            codes: VecDeque::from(["pub fn weather() {}"]),
            feedback: VecDeque::from([approve(), approve()]),
            dependencies: vec!["chrono = \"0.4\""],
            name: "Weather Report",
            ..Default::default()
        });
        let (assistant, dir) = assistant(backend, 5).await;

        let session_id = start(&assistant).await.session_id.unwrap();
        answer(&assistant, &session_id, "approved").await.unwrap();
        let done = answer(&assistant, &session_id, "yes").await.unwrap();

        assert!(done.session_id.is_none());
        assert!(done.reply.unwrap().contains("Capability `weather_report` has been created"));

        let workspace = dir.path().join("workspace/capabilities");
        let source = std::fs::read_to_string(workspace.join("weather_report.rs")).unwrap();
        assert_eq!(source, "pub fn weather() {}");
        let manifest = std::fs::read_to_string(workspace.join("DEPENDENCIES")).unwrap();
        assert!(manifest.contains("chrono = \"0.4\""));

        // A finished session can no longer be resumed.
        let err = answer(&assistant, &session_id, "again").await.unwrap_err();
        assert!(matches!(err, Error::Workflow(ref e) if e.is_session_not_found()));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unknown_session_leaves_other_sessions_resumable() {
    timeout(TEST_TIMEOUT, async {
        let backend = ScriptedBackend::new(Script {
            codes: VecDeque::from(["fn v1() {}"]),
            feedback: VecDeque::from([approve()]),
            name: "noop",
            ..Default::default()
        });
        let (assistant, _dir) = assistant(backend, 5).await;

        let session_id = start(&assistant).await.session_id.unwrap();
        let err = answer(&assistant, "not-a-session", "approved").await.unwrap_err();
        assert!(matches!(err, Error::Workflow(ref e) if e.is_session_not_found()));

        let before = assistant.host().sessions().get(&session_id).await.unwrap();
        let checkpoint = before.checkpoint.unwrap();
        assert_eq!(checkpoint.node, "get_feedback");

        // No dependencies were proposed, so approval runs through naming to completion.
        let done = answer(&assistant, &session_id, "approved").await.unwrap();
        assert!(done.reply.unwrap().contains("has been created"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn repeated_rejections_give_up() {
    timeout(TEST_TIMEOUT, async {
        let backend = ScriptedBackend::new(Script {
            codes: VecDeque::from(["fn v1() {}", "fn v2() {}", "fn v3() {}"]),
            feedback: VecDeque::from([reject("no"), reject("still no")]),
            ..Default::default()
        });
        let (assistant, _dir) = assistant(backend, 2).await;

        let session_id = start(&assistant).await.session_id.unwrap();
        let retry = answer(&assistant, &session_id, "no").await.unwrap();
        assert!(retry.reply.unwrap().contains("fn v2() {}"));

        let gave_up = answer(&assistant, &session_id, "still no").await.unwrap();
        assert!(gave_up.reply.unwrap().contains("Stopped after 2 rejected revisions"));
        assert!(gave_up.session_id.is_none());
        assert!(assistant.host().sessions().get(&session_id).await.is_none());
    })
    .await
    .expect("test timed out");
}

// ── Editing ─────────────────────────────────────────────────────────

fn seed_capability(dir: &tempfile::TempDir, name: &str, source: &str) {
    let capabilities = dir.path().join("workspace/capabilities");
    std::fs::create_dir_all(&capabilities).unwrap();
    std::fs::write(capabilities.join(format!("{name}.rs")), source).unwrap();
}

#[tokio::test]
async fn editing_confirms_the_capability_then_rewrites_it() {
    timeout(TEST_TIMEOUT, async {
        let backend = ScriptedBackend::new(Script {
            tool: "edit_capability",
            codes: VecDeque::from(["fn weather() -> &'static str { \"20C\" }"]),
            feedback: VecDeque::from([approve(), approve()]),
            ..Default::default()
        });
        let (assistant, dir) = assistant(backend.clone(), 5).await;
        seed_capability(&dir, "weather_report", "fn weather() -> &'static str { \"68F\" }");

        let first = say(&assistant, "change weather_report to use celsius").await;
        let session_id = first.session_id.clone().expect("edit should wait for confirmation");
        let prompt = first.reply.unwrap();
        assert!(prompt.contains("Is `weather_report` the capability to update?"));
        assert!(prompt.contains("\"68F\""));

        let review = answer(&assistant, &session_id, "yes").await.unwrap();
        assert!(review.reply.unwrap().contains("\"20C\""));

        let edit = backend
            .instructions()
            .into_iter()
            .find(|i| i.contains("Requested change:"))
            .unwrap();
        assert!(edit.contains("\"68F\""));
        assert!(edit.contains("change weather_report to use celsius"));

        let done = answer(&assistant, &session_id, "approved").await.unwrap();
        assert!(done.session_id.is_none());
        assert!(done.reply.unwrap().contains("Capability `weather_report` has been updated"));

        let source =
            std::fs::read_to_string(dir.path().join("workspace/capabilities/weather_report.rs"))
                .unwrap();
        assert_eq!(source, "fn weather() -> &'static str { \"20C\" }");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn edit_rejection_feedback_reaches_the_revision_verbatim() {
    timeout(TEST_TIMEOUT, async {
        let backend = ScriptedBackend::new(Script {
            tool: "edit_capability",
            codes: VecDeque::from(["fn v1() {}", "fn v2() {}"]),
            feedback: VecDeque::from([approve(), reject("keep the old function name")]),
            ..Default::default()
        });
        let (assistant, dir) = assistant(backend.clone(), 5).await;
        seed_capability(&dir, "weather_report", "fn v0() {}");

        let session_id = say(&assistant, "update weather_report").await.session_id.unwrap();
        answer(&assistant, &session_id, "yes").await.unwrap();
        let revised = answer(&assistant, &session_id, "please keep the old function name")
            .await
            .unwrap();
        assert!(revised.reply.unwrap().contains("fn v2() {}"));

        let regenerate = backend
            .instructions()
            .into_iter()
            .find(|i| i.contains("update the code: fn v1() {}"))
            .unwrap();
        assert!(regenerate.contains("to meet these updated instructions: keep the old function name"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn editing_an_unknown_capability_finishes_without_a_session() {
    timeout(TEST_TIMEOUT, async {
        let backend = ScriptedBackend::new(Script {
            tool: "edit_capability",
            ..Default::default()
        });
        let (assistant, dir) = assistant(backend, 5).await;
        seed_capability(&dir, "weather_report", "fn v0() {}");

        let reply = say(&assistant, "fix the calendar capability").await;
        assert!(reply.session_id.is_none());
        assert!(reply.reply.unwrap().contains("No generated capability matches"));
        assert!(assistant.host().sessions().is_empty().await);
    })
    .await
    .expect("test timed out");
}
