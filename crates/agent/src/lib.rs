//! The agent turn loop.
//!
//! One turn takes the user's transcript, repeatedly asks the model what to
//! do, executes any requested tools, and returns the model's final text.
//! Two flavors implement the same contract: [`native`] for providers with a
//! structured tool-calling protocol and [`fallback`] for text-only models
//! driven through tagged prompts.  The flavor is chosen once per turn from
//! [`ToolCapability`], never mid-loop.

mod events;
mod fallback;
mod native;
mod parser;

pub use events::{AgentEvent, ChannelSink, EventSink, NullSink};
pub use parser::{ParsedReply, parse_tagged_reply};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use vaultmind_exec::ToolExecutor;
use vaultmind_llm::{ChatMessage, LlmProvider, ToolCapability};

/// Rounds a single turn may spend before giving up.
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

const DEFAULT_SYSTEM_PROMPT: &str = "You are an assistant managing the user's encrypted note \
vaults. Use the available tools to read and change vaults and notes; never invent note \
contents. Answer concisely once you have what you need.";

/// Why a turn failed.  Tool failures are not here: those are fed back to the
/// model as failed results and the turn continues.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The model endpoint itself failed; the turn aborts immediately.
    #[error("model provider error: {0}")]
    Provider(anyhow::Error),
    /// The model kept requesting tools past the round limit.
    #[error("no final answer after {0} rounds")]
    MaxIterations(usize),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_iterations: usize,
    pub system_prompt: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// A configured agent: one provider, one executor, one policy.
pub struct Agent {
    pub(crate) provider: Arc<dyn LlmProvider>,
    pub(crate) executor: Arc<ToolExecutor>,
    pub(crate) config: AgentConfig,
}

impl Agent {
    pub fn new(provider: Arc<dyn LlmProvider>, executor: Arc<ToolExecutor>) -> Self {
        Self {
            provider,
            executor,
            config: AgentConfig::default(),
        }
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Run one turn.  The caller owns the transcript and has already pushed
    /// the user's message.  The native flavor appends every assistant and
    /// tool-result turn it produces; the fallback flavor keeps its tagged
    /// exchange in a loop-local history and appends only the final answer,
    /// so the transcript stays free of tag blocks.
    pub async fn run_turn(
        &self,
        transcript: &mut Vec<ChatMessage>,
        sink: &dyn EventSink,
    ) -> Result<String, AgentError> {
        let capability = self.provider.tool_capability();
        info!(?capability, messages = transcript.len(), "starting turn");
        match capability {
            ToolCapability::Native => native::run(self, transcript, sink).await,
            ToolCapability::PromptFallback => fallback::run(self, transcript, sink).await,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, anyhow, bail};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use vaultmind_exec::{
        ExecutorHooks, KeyProvider, NoteRecord, SearchHit, VaultInfo, VaultKey, VaultStore,
    };
    use vaultmind_llm::{ChatResponse, ContentBlock, MessageContent, Role, StopReason, ToolCall};

    // ── Scripted provider ────────────────────────────────────────────────

    struct ScriptedProvider {
        capability: ToolCapability,
        native: Mutex<VecDeque<Result<ChatResponse>>>,
        replies: Mutex<VecDeque<Result<String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn native(responses: Vec<Result<ChatResponse>>) -> Self {
            Self {
                capability: ToolCapability::Native,
                native: Mutex::new(responses.into()),
                replies: Mutex::new(VecDeque::new()),
                prompts: Mutex::new(vec![]),
            }
        }

        fn text_only(replies: Vec<Result<String>>) -> Self {
            Self {
                capability: ToolCapability::PromptFallback,
                native: Mutex::new(VecDeque::new()),
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn tool_capability(&self) -> ToolCapability {
            self.capability
        }

        async fn generate_with_tools(
            &self,
            _system: &str,
            _messages: &[ChatMessage],
            _tools: &Value,
        ) -> Result<ChatResponse> {
            self.native
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| bail!("script exhausted"))
        }

        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| bail!("script exhausted"))
        }
    }

    fn tool_round(content: &str, calls: Vec<ToolCall>) -> Result<ChatResponse> {
        Ok(ChatResponse {
            content: content.to_string(),
            tool_calls: calls,
            stop_reason: StopReason::ToolUse,
        })
    }

    fn final_round(content: &str) -> Result<ChatResponse> {
        Ok(ChatResponse::text(content))
    }

    fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    // ── Minimal store and hooks ──────────────────────────────────────────

    struct OneVaultStore {
        notes: Mutex<HashMap<i64, NoteRecord>>,
    }

    impl OneVaultStore {
        fn new() -> Self {
            let mut notes = HashMap::new();
            notes.insert(
                1,
                NoteRecord {
                    id: 1,
                    vault_id: 1,
                    title: "groceries".into(),
                    content: "milk, eggs".into(),
                    summary: None,
                },
            );
            Self {
                notes: Mutex::new(notes),
            }
        }
    }

    #[async_trait]
    impl VaultStore for OneVaultStore {
        fn list_vaults(&self) -> Vec<VaultInfo> {
            vec![VaultInfo {
                id: 1,
                name: "Personal".into(),
                protected: false,
            }]
        }

        async fn create_vault(&self, _name: &str) -> Result<VaultInfo> {
            bail!("not used in these tests")
        }

        async fn rename_vault(&self, _vault_id: i64, _name: &str) -> Result<()> {
            bail!("not used in these tests")
        }

        async fn list_notes(&self, _vault_id: i64, _key: &VaultKey) -> Result<Vec<NoteRecord>> {
            Ok(self.notes.lock().unwrap().values().cloned().collect())
        }

        async fn get_note(
            &self,
            _vault_id: i64,
            _key: &VaultKey,
            note_id: i64,
        ) -> Result<NoteRecord> {
            self.notes
                .lock()
                .unwrap()
                .get(&note_id)
                .cloned()
                .ok_or_else(|| anyhow!("no such note"))
        }

        async fn create_note(
            &self,
            _vault_id: i64,
            _key: &VaultKey,
            _title: &str,
            _content: &str,
        ) -> Result<NoteRecord> {
            bail!("not used in these tests")
        }

        async fn update_note_title(
            &self,
            _vault_id: i64,
            _key: &VaultKey,
            _note_id: i64,
            _title: &str,
        ) -> Result<()> {
            bail!("not used in these tests")
        }

        async fn update_note_content(
            &self,
            _vault_id: i64,
            _key: &VaultKey,
            _note_id: i64,
            _content: &str,
        ) -> Result<()> {
            bail!("not used in these tests")
        }

        async fn move_note(
            &self,
            _vault_id: i64,
            _key: &VaultKey,
            _note_id: i64,
            _target_vault_id: i64,
            _target_key: &VaultKey,
        ) -> Result<()> {
            bail!("not used in these tests")
        }

        async fn delete_note(&self, _vault_id: i64, _key: &VaultKey, note_id: i64) -> Result<()> {
            self.notes
                .lock()
                .unwrap()
                .remove(&note_id)
                .map(|_| ())
                .ok_or_else(|| anyhow!("no such note"))
        }

        async fn search_index(&self, _query: &str, _limit: usize) -> Result<Vec<SearchHit>> {
            Ok(vec![])
        }
    }

    struct OpenKeys;

    #[async_trait]
    impl KeyProvider for OpenKeys {
        async fn vault_key(&self, _vault: &VaultInfo) -> Result<VaultKey> {
            Ok(VaultKey(vec![0; 4]))
        }
    }

    struct RecordingSink {
        events: Mutex<Vec<AgentEvent>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                events: Mutex::new(vec![]),
            }
        }

        fn events(&self) -> Vec<AgentEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: AgentEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn agent(provider: ScriptedProvider, max_iterations: usize) -> Agent {
        let executor = ToolExecutor::new(
            Arc::new(OneVaultStore::new()),
            ExecutorHooks::new(Arc::new(OpenKeys)),
        );
        Agent::new(Arc::new(provider), Arc::new(executor)).with_config(AgentConfig {
            max_iterations,
            ..AgentConfig::default()
        })
    }

    // ── Native flavor ────────────────────────────────────────────────────

    #[tokio::test]
    async fn text_only_turn_finishes_in_one_round() {
        let agent = agent(
            ScriptedProvider::native(vec![final_round("Hello there.")]),
            10,
        );
        let mut transcript = vec![ChatMessage::user("hi")];
        let sink = RecordingSink::new();

        let answer = agent.run_turn(&mut transcript, &sink).await.unwrap();
        assert_eq!(answer, "Hello there.");
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[1].role, Role::Assistant);
        assert_eq!(
            sink.events(),
            vec![
                AgentEvent::RoundStarted { round: 1 },
                AgentEvent::AssistantText {
                    text: "Hello there.".into()
                },
                AgentEvent::TurnCompleted {
                    rounds: 1,
                    text: "Hello there.".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn tool_round_trip_appends_structured_turns() {
        let agent = agent(
            ScriptedProvider::native(vec![
                tool_round(
                    "Checking your vaults.",
                    vec![call("toolu_1", "list_vaults", json!({}))],
                ),
                final_round("You have one vault: Personal."),
            ]),
            10,
        );
        let mut transcript = vec![ChatMessage::user("what vaults do I have?")];
        let sink = RecordingSink::new();

        let answer = agent.run_turn(&mut transcript, &sink).await.unwrap();
        assert_eq!(answer, "You have one vault: Personal.");

        // user, assistant(text + tool_use), tool results, final assistant
        assert_eq!(transcript.len(), 4);
        let MessageContent::Blocks(blocks) = &transcript[1].content else {
            panic!("assistant turn should carry blocks");
        };
        assert!(matches!(blocks[0], ContentBlock::Text { .. }));
        assert!(
            matches!(&blocks[1], ContentBlock::ToolUse { id, name, .. }
                if id == "toolu_1" && name == "list_vaults")
        );

        assert_eq!(transcript[2].role, Role::ToolResult);
        let MessageContent::Blocks(results) = &transcript[2].content else {
            panic!("tool results should carry blocks");
        };
        let ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } = &results[0]
        else {
            panic!("expected a tool_result block");
        };
        assert_eq!(tool_use_id, "toolu_1");
        assert!(content.contains("Personal"));
        assert!(!is_error);
    }

    #[tokio::test]
    async fn failed_tool_is_fed_back_as_error_result() {
        let agent = agent(
            ScriptedProvider::native(vec![
                tool_round("", vec![call("toolu_9", "launch_rocket", json!({}))]),
                final_round("That tool does not exist."),
            ]),
            10,
        );
        let mut transcript = vec![ChatMessage::user("launch the rocket")];
        let sink = RecordingSink::new();

        let answer = agent.run_turn(&mut transcript, &sink).await.unwrap();
        assert_eq!(answer, "That tool does not exist.");

        let MessageContent::Blocks(results) = &transcript[2].content else {
            panic!("tool results should carry blocks");
        };
        let ContentBlock::ToolResult {
            content, is_error, ..
        } = &results[0]
        else {
            panic!("expected a tool_result block");
        };
        assert!(is_error);
        assert!(content.contains("unknown tool"));

        assert!(sink.events().iter().any(|e| matches!(
            e,
            AgentEvent::ToolCallFinished { success: false, .. }
        )));
    }

    #[tokio::test]
    async fn calls_in_one_round_run_sequentially() {
        let agent = agent(
            ScriptedProvider::native(vec![
                tool_round(
                    "",
                    vec![
                        call("toolu_a", "get_note", json!({"note_id": 1})),
                        call("toolu_b", "list_vaults", json!({})),
                    ],
                ),
                final_round("done"),
            ]),
            10,
        );
        let mut transcript = vec![ChatMessage::user("go")];
        let sink = RecordingSink::new();
        agent.run_turn(&mut transcript, &sink).await.unwrap();

        let tool_events: Vec<String> = sink
            .events()
            .iter()
            .filter_map(|e| match e {
                AgentEvent::ToolCallStarted { id, .. } => Some(format!("start:{id}")),
                AgentEvent::ToolCallFinished { id, .. } => Some(format!("end:{id}")),
                _ => None,
            })
            .collect();
        assert_eq!(
            tool_events,
            vec!["start:toolu_a", "end:toolu_a", "start:toolu_b", "end:toolu_b"]
        );
    }

    #[tokio::test]
    async fn round_limit_is_an_error_not_a_silent_stop() {
        let always_calling = (0..3)
            .map(|i| tool_round("", vec![call(&format!("toolu_{i}"), "list_vaults", json!({}))]))
            .collect();
        let agent = agent(ScriptedProvider::native(always_calling), 2);
        let mut transcript = vec![ChatMessage::user("loop forever")];
        let sink = RecordingSink::new();

        let err = agent.run_turn(&mut transcript, &sink).await.unwrap_err();
        assert!(matches!(err, AgentError::MaxIterations(2)));
        // Both rounds are still recorded for the next turn.
        assert_eq!(transcript.len(), 5);
        assert!(matches!(
            sink.events().last(),
            Some(AgentEvent::TurnFailed { .. })
        ));
    }

    #[tokio::test]
    async fn provider_failure_aborts_the_turn() {
        let agent = agent(ScriptedProvider::native(vec![Err(anyhow!("502 upstream"))]), 10);
        let mut transcript = vec![ChatMessage::user("hi")];
        let sink = RecordingSink::new();

        let err = agent.run_turn(&mut transcript, &sink).await.unwrap_err();
        assert!(matches!(err, AgentError::Provider(_)));
        assert!(err.to_string().contains("502 upstream"));
        assert_eq!(transcript.len(), 1);
        assert!(
            sink.events()
                .iter()
                .any(|e| matches!(e, AgentEvent::TurnFailed { error } if error.contains("502")))
        );
    }

    // ── Fallback flavor ──────────────────────────────────────────────────

    #[tokio::test]
    async fn fallback_round_trip_via_tagged_calls() {
        let reply = concat!(
            "Let me look.\n",
            r#"<tool_call>{"name": "list_vaults", "arguments": {}}</tool_call>"#
        );
        let agent = agent(
            ScriptedProvider::text_only(vec![
                Ok(reply.to_string()),
                Ok("You have one vault: Personal.".to_string()),
            ]),
            10,
        );
        let mut transcript = vec![ChatMessage::user("what vaults do I have?")];
        let sink = RecordingSink::new();

        let answer = agent.run_turn(&mut transcript, &sink).await.unwrap();
        assert_eq!(answer, "You have one vault: Personal.");

        // The tagged exchange stays internal: only the final tag-free
        // answer joins the caller's transcript.
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[1].role, Role::Assistant);
        assert_eq!(transcript[1].text(), "You have one vault: Personal.");
        for message in &transcript {
            assert!(!message.text().contains("<tool_call>"));
            assert!(!message.text().contains("<tool_result>"));
        }

        // The tool still ran, observably.
        assert!(
            sink.events()
                .iter()
                .any(|e| matches!(e, AgentEvent::ToolCallFinished { success: true, .. }))
        );
    }

    #[tokio::test]
    async fn fallback_prompt_carries_catalog_and_prior_results() {
        let reply = r#"<tool_call>{"name": "get_note", "arguments": {"note_id": 1}}</tool_call>"#;
        let provider = ScriptedProvider::text_only(vec![
            Ok(reply.to_string()),
            Ok("Your groceries note lists milk and eggs.".to_string()),
        ]);
        let executor = ToolExecutor::new(
            Arc::new(OneVaultStore::new()),
            ExecutorHooks::new(Arc::new(OpenKeys)),
        );
        let provider = Arc::new(provider);
        let agent = Agent::new(provider.clone(), Arc::new(executor));

        let mut transcript = vec![ChatMessage::user("what's on my grocery list?")];
        agent.run_turn(&mut transcript, &NullSink).await.unwrap();

        let prompts = provider.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        // Every prompt describes the tools and the tag protocol.
        assert!(prompts[0].contains("search_notes"));
        assert!(prompts[0].contains("<tool_call>"));
        // The second round sees the first round's call and result through
        // the loop history, while the transcript carries neither.
        assert!(prompts[1].contains("<tool_call>"));
        assert!(prompts[1].contains("<tool_result>"));
        assert!(prompts[1].contains("milk, eggs"));
        assert_eq!(transcript.len(), 2);
        assert!(!transcript[1].text().contains("<tool_result>"));
    }

    #[tokio::test]
    async fn fallback_with_malformed_block_treats_reply_as_final() {
        let reply = r#"I would run <tool_call>{"name": broken</tool_call> but never mind."#;
        let agent = agent(ScriptedProvider::text_only(vec![Ok(reply.to_string())]), 10);
        let mut transcript = vec![ChatMessage::user("hi")];
        let sink = RecordingSink::new();

        let answer = agent.run_turn(&mut transcript, &sink).await.unwrap();
        assert!(answer.contains("never mind"));
        assert_eq!(transcript.len(), 2);
        assert!(
            !sink
                .events()
                .iter()
                .any(|e| matches!(e, AgentEvent::ToolCallStarted { .. }))
        );
    }

    #[tokio::test]
    async fn fallback_round_limit_is_an_error() {
        let reply = r#"<tool_call>{"name": "list_vaults", "arguments": {}}</tool_call>"#;
        let replies = (0..3).map(|_| Ok(reply.to_string())).collect();
        let agent = agent(ScriptedProvider::text_only(replies), 2);
        let mut transcript = vec![ChatMessage::user("loop")];

        let err = agent.run_turn(&mut transcript, &NullSink).await.unwrap_err();
        assert!(matches!(err, AgentError::MaxIterations(2)));
        // Nothing from the abandoned tagged exchange leaks into the
        // transcript.
        assert_eq!(transcript.len(), 1);
    }

    #[tokio::test]
    async fn default_config_allows_ten_rounds() {
        assert_eq!(AgentConfig::default().max_iterations, DEFAULT_MAX_ITERATIONS);
        assert_eq!(DEFAULT_MAX_ITERATIONS, 10);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: AgentConfig = serde_json::from_str(r#"{"max_iterations": 3}"#).unwrap();
        assert_eq!(config.max_iterations, 3);
        assert!(!config.system_prompt.is_empty());
    }
}
