//! Loop flavor for text-only providers.
//!
//! The catalog is described in the system prompt and the model is told to
//! wrap calls in `<tool_call>` tags.  Each round renders one flat prompt,
//! generates, parses out calls, and feeds results back as tagged text the
//! model can read in the next round.  The tag-protocol exchange lives in a
//! loop-local history; the caller's transcript only ever receives the final
//! tag-free answer, so a persisted or replayed conversation never carries
//! machine tag blocks.

use serde_json::json;
use tracing::{debug, info};

use vaultmind_llm::{ChatMessage, MessageContent, Role};
use vaultmind_tools::catalog_summary;

use crate::events::{AgentEvent, EventSink};
use crate::parser::parse_tagged_reply;
use crate::{Agent, AgentError};

pub(crate) async fn run(
    agent: &Agent,
    transcript: &mut Vec<ChatMessage>,
    sink: &dyn EventSink,
) -> Result<String, AgentError> {
    let preamble = tool_preamble(&agent.config.system_prompt);
    let max = agent.config.max_iterations;
    // Tag-protocol turns accumulate here, never in the transcript.
    let mut history: Vec<String> = Vec::new();

    for round in 1..=max {
        sink.emit(AgentEvent::RoundStarted { round });
        debug!(round, "fallback round");

        let prompt = render_prompt(&preamble, transcript, &history);
        let reply = match agent.provider.generate(&prompt).await {
            Ok(reply) => reply,
            Err(err) => {
                let err = AgentError::Provider(err);
                sink.emit(AgentEvent::TurnFailed {
                    error: err.to_string(),
                });
                return Err(err);
            }
        };

        let parsed = parse_tagged_reply(&reply);
        if !parsed.text.is_empty() {
            sink.emit(AgentEvent::AssistantText {
                text: parsed.text.clone(),
            });
        }

        if parsed.calls.is_empty() {
            transcript.push(ChatMessage::assistant(parsed.text.clone()));
            sink.emit(AgentEvent::TurnCompleted {
                rounds: round,
                text: parsed.text.clone(),
            });
            info!(rounds = round, "turn finished");
            return Ok(parsed.text);
        }

        // The raw reply, tags included, goes into the loop history so the
        // model sees its own calls next round.
        history.push(format!("Assistant: {reply}"));

        let mut results = Vec::with_capacity(parsed.calls.len());
        for call in &parsed.calls {
            sink.emit(AgentEvent::ToolCallStarted {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            });
            let outcome = agent.executor.execute(call).await;
            sink.emit(AgentEvent::ToolCallFinished {
                id: call.id.clone(),
                name: call.name.clone(),
                success: outcome.success,
                error: outcome.error.clone(),
            });
            let payload = if outcome.success {
                json!({ "name": call.name, "output": outcome.output })
            } else {
                json!({ "name": call.name, "error": outcome.error })
            };
            results.push(format!("<tool_result>{payload}</tool_result>"));
        }
        history.push(format!("Tool results: {}", results.join("\n")));
    }

    let err = AgentError::MaxIterations(max);
    sink.emit(AgentEvent::TurnFailed {
        error: err.to_string(),
    });
    Err(err)
}

/// System preamble: base instructions plus the catalog and the tag protocol.
fn tool_preamble(system_prompt: &str) -> String {
    format!(
        "{system_prompt}\n\n\
         You can use the following tools:\n{}\n\n\
         To call a tool, emit exactly one line per call of the form:\n\
         <tool_call>{{\"name\": \"tool_name\", \"arguments\": {{...}}}}</tool_call>\n\
         Tool results arrive in <tool_result> blocks in the next message.\n\
         When you have everything you need, answer in plain text with no tool_call tags.",
        catalog_summary()
    )
}

/// Flatten the transcript plus this turn's loop history into a single prompt
/// for `/api/generate`-style endpoints that take no message list.
fn render_prompt(preamble: &str, transcript: &[ChatMessage], history: &[String]) -> String {
    let mut prompt = String::from(preamble);
    prompt.push_str("\n\n");
    for message in transcript {
        let label = match message.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::ToolResult => "Tool results",
        };
        let body = match &message.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(_) => message.text(),
        };
        prompt.push_str(label);
        prompt.push_str(": ");
        prompt.push_str(&body);
        prompt.push('\n');
    }
    for entry in history {
        prompt.push_str(entry);
        prompt.push('\n');
    }
    prompt.push_str("Assistant:");
    prompt
}
