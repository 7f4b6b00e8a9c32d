//! Loop flavor for providers with native tool calling.
//!
//! Each round sends the full transcript plus the catalog schema.  Tool use
//! comes back as structured blocks; results go back as `tool_result` blocks
//! keyed by the provider-issued call id.

use serde_json::json;
use tracing::{debug, info};

use vaultmind_llm::{ChatMessage, ContentBlock};
use vaultmind_tools::catalog_schema;

use crate::events::{AgentEvent, EventSink};
use crate::{Agent, AgentError};

pub(crate) async fn run(
    agent: &Agent,
    transcript: &mut Vec<ChatMessage>,
    sink: &dyn EventSink,
) -> Result<String, AgentError> {
    let tools = catalog_schema();
    let max = agent.config.max_iterations;

    for round in 1..=max {
        sink.emit(AgentEvent::RoundStarted { round });
        debug!(round, "native round");

        let response = match agent
            .provider
            .generate_with_tools(&agent.config.system_prompt, transcript, &tools)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                let err = AgentError::Provider(err);
                sink.emit(AgentEvent::TurnFailed {
                    error: err.to_string(),
                });
                return Err(err);
            }
        };

        if !response.content.is_empty() {
            sink.emit(AgentEvent::AssistantText {
                text: response.content.clone(),
            });
        }

        if response.tool_calls.is_empty() {
            transcript.push(ChatMessage::assistant(response.content.clone()));
            sink.emit(AgentEvent::TurnCompleted {
                rounds: round,
                text: response.content.clone(),
            });
            info!(rounds = round, "turn finished");
            return Ok(response.content);
        }

        // Record the assistant turn exactly as the model produced it, text
        // first, then its tool_use blocks in declared order.
        let mut blocks = Vec::new();
        if !response.content.is_empty() {
            blocks.push(ContentBlock::Text {
                text: response.content.clone(),
            });
        }
        for call in &response.tool_calls {
            blocks.push(ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.arguments.clone(),
            });
        }
        transcript.push(ChatMessage::assistant_blocks(blocks));

        // Calls run one at a time so a destructive confirmation is decided
        // before the next call fires.
        let mut results = Vec::with_capacity(response.tool_calls.len());
        for call in &response.tool_calls {
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
            let content = if outcome.success {
                outcome
                    .output
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| json!({}).to_string())
            } else {
                outcome.error.unwrap_or_else(|| "tool failed".to_string())
            };
            results.push(ContentBlock::ToolResult {
                tool_use_id: call.id.clone(),
                content,
                is_error: !outcome.success,
            });
        }
        transcript.push(ChatMessage::tool_results(results));
    }

    let err = AgentError::MaxIterations(max);
    sink.emit(AgentEvent::TurnFailed {
        error: err.to_string(),
    });
    Err(err)
}
