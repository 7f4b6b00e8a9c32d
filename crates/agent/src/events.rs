//! Progress events emitted while a turn runs.
//!
//! The loop reports what it is doing as it goes so a frontend can render
//! intermediate assistant text and per-tool progress before the final answer
//! arrives.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

/// One progress notification from a running turn.
///
/// There is deliberately no user-role text event: the loop never originates
/// user turns.  The one user message of a turn is pushed by the caller
/// before `run_turn`, so the caller already has it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A model round is starting (1-based).
    RoundStarted { round: usize },
    /// Assistant prose produced this round, possibly alongside tool calls.
    AssistantText { text: String },
    ToolCallStarted {
        id: String,
        name: String,
        arguments: Value,
    },
    ToolCallFinished {
        id: String,
        name: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// The turn produced a final answer after `rounds` model rounds.
    TurnCompleted { rounds: usize, text: String },
    /// The turn aborted: provider failure or round limit.  Mirrors the error
    /// returned from `run_turn` for observers that only watch events.
    TurnFailed { error: String },
}

/// Where events go.  Emission must never block or fail the turn.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: AgentEvent);
}

/// Sink that discards everything.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: AgentEvent) {}
}

/// Sink backed by an unbounded channel.  A dropped receiver silently ends
/// delivery; the turn keeps running.
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<AgentEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: AgentEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_serialize_with_type_tags() {
        let event = AgentEvent::ToolCallStarted {
            id: "toolu_1".into(),
            name: "search_notes".into(),
            arguments: json!({"query": "tax"}),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "tool_call_started");
        assert_eq!(value["name"], "search_notes");
    }

    #[test]
    fn finished_event_omits_absent_error() {
        let event = AgentEvent::ToolCallFinished {
            id: "toolu_1".into(),
            name: "get_note".into(),
            success: true,
            error: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("error").is_none());
    }

    #[test]
    fn channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        sink.emit(AgentEvent::RoundStarted { round: 1 });
        sink.emit(AgentEvent::TurnCompleted {
            rounds: 1,
            text: "done".into(),
        });
        assert_eq!(rx.try_recv().unwrap(), AgentEvent::RoundStarted { round: 1 });
        assert!(matches!(
            rx.try_recv().unwrap(),
            AgentEvent::TurnCompleted { rounds: 1, .. }
        ));
    }

    #[test]
    fn channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.emit(AgentEvent::RoundStarted { round: 1 });
    }
}
