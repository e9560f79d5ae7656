use std::sync::Arc;

use serde::Serialize;

/// Turn lifecycle event names, emitted in this order for a normal turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnEvent {
    RunStart,
    SessionResolved,
    PreloadStart,
    PreloadEnd,
    LlmStart,
    LlmEnd,
    ToolStart,
    ToolEnd,
    TurnCompleted,
    RunEnd,
}

impl TurnEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TurnEvent::RunStart => "run_start",
            TurnEvent::SessionResolved => "session_resolved",
            TurnEvent::PreloadStart => "preload_start",
            TurnEvent::PreloadEnd => "preload_end",
            TurnEvent::LlmStart => "llm_start",
            TurnEvent::LlmEnd => "llm_end",
            TurnEvent::ToolStart => "tool_start",
            TurnEvent::ToolEnd => "tool_end",
            TurnEvent::TurnCompleted => "turn_completed",
            TurnEvent::RunEnd => "run_end",
        }
    }
}

/// Receiver for lifecycle events. Payload fields are stable per event name.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: TurnEvent, payload: serde_json::Value);
}

/// Sink that drops every event — the default for embedders that don't listen.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: TurnEvent, _payload: serde_json::Value) {}
}

/// Shared handle passed through the orchestrator.
pub type SharedSink = Arc<dyn EventSink>;

pub fn null_sink() -> SharedSink {
    Arc::new(NullSink)
}
