// Trace Recorder: durable, ordered capture of a turn's reasoning and state
// changes. Events are appended in happens-before order and tagged with a
// monotonically non-decreasing `ts_relative_ms` measured from `turn_start`.
//
// Grounded on `trace_recorder.py`/`trace_events.py`: this module builds the
// JSON-Lines content; actual persistence to `conversations/<id>/traces/`
// belongs to the storage layer (component J), which the core does not
// depend on.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::state::AgentState;

/// One append-only trace event. Serializes to a flat JSON object with
/// `event`, `ts`, `ts_relative_ms` plus the variant's own fields, matching
/// the original's `{"event": ..., "ts": ..., "ts_relative_ms": ..., **kwargs}`
/// shape rather than a tagged enum, so existing trace tooling keeps working
/// against the same keys.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum TraceEventBody {
    TurnStart { user_message: String, turn_number: u32 },
    InitialState { state: Value },
    Decision { context: String, system_prompt: String, decision: Value, cost: f64, input_tokens: u32, output_tokens: u32 },
    AgentInput { agent: String, input: Value },
    AgentOutput { agent: String, output: Value, duration_ms: u64, cost: f64, input_tokens: u32, output_tokens: u32 },
    StateSnapshot { trigger: String, state: Value },
    Error { message: String },
    Final { total_cost: f64, total_input_tokens: u32, total_output_tokens: u32 },
}

#[derive(Debug, Clone, Serialize)]
struct TraceEvent {
    #[serde(flatten)]
    body: TraceEventBody,
    ts: DateTime<Utc>,
    ts_relative_ms: i64,
}

/// Records one turn's trace as an append-only sequence of JSON-Lines
/// events. Refuses further events after `finalize`.
pub struct TraceRecorder {
    conversation_id: String,
    turn_number: u32,
    events: Vec<TraceEvent>,
    start_time: DateTime<Utc>,
    finalized: bool,
}

impl TraceRecorder {
    pub fn new(conversation_id: impl Into<String>, turn_number: u32) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            turn_number,
            events: Vec::new(),
            start_time: Utc::now(),
            finalized: false,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn turn_number(&self) -> u32 {
        self.turn_number
    }

    fn push(&mut self, body: TraceEventBody) {
        if self.finalized {
            tracing::warn!(conversation_id = %self.conversation_id, turn = self.turn_number, "attempted to add event to finalized trace");
            return;
        }
        let now = Utc::now();
        let ts_relative_ms = (now - self.start_time).num_milliseconds().max(0);
        self.events.push(TraceEvent { body, ts: now, ts_relative_ms });
    }

    pub fn record_turn_start(&mut self, user_message: &str) {
        self.push(TraceEventBody::TurnStart { user_message: user_message.to_string(), turn_number: self.turn_number });
    }

    pub fn record_initial_state(&mut self, state: &AgentState) {
        self.push(TraceEventBody::InitialState { state: serde_json::to_value(state).unwrap_or(Value::Null) });
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_decision(
        &mut self,
        context: &str,
        system_prompt: &str,
        decision: &impl Serialize,
        cost: f64,
        input_tokens: u32,
        output_tokens: u32,
    ) {
        self.push(TraceEventBody::Decision {
            context: context.to_string(),
            system_prompt: system_prompt.to_string(),
            decision: serde_json::to_value(decision).unwrap_or(Value::Null),
            cost,
            input_tokens,
            output_tokens,
        });
    }

    pub fn record_agent_input(&mut self, agent: &str, input: &impl Serialize) {
        self.push(TraceEventBody::AgentInput {
            agent: agent.to_string(),
            input: serde_json::to_value(input).unwrap_or(Value::Null),
        });
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_agent_output(
        &mut self,
        agent: &str,
        output: &impl Serialize,
        duration_ms: u64,
        cost: f64,
        input_tokens: u32,
        output_tokens: u32,
    ) {
        self.push(TraceEventBody::AgentOutput {
            agent: agent.to_string(),
            output: serde_json::to_value(output).unwrap_or(Value::Null),
            duration_ms,
            cost,
            input_tokens,
            output_tokens,
        });
    }

    pub fn record_state_snapshot(&mut self, state: &AgentState, trigger: &str) {
        self.push(TraceEventBody::StateSnapshot {
            trigger: trigger.to_string(),
            state: serde_json::to_value(state).unwrap_or(Value::Null),
        });
    }

    pub fn record_error(&mut self, message: &str) {
        self.push(TraceEventBody::Error { message: message.to_string() });
    }

    /// Appends the `final` event and returns the JSON-Lines content (one
    /// object per line) for the storage layer to persist. Refuses further
    /// events; calling `finalize` twice is a no-op that returns `None`.
    pub fn finalize(&mut self, total_cost: f64, total_input_tokens: u32, total_output_tokens: u32) -> Option<String> {
        if self.finalized {
            tracing::warn!(conversation_id = %self.conversation_id, turn = self.turn_number, "trace already finalized");
            return None;
        }
        self.push(TraceEventBody::Final { total_cost, total_input_tokens, total_output_tokens });
        self.finalized = true;

        let mut lines = String::new();
        for event in &self.events {
            lines.push_str(&serde_json::to_string(event).unwrap_or_default());
            lines.push('\n');
        }
        Some(lines)
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_yields_one_line_per_event_with_nondecreasing_ts() {
        let mut recorder = TraceRecorder::new("conv1", 1);
        recorder.record_turn_start("hello");
        recorder.record_error("boom");
        let jsonl = recorder.finalize(0.01, 10, 20).unwrap();
        let lines: Vec<&str> = jsonl.lines().collect();
        assert_eq!(lines.len(), 3); // turn_start, error, final

        let mut last_ts = -1i64;
        for line in &lines {
            let value: Value = serde_json::from_str(line).unwrap();
            let ts = value["ts_relative_ms"].as_i64().unwrap();
            assert!(ts >= last_ts);
            last_ts = ts;
        }
        assert_eq!(serde_json::from_str::<Value>(lines[0]).unwrap()["event"], "turn_start");
        assert_eq!(serde_json::from_str::<Value>(lines[2]).unwrap()["event"], "final");
    }

    #[test]
    fn refuses_events_after_finalize() {
        let mut recorder = TraceRecorder::new("conv1", 1);
        recorder.finalize(0.0, 0, 0);
        assert!(recorder.finalize(0.0, 0, 0).is_none());
        recorder.record_error("too late");
        // no panic, and the event was silently dropped
    }
}
