// src/trace/mod.rs
// Append-only record of what the runtime did, with bounded previews

use serde::Serialize;

use crate::llm::TokenUsage;

/// One trace entry. Previews are already truncated when events are built,
/// so a trace never retains a document body.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEvent {
    #[serde(rename_all = "camelCase")]
    RootStep {
        step: u32,
        depth: u32,
        output_preview: String,
        stdout_preview: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<TokenUsage>,
        elapsed_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    ReplExec {
        step: u32,
        op: String,
        stdout: String,
        scratch_keys: Vec<String>,
        elapsed_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    SubCall {
        fingerprint: String,
        cached: bool,
        depth: u32,
        query_preview: String,
        result_len: usize,
        result_preview: String,
        elapsed_ms: u64,
    },
}

impl TraceEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TraceEvent::RootStep { .. } => "root_step",
            TraceEvent::ReplExec { .. } => "repl_exec",
            TraceEvent::SubCall { .. } => "sub_call",
        }
    }
}

/// Ordered event log for one environment
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Trace {
    events: Vec<TraceEvent>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: TraceEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn sub_calls(&self) -> impl Iterator<Item = &TraceEvent> {
        self.events.iter().filter(|e| matches!(e, TraceEvent::SubCall { .. }))
    }
}
