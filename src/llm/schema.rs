// src/llm/schema.rs
// JSON schemas handed to providers for structured output

use serde_json::{json, Value};

use super::ResponseFormat;

/// The action vocabulary, in the order the system prompt documents it.
pub const ACTION_OPS: &[&str] = &[
    "prompt_meta",
    "doc_parse",
    "doc_select_section",
    "doc_table_sum",
    "doc_select_rows",
    "doc_project_columns",
    "slice_prompt",
    "find",
    "chunk_newlines",
    "chunk_tokens",
    "sum_csv_column",
    "pick_word",
    "sub_map",
    "reduce_join",
    "set",
    "finalize",
    "call_symbol",
];

fn nullable(kind: &str) -> Value {
    json!({"type": [kind, "null"]})
}

/// Schema for one action object. Every known field gets a nullable typed
/// slot; `additionalProperties` stays open because the coercion layer is
/// the real validator.
pub fn action_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "op": {"type": "string", "enum": ACTION_OPS},
            "start": nullable("integer"),
            "end": nullable("integer"),
            "out": nullable("string"),
            "format": nullable("string"),
            "title": nullable("string"),
            "columns": {"type": ["array", "null"], "items": {"type": ["string", "integer"]}},
            "equals": nullable("string"),
            "comparator": nullable("string"),
            "includeHeader": nullable("boolean"),
            "separator": nullable("string"),
            "needle": nullable("string"),
            "from": nullable("string"),
            "maxLines": nullable("integer"),
            "maxTokens": nullable("integer"),
            "overlap": nullable("integer"),
            "column": {"type": ["string", "integer", "null"]},
            "delimiter": nullable("string"),
            "index": nullable("integer"),
            "in": nullable("string"),
            "queryTemplate": nullable("string"),
            "limit": nullable("integer"),
            "concurrency": nullable("integer"),
            "sep": nullable("string"),
            "path": nullable("string"),
            "value": {},
            "symbol": nullable("string"),
            "args": {},
            "input": {}
        },
        "required": ["op"],
        "additionalProperties": true
    })
}

pub fn action_response_format() -> ResponseFormat {
    ResponseFormat::JsonSchema {
        name: "rlm_action".to_string(),
        schema: action_schema(),
        strict: false,
        description: Some("One RLM action per turn".to_string()),
    }
}

/// Schema for planner output
pub fn plan_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "mode": {"type": "string", "enum": ["single", "long_run"]},
            "task": {"type": "string"},
            "profile": {"type": ["string", "null"], "enum": ["pure", "hybrid", null]},
            "symbols": {"type": ["array", "null"], "items": {"type": "string"}},
            "budget": {
                "type": ["object", "null"],
                "properties": {
                    "maxSteps": nullable("integer"),
                    "maxSubCalls": nullable("integer"),
                    "maxDepth": nullable("integer"),
                    "maxPromptReadChars": nullable("integer"),
                    "maxTimeMs": nullable("integer")
                },
                "additionalProperties": false
            },
            "longRun": {
                "type": ["object", "null"],
                "properties": {
                    "objectives": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "key": {"type": "string"},
                                "direction": {"type": "string", "enum": ["minimize", "maximize"]},
                                "symbol": {"type": "string"},
                                "weight": nullable("number")
                            },
                            "required": ["key", "direction", "symbol"]
                        }
                    },
                    "constraints": {
                        "type": ["array", "null"],
                        "items": {
                            "type": "object",
                            "properties": {
                                "key": {"type": "string"},
                                "comparator": {"type": "string", "enum": ["lt", "lte", "gt", "gte", "eq"]},
                                "value": {"type": "number"},
                                "symbol": nullable("string"),
                                "source": {
                                    "type": ["string", "null"],
                                    "enum": ["absolute", "delta", "ratio", "delta_ratio", null]
                                }
                            },
                            "required": ["key", "comparator", "value"]
                        }
                    },
                    "maxIterations": nullable("integer"),
                    "stopWhenNoAccept": nullable("boolean"),
                    "minScoreDelta": nullable("number")
                },
                "required": ["objectives"]
            }
        },
        "required": ["mode", "task"],
        "additionalProperties": true
    })
}

pub fn plan_response_format() -> ResponseFormat {
    ResponseFormat::JsonSchema {
        name: "rlm_plan".to_string(),
        schema: plan_schema(),
        strict: false,
        description: Some("Execution plan for a user request".to_string()),
    }
}
