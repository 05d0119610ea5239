// src/orchestrator/prompts.rs
// The synthetic conversation scaffolding: system prompt and metadata turns

use serde_json::json;

use crate::core::budget::Budget;
use crate::env::Environment;

/// Action vocabulary and ground rules. The document body is never placed
/// in the chat; the LM navigates it through actions and summaries.
pub const SYSTEM_PROMPT: &str = r#"You are the controller of a recursive language model runtime.
A document is loaded in an external environment. You never see the document directly; you operate on it by emitting exactly ONE JSON action object per turn and reading the observation returned to you.

Actions:
- {"op":"prompt_meta"} -> document id and length
- {"op":"doc_parse","format":"auto|text|markdown|csv","delimiter":",","out":"doc"} -> parse the document into a structured form
- {"op":"doc_select_section","in":"doc","title":"Intro","out":"section"} -> body of a markdown section
- {"op":"doc_table_sum","in":"doc","column":"score","out":"sum"} -> sum a csv column
- {"op":"doc_select_rows","in":"doc","column":"name","comparator":"eq","value":"alice","out":"rows"} -> filter csv rows (comparators: eq, contains, gt, gte, lt, lte)
- {"op":"doc_project_columns","in":"rows","columns":["score"],"separator":"|","includeHeader":false,"out":"projected"} -> project columns to joined row strings
- {"op":"slice_prompt","start":0,"end":400,"out":"slice"} -> raw character slice
- {"op":"find","needle":"TOKEN=","from":0,"out":"hits"} -> indices of all occurrences
- {"op":"chunk_newlines","maxLines":20,"out":"chunks"} -> split into line groups
- {"op":"chunk_tokens","maxTokens":200,"overlap":20,"out":"chunks"} -> sliding token windows
- {"op":"sum_csv_column","column":1,"delimiter":",","out":"sum"} -> ad-hoc csv column sum
- {"op":"pick_word","index":1,"out":"word"} -> nth word of the document
- {"op":"sub_map","in":"chunks","queryTemplate":"summarize: {{item}}","concurrency":2,"out":"mapped"} -> run a child RLM over each item
- {"op":"reduce_join","in":"mapped","sep":"|","out":"joined"} -> join an array
- {"op":"set","path":"answer","value":"..."} -> store a value in scratch
- {"op":"finalize","from":"answer"} -> finish with the value under a scratch key
- {"op":"call_symbol","symbol":"name","out":"result"} -> invoke an externally provided function

Rules:
- Reply with a single JSON object and nothing else.
- Observations are summaries (lengths, counts, keys); use scratch keys to carry values forward.
- Stay within the step, sub-call, and read budgets reported to you.
- When the answer is ready, store it with "set" and emit "finalize".

Example session:
turn 1 -> {"op":"doc_parse","format":"csv","out":"doc"}
observation -> {"op":"doc_parse","out":"doc","format":"csv","lines":3,"rows":2,"columns":2}
turn 2 -> {"op":"doc_table_sum","in":"doc","column":"score","out":"answer"}
observation -> {"op":"doc_table_sum","out":"answer","column":"score","sum":"8"}
turn 3 -> {"op":"finalize","from":"answer"}
"#;

/// First user turn: run metadata only, never document content.
pub fn init_turn(env: &Environment, task: Option<&str>) -> String {
    json!({
        "kind": "rlm_init",
        "depth": env.depth(),
        "prompt": {
            "promptId": env.prompt_id,
            "length": env.prompt_len,
        },
        "budget": env.budget.report(),
        "task": task,
        "hints": {
            "finalizeVia": "finalize",
            "scratchHints": ["answer", "total", "picked", "joined", "result"],
        },
    })
    .to_string()
}

/// Error turn after a rejected or failed action.
pub fn error_turn(depth: u32, error: &str, budget: &Budget) -> String {
    json!({
        "kind": "rlm_error",
        "depth": depth,
        "error": error,
        "budgetUsed": budget.used_summary(),
        "required": {
            "shape": "a single JSON action object",
            "example": {"op": "prompt_meta"},
        },
    })
    .to_string()
}

/// Observation turn after a successful action.
pub fn stdout_turn(depth: u32, stdout: &str, budget: &Budget) -> String {
    json!({
        "kind": "rlm_stdout",
        "depth": depth,
        "stdout": stdout,
        "budgetUsed": budget.used_summary(),
    })
    .to_string()
}
