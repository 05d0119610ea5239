// src/llm/extract.rs
// Pull the first balanced JSON object out of free-form model output

use serde_json::Value;

use crate::core::error::{RlmError, RlmResult};

/// Extract and parse the first balanced `{...}` object, tolerating
/// surrounding prose and braces inside string literals. Candidates that
/// fail to parse are retried with lenient repairs before moving on to
/// the next opening brace.
pub fn extract_first_json(text: &str) -> RlmResult<Value> {
    let chars: Vec<char> = text.chars().collect();
    let mut search_from = 0;

    while let Some(open) = find_open_brace(&chars, search_from) {
        if let Some(end) = balanced_end(&chars, open) {
            let candidate: String = chars[open..=end].iter().collect();
            if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
                return Ok(value);
            }
            if let Ok(value) = serde_json::from_str::<Value>(&repair_json_simple(&candidate)) {
                return Ok(value);
            }
        }
        search_from = open + 1;
    }

    Err(RlmError::MalformedOutput(
        "no JSON object found in model output".to_string(),
    ))
}

fn find_open_brace(chars: &[char], from: usize) -> Option<usize> {
    chars[from..].iter().position(|&c| c == '{').map(|i| from + i)
}

/// Index of the matching close brace, tracking string literals and escapes.
fn balanced_end(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate().skip(open) {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Repair common JSON slips before giving up
pub fn repair_json_simple(json_str: &str) -> String {
    json_str
        .replace('\'', "\"")
        .replace(",]", "]")
        .replace(",}", "}")
        .replace("undefined", "null")
        .replace("NaN", "null")
}
