// src/actions/coerce.rs
// One place where untrusted LM output becomes a well-typed Action

use serde_json::{Map, Value};

use crate::core::error::{RlmError, RlmResult};
use crate::document::{ColumnRef, DocFormat, RowComparator};
use crate::env::scratch::format_number;

use super::Action;

/// Normalize and validate one LM-emitted JSON object.
///
/// Tolerated slips: alias field names, numeric strings where numbers are
/// required, boolean-ish strings, missing `out` (filled from per-op
/// defaults), and the legacy finalize shapes.
pub fn coerce_action(value: &Value) -> RlmResult<Action> {
    let obj = value
        .as_object()
        .ok_or_else(|| RlmError::invalid("action must be a JSON object"))?;
    let op = field(obj, &["op"])
        .and_then(Value::as_str)
        .ok_or_else(|| RlmError::invalid("missing op"))?;

    match op {
        "prompt_meta" => Ok(Action::PromptMeta),
        "doc_parse" => Ok(Action::DocParse {
            format: match opt_str(obj, &["format"]) {
                Some(s) => s.parse::<DocFormat>()?,
                None => DocFormat::Auto,
            },
            delimiter: opt_delimiter(obj)?,
            out: out_or(obj, "doc"),
        }),
        "doc_select_section" => Ok(Action::DocSelectSection {
            input: req_str(obj, op, &["in"])?,
            title: req_str(obj, op, &["title"])?,
            out: out_or(obj, "section"),
        }),
        "doc_table_sum" => Ok(Action::DocTableSum {
            input: req_str(obj, op, &["in"])?,
            column: req_column(obj, op, &["column", "whereColumn"])?,
            out: out_or(obj, "sum"),
        }),
        "doc_select_rows" => Ok(Action::DocSelectRows {
            input: req_str(obj, op, &["in"])?,
            column: req_column(obj, op, &["column", "whereColumn"])?,
            comparator: match opt_str(obj, &["comparator", "operator"]) {
                Some(s) => s.parse::<RowComparator>()?,
                None => RowComparator::Eq,
            },
            value: req_stringish(obj, op, &["value", "equals", "match"])?,
            out: out_or(obj, "rows"),
        }),
        "doc_project_columns" => Ok(Action::DocProjectColumns {
            input: req_str(obj, op, &["in"])?,
            columns: req_columns(obj, op, &["columns", "cols"])?,
            out: out_or(obj, "projected"),
            separator: opt_str(obj, &["separator", "sep"]).unwrap_or_else(|| ",".to_string()),
            include_header: opt_bool(obj, &["includeHeader", "include_header"])?.unwrap_or(false),
        }),
        "slice_prompt" => Ok(Action::SlicePrompt {
            start: req_int(obj, op, &["start"])?,
            end: req_int(obj, op, &["end"])?,
            out: out_or(obj, "slice"),
        }),
        "find" => {
            let needle = req_str(obj, op, &["needle"])?;
            if needle.is_empty() {
                return Err(RlmError::invalid("find: empty needle"));
            }
            Ok(Action::Find {
                needle,
                from: opt_usize(obj, op, &["from"])?.unwrap_or(0),
                out: out_or(obj, "hits"),
            })
        }
        "chunk_newlines" => Ok(Action::ChunkNewlines {
            max_lines: req_positive(obj, op, &["maxLines", "max_lines"])?,
            out: out_or(obj, "chunks"),
        }),
        "chunk_tokens" => Ok(Action::ChunkTokens {
            max_tokens: req_positive(obj, op, &["maxTokens", "max_tokens"])?,
            overlap: opt_usize(obj, op, &["overlap"])?.unwrap_or(0),
            out: out_or(obj, "chunks"),
        }),
        "sum_csv_column" => Ok(Action::SumCsvColumn {
            column: req_column(obj, op, &["column", "whereColumn"])?,
            delimiter: opt_delimiter(obj)?.unwrap_or(','),
            out: out_or(obj, "sum"),
        }),
        "pick_word" => Ok(Action::PickWord {
            index: opt_usize(obj, op, &["index"])?.unwrap_or(0),
            out: out_or(obj, "word"),
        }),
        "sub_map" => {
            let concurrency = opt_usize(obj, op, &["concurrency"])?.unwrap_or(1).max(1);
            Ok(Action::SubMap {
                input: req_str(obj, op, &["in"])?,
                query_template: req_str(obj, op, &["queryTemplate", "query_template"])?,
                out: out_or(obj, "mapped"),
                limit: opt_usize(obj, op, &["limit"])?,
                concurrency,
            })
        }
        "reduce_join" => Ok(Action::ReduceJoin {
            input: req_str(obj, op, &["in"])?,
            sep: req_str(obj, op, &["sep", "separator"])?,
            out: out_or(obj, "joined"),
        }),
        "set" => Ok(Action::Set {
            path: req_str(obj, op, &["path", "key"])?,
            value: field(obj, &["value"])
                .cloned()
                .ok_or_else(|| RlmError::invalid("set: missing value"))?,
        }),
        "finalize" => {
            let from = opt_str(obj, &["from", "path", "key"]);
            let value = field(obj, &["value"])
                .cloned()
                .or_else(|| obj.get("env").and_then(|env| env.get("final")).cloned());
            if from.is_none() && value.is_none() {
                return Err(RlmError::invalid("finalize: missing from"));
            }
            Ok(Action::Finalize { from, value })
        }
        "call_symbol" => Ok(Action::CallSymbol {
            symbol: req_str(obj, op, &["symbol"])?,
            out: out_or(obj, "symbol_out"),
            args: field(obj, &["args"]).cloned(),
            input: field(obj, &["input"]).cloned(),
        }),
        other => Err(RlmError::invalid(format!("unknown op: {}", other))),
    }
}

/// First present, non-null field among aliases.
fn field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| obj.get(*name)).filter(|v| !v.is_null())
}

fn opt_str(obj: &Map<String, Value>, names: &[&str]) -> Option<String> {
    field(obj, names).and_then(Value::as_str).map(str::to_string)
}

fn req_str(obj: &Map<String, Value>, op: &str, names: &[&str]) -> RlmResult<String> {
    opt_str(obj, names)
        .ok_or_else(|| RlmError::invalid(format!("{}: missing {}", op, names[0])))
}

/// String or number accepted; numbers keep their canonical string form.
fn req_stringish(obj: &Map<String, Value>, op: &str, names: &[&str]) -> RlmResult<String> {
    match field(obj, names) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(format_number(n.as_f64().unwrap_or(0.0))),
        Some(Value::Bool(b)) => Ok(b.to_string()),
        _ => Err(RlmError::invalid(format!("{}: missing {}", op, names[0]))),
    }
}

/// Numbers and numeric strings both count.
fn num_from(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn req_int(obj: &Map<String, Value>, op: &str, names: &[&str]) -> RlmResult<i64> {
    field(obj, names)
        .and_then(num_from)
        .map(|n| n as i64)
        .ok_or_else(|| RlmError::invalid(format!("{}: missing {}", op, names[0])))
}

fn opt_usize(obj: &Map<String, Value>, op: &str, names: &[&str]) -> RlmResult<Option<usize>> {
    match field(obj, names) {
        None => Ok(None),
        Some(value) => {
            let n = num_from(value).ok_or_else(|| {
                RlmError::invalid(format!("{}: {} must be a number", op, names[0]))
            })?;
            if n < 0.0 {
                return Err(RlmError::invalid(format!(
                    "{}: {} must be non-negative",
                    op, names[0]
                )));
            }
            Ok(Some(n as usize))
        }
    }
}

fn req_positive(obj: &Map<String, Value>, op: &str, names: &[&str]) -> RlmResult<usize> {
    let n = opt_usize(obj, op, names)?
        .ok_or_else(|| RlmError::invalid(format!("{}: missing {}", op, names[0])))?;
    if n == 0 {
        return Err(RlmError::invalid(format!("{}: {} must be positive", op, names[0])));
    }
    Ok(n)
}

fn opt_bool(obj: &Map<String, Value>, names: &[&str]) -> RlmResult<Option<bool>> {
    match field(obj, names) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::String(s)) => match s.as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            other => Err(RlmError::invalid(format!("not a boolean: {}", other))),
        },
        Some(other) => Err(RlmError::invalid(format!("not a boolean: {}", other))),
    }
}

fn column_from(value: &Value) -> RlmResult<ColumnRef> {
    match value {
        Value::Number(n) => {
            let f = n.as_f64().unwrap_or(-1.0);
            if f < 0.0 || f.fract() != 0.0 {
                return Err(RlmError::invalid(
                    "column index must be a non-negative integer",
                ));
            }
            Ok(ColumnRef::Index(f as usize))
        }
        Value::String(s) => Ok(ColumnRef::Name(s.clone())),
        other => Err(RlmError::invalid(format!("bad column: {}", other))),
    }
}

fn req_column(obj: &Map<String, Value>, op: &str, names: &[&str]) -> RlmResult<ColumnRef> {
    field(obj, names)
        .ok_or_else(|| RlmError::invalid(format!("{}: missing {}", op, names[0])))
        .and_then(column_from)
}

fn req_columns(obj: &Map<String, Value>, op: &str, names: &[&str]) -> RlmResult<Vec<ColumnRef>> {
    let items = field(obj, names)
        .and_then(Value::as_array)
        .ok_or_else(|| RlmError::invalid(format!("{}: missing {}", op, names[0])))?;
    if items.is_empty() {
        return Err(RlmError::invalid(format!("{}: {} must be non-empty", op, names[0])));
    }
    items.iter().map(column_from).collect()
}

fn opt_delimiter(obj: &Map<String, Value>) -> RlmResult<Option<char>> {
    match opt_str(obj, &["delimiter"]) {
        None => Ok(None),
        Some(s) => s
            .chars()
            .next()
            .map(Some)
            .ok_or_else(|| RlmError::invalid("delimiter must be a single character")),
    }
}

fn out_or(obj: &Map<String, Value>, default: &str) -> String {
    opt_str(obj, &["out"]).unwrap_or_else(|| default.to_string())
}
