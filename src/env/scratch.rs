// src/env/scratch.rs
// Scratch memory: a typed value tree with dotted-path assignment

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::core::error::{RlmError, RlmResult};
use crate::document::StructuredDocument;

/// A value the LM can park under a scratch key.
///
/// Tagged variant rather than raw JSON so action handlers pattern-match
/// instead of probing fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ScratchValue {
    Text(String),
    Number(f64),
    Bool(bool),
    List(Vec<ScratchValue>),
    Map(BTreeMap<String, ScratchValue>),
    Doc(StructuredDocument),
}

impl ScratchValue {
    pub fn from_json(value: Value) -> ScratchValue {
        match value {
            Value::Null => ScratchValue::Text(String::new()),
            Value::Bool(b) => ScratchValue::Bool(b),
            Value::Number(n) => ScratchValue::Number(n.as_f64().unwrap_or(0.0)),
            Value::String(s) => ScratchValue::Text(s),
            Value::Array(items) => {
                ScratchValue::List(items.into_iter().map(ScratchValue::from_json).collect())
            }
            Value::Object(map) => ScratchValue::Map(
                map.into_iter().map(|(k, v)| (k, ScratchValue::from_json(v))).collect(),
            ),
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScratchValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ScratchValue]> {
        match self {
            ScratchValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_doc(&self) -> Option<&StructuredDocument> {
        match self {
            ScratchValue::Doc(doc) => Some(doc),
            _ => None,
        }
    }

    /// String form used by `finalize` and as sub-call input.
    pub fn to_final_string(&self) -> String {
        match self {
            ScratchValue::Text(s) => s.clone(),
            ScratchValue::Number(n) => format_number(*n),
            ScratchValue::Bool(b) => b.to_string(),
            other => other.to_json().to_string(),
        }
    }

    /// Non-empty string usable as an early-stop answer.
    pub fn as_answer(&self) -> Option<String> {
        match self {
            ScratchValue::Text(s) if !s.trim().is_empty() => Some(s.clone()),
            ScratchValue::Number(n) => Some(format_number(*n)),
            _ => None,
        }
    }
}

/// Integral values print without a trailing `.0`.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

pub type ScratchMap = BTreeMap<String, ScratchValue>;

/// Assign by dotted path, creating intermediate maps as needed. An
/// existing non-map intermediate is replaced by a map.
pub fn set_path(scratch: &mut ScratchMap, path: &str, value: ScratchValue) -> RlmResult<()> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(RlmError::invalid(format!("bad scratch path: {}", path)));
    }
    if segments.len() == 1 {
        scratch.insert(segments[0].to_string(), value);
        return Ok(());
    }

    let mut current = scratch
        .entry(segments[0].to_string())
        .and_modify(|v| {
            if !matches!(v, ScratchValue::Map(_)) {
                *v = ScratchValue::Map(BTreeMap::new());
            }
        })
        .or_insert_with(|| ScratchValue::Map(BTreeMap::new()));

    for segment in &segments[1..segments.len() - 1] {
        let ScratchValue::Map(map) = current else {
            unreachable!("intermediate is always a map");
        };
        current = map
            .entry(segment.to_string())
            .and_modify(|v| {
                if !matches!(v, ScratchValue::Map(_)) {
                    *v = ScratchValue::Map(BTreeMap::new());
                }
            })
            .or_insert_with(|| ScratchValue::Map(BTreeMap::new()));
    }

    let ScratchValue::Map(map) = current else {
        unreachable!("intermediate is always a map");
    };
    map.insert(segments[segments.len() - 1].to_string(), value);
    Ok(())
}

/// Dotted-path lookup.
pub fn get_path<'a>(scratch: &'a ScratchMap, path: &str) -> Option<&'a ScratchValue> {
    let mut segments = path.split('.');
    let mut current = scratch.get(segments.next()?)?;
    for segment in segments {
        let ScratchValue::Map(map) = current else {
            return None;
        };
        current = map.get(segment)?;
    }
    Some(current)
}
