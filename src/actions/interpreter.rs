// src/actions/interpreter.rs
// Executes one coerced action against the environment

use futures::StreamExt;
use serde_json::json;

use crate::core::error::{RlmError, RlmResult};
use crate::document::structured::{
    cell_matches, parse_finite, parse_structured_document, project_columns, resolve_column,
    ColumnRef, ParseOptions, StructuredDocument,
};
use crate::env::scratch::{format_number, get_path, set_path, ScratchValue};
use crate::env::Environment;
use crate::orchestrator::subcall::{SubCallOptions, SubCallSeed};
use crate::orchestrator::Rlm;
use crate::symbols::SymbolCall;
use crate::trace::TraceEvent;

use super::Action;

/// Executes actions for one runtime. Holds a handle back to the runtime
/// for sub-RLM dispatch and external symbols.
pub struct ActionInterpreter<'a> {
    rlm: &'a Rlm,
}

impl<'a> ActionInterpreter<'a> {
    pub fn new(rlm: &'a Rlm) -> Self {
        Self { rlm }
    }

    /// Run one action; the returned string is the short JSON summary the
    /// LM sees. Summaries carry metadata only (lengths, counts, keys,
    /// numbers) so the chat never accumulates document content.
    pub async fn exec(&self, env: &mut Environment, action: Action) -> RlmResult<String> {
        match action {
            Action::PromptMeta => Ok(json!({
                "op": "prompt_meta",
                "promptId": env.prompt_id,
                "length": env.prompt_len,
            })
            .to_string()),

            Action::DocParse { format, delimiter, out } => {
                let text = self.read_prompt_charged(env).await?;
                let doc = parse_structured_document(
                    &text,
                    &ParseOptions { format, delimiter },
                );
                let mut summary = json!({
                    "op": "doc_parse",
                    "out": out,
                    "format": doc.format_name(),
                    "lines": doc.line_count(),
                });
                match &doc {
                    StructuredDocument::Markdown { sections, .. } => {
                        summary["sections"] = json!(sections.len());
                    }
                    StructuredDocument::Csv { rows, headers, .. } => {
                        summary["rows"] = json!(rows.len());
                        summary["columns"] = json!(headers.len());
                    }
                    StructuredDocument::Text { .. } => {}
                }
                env.scratch.insert(out, ScratchValue::Doc(doc));
                Ok(summary.to_string())
            }

            Action::DocSelectSection { input, title, out } => {
                let doc = require_doc(env, &input)?;
                if !matches!(doc, StructuredDocument::Markdown { .. }) {
                    return Err(RlmError::failed(format!(
                        "doc_select_section: scratch[{}] is not a markdown document",
                        input
                    )));
                }
                let section = doc.find_section(&title).ok_or_else(|| {
                    RlmError::failed(format!("markdown section not found: {}", title))
                })?;
                let body = section.body.clone();
                let summary = json!({
                    "op": "doc_select_section",
                    "out": out,
                    "title": section.title,
                    "length": body.chars().count(),
                });
                env.scratch.insert(out, ScratchValue::Text(body));
                Ok(summary.to_string())
            }

            Action::DocTableSum { input, column, out } => {
                let (headers, rows) = require_csv(env, &input)?;
                let index = resolve_column(&headers, &column)?;
                let sum: f64 = rows
                    .iter()
                    .filter_map(|row| row.get(index).and_then(|cell| parse_finite(cell)))
                    .sum();
                let rendered = format_number(sum);
                let summary = json!({
                    "op": "doc_table_sum",
                    "out": out,
                    "column": column.to_string(),
                    "sum": rendered,
                });
                env.scratch.insert(out, ScratchValue::Text(rendered));
                Ok(summary.to_string())
            }

            Action::DocSelectRows { input, column, comparator, value, out } => {
                let doc = require_doc(env, &input)?;
                let StructuredDocument::Csv { delimiter, headers, rows, .. } = doc else {
                    return Err(RlmError::failed(format!(
                        "doc_select_rows: scratch[{}] is not a csv document",
                        input
                    )));
                };
                let delimiter = *delimiter;
                let headers = headers.clone();
                let index = resolve_column(&headers, &column)?;
                let kept: Vec<Vec<String>> = rows
                    .iter()
                    .filter(|row| {
                        let cell = row.get(index).map(String::as_str).unwrap_or("");
                        cell_matches(cell, comparator, &value)
                    })
                    .cloned()
                    .collect();
                let summary = json!({
                    "op": "doc_select_rows",
                    "out": out,
                    "matched": kept.len(),
                });
                env.scratch.insert(out, ScratchValue::Doc(csv_doc(delimiter, headers, kept)));
                Ok(summary.to_string())
            }

            Action::DocProjectColumns { input, columns, out, separator, include_header } => {
                let (headers, rows) = require_csv(env, &input)?;
                let projection = project_columns(&headers, &rows, &columns)?;
                let mut lines: Vec<ScratchValue> = Vec::with_capacity(projection.rows.len() + 1);
                if include_header {
                    lines.push(ScratchValue::Text(projection.headers.join(&separator)));
                }
                lines.extend(
                    projection
                        .rows
                        .iter()
                        .map(|row| ScratchValue::Text(row.join(&separator))),
                );
                let summary = json!({
                    "op": "doc_project_columns",
                    "out": out,
                    "count": lines.len(),
                    "indices": projection.indices,
                });
                env.scratch.insert(out, ScratchValue::List(lines));
                Ok(summary.to_string())
            }

            Action::SlicePrompt { start, end, out } => {
                let start = start.max(0) as usize;
                let end = (end.max(start as i64)) as usize;
                env.budget.consume_prompt_chars((end - start) as u64)?;
                let slice = env.doc_store.read_slice(&env.doc_id, start, end).await?;
                let summary = json!({
                    "op": "slice_prompt",
                    "out": out,
                    "start": start,
                    "end": end,
                    "length": slice.chars().count(),
                });
                env.scratch.insert(out, ScratchValue::Text(slice));
                Ok(summary.to_string())
            }

            Action::Find { needle, from, out } => {
                let text = self.read_prompt_charged(env).await?;
                let hits = find_all(&text, &needle, from);
                let summary = json!({
                    "op": "find",
                    "out": out,
                    "count": hits.len(),
                    "first": hits.first(),
                });
                env.scratch.insert(
                    out,
                    ScratchValue::List(
                        hits.into_iter().map(|i| ScratchValue::Number(i as f64)).collect(),
                    ),
                );
                Ok(summary.to_string())
            }

            Action::ChunkNewlines { max_lines, out } => {
                let text = self.read_prompt_charged(env).await?;
                let lines: Vec<&str> =
                    text.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l)).collect();
                let chunks: Vec<ScratchValue> = lines
                    .chunks(max_lines)
                    .map(|group| ScratchValue::Text(group.join("\n")))
                    .collect();
                let summary = json!({
                    "op": "chunk_newlines",
                    "out": out,
                    "count": chunks.len(),
                });
                env.scratch.insert(out, ScratchValue::List(chunks));
                Ok(summary.to_string())
            }

            Action::ChunkTokens { max_tokens, overlap, out } => {
                if overlap >= max_tokens {
                    return Err(RlmError::failed(
                        "chunk_tokens: overlap must be smaller than maxTokens",
                    ));
                }
                let text = self.read_prompt_charged(env).await?;
                let tokens: Vec<&str> = text.split_whitespace().collect();
                let step = max_tokens - overlap;
                let mut chunks = Vec::new();
                let mut i = 0;
                while i < tokens.len() {
                    let window = &tokens[i..(i + max_tokens).min(tokens.len())];
                    chunks.push(ScratchValue::Text(window.join(" ")));
                    if i + max_tokens >= tokens.len() {
                        break;
                    }
                    i += step;
                }
                let summary = json!({
                    "op": "chunk_tokens",
                    "out": out,
                    "count": chunks.len(),
                    "tokens": tokens.len(),
                });
                env.scratch.insert(out, ScratchValue::List(chunks));
                Ok(summary.to_string())
            }

            Action::SumCsvColumn { column, delimiter, out } => {
                let text = self.read_prompt_charged(env).await?;
                let sum = sum_csv_column(&text, &column, delimiter)?;
                let rendered = format_number(sum);
                let summary = json!({
                    "op": "sum_csv_column",
                    "out": out,
                    "sum": rendered,
                });
                env.scratch.insert(out, ScratchValue::Text(rendered));
                Ok(summary.to_string())
            }

            Action::PickWord { index, out } => {
                let text = self.read_prompt_charged(env).await?;
                let words: Vec<&str> = split_words(&text);
                if words.is_empty() {
                    return Err(RlmError::failed("pick_word: no words in prompt"));
                }
                let clamped = index.min(words.len() - 1);
                let word = words[clamped].to_string();
                let summary = json!({
                    "op": "pick_word",
                    "out": out,
                    "index": clamped,
                    "length": word.chars().count(),
                });
                env.scratch.insert(out, ScratchValue::Text(word));
                Ok(summary.to_string())
            }

            Action::SubMap { input, query_template, out, limit, concurrency } => {
                let items: Vec<String> = require_scratch(env, &input)?
                    .as_list()
                    .ok_or_else(|| {
                        RlmError::failed(format!("sub_map: scratch[{}] is not an array", input))
                    })?
                    .iter()
                    .map(ScratchValue::to_final_string)
                    .collect();
                let take = limit.unwrap_or(items.len()).min(items.len());
                let jobs: Vec<(String, String)> = items[..take]
                    .iter()
                    .map(|item| (query_template.replace("{{item}}", item), item.clone()))
                    .collect();

                let options = SubCallOptions::default();
                let mut finals = Vec::with_capacity(jobs.len());
                let mut events = Vec::with_capacity(jobs.len());
                {
                    let seed = SubCallSeed {
                        prompt_id: env.prompt_id.clone(),
                        cache: env.cache.clone(),
                        budget: &env.budget,
                    };
                    if concurrency <= 1 {
                        for (query, prompt) in &jobs {
                            let (answer, event) =
                                self.rlm.dispatch_sub_call(&seed, query, prompt, &options).await?;
                            finals.push(ScratchValue::Text(answer));
                            events.push(event);
                        }
                    } else {
                        // Bounded fan-out; buffered() preserves input order.
                        let mut futs: Vec<_> = Vec::with_capacity(jobs.len());
                        for (query, prompt) in &jobs {
                            futs.push(self.rlm.dispatch_sub_call(&seed, query, prompt, &options));
                        }
                        let collected: Vec<RlmResult<(String, TraceEvent)>> =
                            futures::stream::iter(futs).buffered(concurrency).collect().await;
                        for result in collected {
                            let (answer, event) = result?;
                            finals.push(ScratchValue::Text(answer));
                            events.push(event);
                        }
                    }
                }
                for event in events {
                    env.trace.push(event);
                }
                let summary = json!({
                    "op": "sub_map",
                    "out": out,
                    "count": finals.len(),
                    "subCallsUsed": env.budget.sub_calls_used(),
                });
                env.scratch.insert(out, ScratchValue::List(finals));
                Ok(summary.to_string())
            }

            Action::ReduceJoin { input, sep, out } => {
                let joined = require_scratch(env, &input)?
                    .as_list()
                    .ok_or_else(|| {
                        RlmError::failed(format!("reduce_join: scratch[{}] is not an array", input))
                    })?
                    .iter()
                    .map(ScratchValue::to_final_string)
                    .collect::<Vec<_>>()
                    .join(&sep);
                let summary = json!({
                    "op": "reduce_join",
                    "out": out,
                    "length": joined.chars().count(),
                });
                env.scratch.insert(out, ScratchValue::Text(joined));
                Ok(summary.to_string())
            }

            Action::Set { path, value } => {
                let scratch_value = ScratchValue::from_json(value);
                if path == "final" {
                    let rendered = scratch_value.to_final_string();
                    env.set_final(rendered);
                    return Ok(json!({"op": "set", "path": "final", "final": true}).to_string());
                }
                set_path(&mut env.scratch, &path, scratch_value)?;
                Ok(json!({"op": "set", "path": path}).to_string())
            }

            Action::Finalize { from, value } => {
                if self.rlm.config().profile.require_prompt_read_before_finalize
                    && env.budget.prompt_read_chars_used() == 0
                {
                    return Err(RlmError::failed(
                        "finalize requires at least one prompt read",
                    ));
                }
                let rendered = match (from, value) {
                    (_, Some(value)) => ScratchValue::from_json(value).to_final_string(),
                    (Some(from), None) => {
                        let key = from.strip_prefix("scratch.").unwrap_or(&from);
                        get_path(&env.scratch, key)
                            .ok_or_else(|| {
                                RlmError::failed(format!(
                                    "finalize: scratch key not found: {}",
                                    key
                                ))
                            })?
                            .to_final_string()
                    }
                    (None, None) => return Err(RlmError::invalid("finalize: missing from")),
                };
                let length = rendered.chars().count();
                env.set_final(rendered);
                Ok(json!({"op": "finalize", "length": length}).to_string())
            }

            Action::CallSymbol { symbol, out, args, input } => {
                let handler = self.rlm.symbols().get(&symbol).ok_or_else(|| {
                    RlmError::failed(format!("unknown symbol: {}", symbol))
                })?;
                let prompt = self.read_prompt_charged(env).await?;
                let call = SymbolCall {
                    symbol: symbol.clone(),
                    prompt,
                    prompt_id: env.prompt_id.clone(),
                    depth: env.depth(),
                    scratch: serde_json::to_value(&env.scratch)?,
                    args,
                    input,
                };
                let result = handler
                    .call(call)
                    .await
                    .map_err(|e| RlmError::failed(format!("symbol {} failed: {}", symbol, e)))?;
                let stored = match result {
                    serde_json::Value::String(s) => ScratchValue::Text(s),
                    other => ScratchValue::Text(other.to_string()),
                };
                let summary = json!({
                    "op": "call_symbol",
                    "symbol": symbol,
                    "out": out,
                    "length": stored.to_final_string().chars().count(),
                });
                env.scratch.insert(out, stored);
                Ok(summary.to_string())
            }
        }
    }

    /// Read the whole prompt, charging its length against the budget first.
    async fn read_prompt_charged(&self, env: &Environment) -> RlmResult<String> {
        env.budget.consume_prompt_chars(env.prompt_len as u64)?;
        Ok(env.doc_store.read_all(&env.doc_id).await?)
    }
}

fn require_scratch<'e>(env: &'e Environment, key: &str) -> RlmResult<&'e ScratchValue> {
    env.scratch
        .get(key)
        .ok_or_else(|| RlmError::failed(format!("scratch key not found: {}", key)))
}

fn require_doc<'e>(env: &'e Environment, key: &str) -> RlmResult<&'e StructuredDocument> {
    require_scratch(env, key)?
        .as_doc()
        .ok_or_else(|| RlmError::failed(format!("scratch[{}] is not a parsed document", key)))
}

fn require_csv(env: &Environment, key: &str) -> RlmResult<(Vec<String>, Vec<Vec<String>>)> {
    match require_doc(env, key)? {
        StructuredDocument::Csv { headers, rows, .. } => Ok((headers.clone(), rows.clone())),
        _ => Err(RlmError::failed(format!(
            "scratch[{}] is not a csv document",
            key
        ))),
    }
}

fn csv_doc(delimiter: char, headers: Vec<String>, rows: Vec<Vec<String>>) -> StructuredDocument {
    let sep = delimiter.to_string();
    let mut lines: Vec<String> = Vec::with_capacity(rows.len() + 1);
    lines.push(headers.join(&sep));
    lines.extend(rows.iter().map(|row| row.join(&sep)));
    let raw = lines.join("\n");
    StructuredDocument::Csv {
        line_count: lines.len(),
        raw_length: raw.chars().count(),
        delimiter,
        headers,
        rows,
    }
}

/// Non-overlapping hits; after a hit the scan advances by the needle
/// length (at least one).
fn find_all(text: &str, needle: &str, from: usize) -> Vec<usize> {
    let chars: Vec<char> = text.chars().collect();
    let needle_chars: Vec<char> = needle.chars().collect();
    let step = needle_chars.len().max(1);
    let mut hits = Vec::new();
    let mut i = from;
    while i + needle_chars.len() <= chars.len() {
        if chars[i..i + needle_chars.len()] == needle_chars[..] {
            hits.push(i);
            i += step;
        } else {
            i += 1;
        }
    }
    hits
}

/// Words are runs of letters, digits, `_`, and `-`.
fn split_words(text: &str) -> Vec<&str> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'))
        .filter(|w| !w.is_empty())
        .collect()
}

/// Ad-hoc column sum without building the document IR. A name column is
/// matched against the first row (header) and excluded from the sum; a
/// bare index sums every row, skipping non-numeric cells.
fn sum_csv_column(text: &str, column: &ColumnRef, delimiter: char) -> RlmResult<f64> {
    let rows: Vec<Vec<&str>> = text
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.split(delimiter).map(str::trim).collect())
        .collect();
    if rows.is_empty() {
        return Ok(0.0);
    }

    let (index, data_start) = match column {
        ColumnRef::Index(i) => (*i, 0),
        ColumnRef::Name(name) => {
            let header_hit = rows[0]
                .iter()
                .position(|cell| *cell == name)
                .or_else(|| {
                    let needle = name.to_lowercase();
                    rows[0].iter().position(|cell| cell.to_lowercase() == needle)
                });
            match header_hit {
                Some(i) => (i, 1),
                None => match name.parse::<usize>() {
                    Ok(i) => (i, 0),
                    Err(_) => {
                        return Err(RlmError::failed(format!("csv column not found: {}", name)))
                    }
                },
            }
        }
    };

    Ok(rows[data_start..]
        .iter()
        .filter_map(|row| row.get(index).and_then(|cell| parse_finite(cell)))
        .sum())
}
