// src/actions/mod.rs
// The action vocabulary the LM drives the environment with

pub mod coerce;
pub mod interpreter;

use serde_json::Value;

use crate::document::{ColumnRef, DocFormat, RowComparator};

pub use coerce::coerce_action;
pub use interpreter::ActionInterpreter;

/// One action per LM turn. Each variant is fully validated by the time
/// it leaves `coerce_action`; handlers pattern-match without re-probing
/// fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    PromptMeta,
    DocParse {
        format: DocFormat,
        delimiter: Option<char>,
        out: String,
    },
    DocSelectSection {
        input: String,
        title: String,
        out: String,
    },
    DocTableSum {
        input: String,
        column: ColumnRef,
        out: String,
    },
    DocSelectRows {
        input: String,
        column: ColumnRef,
        comparator: RowComparator,
        value: String,
        out: String,
    },
    DocProjectColumns {
        input: String,
        columns: Vec<ColumnRef>,
        out: String,
        separator: String,
        include_header: bool,
    },
    SlicePrompt {
        start: i64,
        end: i64,
        out: String,
    },
    Find {
        needle: String,
        from: usize,
        out: String,
    },
    ChunkNewlines {
        max_lines: usize,
        out: String,
    },
    ChunkTokens {
        max_tokens: usize,
        overlap: usize,
        out: String,
    },
    SumCsvColumn {
        column: ColumnRef,
        delimiter: char,
        out: String,
    },
    PickWord {
        index: usize,
        out: String,
    },
    SubMap {
        input: String,
        query_template: String,
        out: String,
        limit: Option<usize>,
        concurrency: usize,
    },
    ReduceJoin {
        input: String,
        sep: String,
        out: String,
    },
    Set {
        path: String,
        value: Value,
    },
    Finalize {
        from: Option<String>,
        value: Option<Value>,
    },
    CallSymbol {
        symbol: String,
        out: String,
        args: Option<Value>,
        input: Option<Value>,
    },
}

impl Action {
    pub fn op(&self) -> &'static str {
        match self {
            Action::PromptMeta => "prompt_meta",
            Action::DocParse { .. } => "doc_parse",
            Action::DocSelectSection { .. } => "doc_select_section",
            Action::DocTableSum { .. } => "doc_table_sum",
            Action::DocSelectRows { .. } => "doc_select_rows",
            Action::DocProjectColumns { .. } => "doc_project_columns",
            Action::SlicePrompt { .. } => "slice_prompt",
            Action::Find { .. } => "find",
            Action::ChunkNewlines { .. } => "chunk_newlines",
            Action::ChunkTokens { .. } => "chunk_tokens",
            Action::SumCsvColumn { .. } => "sum_csv_column",
            Action::PickWord { .. } => "pick_word",
            Action::SubMap { .. } => "sub_map",
            Action::ReduceJoin { .. } => "reduce_join",
            Action::Set { .. } => "set",
            Action::Finalize { .. } => "finalize",
            Action::CallSymbol { .. } => "call_symbol",
        }
    }
}
