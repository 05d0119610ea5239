// src/document/structured.rs
// In-memory document IR: plain text, markdown sections, or a csv table

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use crate::core::error::{RlmError, RlmResult};

lazy_static! {
    static ref HEADING: Regex = Regex::new(r"^(#{1,6})\s+(.+)$").unwrap();
}

/// Requested parse format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DocFormat {
    #[default]
    Auto,
    Text,
    Markdown,
    Csv,
}

impl std::str::FromStr for DocFormat {
    type Err = RlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(DocFormat::Auto),
            "text" => Ok(DocFormat::Text),
            "markdown" => Ok(DocFormat::Markdown),
            "csv" => Ok(DocFormat::Csv),
            other => Err(RlmError::invalid(format!("unknown document format: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    pub format: DocFormat,
    pub delimiter: Option<char>,
}

/// One markdown section: heading line plus its body
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub title: String,
    pub level: u8,
    pub start_line: usize,
    pub end_line: usize,
    pub body: String,
}

/// Parsed document IR held in scratch
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum StructuredDocument {
    Text {
        #[serde(rename = "lineCount")]
        line_count: usize,
        #[serde(rename = "rawLength")]
        raw_length: usize,
    },
    Markdown {
        #[serde(rename = "lineCount")]
        line_count: usize,
        #[serde(rename = "rawLength")]
        raw_length: usize,
        sections: Vec<Section>,
    },
    Csv {
        #[serde(rename = "lineCount")]
        line_count: usize,
        #[serde(rename = "rawLength")]
        raw_length: usize,
        delimiter: char,
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    },
}

impl StructuredDocument {
    pub fn format_name(&self) -> &'static str {
        match self {
            StructuredDocument::Text { .. } => "text",
            StructuredDocument::Markdown { .. } => "markdown",
            StructuredDocument::Csv { .. } => "csv",
        }
    }

    pub fn line_count(&self) -> usize {
        match self {
            StructuredDocument::Text { line_count, .. }
            | StructuredDocument::Markdown { line_count, .. }
            | StructuredDocument::Csv { line_count, .. } => *line_count,
        }
    }

    pub fn raw_length(&self) -> usize {
        match self {
            StructuredDocument::Text { raw_length, .. }
            | StructuredDocument::Markdown { raw_length, .. }
            | StructuredDocument::Csv { raw_length, .. } => *raw_length,
        }
    }

    /// Markdown section lookup: exact title first, then case-insensitive.
    pub fn find_section(&self, title: &str) -> Option<&Section> {
        let StructuredDocument::Markdown { sections, .. } = self else {
            return None;
        };
        sections
            .iter()
            .find(|s| s.title == title)
            .or_else(|| {
                let needle = title.to_lowercase();
                sections.iter().find(|s| s.title.to_lowercase() == needle)
            })
    }
}

/// Column addressed by index or header name
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnRef {
    Index(usize),
    Name(String),
}

impl std::fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnRef::Index(i) => write!(f, "{}", i),
            ColumnRef::Name(name) => f.write_str(name),
        }
    }
}

/// Index lookup: numeric index must be in range; names match exactly,
/// then case-insensitively.
pub fn resolve_column(headers: &[String], column: &ColumnRef) -> RlmResult<usize> {
    match column {
        ColumnRef::Index(i) => {
            if *i < headers.len() {
                Ok(*i)
            } else {
                Err(RlmError::failed(format!("csv column not found: {}", i)))
            }
        }
        ColumnRef::Name(name) => headers
            .iter()
            .position(|h| h == name)
            .or_else(|| {
                let needle = name.to_lowercase();
                headers.iter().position(|h| h.to_lowercase() == needle)
            })
            .ok_or_else(|| RlmError::failed(format!("csv column not found: {}", name))),
    }
}

/// Row filter comparators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowComparator {
    #[default]
    Eq,
    Contains,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl std::str::FromStr for RowComparator {
    type Err = RlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" => Ok(RowComparator::Eq),
            "contains" => Ok(RowComparator::Contains),
            "gt" => Ok(RowComparator::Gt),
            "gte" => Ok(RowComparator::Gte),
            "lt" => Ok(RowComparator::Lt),
            "lte" => Ok(RowComparator::Lte),
            other => Err(RlmError::invalid(format!("unknown comparator: {}", other))),
        }
    }
}

/// String comparators work on trimmed forms; ordered comparators require
/// both sides to parse as finite numbers, otherwise the row is dropped.
pub fn cell_matches(cell: &str, comparator: RowComparator, value: &str) -> bool {
    let cell = cell.trim();
    let value = value.trim();
    match comparator {
        RowComparator::Eq => cell == value,
        RowComparator::Contains => cell.contains(value),
        RowComparator::Gt | RowComparator::Gte | RowComparator::Lt | RowComparator::Lte => {
            let (Some(lhs), Some(rhs)) = (parse_finite(cell), parse_finite(value)) else {
                return false;
            };
            match comparator {
                RowComparator::Gt => lhs > rhs,
                RowComparator::Gte => lhs >= rhs,
                RowComparator::Lt => lhs < rhs,
                RowComparator::Lte => lhs <= rhs,
                _ => unreachable!(),
            }
        }
    }
}

pub fn parse_finite(cell: &str) -> Option<f64> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Column projection over a csv document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub indices: Vec<usize>,
}

/// Project `columns` (non-empty) out of the table; missing cells become
/// empty strings.
pub fn project_columns(
    headers: &[String],
    rows: &[Vec<String>],
    columns: &[ColumnRef],
) -> RlmResult<Projection> {
    if columns.is_empty() {
        return Err(RlmError::invalid("columns must be non-empty"));
    }
    let indices: Vec<usize> = columns
        .iter()
        .map(|c| resolve_column(headers, c))
        .collect::<RlmResult<_>>()?;
    let projected_headers: Vec<String> = indices.iter().map(|&i| headers[i].clone()).collect();
    let projected_rows: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            indices
                .iter()
                .map(|&i| row.get(i).cloned().unwrap_or_default())
                .collect()
        })
        .collect();
    Ok(Projection {
        headers: projected_headers,
        rows: projected_rows,
        indices,
    })
}

/// Parse a prompt into the IR. `Auto` sniffs markdown headings first,
/// then a consistent delimiter grid, then falls back to text.
pub fn parse_structured_document(prompt: &str, options: &ParseOptions) -> StructuredDocument {
    let lines: Vec<&str> = split_lines(prompt);
    let line_count = lines.len();
    let raw_length = prompt.chars().count();
    let delimiter = options.delimiter.unwrap_or(',');

    let format = match options.format {
        DocFormat::Auto => detect_format(&lines, delimiter),
        other => other,
    };

    match format {
        DocFormat::Markdown => StructuredDocument::Markdown {
            line_count,
            raw_length,
            sections: parse_sections(&lines),
        },
        DocFormat::Csv => {
            let (headers, rows) = parse_csv(&lines, delimiter);
            StructuredDocument::Csv {
                line_count,
                raw_length,
                delimiter,
                headers,
                rows,
            }
        }
        _ => StructuredDocument::Text { line_count, raw_length },
    }
}

fn split_lines(text: &str) -> Vec<&str> {
    text.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l)).collect()
}

fn detect_format(lines: &[&str], delimiter: char) -> DocFormat {
    if lines.iter().any(|l| HEADING.is_match(l)) {
        return DocFormat::Markdown;
    }
    let non_empty: Vec<&&str> = lines.iter().filter(|l| !l.trim().is_empty()).collect();
    if non_empty.len() >= 2 {
        let cells = non_empty[0].split(delimiter).count();
        if cells >= 2 && non_empty.iter().all(|l| l.split(delimiter).count() == cells) {
            return DocFormat::Csv;
        }
    }
    DocFormat::Text
}

/// Group heading lines into sections. A section's body runs until the
/// next heading of equal-or-lower depth, with blank edges trimmed.
fn parse_sections(lines: &[&str]) -> Vec<Section> {
    let headings: Vec<(usize, u8, String)> = lines
        .iter()
        .enumerate()
        .filter_map(|(i, line)| {
            HEADING.captures(line).map(|caps| {
                (i, caps[1].len() as u8, caps[2].trim().to_string())
            })
        })
        .collect();

    headings
        .iter()
        .enumerate()
        .map(|(h, &(start_line, level, ref title))| {
            let end_line = headings[h + 1..]
                .iter()
                .find(|&&(_, next_level, _)| next_level <= level)
                .map(|&(next_start, _, _)| next_start)
                .unwrap_or(lines.len());
            let body_lines = &lines[start_line + 1..end_line];
            Section {
                title: title.clone(),
                level,
                start_line,
                end_line,
                body: trim_blank_edges(body_lines),
            }
        })
        .collect()
}

fn trim_blank_edges(lines: &[&str]) -> String {
    let start = lines.iter().position(|l| !l.trim().is_empty());
    let Some(start) = start else {
        return String::new();
    };
    let end = lines.iter().rposition(|l| !l.trim().is_empty()).unwrap_or(start);
    lines[start..=end].join("\n")
}

/// Split into a cell grid and decide whether row 0 is a header: every
/// cell in row 0 must be non-numeric and at least one column must turn
/// numeric in row 1. Otherwise synthesize `col0..colN`.
fn parse_csv(lines: &[&str], delimiter: char) -> (Vec<String>, Vec<Vec<String>>) {
    let grid: Vec<Vec<String>> = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.split(delimiter).map(|c| c.trim().to_string()).collect())
        .collect();

    if grid.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let width = grid.iter().map(|r| r.len()).max().unwrap_or(0);
    let has_header = grid.len() >= 2
        && grid[0].iter().all(|c| parse_finite(c).is_none())
        && grid[0]
            .iter()
            .enumerate()
            .any(|(i, c)| {
                parse_finite(c).is_none()
                    && grid[1].get(i).map(|below| parse_finite(below).is_some()).unwrap_or(false)
            });

    if has_header {
        (grid[0].clone(), grid[1..].to_vec())
    } else {
        let headers = (0..width).map(|i| format!("col{}", i)).collect();
        (headers, grid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_detects_markdown() {
        let doc = parse_structured_document(
            "# Title\n\nbody\n\n## Sub\n\nmore",
            &ParseOptions::default(),
        );
        assert_eq!(doc.format_name(), "markdown");
        let StructuredDocument::Markdown { sections, .. } = &doc else { panic!() };
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].title, "Title");
        assert_eq!(sections[0].level, 1);
        // Level-1 body swallows the level-2 subsection.
        assert!(sections[0].body.contains("## Sub"));
        assert_eq!(sections[1].body, "more");
    }

    #[test]
    fn test_section_ends_at_equal_or_lower_depth() {
        let doc = parse_structured_document(
            "## A\na-body\n### A1\na1-body\n## B\nb-body",
            &ParseOptions { format: DocFormat::Markdown, delimiter: None },
        );
        let a = doc.find_section("A").unwrap();
        assert!(a.body.contains("a1-body"));
        assert!(!a.body.contains("b-body"));
        let a1 = doc.find_section("A1").unwrap();
        assert_eq!(a1.body, "a1-body");
    }

    #[test]
    fn test_section_lookup_case_insensitive() {
        let doc = parse_structured_document("# Intro\nhello", &ParseOptions::default());
        assert!(doc.find_section("Intro").is_some());
        assert!(doc.find_section("intro").is_some());
        assert!(doc.find_section("missing").is_none());
    }

    #[test]
    fn test_auto_detects_csv_with_header() {
        let doc = parse_structured_document("name,score\nalice,3\nbob,5", &ParseOptions::default());
        let StructuredDocument::Csv { headers, rows, .. } = &doc else { panic!() };
        assert_eq!(headers, &["name", "score"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec!["alice", "3"]);
    }

    #[test]
    fn test_csv_without_header_gets_synthetic_columns() {
        let doc = parse_structured_document("1,2\n3,4", &ParseOptions::default());
        let StructuredDocument::Csv { headers, rows, .. } = &doc else { panic!() };
        assert_eq!(headers, &["col0", "col1"]);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_all_text_rows_get_synthetic_columns() {
        // No column turns numeric in row 1, so row 0 is data, not a header.
        let doc = parse_structured_document("a,b\nc,d", &ParseOptions::default());
        let StructuredDocument::Csv { headers, rows, .. } = &doc else { panic!() };
        assert_eq!(headers, &["col0", "col1"]);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_ragged_lines_fall_back_to_text() {
        let doc = parse_structured_document("a,b\nc\nplain", &ParseOptions::default());
        assert_eq!(doc.format_name(), "text");
    }

    #[test]
    fn test_resolve_column() {
        let headers = vec!["Name".to_string(), "Score".to_string()];
        assert_eq!(resolve_column(&headers, &ColumnRef::Index(1)).unwrap(), 1);
        assert_eq!(resolve_column(&headers, &ColumnRef::Name("Score".into())).unwrap(), 1);
        assert_eq!(resolve_column(&headers, &ColumnRef::Name("score".into())).unwrap(), 1);
        assert!(resolve_column(&headers, &ColumnRef::Index(2)).is_err());
        assert!(resolve_column(&headers, &ColumnRef::Name("missing".into())).is_err());
    }

    #[test]
    fn test_cell_matches() {
        assert!(cell_matches(" alice ", RowComparator::Eq, "alice"));
        assert!(cell_matches("abcdef", RowComparator::Contains, "cde"));
        assert!(cell_matches("5", RowComparator::Gt, "3"));
        assert!(cell_matches("5", RowComparator::Gte, "5"));
        assert!(!cell_matches("abc", RowComparator::Gt, "3"));
        assert!(!cell_matches("5", RowComparator::Lt, "abc"));
        assert!(!cell_matches("", RowComparator::Gt, "0"));
    }

    #[test]
    fn test_projection_fills_missing_cells() {
        let headers = vec!["a".to_string(), "b".to_string()];
        let rows = vec![vec!["1".to_string()], vec!["2".to_string(), "3".to_string()]];
        let projection =
            project_columns(&headers, &rows, &[ColumnRef::Name("b".into())]).unwrap();
        assert_eq!(projection.rows, vec![vec!["".to_string()], vec!["3".to_string()]]);
        assert_eq!(projection.indices, vec![1]);
        assert!(project_columns(&headers, &rows, &[]).is_err());
    }
}
