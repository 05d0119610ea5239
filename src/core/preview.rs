// src/core/preview.rs
// Bounded text previews so traces and LM turns never retain document bodies

/// Default preview budget in characters
pub const DEFAULT_PREVIEW_CHARS: usize = 200;

/// Truncate to at most `max_chars` characters, marking the cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{}...", head)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_passthrough() {
        assert_eq!(preview("hello", 10), "hello");
    }

    #[test]
    fn test_truncates_on_char_boundary() {
        let text = "日本語のテキストです";
        let cut = preview(text, 4);
        assert_eq!(cut, "日本語の...");
    }
}
