//! Input normalization for pipeline text inputs

/// Normalize a block of page text before it reaches a prompt.
///
/// CRLF becomes LF, tabs and form feeds become spaces, runs of three or
/// more newlines collapse to two, and the result is trimmed.
pub fn sanitize_block(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newline_run = 0usize;

    for ch in text.replace("\r\n", "\n").chars() {
        match ch {
            '\r' => {
                // Lone CR treated as a newline
                newline_run += 1;
                if newline_run <= 2 {
                    out.push('\n');
                }
            }
            '\n' => {
                newline_run += 1;
                if newline_run <= 2 {
                    out.push('\n');
                }
            }
            '\t' | '\u{0C}' => {
                newline_run = 0;
                out.push(' ');
            }
            _ => {
                newline_run = 0;
                out.push(ch);
            }
        }
    }

    out.trim().to_string()
}

/// Normalize personal instructions: newlines are preserved as-is, tabs
/// become spaces, and the text is trimmed and bounded to `max_len` chars.
pub fn sanitize_instructions(text: &str, max_len: usize) -> String {
    let normalized = text.replace("\r\n", "\n").replace(['\t', '\u{0C}'], " ");
    let trimmed = normalized.trim();
    trimmed.chars().take(max_len).collect()
}

/// Trim a label and collapse internal whitespace runs to single spaces.
pub fn collapse_inline_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Trim a multi-line description while preserving paragraph breaks.
///
/// Each line is trimmed individually; blank lines survive as paragraph
/// separators but never more than one in a row.
pub fn normalize_description(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut prev_blank = true;

    let normalized = text.replace("\r\n", "\n");
    for line in normalized.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !prev_blank {
                lines.push("");
            }
            prev_blank = true;
        } else {
            lines.push(trimmed);
            prev_blank = false;
        }
    }

    while lines.last() == Some(&"") {
        lines.pop();
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_block_crlf_and_tabs() {
        let input = "hello\r\nworld\tagain\u{0C}done";
        assert_eq!(sanitize_block(input), "hello\nworld again done");
    }

    #[test]
    fn test_sanitize_block_collapses_newline_runs() {
        let input = "a\n\n\n\n\nb";
        assert_eq!(sanitize_block(input), "a\n\nb");

        let two = "a\n\nb";
        assert_eq!(sanitize_block(two), "a\n\nb");
    }

    #[test]
    fn test_sanitize_block_trims() {
        assert_eq!(sanitize_block("  \n padded \n  "), "padded");
        assert_eq!(sanitize_block(""), "");
    }

    #[test]
    fn test_sanitize_instructions_preserves_newlines() {
        let input = "line one\r\nline two\n\n\nline three";
        let out = sanitize_instructions(input, 4000);
        assert_eq!(out, "line one\nline two\n\n\nline three");
    }

    #[test]
    fn test_sanitize_instructions_bounded() {
        let input = "x".repeat(100);
        assert_eq!(sanitize_instructions(&input, 10).len(), 10);
    }

    #[test]
    fn test_collapse_inline_whitespace() {
        assert_eq!(collapse_inline_whitespace("  First   Name \t here "), "First Name here");
    }

    #[test]
    fn test_normalize_description_paragraphs() {
        let input = "  intro line  \n\n\n  second paragraph  \n   \n";
        assert_eq!(normalize_description(input), "intro line\n\nsecond paragraph");
    }
}
