//! Tolerant JSON recovery for structured model output
//!
//! Models wrap JSON in markdown fences, leave raw control characters inside
//! string literals, and drop trailing brackets. The recovery order is:
//! fence stripping, control-character escaping, a strict parse, then a
//! best-effort repair pass before giving up.

use serde_json::Value;

/// Strip a leading ```json or ``` fence and a trailing ``` fence.
pub fn strip_code_fence(text: &str) -> &str {
    let mut cleaned = text.trim();

    if let Some(rest) = cleaned.strip_prefix("```json") {
        cleaned = rest;
    } else if let Some(rest) = cleaned.strip_prefix("```") {
        cleaned = rest;
    }

    if let Some(rest) = cleaned.strip_suffix("```") {
        cleaned = rest;
    }

    cleaned.trim()
}

/// Escape unescaped control characters (bytes < 0x20) inside string literals.
///
/// Scans byte by byte, tracking whether the cursor is inside a string and
/// whether the previous byte was a backslash. Control characters outside
/// strings are structural whitespace and pass through untouched.
pub fn escape_control_chars(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut prev_backslash = false;

    for ch in text.chars() {
        if in_string {
            if prev_backslash {
                out.push(ch);
                prev_backslash = false;
                continue;
            }
            match ch {
                '\\' => {
                    out.push('\\');
                    prev_backslash = true;
                }
                '"' => {
                    out.push('"');
                    in_string = false;
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
                c => out.push(c),
            }
        } else {
            if ch == '"' {
                in_string = true;
            }
            out.push(ch);
        }
    }

    out
}

/// Best-effort repair: remove trailing commas, close an unterminated
/// string, and append missing closing brackets and braces.
pub fn repair_json(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut prev_backslash = false;

    for ch in text.chars() {
        if in_string {
            out.push(ch);
            if prev_backslash {
                prev_backslash = false;
            } else if ch == '\\' {
                prev_backslash = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            '{' => {
                stack.push('}');
                out.push(ch);
            }
            '[' => {
                stack.push(']');
                out.push(ch);
            }
            '}' | ']' => {
                // Drop a trailing comma directly before a closer
                while out.ends_with(',') || out.ends_with(char::is_whitespace) {
                    let trimmed = out.trim_end().to_string();
                    if trimmed.ends_with(',') {
                        out = trimmed[..trimmed.len() - 1].to_string();
                    } else {
                        out = trimmed;
                        break;
                    }
                }
                if stack.last() == Some(&ch) {
                    stack.pop();
                }
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }

    if in_string {
        out.push('"');
    }

    // Trailing comma at the very end of truncated output
    let trimmed = out.trim_end().to_string();
    out = if let Some(stripped) = trimmed.strip_suffix(',') {
        stripped.to_string()
    } else {
        trimmed
    };

    while let Some(closer) = stack.pop() {
        out.push(closer);
    }

    out
}

/// Parse structured model output through the full tolerance chain.
///
/// Returns the parsed value, or `None` when even the repaired form does
/// not parse.
pub fn parse_tolerant(raw: &str) -> Option<Value> {
    let unfenced = strip_code_fence(raw);
    let escaped = escape_control_chars(unfenced);

    if let Ok(value) = serde_json::from_str::<Value>(&escaped) {
        return Some(value);
    }

    let repaired = repair_json(&escaped);
    serde_json::from_str::<Value>(&repaired).ok()
}
