//! Recovery of structured data from raw model responses.
//!
//! Generation models wrap JSON in prose and code fences, and frequently emit
//! small syntax errors: raw newlines inside strings, unescaped quotes,
//! trailing commas, missing commas between lines. This module extracts the
//! JSON candidate from a response and, only when a direct parse fails,
//! applies a best-effort textual repair before parsing again.
//!
//! ```rust
//! use lore_inference::recovery::{extract_structured_payload, repair_syntax};
//!
//! let raw = "Here is the result: [{\"id\":\"1\"}]";
//! assert_eq!(extract_structured_payload(raw).unwrap(), "[{\"id\":\"1\"}]");
//!
//! let fixed = repair_syntax("[{\"a\":1,}, {\"b\":2,},]");
//! assert_eq!(fixed, "[{\"a\":1}, {\"b\":2}]");
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, trace};

use lore_core::defaults::PARSE_EXCERPT_CHARS;
use lore_core::Error;

/// Fenced code block with an optional language tag.
static CODE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"```[A-Za-z0-9_-]*[ \t]*\r?\n?([\s\S]*?)```").expect("valid code fence pattern")
});

/// Failure to turn a response into structured data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecoveryError {
    /// The response contains neither `[` nor `{`.
    #[error("no JSON structure found in response")]
    NoStructureFound,

    /// A candidate was found but did not parse, even after repair.
    #[error("malformed JSON after repair: {message}")]
    Malformed {
        /// Leading part of the raw response, for diagnostics.
        excerpt: String,
        message: String,
    },
}

impl RecoveryError {
    /// Excerpt of the offending response, if one was captured.
    pub fn excerpt(&self) -> Option<&str> {
        match self {
            Self::NoStructureFound => None,
            Self::Malformed { excerpt, .. } => Some(excerpt),
        }
    }
}

impl From<RecoveryError> for Error {
    fn from(e: RecoveryError) -> Self {
        Error::Parse(e.to_string())
    }
}

/// First [`PARSE_EXCERPT_CHARS`] characters of `text`.
pub fn excerpt(text: &str) -> String {
    text.chars().take(PARSE_EXCERPT_CHARS).collect()
}

// =============================================================================
// EXTRACTION
// =============================================================================

/// Locate the JSON candidate inside a raw response.
///
/// A fenced code block wins over any structure that precedes it. Otherwise
/// the scan starts at the first `[` or `{` and ends where nesting returns to
/// zero, treating string literals as opaque. Unterminated input yields
/// everything from the opening bracket to the end.
pub fn extract_structured_payload(text: &str) -> Result<&str, RecoveryError> {
    let Some(start) = text.find(|c| c == '[' || c == '{') else {
        return Err(RecoveryError::NoStructureFound);
    };

    if let Some(inner) = CODE_FENCE.captures(text).and_then(|c| c.get(1)) {
        trace!(fence_len = inner.len(), "Using fenced code block");
        return Ok(inner.as_str().trim());
    }

    let tail = &text[start..];
    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in tail.char_indices() {
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
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Ok(&tail[..i + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    trace!("Structure unterminated, returning through end of input");
    Ok(tail)
}

// =============================================================================
// REPAIR
// =============================================================================

/// Best-effort syntax repair. Input that already parses is returned
/// unchanged.
///
/// Inside string literals: raw newline, carriage return and tab are escaped,
/// and a quote that is not followed by a structural closer is escaped as
/// content. Outside string literals: trailing commas before `}` or `]` are
/// removed, and a comma is inserted between a scalar value and a quoted key
/// on the next line.
pub fn repair_syntax(candidate: &str) -> String {
    if serde_json::from_str::<JsonValue>(candidate).is_ok() {
        return candidate.to_string();
    }
    let escaped = escape_string_contents(candidate);
    fix_punctuation(&escaped)
}

/// Whether a quote at `chars[from - 1]` terminates the open string.
fn quote_closes_string(chars: &[char], from: usize) -> bool {
    let mut saw_newline = false;
    for &c in &chars[from..] {
        if c == '\n' || c == '\r' {
            saw_newline = true;
            continue;
        }
        if c.is_whitespace() {
            continue;
        }
        return match c {
            '}' | ']' | ':' | ',' => true,
            // `"value"\n  "next_key"` with the comma missing
            '"' => saw_newline,
            _ => false,
        };
    }
    true
}

fn escape_string_contents(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 16);
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if !in_string {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
            continue;
        }
        if escaped {
            escaped = false;
            out.push(c);
            continue;
        }
        match c {
            '\\' => {
                escaped = true;
                out.push(c);
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '"' => {
                if quote_closes_string(&chars, i + 1) {
                    in_string = false;
                    out.push('"');
                } else {
                    out.push_str("\\\"");
                }
            }
            _ => out.push(c),
        }
    }
    out
}

fn is_scalar_end(c: char) -> bool {
    // closing quote, digit, tru(e)/fals(e), nul(l)
    c == '"' || c.is_ascii_digit() || c == 'e' || c == 'l'
}

fn fix_punctuation(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 8);
    let mut in_string = false;
    let mut escaped = false;
    // Byte offset and value of the last non-whitespace char written.
    let mut sig: Option<(usize, char)> = None;
    let mut newline_since_sig = false;

    for c in input.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            sig = Some((out.len(), c));
            out.push(c);
            continue;
        }

        match c {
            '}' | ']' => {
                if let Some((idx, ',')) = sig {
                    out.remove(idx);
                }
            }
            '"' => {
                if let Some((idx, prev)) = sig {
                    if newline_since_sig && is_scalar_end(prev) {
                        out.insert(idx + prev.len_utf8(), ',');
                    }
                }
                in_string = true;
            }
            _ => {}
        }

        if c == '\n' {
            newline_since_sig = true;
        }
        if !c.is_whitespace() {
            sig = Some((out.len(), c));
            newline_since_sig = false;
        }
        out.push(c);
    }
    out
}

// =============================================================================
// PARSING
// =============================================================================

/// Extract, parse, and on failure repair and parse again.
pub fn parse_lenient<T: DeserializeOwned>(raw: &str) -> Result<T, RecoveryError> {
    let candidate = extract_structured_payload(raw)?;

    match serde_json::from_str::<T>(candidate) {
        Ok(value) => Ok(value),
        Err(first) => {
            debug!(error = %first, "Direct parse failed, attempting repair");
            let repaired = repair_syntax(candidate);
            serde_json::from_str::<T>(&repaired).map_err(|e| RecoveryError::Malformed {
                excerpt: excerpt(raw),
                message: e.to_string(),
            })
        }
    }
}

/// [`parse_lenient`] into an untyped JSON value.
pub fn parse_value(raw: &str) -> Result<JsonValue, RecoveryError> {
    parse_lenient::<JsonValue>(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ==========================================================================
    // Extraction
    // ==========================================================================

    #[test]
    fn test_extract_from_prose_preamble() {
        let raw = "Here is the result: [{\"id\":\"1\"}]";
        assert_eq!(extract_structured_payload(raw).unwrap(), "[{\"id\":\"1\"}]");
    }

    #[test]
    fn test_extract_ignores_trailing_prose() {
        let raw = "Sure! {\"a\": [1, 2]} Let me know if you need more.";
        assert_eq!(extract_structured_payload(raw).unwrap(), "{\"a\": [1, 2]}");
    }

    #[test]
    fn test_extract_fenced_block_with_language() {
        let raw = "Result:\n```json\n[{\"id\": \"2\"}]\n```\nDone.";
        assert_eq!(extract_structured_payload(raw).unwrap(), "[{\"id\": \"2\"}]");
    }

    #[test]
    fn test_fenced_block_wins_over_earlier_structure() {
        let raw = "Notes [draft] below\n```\n{\"ok\": true}\n```";
        assert_eq!(extract_structured_payload(raw).unwrap(), "{\"ok\": true}");
    }

    #[test]
    fn test_extract_brackets_inside_strings_are_opaque() {
        let raw = "x {\"text\": \"a } and ] here\", \"n\": 1} y";
        assert_eq!(
            extract_structured_payload(raw).unwrap(),
            "{\"text\": \"a } and ] here\", \"n\": 1}"
        );
    }

    #[test]
    fn test_extract_escaped_quote_inside_string() {
        let raw = "{\"q\": \"say \\\"}\\\" now\"} trailing";
        assert_eq!(
            extract_structured_payload(raw).unwrap(),
            "{\"q\": \"say \\\"}\\\" now\"}"
        );
    }

    #[test]
    fn test_extract_unterminated_returns_rest() {
        let raw = "output: [{\"id\": \"1\"}, {\"id\":";
        assert_eq!(
            extract_structured_payload(raw).unwrap(),
            "[{\"id\": \"1\"}, {\"id\":"
        );
    }

    #[test]
    fn test_extract_no_structure() {
        assert_eq!(
            extract_structured_payload("I could not classify these notes."),
            Err(RecoveryError::NoStructureFound)
        );
    }

    #[test]
    fn test_extract_fence_without_brackets_is_no_structure() {
        assert_eq!(
            extract_structured_payload("```\nnothing here\n```"),
            Err(RecoveryError::NoStructureFound)
        );
    }

    #[test]
    fn test_extract_object_before_array() {
        let raw = "{\"classifications\": [1]} [2]";
        assert_eq!(
            extract_structured_payload(raw).unwrap(),
            "{\"classifications\": [1]}"
        );
    }

    // ==========================================================================
    // Repair
    // ==========================================================================

    #[test]
    fn test_repair_is_identity_on_valid_input() {
        for valid in [
            "{}",
            "[]",
            "[{\"a\":1}, {\"b\":2}]",
            "{\"text\": \"line\\nbreak\", \"n\": null, \"t\": true}",
            "{\n  \"a\": \"x\",\n  \"b\": 2\n}",
            "[1, 2.5e3, -4]",
        ] {
            assert_eq!(repair_syntax(valid), valid);
        }
    }

    #[test]
    fn test_repair_embedded_quotes() {
        let fixed = repair_syntax("{\"explanation\": \"the \"Blacksmith\" guild\"}");
        let value: JsonValue = serde_json::from_str(&fixed).unwrap();
        assert_eq!(value["explanation"], "the \"Blacksmith\" guild");
    }

    #[test]
    fn test_repair_trailing_commas() {
        assert_eq!(
            repair_syntax("[{\"a\":1,}, {\"b\":2,},]"),
            "[{\"a\":1}, {\"b\":2}]"
        );
    }

    #[test]
    fn test_repair_trailing_comma_before_newline() {
        let fixed = repair_syntax("{\n  \"a\": 1,\n}");
        let value: JsonValue = serde_json::from_str(&fixed).unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_repair_raw_control_chars_in_string() {
        let fixed = repair_syntax("{\"text\": \"line one\nline two\tend\"}");
        let value: JsonValue = serde_json::from_str(&fixed).unwrap();
        assert_eq!(value["text"], "line one\nline two\tend");
    }

    #[test]
    fn test_repair_missing_comma_between_lines() {
        let fixed = repair_syntax("{\n  \"name\": \"Bob\"\n  \"age\": 42\n  \"alive\": true\n  \"title\": null\n  \"x\": 1\n}");
        let value: JsonValue = serde_json::from_str(&fixed).unwrap();
        assert_eq!(
            value,
            json!({"name": "Bob", "age": 42, "alive": true, "title": null, "x": 1})
        );
    }

    #[test]
    fn test_repair_leaves_prose_commas_in_strings() {
        let fixed = repair_syntax("{\"a\": \"one, two,\", \"b\": [1,],}");
        let value: JsonValue = serde_json::from_str(&fixed).unwrap();
        assert_eq!(value, json!({"a": "one, two,", "b": [1]}));
    }

    #[test]
    fn test_repair_preserves_existing_escapes() {
        let fixed = repair_syntax("{\"a\": \"tab\\there\",}");
        let value: JsonValue = serde_json::from_str(&fixed).unwrap();
        assert_eq!(value["a"], "tab\there");
    }

    // ==========================================================================
    // Parsing
    // ==========================================================================

    #[test]
    fn test_parse_lenient_direct() {
        let v: Vec<i32> = parse_lenient("numbers: [1, 2, 3]").unwrap();
        assert_eq!(v, vec![1, 2, 3]);
    }

    #[test]
    fn test_parse_lenient_after_repair() {
        let raw = "```json\n[\n  {\"id\": \"1\", \"type\": \"npc\",},\n]\n```";
        let v = parse_value(raw).unwrap();
        assert_eq!(v, json!([{"id": "1", "type": "npc"}]));
    }

    #[test]
    fn test_parse_failure_carries_truncated_excerpt() {
        let raw = format!("[{{\"a\": {}", "x".repeat(2000));
        let err = parse_value(&raw).unwrap_err();
        match &err {
            RecoveryError::Malformed { excerpt, .. } => {
                assert_eq!(excerpt.chars().count(), PARSE_EXCERPT_CHARS);
                assert!(raw.starts_with(excerpt.as_str()));
            }
            other => panic!("expected Malformed, got {:?}", other),
        }
        assert!(err.excerpt().is_some());
    }

    #[test]
    fn test_recovery_error_into_core_error() {
        let err: Error = RecoveryError::NoStructureFound.into();
        assert!(matches!(err, Error::Parse(_)));
    }
}
