//! Recover JSON from free-form model output
//!
//! Models wrap JSON in code fences, surround it with explanation text, or
//! emit slightly broken syntax. [`parse`] tries a fixed chain of strategies
//! and returns the first value that decodes:
//! 1. Raw text (trimmed)
//! 2. Contents of a ```` ``` ```` fenced block, optionally tagged (`json`)
//! 3. First `{` or `[` to the last matching closer of the same kind
//! 4. The candidates above after repair: trailing commas dropped, and
//!    single quotes swapped for double quotes when no double quote is present
//!
//! A failure carries a truncated snippet, never the full response.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Maximum number of characters of the offending text kept in errors.
pub const SNIPPET_CHARS: usize = 200;

/// Errors from response parsing.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no valid JSON found in response: {snippet}")]
    NoJson { snippet: String },

    #[error("response JSON has unexpected shape: {message}")]
    Shape { message: String, snippet: String },
}

impl ParseError {
    /// The truncated text that failed to parse.
    pub fn snippet(&self) -> &str {
        match self {
            Self::NoJson { snippet } | Self::Shape { snippet, .. } => snippet,
        }
    }
}

/// Which strategy produced the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Raw,
    Fenced,
    Embedded,
    Repaired,
}

/// Parse a JSON value out of model output.
pub fn parse(text: &str) -> Result<Value, ParseError> {
    parse_with_strategy(text).map(|(value, _)| value)
}

/// Parse, falling back to `fallback` when no JSON can be recovered.
///
/// The fallback must be requested explicitly; [`parse`] never invents one.
pub fn parse_or(text: &str, fallback: Value) -> Value {
    parse(text).unwrap_or(fallback)
}

/// Parse and decode into `T`.
pub fn parse_as<T: DeserializeOwned>(text: &str) -> Result<T, ParseError> {
    let value = parse(text)?;
    serde_json::from_value(value).map_err(|e| ParseError::Shape {
        message: e.to_string(),
        snippet: snippet(text),
    })
}

/// Parse and report which strategy succeeded.
pub fn parse_with_strategy(text: &str) -> Result<(Value, Strategy), ParseError> {
    let trimmed = text.trim();

    let mut candidates: Vec<&str> = Vec::with_capacity(3);
    if !trimmed.is_empty() {
        candidates.push(trimmed);
    }

    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Ok((v, Strategy::Raw));
    }

    if let Some(block) = fenced_block(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(block) {
            return Ok((v, Strategy::Fenced));
        }
        candidates.push(block);
    }

    if let Some(span) = embedded_span(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(span) {
            return Ok((v, Strategy::Embedded));
        }
        candidates.push(span);
    }

    for candidate in candidates {
        if let Some(repaired) = repair(candidate) {
            if let Ok(v) = serde_json::from_str::<Value>(&repaired) {
                return Ok((v, Strategy::Repaired));
            }
        }
    }

    Err(ParseError::NoJson {
        snippet: snippet(text),
    })
}

/// Truncate `text` to [`SNIPPET_CHARS`] characters.
pub fn snippet(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(SNIPPET_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// Contents of the first fenced block. An unterminated fence runs to the end.
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    // Skip the optional language tag on the fence line
    let body_start = match after.find('\n') {
        Some(nl) if after[..nl].trim().chars().all(|c| c.is_ascii_alphanumeric()) => nl + 1,
        _ => 0,
    };
    let body = &after[body_start..];
    let block = match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    };
    let block = block.trim();
    if block.is_empty() {
        None
    } else {
        Some(block)
    }
}

/// From the first opening bracket to the last closer of the same kind.
fn embedded_span(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let closer = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(closer)?;
    if end > start {
        Some(&text[start..=end])
    } else {
        None
    }
}

/// Apply the mild syntax repairs. Returns None when nothing changed.
fn repair(text: &str) -> Option<String> {
    let quoted = if text.contains('\'') && !text.contains('"') {
        text.replace('\'', "\"")
    } else {
        text.to_string()
    };
    let repaired = strip_trailing_commas(&quoted);
    if repaired == text {
        None
    } else {
        Some(repaired)
    }
}

/// Remove commas that directly precede a closing `}` or `]`, ignoring
/// anything inside string literals.
fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
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
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}
