//! Helpers for reading JSON out of model replies.

use serde::de::DeserializeOwned;
use thinkloop_core::{Error, Result};

/// Remove a surrounding Markdown code fence (with or without an info
/// string such as `json`), if any.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (`json`, `JSON`, ...) on the opening line.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Parse a model reply as `T`.
///
/// Tries the fence-stripped text first, then the outermost `{...}` or
/// `[...]` span, so a reply wrapped in prose still parses.
pub fn parse_reply<T: DeserializeOwned>(stage: &str, text: &str) -> Result<T> {
    let stripped = strip_code_fences(text);
    let first_error = match serde_json::from_str::<T>(stripped) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    if let Some(span) = outermost_span(stripped)
        && let Ok(value) = serde_json::from_str::<T>(span)
    {
        return Ok(value);
    }

    Err(Error::parse(stage, first_error.to_string()))
}

fn outermost_span(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let close = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}
