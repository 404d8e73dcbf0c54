//! Incremental structured extraction for streamed JSON.
//!
//! A model asked for JSON produces it a few characters at a time. The
//! [`StreamingJsonParser`] consumes those chunks as they arrive, tracks where
//! in the document it currently is, and fires callbacks registered for path
//! patterns such as `steps[*].name` as soon as matching values appear, long
//! before the enclosing object is syntactically complete.
//!
//! ```
//! use thinkloop_extractor::{ParserOptions, StreamingJsonParser};
//! use std::sync::{Arc, Mutex};
//!
//! let names = Arc::new(Mutex::new(Vec::new()));
//! let sink = names.clone();
//!
//! let mut parser = StreamingJsonParser::new(ParserOptions::default());
//! parser
//!     .on("steps[*].name", move |event| {
//!         sink.lock().unwrap().push(event.value.as_str().unwrap_or_default().to_string());
//!     })
//!     .unwrap();
//!
//! for chunk in [r#"{"steps":[{"na"#, r#"me":"a"},{"name":"#, r#""b"}]}"#] {
//!     parser.feed(chunk).unwrap();
//! }
//! parser.finish().unwrap();
//! assert_eq!(*names.lock().unwrap(), vec!["a", "b"]);
//! ```

pub mod parser;
pub mod path;

pub use parser::{FieldEvent, ParserOptions, StreamingJsonParser};
pub use path::{PathPattern, PathSegment, PatternSegment, format_path};

/// Errors from the extractor.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtractError {
    #[error("unexpected character {found:?} at offset {offset}: expected {expected}")]
    Unexpected {
        found: char,
        offset: usize,
        expected: &'static str,
    },

    #[error("invalid escape sequence at offset {offset}")]
    InvalidEscape { offset: usize },

    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),

    #[error("invalid UTF-8 at byte {0} of the input")]
    InvalidUtf8(usize),

    #[error("input ended with {open} unclosed container(s)")]
    Incomplete { open: usize },

    #[error("input ended inside a value")]
    Truncated,

    #[error("no JSON value found in input")]
    Empty,

    #[error("invalid path pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}
