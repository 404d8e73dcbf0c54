//! The character-level streaming JSON parser.
//!
//! The parser keeps an explicit state, a container stack (one frame per open
//! object or array, holding the partially built value) and a path stack that
//! mirrors the current position. Each input character moves the state
//! machine one step, so chunk boundaries may fall anywhere: inside keys,
//! inside `\uXXXX` escapes, between the halves of a surrogate pair, or in the
//! middle of a number.
//!
//! Delivery is controlled by two independent flags in [`ParserOptions`]:
//!
//! | realtime | incremental | string values are delivered                              |
//! |----------|-------------|----------------------------------------------------------|
//! | false    | any         | once, complete                                           |
//! | true     | false       | on every appended character, as the text so far          |
//! | true     | true        | on every appended character, as that character alone     |
//!
//! In realtime mode the closing quote produces one more delivery marked
//! complete: the whole string, or in incremental mode whatever has not been
//! delivered yet (usually nothing). Escapes are delivered once decoded, and
//! a surrogate pair once both halves have arrived.
//!
//! Numbers, booleans, null, objects and arrays are always delivered once,
//! complete, when they close.

use serde_json::{Map, Value};
use tracing::debug;

use crate::ExtractError;
use crate::path::{PathPattern, PathSegment};

/// Delivery and tolerance settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParserOptions {
    /// Deliver string values while they are still being received.
    pub realtime: bool,
    /// In realtime mode, deliver only what was appended since the last delivery.
    pub incremental: bool,
    /// Skip text before the first `{` or `[` and after the root value closes.
    pub lenient: bool,
}

impl ParserOptions {
    /// Realtime, incremental and lenient: the setting used for model output.
    pub fn streaming() -> Self {
        Self {
            realtime: true,
            incremental: true,
            lenient: true,
        }
    }
}

/// A value (or a piece of one) delivered to a callback.
#[derive(Debug)]
pub struct FieldEvent<'a> {
    /// Where the value sits in the document.
    pub path: &'a [PathSegment],
    /// The value, or for realtime string delivery the text so far / the new suffix.
    pub value: &'a Value,
    /// Whether the value is finished.
    pub complete: bool,
}

impl FieldEvent<'_> {
    /// Index of the innermost array element on the path, if any.
    pub fn array_index(&self) -> Option<usize> {
        self.path.iter().rev().find_map(|segment| match segment {
            PathSegment::Index(i) => Some(*i),
            PathSegment::Key(_) => None,
        })
    }

    /// The last object key on the path, if the value sits directly under one.
    pub fn field_name(&self) -> Option<&str> {
        match self.path.last() {
            Some(PathSegment::Key(key)) => Some(key),
            _ => None,
        }
    }
}

type Callback = Box<dyn FnMut(&FieldEvent<'_>) + Send>;

struct Handler {
    pattern: PathPattern,
    callback: Callback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Lenient mode: skipping prose before the root value.
    Preamble,
    /// Expecting any value.
    Value,
    /// Just after `[`: a value or `]`.
    ArrayFirst,
    /// Just after `{`: a key or `}`.
    ObjectFirst,
    /// After `,` inside an object: a key.
    Key,
    /// After a key: `:`.
    Colon,
    /// Inside a key or string value.
    Str(Escape),
    Number,
    Literal {
        word: &'static str,
        matched: usize,
    },
    /// After a finished value: `,` or a closing bracket.
    AfterValue,
    /// The root value is finished.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escape {
    None,
    Backslash,
    Unicode { code: u32, digits: u8 },
}

impl State {
    fn expecting(&self) -> &'static str {
        match self {
            State::Preamble | State::Value => "a JSON value",
            State::ArrayFirst => "a value or ']'",
            State::ObjectFirst => "a key or '}'",
            State::Key => "a quoted key",
            State::Colon => "':'",
            State::Str(_) => "string content",
            State::Number => "a digit",
            State::Literal { .. } => "true, false or null",
            State::AfterValue => "',' or a closing bracket",
            State::Done => "end of input",
        }
    }
}

enum Frame {
    Object {
        map: Map<String, Value>,
        key: Option<String>,
    },
    Array {
        items: Vec<Value>,
    },
}

/// An incremental JSON parser with path-pattern callbacks.
pub struct StreamingJsonParser {
    options: ParserOptions,
    handlers: Vec<Handler>,
    state: State,
    stack: Vec<Frame>,
    path: Vec<PathSegment>,
    root: Option<Value>,

    in_key: bool,
    text: String,
    /// Bytes of `text` already delivered in realtime mode.
    delivered: usize,
    /// Whether any handler watches the string being read.
    watched: bool,
    high_surrogate: Option<u32>,
    number: String,

    offset: usize,
    utf8_carry: Vec<u8>,
    bytes_seen: usize,
    error: Option<ExtractError>,
}

impl StreamingJsonParser {
    pub fn new(options: ParserOptions) -> Self {
        Self {
            options,
            handlers: Vec::new(),
            state: if options.lenient {
                State::Preamble
            } else {
                State::Value
            },
            stack: Vec::new(),
            path: Vec::new(),
            root: None,
            in_key: false,
            text: String::new(),
            delivered: 0,
            watched: false,
            high_surrogate: None,
            number: String::new(),
            offset: 0,
            utf8_carry: Vec::new(),
            bytes_seen: 0,
            error: None,
        }
    }

    /// Register a callback for every value whose path matches `pattern`.
    ///
    /// Callbacks run synchronously, in registration order, from inside
    /// [`feed`](Self::feed).
    pub fn on<F>(&mut self, pattern: &str, callback: F) -> Result<&mut Self, ExtractError>
    where
        F: FnMut(&FieldEvent<'_>) + Send + 'static,
    {
        self.handlers.push(Handler {
            pattern: PathPattern::parse(pattern)?,
            callback: Box::new(callback),
        });
        Ok(self)
    }

    pub fn options(&self) -> ParserOptions {
        self.options
    }

    /// Number of containers currently open.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Feed the next chunk of text.
    ///
    /// After an error the parser is poisoned and every later call returns
    /// the same error.
    pub fn feed(&mut self, chunk: &str) -> Result<(), ExtractError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        for ch in chunk.chars() {
            if let Err(err) = self.step(ch) {
                debug!(offset = self.offset, error = %err, "Extractor poisoned");
                self.error = Some(err.clone());
                return Err(err);
            }
            self.offset += 1;
        }
        Ok(())
    }

    /// Feed raw bytes. A UTF-8 sequence split across calls is held back
    /// until the rest of it arrives.
    pub fn feed_bytes(&mut self, bytes: &[u8]) -> Result<(), ExtractError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        let mut buf = std::mem::take(&mut self.utf8_carry);
        buf.extend_from_slice(bytes);

        let valid_up_to = match std::str::from_utf8(&buf) {
            Ok(_) => buf.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(e) => {
                let err = ExtractError::InvalidUtf8(self.bytes_seen + e.valid_up_to());
                self.error = Some(err.clone());
                return Err(err);
            }
        };

        self.utf8_carry = buf.split_off(valid_up_to);
        self.bytes_seen += valid_up_to;
        let text = String::from_utf8(buf).map_err(|e| ExtractError::InvalidUtf8(e.utf8_error().valid_up_to()))?;
        self.feed(&text)
    }

    /// Signal end of input and return the complete root value.
    ///
    /// Fails unless the container stack has been reduced to exactly the root.
    pub fn finish(&mut self) -> Result<Value, ExtractError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        if !self.utf8_carry.is_empty() {
            return Err(ExtractError::InvalidUtf8(self.bytes_seen));
        }
        // A bare number at the root only ends at end of input.
        if self.state == State::Number && self.stack.is_empty() {
            self.end_number()?;
        }
        match self.state {
            State::Done => self.root.take().ok_or(ExtractError::Empty),
            State::Preamble => Err(ExtractError::Empty),
            State::Value if self.stack.is_empty() => Err(ExtractError::Empty),
            _ if !self.stack.is_empty() => Err(ExtractError::Incomplete {
                open: self.stack.len(),
            }),
            _ => Err(ExtractError::Truncated),
        }
    }

    fn unexpected(&self, found: char) -> ExtractError {
        ExtractError::Unexpected {
            found,
            offset: self.offset,
            expected: self.state.expecting(),
        }
    }

    fn step(&mut self, ch: char) -> Result<(), ExtractError> {
        match self.state {
            State::Preamble => {
                if ch == '{' || ch == '[' {
                    self.begin_value(ch)?;
                }
                Ok(())
            }
            State::Value => {
                if ch.is_whitespace() {
                    return Ok(());
                }
                self.begin_value(ch)
            }
            State::ArrayFirst => {
                if ch.is_whitespace() {
                    return Ok(());
                }
                if ch == ']' {
                    return self.close_container(ch);
                }
                self.begin_value(ch)
            }
            State::ObjectFirst => match ch {
                c if c.is_whitespace() => Ok(()),
                '}' => self.close_container(ch),
                '"' => {
                    self.begin_string(true);
                    Ok(())
                }
                _ => Err(self.unexpected(ch)),
            },
            State::Key => match ch {
                c if c.is_whitespace() => Ok(()),
                '"' => {
                    self.begin_string(true);
                    Ok(())
                }
                _ => Err(self.unexpected(ch)),
            },
            State::Colon => match ch {
                c if c.is_whitespace() => Ok(()),
                ':' => {
                    self.state = State::Value;
                    Ok(())
                }
                _ => Err(self.unexpected(ch)),
            },
            State::Str(escape) => {
                self.string_char(escape, ch)?;
                self.deliver_partial_string();
                Ok(())
            }
            State::Number => {
                if ch.is_ascii_digit() || matches!(ch, '-' | '+' | '.' | 'e' | 'E') {
                    self.number.push(ch);
                    Ok(())
                } else {
                    self.end_number()?;
                    // The terminator belongs to whatever follows the number.
                    self.step(ch)
                }
            }
            State::Literal { word, matched } => {
                if word[matched..].starts_with(ch) {
                    let matched = matched + ch.len_utf8();
                    if matched == word.len() {
                        let value = match word {
                            "true" => Value::Bool(true),
                            "false" => Value::Bool(false),
                            _ => Value::Null,
                        };
                        self.complete_value(value, true);
                    } else {
                        self.state = State::Literal { word, matched };
                    }
                    Ok(())
                } else {
                    Err(self.unexpected(ch))
                }
            }
            State::AfterValue => match ch {
                c if c.is_whitespace() => Ok(()),
                ',' => {
                    self.state = match self.stack.last() {
                        Some(Frame::Object { .. }) => State::Key,
                        Some(Frame::Array { .. }) => State::Value,
                        None => return Err(self.unexpected(ch)),
                    };
                    Ok(())
                }
                '}' | ']' => self.close_container(ch),
                _ => Err(self.unexpected(ch)),
            },
            State::Done => {
                if ch.is_whitespace() || self.options.lenient {
                    Ok(())
                } else {
                    Err(self.unexpected(ch))
                }
            }
        }
    }

    fn begin_value(&mut self, ch: char) -> Result<(), ExtractError> {
        if let Some(Frame::Array { items }) = self.stack.last() {
            self.path.push(PathSegment::Index(items.len()));
        }
        match ch {
            '{' => {
                self.stack.push(Frame::Object {
                    map: Map::new(),
                    key: None,
                });
                self.state = State::ObjectFirst;
            }
            '[' => {
                self.stack.push(Frame::Array { items: Vec::new() });
                self.state = State::ArrayFirst;
            }
            '"' => self.begin_string(false),
            '-' | '0'..='9' => {
                self.number.clear();
                self.number.push(ch);
                self.state = State::Number;
            }
            't' => self.state = State::Literal { word: "true", matched: 1 },
            'f' => self.state = State::Literal { word: "false", matched: 1 },
            'n' => self.state = State::Literal { word: "null", matched: 1 },
            _ => {
                // Undo the index pushed for a value that never started.
                if let Some(Frame::Array { .. }) = self.stack.last() {
                    self.path.pop();
                }
                return Err(self.unexpected(ch));
            }
        }
        Ok(())
    }

    fn begin_string(&mut self, in_key: bool) {
        self.in_key = in_key;
        self.text.clear();
        self.delivered = 0;
        self.high_surrogate = None;
        self.watched = !in_key && self.handlers.iter().any(|h| h.pattern.matches(&self.path));
        self.state = State::Str(Escape::None);
    }

    fn string_char(&mut self, escape: Escape, ch: char) -> Result<(), ExtractError> {
        match escape {
            Escape::None => match ch {
                '"' => self.end_string(),
                '\\' => {
                    self.state = State::Str(Escape::Backslash);
                    Ok(())
                }
                c if (c as u32) < 0x20 => Err(self.unexpected(c)),
                c => {
                    self.push_char(c);
                    Ok(())
                }
            },
            Escape::Backslash => {
                let decoded = match ch {
                    '"' => '"',
                    '\\' => '\\',
                    '/' => '/',
                    'b' => '\u{0008}',
                    'f' => '\u{000C}',
                    'n' => '\n',
                    'r' => '\r',
                    't' => '\t',
                    'u' => {
                        self.state = State::Str(Escape::Unicode { code: 0, digits: 0 });
                        return Ok(());
                    }
                    _ => {
                        return Err(ExtractError::InvalidEscape {
                            offset: self.offset,
                        });
                    }
                };
                self.push_char(decoded);
                self.state = State::Str(Escape::None);
                Ok(())
            }
            Escape::Unicode { code, digits } => {
                let digit = ch.to_digit(16).ok_or(ExtractError::InvalidEscape {
                    offset: self.offset,
                })?;
                let code = code * 16 + digit;
                if digits + 1 < 4 {
                    self.state = State::Str(Escape::Unicode {
                        code,
                        digits: digits + 1,
                    });
                    return Ok(());
                }
                self.state = State::Str(Escape::None);
                self.push_code_unit(code);
                Ok(())
            }
        }
    }

    fn push_code_unit(&mut self, code: u32) {
        match code {
            0xD800..=0xDBFF => {
                if self.high_surrogate.take().is_some() {
                    self.text.push(char::REPLACEMENT_CHARACTER);
                }
                self.high_surrogate = Some(code);
            }
            0xDC00..=0xDFFF => {
                let ch = match self.high_surrogate.take() {
                    Some(high) => {
                        char::from_u32(0x10000 + ((high - 0xD800) << 10) + (code - 0xDC00))
                    }
                    None => None,
                };
                self.text.push(ch.unwrap_or(char::REPLACEMENT_CHARACTER));
            }
            _ => self.push_char(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER)),
        }
    }

    fn push_char(&mut self, ch: char) {
        if self.high_surrogate.take().is_some() {
            self.text.push(char::REPLACEMENT_CHARACTER);
        }
        self.text.push(ch);
    }

    fn end_string(&mut self) -> Result<(), ExtractError> {
        if self.high_surrogate.take().is_some() {
            self.text.push(char::REPLACEMENT_CHARACTER);
        }
        let text = std::mem::take(&mut self.text);

        if self.in_key {
            if let Some(Frame::Object { key, .. }) = self.stack.last_mut() {
                *key = Some(text.clone());
            }
            self.path.push(PathSegment::Key(text));
            self.state = State::Colon;
            return Ok(());
        }

        if self.watched {
            if self.options.realtime {
                let delivered = if self.options.incremental {
                    Value::String(text[self.delivered..].to_string())
                } else {
                    Value::String(text.clone())
                };
                self.dispatch(&delivered, true);
            } else {
                self.dispatch(&Value::String(text.clone()), true);
            }
        }
        self.delivered = 0;
        self.watched = false;
        self.complete_value(Value::String(text), false);
        Ok(())
    }

    /// Deliver what was appended to the in-progress string value since the
    /// last delivery.
    fn deliver_partial_string(&mut self) {
        let State::Str(_) = self.state else {
            return;
        };
        if self.in_key || !self.watched || !self.options.realtime {
            return;
        }
        if self.text.len() == self.delivered {
            return;
        }
        let value = if self.options.incremental {
            Value::String(self.text[self.delivered..].to_string())
        } else {
            Value::String(self.text.clone())
        };
        self.delivered = self.text.len();
        self.dispatch(&value, false);
    }

    fn end_number(&mut self) -> Result<(), ExtractError> {
        let literal = std::mem::take(&mut self.number);
        let value = match serde_json::from_str::<Value>(&literal) {
            Ok(value @ Value::Number(_)) => value,
            _ => return Err(ExtractError::InvalidNumber(literal)),
        };
        self.complete_value(value, true);
        Ok(())
    }

    fn close_container(&mut self, ch: char) -> Result<(), ExtractError> {
        let value = match (self.stack.pop(), ch) {
            (Some(Frame::Object { map, key: None }), '}') => Value::Object(map),
            (Some(Frame::Array { items }), ']') => Value::Array(items),
            (frame, _) => {
                if let Some(frame) = frame {
                    self.stack.push(frame);
                }
                return Err(self.unexpected(ch));
            }
        };
        self.complete_value(value, true);
        Ok(())
    }

    /// Attach a finished value to its parent (or make it the root) and leave
    /// its path position.
    fn complete_value(&mut self, value: Value, notify: bool) {
        if notify {
            self.dispatch(&value, true);
        }
        match self.stack.last_mut() {
            Some(Frame::Object { map, key }) => {
                if let Some(key) = key.take() {
                    map.insert(key, value);
                }
                self.path.pop();
                self.state = State::AfterValue;
            }
            Some(Frame::Array { items }) => {
                items.push(value);
                self.path.pop();
                self.state = State::AfterValue;
            }
            None => {
                self.root = Some(value);
                self.state = State::Done;
            }
        }
    }

    fn dispatch(&mut self, value: &Value, complete: bool) {
        let event = FieldEvent {
            path: &self.path,
            value,
            complete,
        };
        for handler in self.handlers.iter_mut() {
            if handler.pattern.matches(event.path) {
                (handler.callback)(&event);
            }
        }
    }
}

impl std::fmt::Debug for StreamingJsonParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingJsonParser")
            .field("options", &self.options)
            .field("state", &self.state)
            .field("depth", &self.stack.len())
            .field("path", &self.path)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<(String, Value, bool)>>>;

    fn watch(parser: &mut StreamingJsonParser, pattern: &str) -> Log {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        parser
            .on(pattern, move |event| {
                sink.lock().unwrap().push((
                    crate::format_path(event.path),
                    event.value.clone(),
                    event.complete,
                ));
            })
            .unwrap();
        log
    }

    #[test]
    fn parses_complete_document() {
        let mut parser = StreamingJsonParser::new(ParserOptions::default());
        parser
            .feed(r#"{"a": [1, -2.5e3, true, false, null], "b": {"c": "d\n"}}"#)
            .unwrap();
        let value = parser.finish().unwrap();
        assert_eq!(
            value,
            serde_json::json!({"a": [1, -2500.0, true, false, null], "b": {"c": "d\n"}})
        );
    }

    #[test]
    fn fires_once_per_completed_value() {
        let mut parser = StreamingJsonParser::new(ParserOptions::default());
        let log = watch(&mut parser, "steps[*].name");
        parser
            .feed(r#"{"steps":[{"name":"a"},{"name":"b"}]}"#)
            .unwrap();
        parser.finish().unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0], ("steps[0].name".into(), Value::String("a".into()), true));
        assert_eq!(log[1], ("steps[1].name".into(), Value::String("b".into()), true));
    }

    #[test]
    fn realtime_full_mode_repeats_accumulated_text() {
        let mut parser = StreamingJsonParser::new(ParserOptions {
            realtime: true,
            incremental: false,
            lenient: false,
        });
        let log = watch(&mut parser, "msg");
        for chunk in [r#"{"msg":"he"#, "ll", r#"o"}"#] {
            parser.feed(chunk).unwrap();
        }
        let values: Vec<_> = log
            .lock()
            .unwrap()
            .iter()
            .map(|(_, v, c)| (v.as_str().unwrap().to_string(), *c))
            .collect();
        assert_eq!(
            values,
            vec![
                ("h".to_string(), false),
                ("he".to_string(), false),
                ("hel".to_string(), false),
                ("hell".to_string(), false),
                ("hello".to_string(), false),
                ("hello".to_string(), true),
            ]
        );
    }

    #[test]
    fn realtime_incremental_fires_once_per_character() {
        let mut parser = StreamingJsonParser::new(ParserOptions {
            realtime: true,
            incremental: true,
            lenient: false,
        });
        let log = watch(&mut parser, "a");
        parser.feed(r#"{"a":"hel"#).unwrap();
        parser.feed(r#"lo"}"#).unwrap();

        let log = log.lock().unwrap();
        let partial: Vec<_> = log
            .iter()
            .filter(|(_, _, complete)| !complete)
            .map(|(_, v, _)| v.as_str().unwrap().to_string())
            .collect();
        assert_eq!(partial, vec!["h", "e", "l", "l", "o"]);
        assert_eq!(log.last().unwrap(), &("a".to_string(), Value::String(String::new()), true));
    }

    #[test]
    fn realtime_delivers_escapes_once_decoded() {
        let mut parser = StreamingJsonParser::new(ParserOptions::streaming());
        let log = watch(&mut parser, "s");
        for chunk in [r#"{"s":"a\"#, r#"n\uD83"#, r#"D\uDE00"#, r#"b"}"#] {
            parser.feed(chunk).unwrap();
        }
        let partial: Vec<_> = log
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, _, complete)| !complete)
            .map(|(_, v, _)| v.as_str().unwrap().to_string())
            .collect();
        assert_eq!(partial, vec!["a", "\n", "\u{1F600}", "b"]);
    }

    #[test]
    fn numbers_and_containers_are_delivered_on_close() {
        let mut parser = StreamingJsonParser::new(ParserOptions::streaming());
        let priorities = watch(&mut parser, "steps[*].priority");
        let steps = watch(&mut parser, "steps[*]");
        parser.feed(r#"{"steps":[{"priority":1"#).unwrap();
        assert!(priorities.lock().unwrap().is_empty());
        parser.feed(r#"2}]}"#).unwrap();

        assert_eq!(priorities.lock().unwrap()[0].1, serde_json::json!(12));
        assert_eq!(steps.lock().unwrap()[0].1, serde_json::json!({"priority": 12}));
    }

    #[test]
    fn surrogate_pair_split_across_chunks() {
        let mut parser = StreamingJsonParser::new(ParserOptions::default());
        for chunk in [r#"{"e":"\uD8"#, r#"3D\u"#, r#"DE0"#, r#"0!"}"#] {
            parser.feed(chunk).unwrap();
        }
        assert_eq!(parser.finish().unwrap(), serde_json::json!({"e": "\u{1F600}!"}));
    }

    #[test]
    fn lone_surrogate_becomes_replacement_character() {
        let mut parser = StreamingJsonParser::new(ParserOptions::default());
        parser.feed(r#"["\uD800x"]"#).unwrap();
        assert_eq!(parser.finish().unwrap(), serde_json::json!(["\u{FFFD}x"]));
    }

    #[test]
    fn multibyte_utf8_split_across_byte_chunks() {
        let bytes = r#"{"k":"héllo 🌍"}"#.as_bytes();
        let mut parser = StreamingJsonParser::new(ParserOptions::default());
        for byte in bytes {
            parser.feed_bytes(std::slice::from_ref(byte)).unwrap();
        }
        assert_eq!(parser.finish().unwrap(), serde_json::json!({"k": "héllo 🌍"}));
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut parser = StreamingJsonParser::new(ParserOptions::default());
        let err = parser.feed_bytes(&[b'"', 0xFF, b'"']).unwrap_err();
        assert_eq!(err, ExtractError::InvalidUtf8(1));
    }

    #[test]
    fn lenient_mode_skips_code_fences() {
        let mut parser = StreamingJsonParser::new(ParserOptions::streaming());
        parser
            .feed("Here is the plan:\n```json\n{\"id\": \"p1\"}\n```\nDone.")
            .unwrap();
        assert_eq!(parser.finish().unwrap(), serde_json::json!({"id": "p1"}));
    }

    #[test]
    fn strict_mode_rejects_trailing_text() {
        let mut parser = StreamingJsonParser::new(ParserOptions::default());
        let err = parser.feed("{} x").unwrap_err();
        assert!(matches!(err, ExtractError::Unexpected { found: 'x', .. }));
    }

    #[test]
    fn unclosed_containers_fail_at_finish() {
        let mut parser = StreamingJsonParser::new(ParserOptions::default());
        parser.feed(r#"{"steps":[{"name":"a"}"#).unwrap();
        assert_eq!(parser.depth(), 2);
        assert_eq!(
            parser.finish().unwrap_err(),
            ExtractError::Incomplete { open: 2 }
        );
    }

    #[test]
    fn truncated_root_string_fails() {
        let mut parser = StreamingJsonParser::new(ParserOptions::default());
        parser.feed(r#""abc"#).unwrap();
        assert_eq!(parser.finish().unwrap_err(), ExtractError::Truncated);
    }

    #[test]
    fn empty_input_fails() {
        let mut parser = StreamingJsonParser::new(ParserOptions::streaming());
        parser.feed("no json here").unwrap();
        assert_eq!(parser.finish().unwrap_err(), ExtractError::Empty);
    }

    #[test]
    fn root_number_completes_at_finish() {
        let mut parser = StreamingJsonParser::new(ParserOptions::default());
        parser.feed("4").unwrap();
        parser.feed("2").unwrap();
        assert_eq!(parser.finish().unwrap(), serde_json::json!(42));
    }

    #[test]
    fn malformed_number_is_rejected() {
        let mut parser = StreamingJsonParser::new(ParserOptions::default());
        let err = parser.feed("[1.2.3]").unwrap_err();
        assert_eq!(err, ExtractError::InvalidNumber("1.2.3".into()));
    }

    #[test]
    fn errors_poison_the_parser() {
        let mut parser = StreamingJsonParser::new(ParserOptions::default());
        let first = parser.feed("{,").unwrap_err();
        assert_eq!(parser.feed("}").unwrap_err(), first);
        assert_eq!(parser.finish().unwrap_err(), first);
    }

    #[test]
    fn mismatched_bracket_is_rejected() {
        let mut parser = StreamingJsonParser::new(ParserOptions::default());
        assert!(parser.feed(r#"{"a":[1}"#).is_err());
    }

    #[test]
    fn key_strings_never_fire_callbacks() {
        let mut parser = StreamingJsonParser::new(ParserOptions::streaming());
        let log = watch(&mut parser, "*");
        parser.feed(r#"{"name": "x"}"#).unwrap();
        let log = log.lock().unwrap();
        assert!(log.iter().all(|(path, _, _)| path == "name"));
    }

    #[test]
    fn event_helpers_expose_index_and_field() {
        let mut parser = StreamingJsonParser::new(ParserOptions::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        parser
            .on("steps[*].*", move |event| {
                sink.lock()
                    .unwrap()
                    .push((event.array_index(), event.field_name().map(str::to_string)));
            })
            .unwrap();
        parser.feed(r#"{"steps":[{"x":1},{"y":2}]}"#).unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(Some(0), Some("x".to_string())), (Some(1), Some("y".to_string()))]
        );
    }
}
