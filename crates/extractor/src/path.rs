//! Document paths and the patterns matched against them.
//!
//! A path is the sequence of object keys and array indices leading from the
//! root to the value being parsed. Patterns use the same shape with `*`
//! standing for any key or any index:
//!
//! ```text
//! steps[*].name      steps → any index → name
//! *.id               any top-level key → id
//! [0]                first element of a root array
//! ```
//!
//! Matching is exact: the pattern and the path must have the same length and
//! agree element by element. A pattern never matches a prefix.

use std::fmt;
use std::str::FromStr;

use crate::ExtractError;

/// One step from a container into a child value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// One element of a [`PathPattern`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternSegment {
    Key(String),
    Index(usize),
    /// Matches any key or any index.
    Any,
}

impl PatternSegment {
    fn matches(&self, segment: &PathSegment) -> bool {
        match (self, segment) {
            (PatternSegment::Any, _) => true,
            (PatternSegment::Key(a), PathSegment::Key(b)) => a == b,
            (PatternSegment::Index(a), PathSegment::Index(b)) => a == b,
            _ => false,
        }
    }
}

/// A compiled path pattern such as `steps[*].name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<PatternSegment>,
}

impl PathPattern {
    /// Parse a pattern. The empty string matches the root value.
    pub fn parse(pattern: &str) -> Result<Self, ExtractError> {
        let invalid = |reason: &str| ExtractError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut chars = pattern.chars().peekable();
        let mut expect_key = true;

        while let Some(&c) = chars.peek() {
            match c {
                '[' => {
                    chars.next();
                    let mut inner = String::new();
                    loop {
                        match chars.next() {
                            Some(']') => break,
                            Some(ch) => inner.push(ch),
                            None => return Err(invalid("unclosed '['")),
                        }
                    }
                    let segment = match inner.trim() {
                        "*" => PatternSegment::Any,
                        digits => digits
                            .parse::<usize>()
                            .map(PatternSegment::Index)
                            .map_err(|_| invalid("index must be a number or '*'"))?,
                    };
                    segments.push(segment);
                    expect_key = false;
                }
                '.' => {
                    chars.next();
                    if expect_key {
                        return Err(invalid("empty key"));
                    }
                    expect_key = true;
                    if chars.peek().is_none() {
                        return Err(invalid("trailing '.'"));
                    }
                }
                _ => {
                    if !expect_key {
                        return Err(invalid("missing '.' before key"));
                    }
                    let mut key = String::new();
                    while let Some(&ch) = chars.peek() {
                        if ch == '.' || ch == '[' {
                            break;
                        }
                        key.push(ch);
                        chars.next();
                    }
                    segments.push(if key == "*" {
                        PatternSegment::Any
                    } else {
                        PatternSegment::Key(key)
                    });
                    expect_key = false;
                }
            }
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[PatternSegment] {
        &self.segments
    }

    /// Exact-length, element-wise match against a concrete path.
    pub fn matches(&self, path: &[PathSegment]) -> bool {
        self.segments.len() == path.len()
            && self
                .segments
                .iter()
                .zip(path)
                .all(|(pattern, segment)| pattern.matches(segment))
    }
}

impl FromStr for PathPattern {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                PatternSegment::Key(key) if i == 0 => write!(f, "{key}")?,
                PatternSegment::Key(key) => write!(f, ".{key}")?,
                PatternSegment::Index(index) => write!(f, "[{index}]")?,
                PatternSegment::Any => write!(f, "[*]")?,
            }
        }
        Ok(())
    }
}

/// Render a concrete path as `steps[0].name`.
pub fn format_path(path: &[PathSegment]) -> String {
    let mut out = String::new();
    for segment in path {
        match segment {
            PathSegment::Key(key) if out.is_empty() => out.push_str(key),
            PathSegment::Key(key) => {
                out.push('.');
                out.push_str(key);
            }
            PathSegment::Index(index) => out.push_str(&format!("[{index}]")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(k: &str) -> PathSegment {
        PathSegment::Key(k.into())
    }

    #[test]
    fn parses_wildcard_index() {
        let pattern: PathPattern = "steps[*].name".parse().unwrap();
        assert_eq!(
            pattern.segments(),
            &[
                PatternSegment::Key("steps".into()),
                PatternSegment::Any,
                PatternSegment::Key("name".into()),
            ]
        );
        assert_eq!(pattern.to_string(), "steps[*].name");
    }

    #[test]
    fn matches_exact_length_only() {
        let pattern = PathPattern::parse("steps[*].name").unwrap();
        assert!(pattern.matches(&[key("steps"), PathSegment::Index(3), key("name")]));
        assert!(!pattern.matches(&[key("steps"), PathSegment::Index(3)]));
        assert!(!pattern.matches(&[
            key("steps"),
            PathSegment::Index(3),
            key("name"),
            key("extra")
        ]));
        assert!(!pattern.matches(&[key("steps"), key("x"), key("description")]));
    }

    #[test]
    fn wildcard_key_matches_keys_and_indices() {
        let pattern = PathPattern::parse("*.id").unwrap();
        assert!(pattern.matches(&[key("plan"), key("id")]));
        assert!(!pattern.matches(&[key("plan"), key("name")]));

        let pattern = PathPattern::parse("[*]").unwrap();
        assert!(pattern.matches(&[PathSegment::Index(0)]));
        assert!(pattern.matches(&[key("anything")]));
    }

    #[test]
    fn empty_pattern_is_root() {
        let pattern = PathPattern::parse("").unwrap();
        assert!(pattern.matches(&[]));
        assert!(!pattern.matches(&[key("a")]));
    }

    #[test]
    fn concrete_index() {
        let pattern = PathPattern::parse("[1].name").unwrap();
        assert!(pattern.matches(&[PathSegment::Index(1), key("name")]));
        assert!(!pattern.matches(&[PathSegment::Index(0), key("name")]));
    }

    #[test]
    fn rejects_malformed_patterns() {
        for bad in ["steps[", "steps[x]", "a..b", "a.", ".a", "a[0]b"] {
            assert!(
                PathPattern::parse(bad).is_err(),
                "pattern {bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn formats_paths() {
        let path = [key("steps"), PathSegment::Index(0), key("name")];
        assert_eq!(format_path(&path), "steps[0].name");
        assert_eq!(format_path(&[PathSegment::Index(2)]), "[2]");
    }
}
