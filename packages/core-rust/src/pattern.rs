//! Glob-style topic patterns for publish/subscribe matching.
//!
//! Topics form a flat namespace: `*` matches any run of characters,
//! including dots, slashes or any other would-be separator. A pattern
//! without `*` matches only the identical topic name.

use std::fmt;

use regex::Regex;

/// Wildcard character matching zero or more characters.
pub const WILDCARD: char = '*';

#[derive(Debug, Clone)]
enum Matcher {
    Exact,
    Glob(Regex),
}

/// A compiled topic pattern.
///
/// Compiled once at subscription time; [`matches`](Self::matches) is then a
/// string comparison for exact patterns or an anchored regex match for globs.
#[derive(Debug, Clone)]
pub struct TopicPattern {
    raw: String,
    matcher: Matcher,
}

impl TopicPattern {
    /// Compiles a pattern.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is empty or the compiled expression
    /// exceeds the regex size limit.
    pub fn new(pattern: impl Into<String>) -> anyhow::Result<Self> {
        let raw = pattern.into();
        anyhow::ensure!(!raw.is_empty(), "topic pattern must not be empty");

        let matcher = if raw.contains(WILDCARD) {
            let body = raw
                .split(WILDCARD)
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".*");
            Matcher::Glob(Regex::new(&format!("(?s)^{body}$"))?)
        } else {
            Matcher::Exact
        };

        Ok(Self { raw, matcher })
    }

    /// Whether `topic` matches this pattern.
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        match &self.matcher {
            Matcher::Exact => self.raw == topic,
            Matcher::Glob(re) => re.is_match(topic),
        }
    }

    /// Whether the pattern contains a wildcard.
    #[must_use]
    pub fn is_glob(&self) -> bool {
        matches!(self.matcher, Matcher::Glob(_))
    }

    /// The pattern as originally written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl PartialEq for TopicPattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for TopicPattern {}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
