//! Pattern matching for `$like` and `$regex` predicates.
//!
//! Both pattern kinds are compiled once when a query is parsed and then
//! evaluated against every candidate document.
//!
//! # `$like`
//!
//! `%` matches any run of characters (including none) and `_` matches exactly
//! one character. Matching is case-insensitive and must cover the whole value.
//!
//! # `$regex`
//!
//! Compiled with the `regex` crate. Unanchored patterns match any
//! substring; an invalid pattern is rejected when the query is parsed.

use livedoc_core::{Error, Result};
use regex::RegexBuilder;

#[derive(Debug, Clone, PartialEq)]
enum LikeToken {
    Any,
    One,
    Char(char),
}

/// A compiled `$like` pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct LikePattern {
    source: String,
    tokens: Vec<LikeToken>,
}

impl LikePattern {
    pub fn new(pattern: &str) -> Self {
        let tokens = pattern
            .chars()
            .flat_map(char::to_lowercase)
            .map(|c| match c {
                '%' => LikeToken::Any,
                '_' => LikeToken::One,
                c => LikeToken::Char(c),
            })
            .collect();
        Self {
            source: pattern.to_string(),
            tokens,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, value: &str) -> bool {
        let chars: Vec<char> = value.chars().flat_map(char::to_lowercase).collect();
        like_at(&chars, &self.tokens)
    }
}

fn like_at(v: &[char], p: &[LikeToken]) -> bool {
    match p.split_first() {
        None => v.is_empty(),
        Some((LikeToken::Any, rest)) => (0..=v.len()).any(|skip| like_at(&v[skip..], rest)),
        Some((LikeToken::One, rest)) => !v.is_empty() && like_at(&v[1..], rest),
        Some((LikeToken::Char(c), rest)) => v.first() == Some(c) && like_at(&v[1..], rest),
    }
}

/// Case-insensitive SQL-style LIKE match.
///
/// ```
/// use livedoc_query::pattern::like;
/// assert!(like("Hello", "h%o"));
/// assert!(like("hello", "_ELLO"));
/// assert!(!like("hello", "world"));
/// ```
pub fn like(value: &str, pattern: &str) -> bool {
    LikePattern::new(pattern).is_match(value)
}

/// A compiled `$regex` pattern.
#[derive(Debug, Clone)]
pub struct Regex {
    options: String,
    inner: regex::Regex,
}

impl Regex {
    /// Compiles `pattern` with `$options` letters: `i` case-insensitive,
    /// `m` multi-line anchors, `s` dot matches newline, `x` extended
    /// whitespace. Other letters are ignored.
    ///
    /// Fails with `Error::InvalidQuery` if the pattern does not compile.
    pub fn new(pattern: &str, options: &str) -> Result<Self> {
        let inner = RegexBuilder::new(pattern)
            .case_insensitive(options.contains('i'))
            .multi_line(options.contains('m'))
            .dot_matches_new_line(options.contains('s'))
            .ignore_whitespace(options.contains('x'))
            .build()
            .map_err(|e| Error::invalid_query(format!("invalid regex {}: {}", pattern, e)))?;
        Ok(Self {
            options: options.to_string(),
            inner,
        })
    }

    pub fn source(&self) -> &str {
        self.inner.as_str()
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.inner.is_match(value)
    }
}

impl PartialEq for Regex {
    fn eq(&self, other: &Self) -> bool {
        self.source() == other.source() && self.options == other.options
    }
}
