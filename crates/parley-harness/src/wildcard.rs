//! `*` wildcard patterns over engine output.
//!
//! A pattern is a sequence of literal segments separated by `*`; each `*`
//! matches zero or more characters, line breaks included. Everything else is
//! literal, so engine output full of brackets and dots needs no escaping.

use std::fmt;

use regex::Regex;

/// A compiled wildcard pattern.
#[derive(Debug, Clone)]
pub struct WildcardPattern {
    source: String,
    /// Whole-text match, used for single strings.
    exact: Regex,
    /// Match that must start at a line boundary and end at the end of text.
    trailing: Regex,
}

impl WildcardPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        Ok(Self {
            source: pattern.to_string(),
            exact: Regex::new(&format!(r"(?s)\A{body}\z"))?,
            trailing: Regex::new(&format!(r"(?s)(?:\A|\n){body}\z"))?,
        })
    }

    /// Whether the whole of `text` matches.
    pub fn matches(&self, text: &str) -> bool {
        self.exact.is_match(text)
    }

    /// Whether some run of whole lines at the end of `text` matches.
    ///
    /// `text` is a `\n`-joined block of lines. The match has to begin at the
    /// start of one of those lines and extend to the end of the last one, so
    /// a pattern like `Nodes searched  :*` is satisfied by the newest line
    /// alone while `* score mate 1 * pv d5e6` may swallow earlier lines too.
    pub fn matches_trailing_lines(&self, text: &str) -> bool {
        self.trailing.is_match(text)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for WildcardPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
