// ABOUTME: Splits cleaned dump lines into discrete SQL statements
// ABOUTME: Offers the legacy semicolon split and a quote-aware scanner

use serde::{Deserialize, Serialize};
use std::fmt;

/// One SQL unit extracted from a dump
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statement {
    /// 1-based position among the statements of the document
    pub ordinal: usize,
    /// Trimmed statement text without the terminating `;`
    pub text: String,
}

impl Statement {
    pub fn new(ordinal: usize, text: impl Into<String>) -> Self {
        Self {
            ordinal,
            text: text.into(),
        }
    }
}

/// How statement boundaries are found
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SegmentMode {
    /// Never split inside quoted literals or identifiers
    #[default]
    QuoteAware,
    /// Split on every `;`, even inside string literals
    Naive,
}

impl fmt::Display for SegmentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentMode::QuoteAware => f.write_str("quote-aware"),
            SegmentMode::Naive => f.write_str("naive"),
        }
    }
}

/// Join cleaned lines and split them into statements
///
/// Every non-empty fragment, trimmed, becomes a [`Statement`] whose ordinal is
/// its 1-based position among the non-empty fragments.
///
/// In [`SegmentMode::Naive`] a `;` inside a string literal ends the statement
/// early. The resulting broken statements fail at execution time and are
/// reported individually.
///
/// # Examples
///
/// ```
/// # use dump_migrate::dump::segment::{segment_lines, SegmentMode};
/// let lines = vec!["INSERT INTO t VALUES (1);INSERT INTO t VALUES (2);".to_string()];
/// let statements = segment_lines(&lines, SegmentMode::QuoteAware);
/// assert_eq!(statements.len(), 2);
/// assert_eq!(statements[1].ordinal, 2);
/// ```
pub fn segment_lines(lines: &[String], mode: SegmentMode) -> Vec<Statement> {
    let text = lines.join("\n");
    segment_text(&text, mode)
}

/// Split already joined text into statements
pub fn segment_text(text: &str, mode: SegmentMode) -> Vec<Statement> {
    let fragments = match mode {
        SegmentMode::Naive => text.split(';').collect::<Vec<_>>(),
        SegmentMode::QuoteAware => split_quote_aware(text),
    };

    fragments
        .into_iter()
        .map(str::trim)
        .filter(|fragment| !fragment.is_empty())
        .enumerate()
        .map(|(index, fragment)| Statement::new(index + 1, fragment))
        .collect()
}

/// Single-pass scanner that only treats `;` as a terminator outside quotes
///
/// Tracks `'string'` literals (where `''` is an escaped quote, handled by
/// closing and immediately reopening), `"identifiers"`, `` `identifiers` ``
/// and `[identifiers]`. The source dialect has no backslash escapes, so a
/// backslash is an ordinary character. An unterminated quote runs to the end
/// of the text and the remainder becomes the last fragment.
fn split_quote_aware(text: &str) -> Vec<&str> {
    let mut fragments = Vec::new();
    let mut closing: Option<char> = None;
    let mut start = 0;

    for (i, c) in text.char_indices() {
        match closing {
            Some(close) => {
                if c == close {
                    closing = None;
                }
            }
            None if c == ';' => {
                fragments.push(&text[start..i]);
                start = i + 1;
            }
            None => closing = closing_quote(c),
        }
    }

    if closing.is_some() {
        tracing::warn!("Dump ends inside an unterminated quoted literal");
    }

    fragments.push(&text[start..]);
    fragments
}

/// Character that closes the quote opened by `c`, if `c` opens one
pub(crate) fn closing_quote(c: char) -> Option<char> {
    match c {
        '\'' | '"' | '`' => Some(c),
        '[' => Some(']'),
        _ => None,
    }
}

/// Quote still open after `line`, given the one open before it
pub(crate) fn open_quote_after(line: &str, mut open: Option<char>) -> Option<char> {
    for c in line.chars() {
        match open {
            Some(close) => {
                if c == close {
                    open = None;
                }
            }
            None => open = closing_quote(c),
        }
    }
    open
}
