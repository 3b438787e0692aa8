// ABOUTME: Line-level cleaner for decoded SQL dumps
// ABOUTME: Drops comments, pragmas and transaction markers and strips dialect-only keywords

use super::segment::{closing_quote, open_quote_after};
use crate::utils::starts_with_keywords;
use serde::{Deserialize, Serialize};

/// Options for the cleaner
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CleanOptions {
    /// Line-comment marker of the source dialect
    pub comment_marker: String,
    /// Keywords removed outright because the target has no equivalent
    pub strip_keywords: Vec<String>,
}

impl Default for CleanOptions {
    fn default() -> Self {
        Self {
            comment_marker: "--".to_string(),
            strip_keywords: vec!["AUTOINCREMENT".to_string()],
        }
    }
}

/// What the cleaner did, line by line
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanStats {
    pub input_lines: usize,
    pub kept_lines: usize,
    pub blank_lines: usize,
    pub comment_lines: usize,
    pub pragma_lines: usize,
    pub transaction_lines: usize,
    pub rewritten_lines: usize,
}

/// Meaningful lines left after cleaning, in input order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanedLines {
    pub lines: Vec<String>,
    pub stats: CleanStats,
}

/// Clean decoded dump text into meaningful lines
///
/// Rules per physical line, in order: trim; drop if empty; drop comments;
/// drop bare `PRAGMA` directives; drop lines that are only a transaction
/// marker; remove dialect-only keywords outside quoted text. Lines are never
/// reordered.
///
/// A line that starts inside a quoted value left open by an earlier line is
/// part of that value and is kept byte for byte.
///
/// # Examples
///
/// ```
/// # use dump_migrate::dump::clean::{clean_text, CleanOptions};
/// let text = "PRAGMA foreign_keys=OFF;\nBEGIN TRANSACTION;\n-- data\nINSERT INTO t VALUES(1);\nCOMMIT;";
/// let cleaned = clean_text(text, &CleanOptions::default());
/// assert_eq!(cleaned.lines, vec!["INSERT INTO t VALUES(1);"]);
/// ```
pub fn clean_text(text: &str, options: &CleanOptions) -> CleanedLines {
    let mut cleaned = CleanedLines::default();
    let mut open_quote: Option<char> = None;

    for piece in text.split_inclusive('\n') {
        cleaned.stats.input_lines += 1;
        let raw_line = piece.strip_suffix('\n').unwrap_or(piece);

        if open_quote.is_some() {
            open_quote = open_quote_after(raw_line, open_quote);
            cleaned.lines.push(raw_line.to_string());
            continue;
        }

        let line = raw_line.trim_start();
        let line = match open_quote_after(line, None) {
            // Trailing whitespace belongs to the value that stays open
            Some(_) => line,
            None => line.trim_end(),
        };

        if line.is_empty() {
            cleaned.stats.blank_lines += 1;
            continue;
        }

        if !options.comment_marker.is_empty() && line.starts_with(&options.comment_marker) {
            cleaned.stats.comment_lines += 1;
            continue;
        }

        if starts_with_keywords(line, &["PRAGMA"]) {
            cleaned.stats.pragma_lines += 1;
            continue;
        }

        if is_transaction_marker(line) {
            cleaned.stats.transaction_lines += 1;
            continue;
        }

        let mut current = line.to_string();
        let mut rewritten = false;
        for keyword in &options.strip_keywords {
            if let Some(stripped) = strip_keyword(&current, keyword) {
                current = stripped;
                rewritten = true;
            }
        }

        if rewritten {
            cleaned.stats.rewritten_lines += 1;
            // A line made only of stripped keywords is now empty
            if current.is_empty() {
                cleaned.stats.blank_lines += 1;
                continue;
            }
        }

        open_quote = open_quote_after(&current, None);
        cleaned.lines.push(current);
    }

    if open_quote.is_some() {
        tracing::warn!("Dump ends inside a quoted value that spans lines");
    }

    cleaned.stats.kept_lines = cleaned.lines.len();

    tracing::debug!(
        "Cleaner kept {} of {} lines ({} comments, {} pragmas, {} transaction markers)",
        cleaned.stats.kept_lines,
        cleaned.stats.input_lines,
        cleaned.stats.comment_lines,
        cleaned.stats.pragma_lines,
        cleaned.stats.transaction_lines
    );

    cleaned
}

/// True when the whole text is a transaction-control marker
///
/// Accepts `BEGIN [DEFERRED|IMMEDIATE|EXCLUSIVE] [TRANSACTION]`,
/// `COMMIT [TRANSACTION]`, `END [TRANSACTION]` and `ROLLBACK [TRANSACTION]`,
/// with or without a trailing `;`, in any case.
pub fn is_transaction_marker(text: &str) -> bool {
    let upper = text.trim().trim_end_matches(';').trim_end().to_ascii_uppercase();
    let words: Vec<&str> = upper.split_whitespace().collect();

    matches!(
        words.as_slice(),
        ["BEGIN"]
            | ["BEGIN", "TRANSACTION"]
            | ["BEGIN", "DEFERRED" | "IMMEDIATE" | "EXCLUSIVE"]
            | ["BEGIN", "DEFERRED" | "IMMEDIATE" | "EXCLUSIVE", "TRANSACTION"]
            | ["COMMIT"]
            | ["COMMIT", "TRANSACTION"]
            | ["END"]
            | ["END", "TRANSACTION"]
            | ["ROLLBACK"]
            | ["ROLLBACK", "TRANSACTION"]
    )
}

/// Remove every whole-word, case-insensitive occurrence of `keyword` that is
/// not inside a quoted literal or identifier. `line` must start outside any
/// quote. Returns `None` when nothing changed.
fn strip_keyword(line: &str, keyword: &str) -> Option<String> {
    let bytes = line.as_bytes();
    let needle = keyword.as_bytes();
    if needle.is_empty() {
        return None;
    }

    let mut out = String::with_capacity(line.len());
    let mut quote: Option<u8> = None;
    let mut copied = 0;
    let mut changed = false;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];

        if let Some(close) = quote {
            if b == close {
                quote = None;
            }
            i += 1;
            continue;
        }

        if let Some(close) = closing_quote(char::from(b)).filter(|_| b.is_ascii()) {
            quote = Some(close as u8);
            i += 1;
            continue;
        }

        let end = i + needle.len();
        let at_word_start = i == 0 || !is_word_byte(bytes[i - 1]);
        if at_word_start
            && end <= bytes.len()
            && bytes[i..end].eq_ignore_ascii_case(needle)
            && (end == bytes.len() || !is_word_byte(bytes[end]))
        {
            out.push_str(line[copied..i].trim_end());
            copied = end;
            changed = true;
            i = end;
            continue;
        }

        i += 1;
    }

    if !changed {
        return None;
    }

    out.push_str(&line[copied..]);
    let out = out.trim_start();
    // A value left open at the end of the line keeps its trailing whitespace
    let out = if quote.is_some() { out } else { out.trim_end() };
    Some(out.to_string())
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}
