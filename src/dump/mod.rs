// ABOUTME: Dump document loading and cleaned-artifact persistence
// ABOUTME: Ties the decoder, cleaner and segmenter together for a single dump file

pub mod clean;
pub mod decode;
pub mod segment;

pub use clean::{clean_text, CleanOptions, CleanStats, CleanedLines};
pub use decode::{decode_dump, DecodeOptions, DecodedText, DetectedEncoding};
pub use segment::{segment_lines, segment_text, SegmentMode, Statement};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Decoded and cleaned text of one dump file
///
/// Built once per run from the decoder and cleaner outputs; nothing mutates it
/// afterwards. Holds no null bytes and no BOM.
#[derive(Debug, Clone)]
pub struct DumpDocument {
    source: PathBuf,
    encoding: DetectedEncoding,
    fingerprint: String,
    lines: Vec<String>,
    clean_stats: CleanStats,
}

impl DumpDocument {
    pub fn new(
        source: impl Into<PathBuf>,
        encoding: DetectedEncoding,
        fingerprint: String,
        cleaned: CleanedLines,
    ) -> Self {
        Self {
            source: source.into(),
            encoding,
            fingerprint,
            lines: cleaned.lines,
            clean_stats: cleaned.stats,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn encoding(&self) -> DetectedEncoding {
        self.encoding
    }

    /// SHA-256 of the raw bytes as read from disk
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn clean_stats(&self) -> &CleanStats {
        &self.clean_stats
    }

    pub fn statements(&self, mode: SegmentMode) -> Vec<Statement> {
        segment_lines(&self.lines, mode)
    }
}

/// Hex SHA-256 of a raw dump
pub fn fingerprint(raw: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw);
    format!("{:x}", hasher.finalize())
}

/// Write statements to a cleaned dump artifact, one per line
///
/// A statement whose quoted value spans lines keeps those line breaks.
///
/// The file is written to a temporary sibling and renamed into place, so an
/// interrupted write never leaves a half-written artifact behind.
///
/// # Errors
///
/// Returns an error if the parent directory cannot be created or the file
/// cannot be written.
pub fn write_cleaned_dump(path: &Path, statements: &[Statement]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create output directory {}", parent.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;

    {
        let mut writer = std::io::BufWriter::new(tmp.as_file_mut());
        for statement in statements {
            writeln!(writer, "{};", statement.text)
                .with_context(|| format!("Failed to write cleaned dump {}", path.display()))?;
        }
        writer
            .flush()
            .with_context(|| format!("Failed to flush cleaned dump {}", path.display()))?;
    }

    tmp.persist(path)
        .with_context(|| format!("Failed to persist cleaned dump at {}", path.display()))?;

    tracing::info!(
        "✓ Wrote {} statement(s) to {}",
        statements.len(),
        path.display()
    );

    Ok(())
}
