// ABOUTME: Byte decoder for legacy SQL dumps
// ABOUTME: Handles UTF-16 with and without BOM, embedded null bytes and broken UTF-8

use crate::error::DecodeError;
use encoding_rs::{Encoding, UTF_16BE, UTF_16LE};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of leading bytes inspected when sniffing for BOM-less UTF-16
const UTF16_SNIFF_BYTES: usize = 4096;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Encoding the decoder settled on for a dump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectedEncoding {
    Utf16Le,
    Utf16Be,
    Utf8,
    /// UTF-8 with invalid sequences replaced by U+FFFD
    Utf8Lossy,
}

impl fmt::Display for DetectedEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DetectedEncoding::Utf16Le => "UTF-16LE",
            DetectedEncoding::Utf16Be => "UTF-16BE",
            DetectedEncoding::Utf8 => "UTF-8",
            DetectedEncoding::Utf8Lossy => "UTF-8 (lossy)",
        };
        f.write_str(label)
    }
}

/// Knobs for the decoding strategies
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DecodeOptions {
    /// Try UTF-16 on the untouched buffer before stripping null bytes
    pub try_utf16: bool,
    /// Replace invalid UTF-8 sequences instead of failing
    pub lossy_utf8: bool,
    /// Fail when more than this share of decoded characters are replacements
    pub max_replacement_ratio: f64,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            try_utf16: true,
            lossy_utf8: true,
            max_replacement_ratio: 0.5,
        }
    }
}

/// Text produced by [`decode_dump`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedText {
    pub text: String,
    pub encoding: DetectedEncoding,
    /// Null bytes (or U+0000 characters) removed from the stream
    pub nulls_removed: usize,
    /// Replacement characters introduced by lossy decoding
    pub replaced: usize,
}

/// Decode a raw dump into text that contains no null bytes and no BOM
///
/// Strategy, in order:
/// 1. If the buffer carries a UTF-16 BOM, or shows the alternating-null
///    pattern of ASCII text stored as UTF-16, decode it as UTF-16 first.
///    This must happen before null stripping, which would destroy real
///    UTF-16 text.
/// 2. Otherwise strip every null byte and decode the rest as UTF-8,
///    replacing invalid sequences unless `lossy_utf8` is disabled.
///
/// # Errors
///
/// - [`DecodeError::Empty`] if nothing but null bytes (or nothing at all) was given
/// - [`DecodeError::InvalidUtf8`] if lossy decoding is disabled and the bytes are not UTF-8
/// - [`DecodeError::Undecodable`] if lossy decoding had to replace too much of the input
///
/// # Examples
///
/// ```
/// # use dump_migrate::dump::decode::{decode_dump, DecodeOptions};
/// let raw = b"I\0N\0S\0E\0R\0T\0";
/// let decoded = decode_dump(raw, &DecodeOptions::default()).unwrap();
/// assert_eq!(decoded.text, "INSERT");
/// ```
pub fn decode_dump(raw: &[u8], options: &DecodeOptions) -> Result<DecodedText, DecodeError> {
    if raw.is_empty() {
        return Err(DecodeError::Empty);
    }

    if options.try_utf16 {
        if let Some(decoded) = try_decode_utf16(raw) {
            tracing::debug!("Decoded dump as {}", decoded.encoding);
            return Ok(decoded);
        }
    }

    let mut bytes: Vec<u8> = raw.iter().copied().filter(|b| *b != 0).collect();
    let nulls_removed = raw.len() - bytes.len();
    if nulls_removed > 0 {
        tracing::debug!("Stripped {} null bytes from dump", nulls_removed);
    }

    if bytes.starts_with(UTF8_BOM) {
        bytes.drain(..UTF8_BOM.len());
    }

    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    match String::from_utf8(bytes) {
        Ok(text) => Ok(DecodedText {
            text,
            encoding: DetectedEncoding::Utf8,
            nulls_removed,
            replaced: 0,
        }),
        Err(err) => {
            if !options.lossy_utf8 {
                return Err(DecodeError::InvalidUtf8 {
                    offset: err.utf8_error().valid_up_to(),
                });
            }

            let text = String::from_utf8_lossy(err.as_bytes()).into_owned();
            let total = text.chars().count();
            let replaced = text.chars().filter(|c| *c == char::REPLACEMENT_CHARACTER).count();

            if total == 0 || (replaced as f64 / total as f64) > options.max_replacement_ratio {
                return Err(DecodeError::Undecodable { replaced, total });
            }

            tracing::warn!(
                "Dump is not valid UTF-8; replaced {} invalid sequence(s)",
                replaced
            );

            Ok(DecodedText {
                text,
                encoding: DetectedEncoding::Utf8Lossy,
                nulls_removed,
                replaced,
            })
        }
    }
}

fn try_decode_utf16(raw: &[u8]) -> Option<DecodedText> {
    let (encoding, bom_len) = utf16_candidate(raw)?;

    let decoded = encoding.decode_without_bom_handling_and_without_replacement(&raw[bom_len..])?;

    let before = decoded.chars().count();
    let text: String = decoded.chars().filter(|c| *c != '\0').collect();
    let nulls_removed = before - text.chars().count();

    let detected = if encoding == UTF_16LE {
        DetectedEncoding::Utf16Le
    } else {
        DetectedEncoding::Utf16Be
    };

    Some(DecodedText {
        text,
        encoding: detected,
        nulls_removed,
        replaced: 0,
    })
}

/// Pick a UTF-16 flavour for the buffer, returning the BOM length to skip
fn utf16_candidate(raw: &[u8]) -> Option<(&'static Encoding, usize)> {
    if let Some((encoding, bom_len)) = Encoding::for_bom(raw) {
        if encoding == UTF_16LE || encoding == UTF_16BE {
            return Some((encoding, bom_len));
        }
        return None;
    }

    if raw.len() < 4 || raw.len() % 2 != 0 {
        return None;
    }

    let sample = &raw[..raw.len().min(UTF16_SNIFF_BYTES)];
    let pairs = sample.len() / 2;
    let (mut even_nulls, mut odd_nulls) = (0usize, 0usize);
    for pair in sample.chunks_exact(2) {
        if pair[0] == 0 {
            even_nulls += 1;
        }
        if pair[1] == 0 {
            odd_nulls += 1;
        }
    }

    // ASCII stored as UTF-16 puts a null in every other byte; a few stray
    // nulls in UTF-8 text must not trigger this.
    if odd_nulls * 10 >= pairs * 4 && even_nulls * 20 < pairs {
        Some((UTF_16LE, 0))
    } else if even_nulls * 10 >= pairs * 4 && odd_nulls * 20 < pairs {
        Some((UTF_16BE, 0))
    } else {
        None
    }
}
