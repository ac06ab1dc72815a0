//! Resilient CSV parser
//!
//! Each discovered file is read into a [`TextTable`] independently:
//!
//! 1. decode the bytes with the primary encoding;
//! 2. on a decode failure, decode again with the fallback encoding;
//! 3. parse the decoded text as delimited records, all fields kept as text.
//!
//! A file that cannot be read, decoded under either encoding, or parsed is
//! reported as [`FileOutcome::Skipped`] and the remaining files still load.

use encoding_rs::{DecoderResult, Encoding};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tabload_common::{Result, TabloadError};
use tracing::{info, warn};

use crate::config::ParserConfig;
use crate::table::{Row, TextTable};

/// Text encoding of a source file
///
/// `encoding_rs` implements the WHATWG encodings, where `latin1` and
/// `iso-8859-1` are labels of windows-1252. [`SourceEncoding::Latin1`] is the
/// exact ISO-8859-1 mapping instead: every byte becomes the code point of the
/// same value, so 0x80..=0x9F decode to C1 controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEncoding {
    Latin1,
    Whatwg(&'static Encoding),
}

const LATIN1_LABELS: [&str; 7] = [
    "latin1",
    "latin-1",
    "latin_1",
    "l1",
    "iso-8859-1",
    "iso8859-1",
    "iso_8859-1",
];

impl SourceEncoding {
    /// Resolve a label: the ISO-8859-1 aliases, then any WHATWG label (`utf-8`, `cp1252`, ...)
    pub fn for_label(label: &str) -> Result<Self> {
        let normalized = label.trim().to_ascii_lowercase();
        if LATIN1_LABELS.contains(&normalized.as_str()) {
            return Ok(SourceEncoding::Latin1);
        }
        Encoding::for_label(normalized.as_bytes())
            .map(SourceEncoding::Whatwg)
            .ok_or_else(|| TabloadError::UnknownEncoding(label.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            SourceEncoding::Latin1 => "ISO-8859-1",
            SourceEncoding::Whatwg(encoding) => encoding.name(),
        }
    }
}

impl From<&'static Encoding> for SourceEncoding {
    fn from(encoding: &'static Encoding) -> Self {
        SourceEncoding::Whatwg(encoding)
    }
}

impl fmt::Display for SourceEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolved parser settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserSettings {
    pub primary: SourceEncoding,
    pub fallback: SourceEncoding,
    pub delimiter: u8,
}

impl ParserSettings {
    pub fn from_config(config: &ParserConfig) -> Result<Self> {
        Ok(Self {
            primary: SourceEncoding::for_label(&config.primary_encoding)?,
            fallback: SourceEncoding::for_label(&config.fallback_encoding)?,
            delimiter: config.delimiter,
        })
    }

    /// Encodings in the order they are attempted, without repeats
    fn attempts(&self) -> Vec<SourceEncoding> {
        if self.primary == self.fallback {
            vec![self.primary]
        } else {
            vec![self.primary, self.fallback]
        }
    }
}

impl Default for ParserSettings {
    fn default() -> Self {
        Self {
            primary: SourceEncoding::Latin1,
            fallback: SourceEncoding::Whatwg(encoding_rs::UTF_8),
            delimiter: b',',
        }
    }
}

/// A file that parsed
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub path: PathBuf,
    /// Encoding that decoded the file
    pub encoding: SourceEncoding,
    pub table: TextTable,
}

/// One failed decode attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeFailure {
    pub encoding: &'static str,
    /// Byte offset of the first malformed sequence
    pub offset: usize,
}

impl fmt::Display for DecodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed at byte {}", self.encoding, self.offset)
    }
}

/// Why a file was skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Unreadable(String),
    /// Every configured encoding failed
    Undecodable(Vec<DecodeFailure>),
    /// Decoded, but not a well-formed delimited file
    Malformed {
        encoding: &'static str,
        message: String,
    },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Unreadable(e) => write!(f, "unreadable: {}", e),
            SkipReason::Undecodable(failures) => {
                let attempts: Vec<String> = failures.iter().map(ToString::to_string).collect();
                write!(f, "undecodable ({})", attempts.join("; "))
            },
            SkipReason::Malformed { encoding, message } => {
                write!(f, "malformed as {}: {}", encoding, message)
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: SkipReason,
}

/// Per-file parse result
#[derive(Debug, Clone)]
pub enum FileOutcome {
    Parsed(ParsedFile),
    Skipped(SkippedFile),
}

/// Aggregate over all candidate files of one load
#[derive(Debug, Clone, Default)]
pub struct ParseReport {
    pub parsed: Vec<ParsedFile>,
    pub skipped: Vec<SkippedFile>,
}

impl ParseReport {
    /// True when no file parsed; the load must not touch the database
    pub fn is_empty(&self) -> bool {
        self.parsed.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.parsed.iter().map(|p| p.table.row_count()).sum()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    /// Union of all parsed tables in file order
    pub fn into_table(self) -> TextTable {
        TextTable::concat(self.parsed.into_iter().map(|p| p.table))
    }
}

impl FromIterator<FileOutcome> for ParseReport {
    fn from_iter<I: IntoIterator<Item = FileOutcome>>(iter: I) -> Self {
        let mut report = ParseReport::default();
        for outcome in iter {
            match outcome {
                FileOutcome::Parsed(file) => report.parsed.push(file),
                FileOutcome::Skipped(file) => report.skipped.push(file),
            }
        }
        report
    }
}

/// Reads source files with encoding fallback and per-file failure isolation
#[derive(Debug, Clone, Copy, Default)]
pub struct ResilientParser {
    settings: ParserSettings,
}

impl ResilientParser {
    pub fn new(settings: ParserSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ParserSettings {
        &self.settings
    }

    /// Parse every file, skipping the ones that fail
    pub fn parse_all(&self, files: &[PathBuf]) -> ParseReport {
        files.iter().map(|path| self.parse_file(path)).collect()
    }

    /// Parse a single file
    pub fn parse_file(&self, path: &Path) -> FileOutcome {
        info!("Reading file: {}", path.display());

        let outcome = match std::fs::read(path) {
            Ok(bytes) => self.parse_bytes(path, &bytes),
            Err(e) => Err(SkipReason::Unreadable(e.to_string())),
        };

        match outcome {
            Ok(parsed) => {
                info!(
                    encoding = %parsed.encoding,
                    "Successfully loaded {} rows from {}",
                    parsed.table.row_count(),
                    file_name(path)
                );
                FileOutcome::Parsed(parsed)
            },
            Err(reason) => {
                warn!(path = %path.display(), reason = %reason, "Error reading file, skipping");
                FileOutcome::Skipped(SkippedFile {
                    path: path.to_path_buf(),
                    reason,
                })
            },
        }
    }

    fn parse_bytes(&self, path: &Path, bytes: &[u8]) -> std::result::Result<ParsedFile, SkipReason> {
        let mut failures = Vec::new();

        for encoding in self.settings.attempts() {
            let text = match decode(encoding, bytes) {
                Ok(text) => text,
                Err(offset) => {
                    let failure = DecodeFailure {
                        encoding: encoding.name(),
                        offset,
                    };
                    info!(path = %path.display(), "{} decoding failed at byte {}", failure.encoding, offset);
                    failures.push(failure);
                    continue;
                },
            };

            // Structural errors do not improve under another encoding
            let table = parse_delimited(&text, self.settings.delimiter).map_err(|message| {
                SkipReason::Malformed {
                    encoding: encoding.name(),
                    message,
                }
            })?;

            return Ok(ParsedFile {
                path: path.to_path_buf(),
                encoding,
                table,
            });
        }

        Err(SkipReason::Undecodable(failures))
    }
}

/// Strictly decode `bytes`, returning the offset of the first malformed sequence
///
/// ISO-8859-1 maps every byte and never fails. A leading UTF-8 BOM is dropped
/// for the WHATWG encodings.
pub fn decode(encoding: SourceEncoding, bytes: &[u8]) -> std::result::Result<String, usize> {
    match encoding {
        SourceEncoding::Latin1 => Ok(encoding_rs::mem::decode_latin1(bytes).into_owned()),
        SourceEncoding::Whatwg(encoding) => decode_strict(encoding, bytes),
    }
}

fn decode_strict(encoding: &'static Encoding, bytes: &[u8]) -> std::result::Result<String, usize> {
    let mut decoder = encoding.new_decoder_without_bom_handling();
    let mut text = String::new();
    let mut consumed = 0;

    loop {
        let remaining = &bytes[consumed..];
        let needed = decoder
            .max_utf8_buffer_length_without_replacement(remaining.len())
            .unwrap_or(remaining.len().saturating_mul(3));
        text.reserve(needed);

        let (result, read) = decoder.decode_to_string_without_replacement(remaining, &mut text, true);
        consumed += read;

        match result {
            DecoderResult::InputEmpty => break,
            DecoderResult::OutputFull => continue,
            DecoderResult::Malformed(bad, after) => {
                return Err(consumed - usize::from(bad) - usize::from(after));
            },
        }
    }

    if let Some(stripped) = text.strip_prefix('\u{feff}') {
        text = stripped.to_string();
    }

    Ok(text)
}

/// Parse decoded text into a table with normalized headers
fn parse_delimited(text: &str, delimiter: u8) -> std::result::Result<TextTable, String> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader.headers().map_err(|e| e.to_string())?.clone();
    if headers.is_empty() {
        return Err("missing header row".to_string());
    }
    let columns = normalize_headers(headers.iter());

    let mut rows: Vec<Row> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| e.to_string())?;
        if record.len() > columns.len() {
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            return Err(format!(
                "expected {} fields in line {}, saw {}",
                columns.len(),
                line,
                record.len()
            ));
        }
        rows.push(
            record
                .iter()
                .map(|field| (!field.is_empty()).then(|| field.to_string()))
                .collect(),
        );
    }

    Ok(TextTable::new(columns, rows))
}

/// Fill blank header names and disambiguate duplicates (`a`, `a.1`, `a.2`)
fn normalize_headers<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut columns = Vec::new();

    for (index, name) in raw.enumerate() {
        let base = if name.trim().is_empty() {
            format!("Unnamed: {}", index)
        } else {
            name.to_string()
        };

        let mut candidate = base.clone();
        let mut suffix = 1;
        while seen.contains(&candidate) {
            candidate = format!("{}.{}", base, suffix);
            suffix += 1;
        }

        seen.insert(candidate.clone());
        columns.push(candidate);
    }

    columns
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
