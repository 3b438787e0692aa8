// ABOUTME: Loads migration settings from an optional TOML file
// ABOUTME: Merges file values with command-line overrides into one MigrationConfig

use crate::classify::TableFilter;
use crate::dump::{CleanOptions, DecodeOptions, SegmentMode};
use crate::import::{FailurePolicy, ImportOptions};
use crate::utils::validate_identifier;
use crate::verify::{parse_table_list, ExpectedRows, TableExpectation, VerifyOptions};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Settings file as written by the operator
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub target: Option<String>,
    #[serde(default)]
    pub decode: DecodeOptions,
    #[serde(default)]
    pub clean: CleanOptions,
    #[serde(default)]
    pub import: ImportSection,
    #[serde(default)]
    pub verify: VerifySection,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImportSection {
    pub segmenter: SegmentMode,
    pub on_error: FailurePolicy,
    pub statement_timeout_secs: u64,
    pub progress_every: usize,
    pub include_tables: Option<Vec<String>>,
    pub exclude_tables: Option<Vec<String>>,
}

impl Default for ImportSection {
    fn default() -> Self {
        let defaults = ImportOptions::default();
        Self {
            segmenter: SegmentMode::default(),
            on_error: defaults.failure_policy,
            statement_timeout_secs: defaults.statement_timeout.as_secs(),
            progress_every: defaults.progress_every,
            include_tables: None,
            exclude_tables: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerifySection {
    pub query_timeout_secs: u64,
    pub sample_size: usize,
    pub discover: bool,
    pub tables: Vec<TableEntry>,
}

impl Default for VerifySection {
    fn default() -> Self {
        let defaults = VerifyOptions::default();
        Self {
            query_timeout_secs: defaults.query_timeout.as_secs(),
            sample_size: defaults.sample_size,
            discover: false,
            tables: Vec::new(),
        }
    }
}

/// One `[[verify.tables]]` entry
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableEntry {
    pub name: String,
    /// Exact row count
    pub rows: Option<u64>,
    /// Minimum row count
    pub min_rows: Option<u64>,
    #[serde(default)]
    pub sample: bool,
}

impl TableEntry {
    fn to_expectation(&self) -> Result<TableExpectation> {
        validate_identifier(&self.name)
            .with_context(|| format!("Invalid table in [[verify.tables]]: '{}'", self.name))?;

        let expected = match (self.rows, self.min_rows) {
            (Some(_), Some(_)) => bail!(
                "Table '{}' sets both rows and min_rows; pick one",
                self.name
            ),
            (Some(n), None) => ExpectedRows::Exactly(n),
            (None, Some(n)) => ExpectedRows::AtLeast(n),
            (None, None) => ExpectedRows::Any,
        };

        Ok(TableExpectation::new(self.name.trim())
            .with_expected(expected)
            .with_sample(self.sample))
    }
}

/// Load and parse a TOML settings file
pub fn load_config_file(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    toml::from_str(&raw)
        .with_context(|| format!("Failed to parse TOML config at {}", path.display()))
}

/// Values given on the command line; `None` keeps the file or default value
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub target: Option<String>,
    pub segmenter: Option<SegmentMode>,
    pub on_error: Option<FailurePolicy>,
    pub statement_timeout_secs: Option<u64>,
    pub progress_every: Option<usize>,
    pub include_tables: Option<Vec<String>>,
    pub exclude_tables: Option<Vec<String>>,
    /// Comma-separated `table`, `table=N` or `table>=N` entries
    pub verify_tables: Option<String>,
    pub sample_tables: Option<Vec<String>>,
    pub sample_size: Option<usize>,
    pub discover: bool,
}

/// Everything a pipeline run needs, resolved once at startup
///
/// Passed by value into the pipeline; nothing reads settings from
/// process-wide state.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Raw target descriptor, parsed when the target is opened
    pub target: Option<String>,
    pub decode: DecodeOptions,
    pub clean: CleanOptions,
    pub segment_mode: SegmentMode,
    pub filter: TableFilter,
    pub import: ImportOptions,
    pub verify: VerifyOptions,
    pub expectations: Vec<TableExpectation>,
    /// Verify every table found in the target
    pub discover: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            target: None,
            decode: DecodeOptions::default(),
            clean: CleanOptions::default(),
            segment_mode: SegmentMode::default(),
            filter: TableFilter::default(),
            import: ImportOptions::default(),
            verify: VerifyOptions::default(),
            expectations: Vec::new(),
            discover: false,
        }
    }
}

impl MigrationConfig {
    /// Merge an optional settings file with command-line overrides
    ///
    /// # Errors
    ///
    /// Returns an error when a value is out of range, a table name is not a
    /// valid identifier, or the table filters contradict each other.
    pub fn resolve(file: Option<FileConfig>, overrides: Overrides) -> Result<Self> {
        let file = file.unwrap_or_default();

        let decode = file.decode;
        if !(0.0..=1.0).contains(&decode.max_replacement_ratio) {
            bail!(
                "decode.max_replacement_ratio must be between 0 and 1 (got {})",
                decode.max_replacement_ratio
            );
        }

        let statement_timeout_secs = overrides
            .statement_timeout_secs
            .unwrap_or(file.import.statement_timeout_secs);
        let import = ImportOptions {
            statement_timeout: Duration::from_secs(statement_timeout_secs),
            progress_every: overrides
                .progress_every
                .unwrap_or(file.import.progress_every),
            failure_policy: overrides.on_error.unwrap_or(file.import.on_error),
        };

        let filter = TableFilter::new(
            overrides.include_tables.or(file.import.include_tables),
            overrides.exclude_tables.or(file.import.exclude_tables),
        )?;

        let sample_size = overrides.sample_size.unwrap_or(file.verify.sample_size);
        if sample_size > 1000 {
            bail!("verify.sample_size must be at most 1000 (got {})", sample_size);
        }
        let verify = VerifyOptions {
            query_timeout: Duration::from_secs(file.verify.query_timeout_secs),
            sample_size,
        };

        let sample_tables = overrides.sample_tables.unwrap_or_default();
        let mut expectations = match overrides.verify_tables {
            Some(ref list) => parse_table_list(list, &sample_tables)?,
            None => file
                .verify
                .tables
                .iter()
                .map(TableEntry::to_expectation)
                .collect::<Result<Vec<_>>>()?,
        };
        for expectation in expectations.iter_mut() {
            if sample_tables
                .iter()
                .any(|t| t.trim().eq_ignore_ascii_case(&expectation.table))
            {
                expectation.sample = true;
            }
        }

        Ok(Self {
            target: overrides.target.or(file.target),
            decode,
            clean: file.clean,
            segment_mode: overrides.segmenter.unwrap_or(file.import.segmenter),
            filter,
            import,
            verify,
            expectations,
            discover: overrides.discover || file.verify.discover,
        })
    }
}
