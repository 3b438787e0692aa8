// ABOUTME: Post-import verification of row counts and sample rows
// ABOUTME: Records per-table failures without failing the run

use crate::error::{StoreError, VerificationError};
use crate::store::{TargetStore, TextRow};
use crate::utils::{quote_ident, validate_identifier};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Row count a table is expected to have after import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "rows")]
pub enum ExpectedRows {
    /// Only existence and queryability are checked
    #[default]
    Any,
    Exactly(u64),
    AtLeast(u64),
}

impl ExpectedRows {
    pub fn is_satisfied_by(&self, actual: u64) -> bool {
        match self {
            ExpectedRows::Any => true,
            ExpectedRows::Exactly(n) => actual == *n,
            ExpectedRows::AtLeast(n) => actual >= *n,
        }
    }
}

impl fmt::Display for ExpectedRows {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedRows::Any => f.write_str("any"),
            ExpectedRows::Exactly(n) => write!(f, "={}", n),
            ExpectedRows::AtLeast(n) => write!(f, ">={}", n),
        }
    }
}

/// A table that must exist and be queryable after import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableExpectation {
    pub table: String,
    pub expected: ExpectedRows,
    /// Fetch sample rows for a human sanity check
    pub sample: bool,
}

impl TableExpectation {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            expected: ExpectedRows::Any,
            sample: false,
        }
    }

    pub fn with_expected(mut self, expected: ExpectedRows) -> Self {
        self.expected = expected;
        self
    }

    pub fn with_sample(mut self, sample: bool) -> Self {
        self.sample = sample;
        self
    }
}

impl FromStr for TableExpectation {
    type Err = anyhow::Error;

    /// Parse `table`, `table=N` or `table>=N`
    ///
    /// ```
    /// # use dump_migrate::verify::{ExpectedRows, TableExpectation};
    /// let e: TableExpectation = "users>=10".parse().unwrap();
    /// assert_eq!(e.table, "users");
    /// assert_eq!(e.expected, ExpectedRows::AtLeast(10));
    /// ```
    fn from_str(s: &str) -> Result<Self> {
        let entry = s.trim();

        let (table, expected) = if let Some((table, rows)) = entry.split_once(">=") {
            (table, ExpectedRows::AtLeast(parse_rows(rows, entry)?))
        } else if let Some((table, rows)) = entry.split_once('=') {
            (table, ExpectedRows::Exactly(parse_rows(rows, entry)?))
        } else {
            (entry, ExpectedRows::Any)
        };

        let table = table.trim();
        validate_identifier(table)
            .with_context(|| format!("Invalid table in verification list: '{}'", entry))?;

        Ok(TableExpectation::new(table).with_expected(expected))
    }
}

fn parse_rows(rows: &str, entry: &str) -> Result<u64> {
    rows.trim()
        .parse::<u64>()
        .with_context(|| format!("Invalid row count in '{}'", entry))
}

/// Parse a comma-separated table list such as `users=3,posts>=1,audit`
///
/// Tables named in `sample_tables` get sample rows.
pub fn parse_table_list(list: &str, sample_tables: &[String]) -> Result<Vec<TableExpectation>> {
    let mut expectations = Vec::new();

    for entry in list.split(',').filter(|e| !e.trim().is_empty()) {
        let expectation: TableExpectation = entry.parse()?;
        if expectations
            .iter()
            .any(|e: &TableExpectation| e.table.eq_ignore_ascii_case(&expectation.table))
        {
            bail!("Table '{}' is listed more than once", expectation.table);
        }
        expectations.push(expectation);
    }

    if expectations.is_empty() {
        bail!("Verification table list is empty");
    }

    for expectation in expectations.iter_mut() {
        expectation.sample = sample_tables
            .iter()
            .any(|t| t.trim().eq_ignore_ascii_case(&expectation.table));
    }

    Ok(expectations)
}

/// Overall verdict for one table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerificationStatus {
    Ok,
    Mismatch,
    Error,
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationStatus::Ok => f.write_str("ok"),
            VerificationStatus::Mismatch => f.write_str("MISMATCH"),
            VerificationStatus::Error => f.write_str("ERROR"),
        }
    }
}

/// Verification result for one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableVerification {
    pub table: String,
    pub expected: ExpectedRows,
    pub actual_rows: Option<u64>,
    pub sample_rows: Vec<TextRow>,
    pub error: Option<VerificationError>,
}

impl TableVerification {
    pub fn status(&self) -> VerificationStatus {
        match (self.actual_rows, &self.error) {
            (_, Some(_)) | (None, None) => VerificationStatus::Error,
            (Some(actual), None) if self.expected.is_satisfied_by(actual) => VerificationStatus::Ok,
            (Some(_), None) => VerificationStatus::Mismatch,
        }
    }
}

/// Verifier settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyOptions {
    /// Upper bound for each verification query
    pub query_timeout: Duration,
    /// Rows fetched for each sampled table
    pub sample_size: usize,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(30),
            sample_size: 3,
        }
    }
}

/// Read-only checks against the target after import
pub struct Verifier<'a> {
    store: &'a mut dyn TargetStore,
    options: VerifyOptions,
}

impl<'a> Verifier<'a> {
    pub fn new(store: &'a mut dyn TargetStore, options: VerifyOptions) -> Self {
        Self { store, options }
    }

    /// Check every expectation in order
    ///
    /// A table that is missing or cannot be queried is recorded as an error
    /// for that table only; the remaining tables are still checked.
    ///
    /// Names are matched against the target's tables without regard to case,
    /// so `Users` finds a PostgreSQL table stored as `users`. An exact match
    /// wins, and an ambiguous name is queried as given.
    pub async fn verify(&mut self, expectations: &[TableExpectation]) -> Vec<TableVerification> {
        let mut results = Vec::with_capacity(expectations.len());
        let known = match self.store.list_tables().await {
            Ok(tables) => tables,
            Err(e) => {
                tracing::debug!("Could not list target tables; using names as given: {}", e);
                Vec::new()
            }
        };

        for expectation in expectations {
            let table = resolve_table(&known, &expectation.table);
            if table != expectation.table {
                tracing::debug!("Verifying '{}' as target table '{}'", expectation.table, table);
            }
            let result = self.verify_one(expectation, table).await;
            match result.status() {
                VerificationStatus::Ok => tracing::info!(
                    "  ✓ {}: {} row(s)",
                    result.table,
                    result.actual_rows.unwrap_or_default()
                ),
                VerificationStatus::Mismatch => tracing::warn!(
                    "  ✗ {}: {} row(s), expected {}",
                    result.table,
                    result.actual_rows.unwrap_or_default(),
                    result.expected
                ),
                VerificationStatus::Error => tracing::warn!(
                    "  ✗ {}: {}",
                    result.table,
                    result
                        .error
                        .as_ref()
                        .map(|e| e.message.as_str())
                        .unwrap_or("no result")
                ),
            }
            results.push(result);
        }

        results
    }

    /// Build expectations for every table present in the target
    ///
    /// # Errors
    ///
    /// Returns [`VerificationError`] when the target cannot list its tables.
    pub async fn discover(&mut self, sample: bool) -> Result<Vec<TableExpectation>, VerificationError> {
        let tables = self.store.list_tables().await.map_err(|e| VerificationError {
            table: "*".to_string(),
            message: format!("could not list tables: {}", e),
        })?;

        tracing::info!("Discovered {} table(s) in target", tables.len());

        Ok(tables
            .into_iter()
            .map(|table| TableExpectation::new(table).with_sample(sample))
            .collect())
    }

    async fn verify_one(
        &mut self,
        expectation: &TableExpectation,
        target_table: &str,
    ) -> TableVerification {
        let mut result = TableVerification {
            table: expectation.table.clone(),
            expected: expectation.expected,
            actual_rows: None,
            sample_rows: Vec::new(),
            error: None,
        };
        let fail = |message: String| VerificationError {
            table: expectation.table.clone(),
            message,
        };

        if let Err(e) = validate_identifier(target_table) {
            result.error = Some(fail(e.to_string()));
            return result;
        }

        let table = quote_ident(target_table);

        let count_rows = match self.run_query(&format!("SELECT COUNT(*) FROM {}", table)).await {
            Ok(rows) => rows,
            Err(e) => {
                result.error = Some(fail(e.to_string()));
                return result;
            }
        };

        match count_rows.first().and_then(TextRow::first).map(str::parse::<u64>) {
            Some(Ok(count)) => result.actual_rows = Some(count),
            _ => {
                result.error = Some(fail("unexpected COUNT(*) result".to_string()));
                return result;
            }
        }

        if expectation.sample && self.options.sample_size > 0 {
            let sql = format!("SELECT * FROM {} LIMIT {}", table, self.options.sample_size);
            match self.run_query(&sql).await {
                Ok(rows) => result.sample_rows = rows,
                Err(e) => result.error = Some(fail(format!("sample query failed: {}", e))),
            }
        }

        result
    }

    async fn run_query(&mut self, sql: &str) -> Result<Vec<TextRow>, StoreError> {
        let timeout = self.options.query_timeout;
        if timeout.is_zero() {
            return self.store.query(sql).await;
        }

        match tokio::time::timeout(timeout, self.store.query(sql)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(timeout)),
        }
    }
}

/// Spelling of `name` as the target stores it
fn resolve_table<'n>(known: &'n [String], name: &'n str) -> &'n str {
    if known.iter().any(|t| t == name) {
        return name;
    }

    let mut matches = known.iter().filter(|t| t.eq_ignore_ascii_case(name));
    match (matches.next(), matches.next()) {
        (Some(only), None) => only,
        _ => name,
    }
}
