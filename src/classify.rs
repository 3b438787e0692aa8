// ABOUTME: Statement classification and execution eligibility
// ABOUTME: Labels statements by leading keyword and applies table include/exclude rules

use crate::dump::clean::is_transaction_marker;
use crate::dump::Statement;
use crate::utils::starts_with_keywords;
use anyhow::{bail, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Tables excluded unless the operator says otherwise. `sqlite_sequence`
/// is the source engine's internal autoincrement ledger; the target never has it.
pub const DEFAULT_EXCLUDED_TABLES: &[&str] = &["sqlite_sequence"];

/// Kind of a statement, decided by its leading keywords
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatementKind {
    SchemaDdl,
    DataDml,
    TransactionControl,
    Unknown,
}

impl StatementKind {
    /// Classify statement text by its leading keywords
    ///
    /// ```
    /// # use dump_migrate::classify::StatementKind;
    /// assert_eq!(StatementKind::of("CREATE TABLE x (id INT);"), StatementKind::SchemaDdl);
    /// assert_eq!(StatementKind::of("INSERT INTO x VALUES (1);"), StatementKind::DataDml);
    /// assert_eq!(StatementKind::of("COMMIT"), StatementKind::TransactionControl);
    /// assert_eq!(StatementKind::of("DELETE FROM x"), StatementKind::Unknown);
    /// ```
    pub fn of(text: &str) -> Self {
        if starts_with_keywords(text, &["CREATE", "TABLE"])
            || starts_with_keywords(text, &["CREATE", "INDEX"])
            || starts_with_keywords(text, &["CREATE", "UNIQUE", "INDEX"])
        {
            StatementKind::SchemaDdl
        } else if starts_with_keywords(text, &["INSERT", "INTO"]) {
            StatementKind::DataDml
        } else if is_transaction_marker(text) {
            StatementKind::TransactionControl
        } else {
            StatementKind::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::SchemaDdl => "schema-ddl",
            StatementKind::DataDml => "data-dml",
            StatementKind::TransactionControl => "transaction-control",
            StatementKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a statement will not be executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "reason", content = "table")]
pub enum SkipReason {
    /// Schema is materialized by the target's own migrations
    SchemaDefinition,
    /// The pipeline keeps its own commit discipline
    TransactionControl,
    Unrecognized,
    ExcludedTable(String),
    NotIncluded(String),
}

/// Classifier verdict for one statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: StatementKind,
    /// Target table of a data statement, when it could be read
    pub table: Option<String>,
    pub skip: Option<SkipReason>,
}

impl Classification {
    pub fn is_eligible(&self) -> bool {
        self.skip.is_none()
    }
}

/// Statement counts per kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindCounts {
    pub schema_ddl: usize,
    pub data_dml: usize,
    pub transaction_control: usize,
    pub unknown: usize,
}

impl KindCounts {
    pub fn record(&mut self, kind: StatementKind) {
        match kind {
            StatementKind::SchemaDdl => self.schema_ddl += 1,
            StatementKind::DataDml => self.data_dml += 1,
            StatementKind::TransactionControl => self.transaction_control += 1,
            StatementKind::Unknown => self.unknown += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.schema_ddl + self.data_dml + self.transaction_control + self.unknown
    }
}

/// Table include/exclude rules for data statements
///
/// Matching is case-insensitive. An empty include list means every table not
/// excluded is allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFilter {
    include: Option<BTreeSet<String>>,
    exclude: BTreeSet<String>,
}

impl Default for TableFilter {
    fn default() -> Self {
        Self {
            include: None,
            exclude: DEFAULT_EXCLUDED_TABLES
                .iter()
                .map(|t| t.to_string())
                .collect(),
        }
    }
}

impl TableFilter {
    /// Creates a filter from CLI or config lists
    ///
    /// `exclude_tables` replaces the default exclusion list when given.
    pub fn new(
        include_tables: Option<Vec<String>>,
        exclude_tables: Option<Vec<String>>,
    ) -> Result<Self> {
        let include = match include_tables {
            Some(tables) => Some(normalize_tables(tables, "--include-tables")?),
            None => None,
        };

        let exclude = match exclude_tables {
            Some(tables) => normalize_tables(tables, "--exclude-tables")?,
            None => TableFilter::default().exclude,
        };

        if let Some(ref include) = include {
            if let Some(both) = include.iter().find(|t| exclude.contains(*t)) {
                bail!(
                    "Table '{}' is both included and excluded; pick one",
                    both
                );
            }
        }

        Ok(Self { include, exclude })
    }

    /// Check whether rows for `table` may be imported
    pub fn check(&self, table: &str) -> Option<SkipReason> {
        let key = table.to_lowercase();
        if self.exclude.contains(&key) {
            return Some(SkipReason::ExcludedTable(table.to_string()));
        }
        if let Some(ref include) = self.include {
            if !include.contains(&key) {
                return Some(SkipReason::NotIncluded(table.to_string()));
            }
        }
        None
    }
}

fn normalize_tables(tables: Vec<String>, flag: &str) -> Result<BTreeSet<String>> {
    let mut set = BTreeSet::new();
    for table in tables {
        let trimmed = table.trim();
        if trimmed.is_empty() {
            bail!("{} contains an empty table name", flag);
        }
        set.insert(trimmed.to_lowercase());
    }
    Ok(set)
}

/// Decides kind and eligibility of each statement
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    filter: TableFilter,
}

impl Classifier {
    pub fn new(filter: TableFilter) -> Self {
        Self { filter }
    }

    /// Classify one statement
    ///
    /// Only data statements are ever eligible; schema, transaction-control and
    /// unknown statements are skipped. Unknown statements are logged as
    /// warnings, not errors.
    pub fn classify(&self, statement: &Statement) -> Classification {
        let kind = StatementKind::of(&statement.text);

        match kind {
            StatementKind::DataDml => {
                let table = insert_target_table(&statement.text);
                let skip = table.as_deref().and_then(|t| self.filter.check(t));
                Classification { kind, table, skip }
            }
            StatementKind::SchemaDdl => Classification {
                kind,
                table: None,
                skip: Some(SkipReason::SchemaDefinition),
            },
            StatementKind::TransactionControl => Classification {
                kind,
                table: None,
                skip: Some(SkipReason::TransactionControl),
            },
            StatementKind::Unknown => {
                tracing::warn!(
                    "Skipping unrecognized statement #{}: {}",
                    statement.ordinal,
                    crate::utils::truncate_for_display(&statement.text, 80)
                );
                Classification {
                    kind,
                    table: None,
                    skip: Some(SkipReason::Unrecognized),
                }
            }
        }
    }

    /// Classify a whole batch, keeping eligible statements in ordinal order
    pub fn partition(&self, statements: &[Statement]) -> ClassifiedBatch {
        let mut batch = ClassifiedBatch {
            total: statements.len(),
            ..ClassifiedBatch::default()
        };

        for statement in statements {
            let classification = self.classify(statement);
            batch.counts.record(classification.kind);

            match classification.skip {
                None => batch.eligible.push(statement.clone()),
                Some(SkipReason::ExcludedTable(_)) | Some(SkipReason::NotIncluded(_)) => {
                    batch.filtered += 1;
                }
                Some(_) => {}
            }
        }

        tracing::info!(
            "Classified {} statement(s): {} data, {} schema, {} transaction, {} unknown; {} eligible",
            batch.total,
            batch.counts.data_dml,
            batch.counts.schema_ddl,
            batch.counts.transaction_control,
            batch.counts.unknown,
            batch.eligible.len()
        );

        batch
    }
}

/// Result of classifying every statement of a dump
#[derive(Debug, Clone, Default)]
pub struct ClassifiedBatch {
    pub total: usize,
    pub counts: KindCounts,
    /// Data statements dropped by the table filter
    pub filtered: usize,
    pub eligible: Vec<Statement>,
}

/// Read the target table of an `INSERT INTO` statement
///
/// Handles bare, `"double-quoted"`, `` `backtick` `` and `[bracket]` names
/// and drops a schema qualifier such as `main.`.
///
/// ```
/// # use dump_migrate::classify::insert_target_table;
/// assert_eq!(insert_target_table("INSERT INTO \"users\" VALUES(1)"), Some("users".to_string()));
/// assert_eq!(insert_target_table("insert into main.logs(id) values(1)"), Some("logs".to_string()));
/// ```
pub fn insert_target_table(text: &str) -> Option<String> {
    let trimmed = text.trim_start();
    if !starts_with_keywords(trimmed, &["INSERT", "INTO"]) {
        return None;
    }

    // Skip the two keywords; both are ASCII so byte offsets are safe
    let after_insert = trimmed[6..].trim_start();
    let mut rest = after_insert[4..].trim_start();
    let mut name = None;

    loop {
        let (part, remainder) = read_identifier(rest)?;
        name = Some(part);
        match remainder.strip_prefix('.') {
            Some(next) => rest = next,
            None => break,
        }
    }

    name.filter(|n| !n.is_empty())
}

fn read_identifier(text: &str) -> Option<(String, &str)> {
    let mut chars = text.char_indices();
    let (_, first) = chars.next()?;

    let closing = match first {
        '"' => Some('"'),
        '`' => Some('`'),
        '[' => Some(']'),
        _ => None,
    };

    match closing {
        Some(close) => {
            let body = &text[first.len_utf8()..];
            let end = body.find(close)?;
            Some((body[..end].to_string(), &body[end + close.len_utf8()..]))
        }
        None => {
            let end = text
                .char_indices()
                .find(|(_, c)| !(c.is_alphanumeric() || *c == '_' || *c == '$'))
                .map(|(i, _)| i)
                .unwrap_or(text.len());
            if end == 0 {
                return None;
            }
            Some((text[..end].to_string(), &text[end..]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> Classification {
        Classifier::default().classify(&Statement::new(1, text))
    }

    #[test]
    fn test_create_table_is_ineligible_schema() {
        let c = classify("CREATE TABLE x (id INT);");
        assert_eq!(c.kind, StatementKind::SchemaDdl);
        assert!(!c.is_eligible());
        assert_eq!(c.skip, Some(SkipReason::SchemaDefinition));
    }

    #[test]
    fn test_insert_is_eligible_data() {
        let c = classify("INSERT INTO x VALUES (1);");
        assert_eq!(c.kind, StatementKind::DataDml);
        assert!(c.is_eligible());
        assert_eq!(c.table.as_deref(), Some("x"));
    }

    #[test]
    fn test_indexes_are_schema() {
        assert_eq!(StatementKind::of("CREATE INDEX i ON t(a)"), StatementKind::SchemaDdl);
        assert_eq!(
            StatementKind::of("create unique index i on t(a)"),
            StatementKind::SchemaDdl
        );
    }

    #[test]
    fn test_transaction_statements() {
        for text in ["BEGIN", "BEGIN TRANSACTION", "COMMIT", "commit", "END TRANSACTION", "ROLLBACK"] {
            let c = classify(text);
            assert_eq!(c.kind, StatementKind::TransactionControl, "{}", text);
            assert!(!c.is_eligible());
        }
    }

    #[test]
    fn test_unknown_statements_are_skipped() {
        for text in ["DELETE FROM t", "UPDATE t SET a=1", "CREATE VIEW v AS SELECT 1", "INSERTINTO t"] {
            let c = classify(text);
            assert_eq!(c.kind, StatementKind::Unknown, "{}", text);
            assert_eq!(c.skip, Some(SkipReason::Unrecognized));
        }
    }

    #[test]
    fn test_sqlite_sequence_is_excluded_by_default() {
        let c = classify("INSERT INTO sqlite_sequence VALUES('users',3)");
        assert_eq!(c.kind, StatementKind::DataDml);
        assert_eq!(
            c.skip,
            Some(SkipReason::ExcludedTable("sqlite_sequence".to_string()))
        );
    }

    #[test]
    fn test_include_list_restricts_tables() {
        let filter = TableFilter::new(Some(vec!["Users".to_string()]), None).unwrap();
        let classifier = Classifier::new(filter);

        let users = classifier.classify(&Statement::new(1, "INSERT INTO users VALUES(1)"));
        assert!(users.is_eligible());

        let posts = classifier.classify(&Statement::new(2, "INSERT INTO posts VALUES(1)"));
        assert_eq!(posts.skip, Some(SkipReason::NotIncluded("posts".to_string())));
    }

    #[test]
    fn test_filter_rejects_conflicts_and_blanks() {
        assert!(TableFilter::new(Some(vec!["a".into()]), Some(vec!["A".into()])).is_err());
        assert!(TableFilter::new(None, Some(vec!["  ".into()])).is_err());
    }

    #[test]
    fn test_explicit_exclude_replaces_default() {
        let filter = TableFilter::new(None, Some(vec!["audit_log".into()])).unwrap();
        assert!(filter.check("sqlite_sequence").is_none());
        assert!(filter.check("AUDIT_LOG").is_some());
    }

    #[test]
    fn test_partition_keeps_order_and_counts() {
        let statements = vec![
            Statement::new(1, "BEGIN TRANSACTION"),
            Statement::new(2, "CREATE TABLE t(id INTEGER)"),
            Statement::new(3, "INSERT INTO t VALUES(1)"),
            Statement::new(4, "INSERT INTO sqlite_sequence VALUES('t',1)"),
            Statement::new(5, "VACUUM"),
            Statement::new(6, "INSERT INTO t VALUES(2)"),
            Statement::new(7, "COMMIT"),
        ];

        let batch = Classifier::default().partition(&statements);

        assert_eq!(batch.total, 7);
        assert_eq!(batch.counts.schema_ddl, 1);
        assert_eq!(batch.counts.data_dml, 3);
        assert_eq!(batch.counts.transaction_control, 2);
        assert_eq!(batch.counts.unknown, 1);
        assert_eq!(batch.counts.total(), 7);
        assert_eq!(batch.filtered, 1);
        let ordinals: Vec<usize> = batch.eligible.iter().map(|s| s.ordinal).collect();
        assert_eq!(ordinals, vec![3, 6]);
    }

    #[test]
    fn test_insert_target_table_forms() {
        assert_eq!(insert_target_table("INSERT INTO t VALUES(1)"), Some("t".into()));
        assert_eq!(insert_target_table("INSERT INTO `t` VALUES(1)"), Some("t".into()));
        assert_eq!(insert_target_table("INSERT INTO [my t] VALUES(1)"), Some("my t".into()));
        assert_eq!(
            insert_target_table("INSERT INTO \"main\".\"t\"(a) VALUES(1)"),
            Some("t".into())
        );
        assert_eq!(insert_target_table("INSERT INTO"), None);
        assert_eq!(insert_target_table("UPDATE t SET a=1"), None);
    }
}
