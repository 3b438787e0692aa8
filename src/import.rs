// ABOUTME: Import executor that replays eligible statements against the target
// ABOUTME: Runs statements in ordinal order with per-statement isolation, timeouts and cancellation

use crate::dump::Statement;
use crate::error::{StatementExecutionError, StoreError};
use crate::store::TargetStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What the executor does after a statement fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Record the failure and move on to the next statement
    #[default]
    Continue,
    /// Stop at the first failure; the rest is reported as not attempted
    Abort,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Continue => f.write_str("continue"),
            FailurePolicy::Abort => f.write_str("abort"),
        }
    }
}

/// Executor settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOptions {
    /// Upper bound for one statement; exceeding it counts as a failure
    pub statement_timeout: Duration,
    /// Invoke the progress hook after every N successful statements
    pub progress_every: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            statement_timeout: Duration::from_secs(30),
            progress_every: 100,
            failure_policy: FailurePolicy::Continue,
        }
    }
}

/// Result of executing one eligible statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportOutcome {
    pub ordinal: usize,
    pub success: bool,
    pub rows_affected: Option<u64>,
    pub error: Option<StatementExecutionError>,
}

impl ImportOutcome {
    fn succeeded(ordinal: usize, rows_affected: u64) -> Self {
        Self {
            ordinal,
            success: true,
            rows_affected: Some(rows_affected),
            error: None,
        }
    }

    fn failed(error: StatementExecutionError) -> Self {
        Self {
            ordinal: error.ordinal,
            success: false,
            rows_affected: None,
            error: Some(error),
        }
    }
}

/// Snapshot handed to the progress hook
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportProgress {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
}

/// Why the executor stopped before the last statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "reason")]
pub enum StopReason {
    /// The operator interrupted the run
    Cancelled,
    /// Abort policy hit a failing statement
    FailedFast { ordinal: usize },
}

/// Everything the executor produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportRun {
    /// One outcome per attempted statement, in ordinal order
    pub outcomes: Vec<ImportOutcome>,
    /// Eligible statements never attempted because the run stopped early
    pub not_attempted: usize,
    pub stopped: Option<StopReason>,
}

type ProgressHook<'a> = Box<dyn FnMut(&ImportProgress) + Send + 'a>;

/// Replays eligible statements against one target session
///
/// Statements run strictly in the order given, one at a time, each in its
/// own implicit transaction. A failing statement never rolls back earlier
/// ones, so a partial import leaves the rows that did succeed in place.
///
/// # Examples
///
/// ```no_run
/// # use dump_migrate::import::{ImportExecutor, ImportOptions};
/// # use dump_migrate::store::TargetStore;
/// # use dump_migrate::Statement;
/// # async fn example(store: &mut dyn TargetStore) {
/// let statements = vec![Statement::new(1, "INSERT INTO t VALUES (1)")];
/// let run = ImportExecutor::new(store, ImportOptions::default())
///     .on_progress(|p| println!("{}/{}", p.attempted, p.total))
///     .run(&statements)
///     .await;
/// assert_eq!(run.outcomes.len(), 1);
/// # }
/// ```
pub struct ImportExecutor<'a> {
    store: &'a mut dyn TargetStore,
    options: ImportOptions,
    cancel: CancellationToken,
    on_progress: Option<ProgressHook<'a>>,
}

impl<'a> ImportExecutor<'a> {
    pub fn new(store: &'a mut dyn TargetStore, options: ImportOptions) -> Self {
        Self {
            store,
            options,
            cancel: CancellationToken::new(),
            on_progress: None,
        }
    }

    /// Stop at the next statement boundary once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Observe progress at the configured cadence and once at the end
    pub fn on_progress(mut self, hook: impl FnMut(&ImportProgress) + Send + 'a) -> Self {
        self.on_progress = Some(Box::new(hook));
        self
    }

    /// Execute every statement and collect one outcome per attempt
    pub async fn run(mut self, statements: &[Statement]) -> ImportRun {
        let mut run = ImportRun::default();
        let mut progress = ImportProgress {
            total: statements.len(),
            ..ImportProgress::default()
        };

        tracing::info!(
            "Importing {} statement(s) (on error: {}, timeout: {:?})",
            statements.len(),
            self.options.failure_policy,
            self.options.statement_timeout
        );

        for (index, statement) in statements.iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::warn!(
                    "Import interrupted before statement #{}",
                    statement.ordinal
                );
                run.stopped = Some(StopReason::Cancelled);
                run.not_attempted = statements.len() - index;
                break;
            }

            let outcome = self.execute_one(statement).await;
            progress.attempted += 1;

            if outcome.success {
                progress.succeeded += 1;
                if self.options.progress_every > 0
                    && progress.succeeded % self.options.progress_every == 0
                {
                    tracing::info!(
                        "Imported {} of {} statement(s) ({} failed)",
                        progress.succeeded,
                        progress.total,
                        progress.failed
                    );
                    self.report_progress(&progress);
                }
                run.outcomes.push(outcome);
                continue;
            }

            progress.failed += 1;
            run.outcomes.push(outcome);

            if self.options.failure_policy == FailurePolicy::Abort {
                tracing::warn!(
                    "Stopping at first failure (statement #{}); {} statement(s) not attempted",
                    statement.ordinal,
                    statements.len() - index - 1
                );
                run.stopped = Some(StopReason::FailedFast {
                    ordinal: statement.ordinal,
                });
                run.not_attempted = statements.len() - index - 1;
                break;
            }
        }

        self.report_progress(&progress);

        tracing::info!(
            "Import finished: {} succeeded, {} failed, {} not attempted",
            progress.succeeded,
            progress.failed,
            run.not_attempted
        );

        run
    }

    async fn execute_one(&mut self, statement: &Statement) -> ImportOutcome {
        let timeout = self.options.statement_timeout;
        let result = if timeout.is_zero() {
            self.store.execute(&statement.text).await
        } else {
            match tokio::time::timeout(timeout, self.store.execute(&statement.text)).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout(timeout)),
            }
        };

        match result {
            Ok(rows) => ImportOutcome::succeeded(statement.ordinal, rows),
            Err(err) => {
                let error = StatementExecutionError::from_store(statement.ordinal, &err);
                tracing::warn!(
                    "Statement #{} failed: {}",
                    statement.ordinal,
                    crate::utils::truncate_for_display(&error.message, 160)
                );
                ImportOutcome::failed(error)
            }
        }
    }

    fn report_progress(&mut self, progress: &ImportProgress) {
        if let Some(hook) = self.on_progress.as_mut() {
            hook(progress);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::TextRow;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// In-memory store that counts inserts per table and fails on demand
    #[derive(Default)]
    pub(crate) struct ScriptedStore {
        pub executed: Vec<String>,
        pub rows: HashMap<String, u64>,
        pub fail_when_contains: Vec<String>,
        pub hang_when_contains: Option<String>,
    }

    #[async_trait]
    impl TargetStore for ScriptedStore {
        fn describe(&self) -> String {
            "scripted".to_string()
        }

        async fn server_version(&mut self) -> Result<String, StoreError> {
            Ok("scripted 1.0".to_string())
        }

        async fn execute(&mut self, sql: &str) -> Result<u64, StoreError> {
            if let Some(ref marker) = self.hang_when_contains {
                if sql.contains(marker.as_str()) {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
            }
            if self.fail_when_contains.iter().any(|m| sql.contains(m.as_str())) {
                return Err(StoreError::Rejected(format!("rejected: {}", sql)));
            }
            self.executed.push(sql.to_string());
            let table = crate::classify::insert_target_table(sql).unwrap_or_default();
            *self.rows.entry(table).or_default() += 1;
            Ok(1)
        }

        /// Answers `COUNT(*)` with case-sensitive quoted names, like PostgreSQL
        async fn query(&mut self, sql: &str) -> Result<Vec<TextRow>, StoreError> {
            let Some(quoted) = sql.strip_prefix("SELECT COUNT(*) FROM ") else {
                return Err(StoreError::Rejected(format!("queries unsupported: {}", sql)));
            };
            let table = quoted.trim_matches('"');
            match self.rows.get(table) {
                Some(count) => Ok(vec![TextRow::new(vec![(
                    "count".to_string(),
                    Some(count.to_string()),
                )])]),
                None => Err(StoreError::Rejected(format!(
                    "relation \"{}\" does not exist",
                    table
                ))),
            }
        }

        async fn list_tables(&mut self) -> Result<Vec<String>, StoreError> {
            let mut tables: Vec<String> = self.rows.keys().cloned().collect();
            tables.sort();
            Ok(tables)
        }
    }

    fn inserts(n: usize) -> Vec<Statement> {
        (1..=n)
            .map(|i| Statement::new(i, format!("INSERT INTO t VALUES ({})", i)))
            .collect()
    }

    #[tokio::test]
    async fn test_failure_is_isolated_and_execution_continues() {
        let mut store = ScriptedStore {
            fail_when_contains: vec!["VALUES (3)".to_string()],
            ..Default::default()
        };
        let statements = inserts(5);

        let run = ImportExecutor::new(&mut store, ImportOptions::default())
            .run(&statements)
            .await;

        assert_eq!(run.outcomes.len(), 5);
        assert_eq!(run.not_attempted, 0);
        assert_eq!(run.stopped, None);
        for outcome in &run.outcomes {
            assert_eq!(outcome.success, outcome.ordinal != 3, "ordinal {}", outcome.ordinal);
        }
        let failed = &run.outcomes[2];
        assert_eq!(failed.error.as_ref().unwrap().ordinal, 3);
        assert_eq!(failed.rows_affected, None);
        assert_eq!(store.executed.len(), 4);
        assert_eq!(store.executed.last().unwrap(), "INSERT INTO t VALUES (5)");
    }

    #[tokio::test]
    async fn test_statements_run_in_ordinal_order() {
        let mut store = ScriptedStore::default();
        let statements = inserts(4);

        ImportExecutor::new(&mut store, ImportOptions::default())
            .run(&statements)
            .await;

        let expected: Vec<String> = statements.iter().map(|s| s.text.clone()).collect();
        assert_eq!(store.executed, expected);
    }

    #[tokio::test]
    async fn test_abort_policy_stops_at_first_failure() {
        let mut store = ScriptedStore {
            fail_when_contains: vec!["VALUES (2)".to_string()],
            ..Default::default()
        };
        let options = ImportOptions {
            failure_policy: FailurePolicy::Abort,
            ..ImportOptions::default()
        };

        let run = ImportExecutor::new(&mut store, options)
            .run(&inserts(5))
            .await;

        assert_eq!(run.outcomes.len(), 2);
        assert_eq!(run.not_attempted, 3);
        assert_eq!(run.stopped, Some(StopReason::FailedFast { ordinal: 2 }));
        assert_eq!(store.executed, vec!["INSERT INTO t VALUES (1)".to_string()]);
    }

    #[tokio::test]
    async fn test_cancellation_takes_effect_between_statements() {
        let mut store = ScriptedStore::default();
        let token = CancellationToken::new();
        let trigger = token.clone();

        let run = ImportExecutor::new(&mut store, ImportOptions {
            progress_every: 2,
            ..ImportOptions::default()
        })
        .with_cancellation(token)
        .on_progress(move |p| {
            if p.succeeded == 2 {
                trigger.cancel();
            }
        })
        .run(&inserts(6))
        .await;

        assert_eq!(run.outcomes.len(), 2);
        assert!(run.outcomes.iter().all(|o| o.success));
        assert_eq!(run.not_attempted, 4);
        assert_eq!(run.stopped, Some(StopReason::Cancelled));
        assert_eq!(store.executed.len(), 2);
    }

    #[tokio::test]
    async fn test_hung_statement_times_out_like_any_failure() {
        let mut store = ScriptedStore {
            hang_when_contains: Some("VALUES (2)".to_string()),
            ..Default::default()
        };
        let options = ImportOptions {
            statement_timeout: Duration::from_millis(50),
            ..ImportOptions::default()
        };

        let run = ImportExecutor::new(&mut store, options)
            .run(&inserts(3))
            .await;

        assert_eq!(run.outcomes.len(), 3);
        let timed_out = run.outcomes[1].error.as_ref().unwrap();
        assert!(timed_out.timed_out);
        assert!(run.outcomes[2].success);
    }

    #[tokio::test]
    async fn test_progress_hook_cadence() {
        let mut store = ScriptedStore::default();
        let mut seen = Vec::new();

        ImportExecutor::new(&mut store, ImportOptions {
            progress_every: 2,
            ..ImportOptions::default()
        })
        .on_progress(|p| seen.push(p.succeeded))
        .run(&inserts(5))
        .await;

        // Every second success, then a final snapshot
        assert_eq!(seen, vec![2, 4, 5]);
    }

    #[tokio::test]
    async fn test_rerun_duplicates_rows() {
        let mut store = ScriptedStore::default();
        let statements = inserts(3);

        for _ in 0..2 {
            let run = ImportExecutor::new(&mut store, ImportOptions::default())
                .run(&statements)
                .await;
            assert!(run.outcomes.iter().all(|o| o.success));
        }

        assert_eq!(store.rows.get("t"), Some(&6));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let mut store = ScriptedStore::default();
        let run = ImportExecutor::new(&mut store, ImportOptions::default())
            .run(&[])
            .await;
        assert!(run.outcomes.is_empty());
        assert_eq!(run.not_attempted, 0);
    }
}
