// ABOUTME: End-to-end tests of the dump pipeline against real SQLite target files
// ABOUTME: Covers clean-then-import, missing tables, UTF-16 dumps, multi-line values and re-runs

use dump_migrate::commands;
use dump_migrate::config::MigrationConfig;
use dump_migrate::dump::SegmentMode;
use dump_migrate::import::FailurePolicy;
use dump_migrate::report::RunState;
use dump_migrate::store::sqlite::SqliteStore;
use dump_migrate::store::ConnectOptions;
use dump_migrate::verify::{ExpectedRows, TableExpectation, VerificationStatus};
use dump_migrate::Pipeline;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::{tempdir, TempDir};
use tokio_util::sync::CancellationToken;

const SCENARIO_DUMP: &str = "PRAGMA foreign_keys=ON;\nBEGIN TRANSACTION;\nCREATE TABLE t(id INTEGER);\nINSERT INTO t VALUES(1);\nINSERT INTO t VALUES(2);\nCOMMIT;";

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: tempdir().expect("Failed to create temp dir"),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn write(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, contents).expect("Failed to write fixture");
        path
    }

    /// Create a target database, optionally with table `t`
    fn target(&self, with_table: bool) -> PathBuf {
        let path = self.path("target.db");
        let conn = Connection::open(&path).expect("Failed to create target");
        if with_table {
            conn.execute_batch("CREATE TABLE t(id INTEGER);")
                .expect("Failed to create table t");
        }
        path
    }
}

fn open_store(path: &Path) -> SqliteStore {
    SqliteStore::open(path, &ConnectOptions::default()).expect("Failed to open target")
}

fn count_rows(path: &Path, table: &str) -> i64 {
    Connection::open(path)
        .unwrap()
        .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
        .unwrap()
}

fn verify_t() -> MigrationConfig {
    MigrationConfig {
        expectations: vec![TableExpectation::new("t").with_sample(true)],
        ..MigrationConfig::default()
    }
}

#[tokio::test]
async fn test_clean_then_import_into_existing_table() {
    let ws = Workspace::new();
    let dump = ws.write("dump.sql", SCENARIO_DUMP.as_bytes());
    let cleaned = ws.path("clean.sql");
    let target = ws.target(true);

    commands::clean(
        &dump,
        &cleaned,
        MigrationConfig::default(),
        &commands::RunSettings {
            json: true,
            ..Default::default()
        },
    )
    .unwrap();

    let artifact = std::fs::read_to_string(&cleaned).unwrap();
    let meaningful: Vec<&str> = artifact.lines().filter(|l| !l.trim().is_empty()).collect();
    assert_eq!(meaningful, vec!["INSERT INTO t VALUES(1);", "INSERT INTO t VALUES(2);"]);

    let mut pipeline = Pipeline::new(verify_t());
    let prepared = pipeline.prepare(&cleaned).unwrap();
    let mut store = open_store(&target);
    let report = pipeline.execute(&prepared, &mut store, |_| {}).await;

    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.total_statements, 2);
    assert_eq!(report.eligible, 2);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 0);
    assert_eq!(report.verification.len(), 1);
    assert_eq!(report.verification[0].actual_rows, Some(2));
    assert_eq!(report.verification[0].sample_rows.len(), 2);
    assert_eq!(count_rows(&target, "t"), 2);
}

#[tokio::test]
async fn test_import_without_target_table_fails_per_statement_but_finishes() {
    let ws = Workspace::new();
    let cleaned = ws.write("clean.sql", b"INSERT INTO t VALUES(1);\nINSERT INTO t VALUES(2);\n");
    let target = ws.target(false);

    let mut pipeline = Pipeline::new(verify_t());
    let prepared = pipeline.prepare(&cleaned).unwrap();
    let mut store = open_store(&target);
    let report = pipeline.execute(&prepared, &mut store, |_| {}).await;

    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.total_statements, 2);
    assert_eq!(report.eligible, 2);
    assert_eq!(report.succeeded(), 0);
    assert_eq!(report.failed(), 2);
    for outcome in &report.outcomes {
        let error = outcome.error.as_ref().expect("failed outcome carries an error");
        assert!(error.message.contains("no such table"));
    }
    assert_eq!(report.verification[0].status(), VerificationStatus::Error);

    // Structural success: the exit code stays 0 unless failures are made fatal
    assert_eq!(commands::RunStatus::from_report(&report, false).exit_code(), 0);
    assert_eq!(commands::RunStatus::from_report(&report, true).exit_code(), 2);
}

#[tokio::test]
async fn test_migrate_raw_dump_skips_schema_and_transactions() {
    let ws = Workspace::new();
    let dump = ws.write("dump.sql", SCENARIO_DUMP.as_bytes());
    let target = ws.target(true);

    let config = MigrationConfig {
        expectations: vec![TableExpectation::new("t").with_expected(ExpectedRows::Exactly(2))],
        ..MigrationConfig::default()
    };
    let mut pipeline = Pipeline::new(config);
    let prepared = pipeline.prepare(&dump).unwrap();
    let mut store = open_store(&target);
    let report = pipeline.execute(&prepared, &mut store, |_| {}).await;

    assert_eq!(report.total_statements, 3);
    assert_eq!(report.kinds.schema_ddl, 1);
    assert_eq!(report.eligible, 2);
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.verification[0].status(), VerificationStatus::Ok);
}

#[tokio::test]
async fn test_utf16_dump_with_autoincrement_and_sequence_table() {
    let ws = Workspace::new();
    let text = "\u{feff}PRAGMA foreign_keys=OFF;\r\nBEGIN TRANSACTION;\r\nCREATE TABLE \"users\" (\"id\" integer NOT NULL PRIMARY KEY AUTOINCREMENT, \"name\" text);\r\nINSERT INTO users VALUES(1,'Zoë');\r\nINSERT INTO sqlite_sequence VALUES('users',1);\r\nCOMMIT;\r\n";
    let raw: Vec<u8> = text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
    let dump = ws.write("dump.sql", &raw);

    let target = ws.path("target.db");
    Connection::open(&target)
        .unwrap()
        .execute_batch("CREATE TABLE users(id INTEGER PRIMARY KEY, name TEXT);")
        .unwrap();

    let mut pipeline = Pipeline::new(MigrationConfig::default());
    let prepared = pipeline.prepare(&dump).unwrap();
    assert!(prepared
        .statements
        .iter()
        .all(|s| !s.text.contains('\0') && !s.text.contains("AUTOINCREMENT")));
    assert_eq!(prepared.batch.filtered, 1);

    let mut store = open_store(&target);
    let report = pipeline.execute(&prepared, &mut store, |_| {}).await;

    assert_eq!(report.succeeded(), 1);
    let name: String = Connection::open(&target)
        .unwrap()
        .query_row("SELECT name FROM users WHERE id = 1", [], |row| row.get(0))
        .unwrap();
    assert_eq!(name, "Zoë");
}

#[tokio::test]
async fn test_quote_aware_segmenter_keeps_semicolons_in_values() {
    let ws = Workspace::new();
    let dump = ws.write(
        "dump.sql",
        b"INSERT INTO t VALUES(1);\nINSERT INTO notes VALUES(1,'a;b');\n",
    );
    let target = ws.path("target.db");
    Connection::open(&target)
        .unwrap()
        .execute_batch("CREATE TABLE t(id INTEGER); CREATE TABLE notes(id INTEGER, body TEXT);")
        .unwrap();

    let mut naive = Pipeline::new(MigrationConfig {
        segment_mode: SegmentMode::Naive,
        ..MigrationConfig::default()
    });
    let prepared = naive.prepare(&dump).unwrap();
    assert_eq!(prepared.statements.len(), 3);

    let mut pipeline = Pipeline::new(MigrationConfig::default());
    let prepared = pipeline.prepare(&dump).unwrap();
    let mut store = open_store(&target);
    let report = pipeline.execute(&prepared, &mut store, |_| {}).await;

    assert_eq!(report.succeeded(), 2);
    assert_eq!(count_rows(&target, "notes"), 1);
}

#[tokio::test]
async fn test_multiline_text_value_survives_clean_and_import() {
    let ws = Workspace::new();
    let note = "thanks\n\n  indented\nCOMMIT\n-- Dr. Reyes";
    let dump = format!(
        "BEGIN TRANSACTION;\nINSERT INTO notes VALUES(1,'{}');\nINSERT INTO notes VALUES(2,'b');\nINSERT INTO notes VALUES(3,'c');\nCOMMIT;\n",
        note
    );
    let dump = ws.write("dump.sql", dump.as_bytes());
    let cleaned = ws.path("clean.sql");
    let target = ws.path("target.db");
    Connection::open(&target)
        .unwrap()
        .execute_batch("CREATE TABLE notes(id INTEGER, body TEXT);")
        .unwrap();

    commands::clean(
        &dump,
        &cleaned,
        MigrationConfig::default(),
        &commands::RunSettings {
            json: true,
            ..Default::default()
        },
    )
    .unwrap();

    let mut pipeline = Pipeline::new(MigrationConfig::default());
    let prepared = pipeline.prepare(&cleaned).unwrap();
    assert_eq!(prepared.statements.len(), 3);

    let mut store = open_store(&target);
    let report = pipeline.execute(&prepared, &mut store, |_| {}).await;

    assert_eq!(report.succeeded(), 3);
    assert_eq!(report.failed(), 0);
    let body: String = Connection::open(&target)
        .unwrap()
        .query_row("SELECT body FROM notes WHERE id = 1", [], |row| row.get(0))
        .unwrap();
    assert_eq!(body, note);
    assert_eq!(count_rows(&target, "notes"), 3);
}

#[tokio::test]
async fn test_abort_policy_leaves_rest_unattempted() {
    let ws = Workspace::new();
    let dump = ws.write(
        "dump.sql",
        b"INSERT INTO t VALUES(1);\nINSERT INTO missing VALUES(2);\nINSERT INTO t VALUES(3);\n",
    );
    let target = ws.target(true);

    let mut config = MigrationConfig::default();
    config.import.failure_policy = FailurePolicy::Abort;
    let mut pipeline = Pipeline::new(config);
    let prepared = pipeline.prepare(&dump).unwrap();
    let mut store = open_store(&target);
    let report = pipeline.execute(&prepared, &mut store, |_| {}).await;

    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.not_attempted, 1);
    assert_eq!(count_rows(&target, "t"), 1);
}

#[tokio::test]
async fn test_runaway_statement_times_out_and_run_continues() {
    let ws = Workspace::new();
    let dump = ws.write(
        "dump.sql",
        b"INSERT INTO t VALUES(1);\nINSERT INTO t WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c LIMIT 50000000) SELECT x FROM c;\nINSERT INTO t VALUES(2);\n",
    );
    let target = ws.target(true);

    let timeout = Duration::from_millis(50);
    let mut config = MigrationConfig::default();
    config.import.statement_timeout = timeout;
    let mut pipeline = Pipeline::new(config);
    let prepared = pipeline.prepare(&dump).unwrap();
    let mut store = SqliteStore::open(
        &target,
        &ConnectOptions {
            statement_timeout: timeout,
        },
    )
    .unwrap();

    let started = Instant::now();
    let report = pipeline.execute(&prepared, &mut store, |_| {}).await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);
    let error = report.outcomes[1].error.as_ref().unwrap();
    assert!(error.timed_out);
    assert_eq!(count_rows(&target, "t"), 2);
}

#[tokio::test]
async fn test_rerunning_an_import_duplicates_rows() {
    let ws = Workspace::new();
    let cleaned = ws.write("clean.sql", b"INSERT INTO t VALUES(1);\nINSERT INTO t VALUES(2);\n");
    let target = ws.target(true);

    for _ in 0..2 {
        let mut pipeline = Pipeline::new(MigrationConfig::default());
        let prepared = pipeline.prepare(&cleaned).unwrap();
        let mut store = open_store(&target);
        let report = pipeline.execute(&prepared, &mut store, |_| {}).await;
        assert_eq!(report.succeeded(), 2);
    }

    assert_eq!(count_rows(&target, "t"), 4);
}

#[tokio::test]
async fn test_interrupted_run_reports_partial_progress() {
    let ws = Workspace::new();
    let body: String = (1..=10)
        .map(|i| format!("INSERT INTO t VALUES({});\n", i))
        .collect();
    let cleaned = ws.write("clean.sql", body.as_bytes());
    let target = ws.target(true);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let mut config = verify_t();
    config.import.progress_every = 3;

    let mut pipeline = Pipeline::new(config).with_cancellation(cancel);
    let prepared = pipeline.prepare(&cleaned).unwrap();
    let mut store = open_store(&target);
    let report = pipeline
        .execute(&prepared, &mut store, move |progress| {
            if progress.succeeded == 3 {
                trigger.cancel();
            }
        })
        .await;

    assert!(report.interrupted());
    assert_eq!(report.succeeded(), 3);
    assert_eq!(report.not_attempted, 7);
    assert!(report.verification.is_empty());
    assert_eq!(count_rows(&target, "t"), 3);
    assert_eq!(commands::RunStatus::from_report(&report, false).exit_code(), 130);
}

#[test]
fn test_binary_garbage_aborts_before_any_statement() {
    let ws = Workspace::new();
    let garbage: Vec<u8> = (0..4096u32).map(|i| (0x80 + (i % 0x40)) as u8).collect();
    let dump = ws.write("dump.sql", &garbage);

    let mut pipeline = Pipeline::new(MigrationConfig::default());
    assert!(pipeline.prepare(&dump).is_err());
    assert_eq!(pipeline.state(), RunState::Aborted);
}
