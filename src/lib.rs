// ABOUTME: Library module for dump-migrate
// ABOUTME: Exports the decode, clean, segment, classify, import and verify stages

pub mod classify;
pub mod commands;
pub mod config;
pub mod dump;
pub mod error;
pub mod import;
pub mod pipeline;
pub mod report;
pub mod store;
pub mod utils;
pub mod verify;

pub use classify::{Classification, Classifier, KindCounts, StatementKind, TableFilter};
pub use dump::{DumpDocument, Statement};
pub use error::{
    ConnectionError, DecodeError, MigrationError, StatementExecutionError, StoreError,
    VerificationError,
};
pub use import::{FailurePolicy, ImportExecutor, ImportOptions, ImportOutcome, ImportProgress};
pub use pipeline::{Pipeline, PreparedDump};
pub use report::{MigrationReport, RunState};
pub use store::{TargetDescriptor, TargetStore, TextRow};
pub use verify::{ExpectedRows, TableExpectation, TableVerification, Verifier};
