// ABOUTME: Orchestrates decode, clean, segment, classify, execute and verify
// ABOUTME: Tracks the run state and assembles the final migration report

use crate::classify::{ClassifiedBatch, Classifier};
use crate::config::MigrationConfig;
use crate::dump::{self, clean_text, decode_dump, DumpDocument, Statement};
use crate::error::MigrationError;
use crate::import::{ImportExecutor, ImportProgress};
use crate::report::{MigrationReport, RunState};
use crate::store::TargetStore;
use crate::verify::{TableVerification, Verifier};
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// A dump that went through every stage before execution
#[derive(Debug, Clone)]
pub struct PreparedDump {
    pub document: DumpDocument,
    /// Every statement, in ordinal order
    pub statements: Vec<Statement>,
    pub batch: ClassifiedBatch,
}

impl PreparedDump {
    pub fn eligible(&self) -> &[Statement] {
        &self.batch.eligible
    }
}

/// Single-run migration pipeline
///
/// Stages run strictly one after another; each consumes the whole output
/// of the previous one.
pub struct Pipeline {
    config: MigrationConfig,
    state: RunState,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(config: MigrationConfig) -> Self {
        Self {
            config,
            state: RunState::Decoding,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop the executor at the next statement boundary once `token` fires
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    fn advance(&mut self, next: RunState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "invalid transition {} -> {}",
            self.state,
            next
        );
        tracing::debug!("Pipeline state: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Read a dump file and run it through decode, clean, segment and classify
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError`] if the file cannot be read or decoded; the
    /// pipeline is then `Aborted`.
    pub fn prepare(&mut self, path: &Path) -> Result<PreparedDump, MigrationError> {
        tracing::info!("Reading dump {}", path.display());
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) => {
                self.advance(RunState::Aborted);
                return Err(MigrationError::read(path, e));
            }
        };
        self.prepare_bytes(path, &raw)
    }

    /// Same as [`Pipeline::prepare`] for bytes already in memory
    pub fn prepare_bytes(&mut self, source: &Path, raw: &[u8]) -> Result<PreparedDump, MigrationError> {
        let fingerprint = dump::fingerprint(raw);

        let decoded = match decode_dump(raw, &self.config.decode) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::error!("Cannot decode {}: {}", source.display(), e);
                self.advance(RunState::Aborted);
                return Err(MigrationError::decode(source, e));
            }
        };
        tracing::info!(
            "✓ Decoded {} bytes as {} ({} null bytes removed)",
            raw.len(),
            decoded.encoding,
            decoded.nulls_removed
        );

        self.advance(RunState::Cleaning);
        let cleaned = clean_text(&decoded.text, &self.config.clean);
        tracing::info!(
            "✓ Cleaned dump: kept {} of {} lines",
            cleaned.stats.kept_lines,
            cleaned.stats.input_lines
        );
        let document = DumpDocument::new(source, decoded.encoding, fingerprint, cleaned);

        self.advance(RunState::Segmenting);
        let statements = document.statements(self.config.segment_mode);
        tracing::info!(
            "✓ Found {} statement(s) ({} segmenter)",
            statements.len(),
            self.config.segment_mode
        );

        self.advance(RunState::Classifying);
        let batch = Classifier::new(self.config.filter.clone()).partition(&statements);

        Ok(PreparedDump {
            document,
            statements,
            batch,
        })
    }

    /// Finish a run that stops after classification
    pub fn finish_prepared(&mut self, prepared: &PreparedDump) -> MigrationReport {
        self.advance(RunState::Done);
        let mut report = self.base_report(prepared);
        report.state = self.state;
        report
    }

    /// Execute the eligible statements, verify the target, and report
    ///
    /// Uses the one store session for both stages. An operator interrupt
    /// stops the run at a statement boundary; the report then covers what
    /// was attempted and verification is skipped.
    pub async fn execute(
        &mut self,
        prepared: &PreparedDump,
        store: &mut dyn TargetStore,
        on_progress: impl FnMut(&ImportProgress) + Send,
    ) -> MigrationReport {
        let mut report = self.base_report(prepared);
        report.target = Some(store.describe());

        self.advance(RunState::Executing);
        let run = ImportExecutor::new(&mut *store, self.config.import)
            .with_cancellation(self.cancel.clone())
            .on_progress(on_progress)
            .run(prepared.eligible())
            .await;
        report.record_import(run);

        if report.interrupted() {
            tracing::warn!("Run interrupted; skipping verification");
        } else if !self.config.expectations.is_empty() || self.config.discover {
            self.advance(RunState::Verifying);
            report.verification = self.verify(store).await;
        }

        self.advance(RunState::Done);
        report.state = self.state;
        report
    }

    /// Verify the configured tables, or every table in discovery mode
    pub async fn verify(&self, store: &mut dyn TargetStore) -> Vec<TableVerification> {
        tracing::info!("Verifying target tables...");
        let mut verifier = Verifier::new(store, self.config.verify);

        let mut expectations = self.config.expectations.clone();
        if self.config.discover {
            match verifier.discover(true).await {
                Ok(found) => {
                    for expectation in found {
                        if !expectations
                            .iter()
                            .any(|e| e.table.eq_ignore_ascii_case(&expectation.table))
                        {
                            expectations.push(expectation);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("{}", e);
                    let mut results = verifier.verify(&expectations).await;
                    results.push(TableVerification {
                        table: e.table.clone(),
                        expected: Default::default(),
                        actual_rows: None,
                        sample_rows: Vec::new(),
                        error: Some(e),
                    });
                    return results;
                }
            }
        }

        verifier.verify(&expectations).await
    }

    fn base_report(&self, prepared: &PreparedDump) -> MigrationReport {
        let document = &prepared.document;
        MigrationReport {
            source: Some(document.source().to_path_buf()),
            encoding: Some(document.encoding()),
            fingerprint: Some(document.fingerprint().to_string()),
            clean_stats: Some(document.clean_stats().clone()),
            total_statements: prepared.batch.total,
            kinds: prepared.batch.counts,
            eligible: prepared.batch.eligible.len(),
            filtered: prepared.batch.filtered,
            failure_policy: self.config.import.failure_policy,
            state: self.state,
            ..MigrationReport::default()
        }
    }
}
