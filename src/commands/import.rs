// ABOUTME: Import and migrate commands that replay a dump into the target
// ABOUTME: Prepares the dump, confirms with the operator, executes, verifies and reports

use super::{confirm_write, open_target, print_report, statement_progress_bar, RunSettings, RunStatus};
use crate::config::MigrationConfig;
use crate::dump::write_cleaned_dump;
use crate::pipeline::Pipeline;
use anyhow::Result;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Import a dump, typically the artifact written by `clean`
///
/// # Errors
///
/// Returns an error when the dump cannot be decoded, the target cannot be
/// reached, or the operator declines the prompt. Failed statements are not
/// errors; they are listed in the report.
pub async fn import(
    input: &Path,
    config: MigrationConfig,
    settings: &RunSettings,
    cancel: CancellationToken,
) -> Result<RunStatus> {
    run(input, None, config, settings, cancel).await
}

/// Full run from a raw dump: decode, clean, import and verify
///
/// When `cleaned_output` is given the data statements are also written
/// there before anything touches the target.
pub async fn migrate(
    input: &Path,
    cleaned_output: Option<&Path>,
    config: MigrationConfig,
    settings: &RunSettings,
    cancel: CancellationToken,
) -> Result<RunStatus> {
    run(input, cleaned_output, config, settings, cancel).await
}

async fn run(
    input: &Path,
    cleaned_output: Option<&Path>,
    config: MigrationConfig,
    settings: &RunSettings,
    cancel: CancellationToken,
) -> Result<RunStatus> {
    let mut pipeline = Pipeline::new(config).with_cancellation(cancel);
    let prepared = pipeline.prepare(input)?;

    if let Some(path) = cleaned_output {
        write_cleaned_dump(path, prepared.eligible())?;
    }

    if prepared.eligible().is_empty() {
        tracing::warn!("⚠ No data statements to import in {}", input.display());
    }

    let mut store = open_target(pipeline.config()).await?;
    confirm_write(&store.describe(), prepared.eligible().len(), settings.yes)?;

    let pb = statement_progress_bar(prepared.eligible().len(), settings.json);
    let hook_pb = pb.clone();
    let report = pipeline
        .execute(&prepared, store.as_mut(), move |progress| {
            hook_pb.set_position(progress.attempted as u64);
            if progress.failed > 0 {
                hook_pb.set_message(format!("({} failed)", progress.failed));
            }
        })
        .await;
    pb.finish_and_clear();

    print_report(&report, settings.json)?;
    Ok(RunStatus::from_report(&report, settings.fail_on_errors))
}
