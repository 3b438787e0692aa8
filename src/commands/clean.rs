// ABOUTME: Clean command: decode and clean a dump into an importable artifact
// ABOUTME: Writes only the data statements and previews the first few for inspection

use super::{print_report, RunSettings, RunStatus};
use crate::config::MigrationConfig;
use crate::dump::{write_cleaned_dump, Statement};
use crate::pipeline::Pipeline;
use crate::utils::truncate_for_display;
use anyhow::Result;
use std::path::Path;

/// Statements previewed after cleaning
const PREVIEW_STATEMENTS: usize = 5;
/// Characters shown per previewed statement
const PREVIEW_CHARS: usize = 200;

/// Decode, clean, segment and classify `input`, then write the data
/// statements to `output`, one per line
///
/// Schema, transaction-control and unknown statements are left out of the
/// artifact, so importing it replays exactly the rows of the dump.
///
/// # Errors
///
/// Returns an error if `input` cannot be read or decoded, or `output`
/// cannot be written.
pub fn clean(
    input: &Path,
    output: &Path,
    config: MigrationConfig,
    settings: &RunSettings,
) -> Result<RunStatus> {
    let mut pipeline = Pipeline::new(config);
    let prepared = pipeline.prepare(input)?;

    write_cleaned_dump(output, prepared.eligible())?;

    if !settings.json {
        print_preview(prepared.eligible());
    }

    let report = pipeline.finish_prepared(&prepared);
    print_report(&report, settings.json)?;

    Ok(RunStatus::Completed)
}

fn print_preview(statements: &[Statement]) {
    if statements.is_empty() {
        println!("No data statements found.");
        return;
    }

    println!("First {} statement(s):", statements.len().min(PREVIEW_STATEMENTS));
    for statement in statements.iter().take(PREVIEW_STATEMENTS) {
        println!(
            "  #{} {}",
            statement.ordinal,
            truncate_for_display(&statement.text, PREVIEW_CHARS)
        );
    }
}
