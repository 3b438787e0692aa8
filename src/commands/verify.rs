// ABOUTME: Verify command: row counts and sample rows for target tables
// ABOUTME: Runs read-only checks without importing anything

use super::{open_target, RunSettings, RunStatus};
use crate::config::MigrationConfig;
use crate::pipeline::Pipeline;
use crate::report::render_verification;
use crate::verify::VerificationStatus;
use anyhow::{bail, Context, Result};

/// Check the configured tables (or every table with `--discover`)
///
/// A table that is missing or unreadable is reported, not raised.
///
/// # Errors
///
/// Returns an error if there is nothing to verify or the target cannot be
/// reached.
pub async fn verify(config: MigrationConfig, settings: &RunSettings) -> Result<RunStatus> {
    if config.expectations.is_empty() && !config.discover {
        bail!("No tables to verify. Pass a table list such as `users=3,posts` or use --discover");
    }

    let mut store = open_target(&config).await?;
    let pipeline = Pipeline::new(config);
    let results = pipeline.verify(store.as_mut()).await;

    if settings.json {
        let rendered = serde_json::to_string_pretty(&serde_json::json!({
            "target": store.describe(),
            "verification": results,
        }))
        .context("Failed to serialize verification results")?;
        println!("{}", rendered);
    } else {
        println!();
        print!("{}", render_verification(&results));
    }

    let problems = results
        .iter()
        .filter(|r| r.status() != VerificationStatus::Ok)
        .count();
    if problems > 0 {
        tracing::warn!("⚠ {} of {} table(s) did not verify", problems, results.len());
    } else {
        tracing::info!("✓ All {} table(s) verified", results.len());
    }

    if settings.fail_on_errors && problems > 0 {
        Ok(RunStatus::CompletedWithFailures)
    } else {
        Ok(RunStatus::Completed)
    }
}
