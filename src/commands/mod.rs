// ABOUTME: Command implementations for the dump-migrate CLI
// ABOUTME: Exports clean, import, migrate and verify plus shared prompt and output helpers

pub mod clean;
pub mod import;
pub mod verify;

pub use clean::clean;
pub use import::{import, migrate};
pub use verify::verify;

use crate::config::MigrationConfig;
use crate::report::MigrationReport;
use crate::store::{self, ConnectOptions, TargetDescriptor, TargetStore};
use anyhow::{bail, Context, Result};
use dialoguer::{theme::ColorfulTheme, Confirm};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;

/// Flags shared by the commands that write to or read from the target
#[derive(Debug, Clone, Copy, Default)]
pub struct RunSettings {
    /// Skip the confirmation prompt
    pub yes: bool,
    /// Print the report as JSON on stdout
    pub json: bool,
    /// Exit with code 2 when statements or verifications failed
    pub fail_on_errors: bool,
}

/// How a command that reached the end of its run finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    /// Finished, but failures were found and the operator asked to treat them as fatal
    CompletedWithFailures,
    Interrupted,
}

impl RunStatus {
    /// Decide the status of a finished run
    ///
    /// Failed statements do not change the status unless `fail_on_errors`
    /// is set: a run that reaches `Done` is a structural success.
    pub fn from_report(report: &MigrationReport, fail_on_errors: bool) -> Self {
        if report.interrupted() {
            RunStatus::Interrupted
        } else if fail_on_errors && (report.has_failures() || report.verification_problems() > 0) {
            RunStatus::CompletedWithFailures
        } else {
            RunStatus::Completed
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            RunStatus::Completed => 0,
            RunStatus::CompletedWithFailures => 2,
            RunStatus::Interrupted => 130,
        }
    }
}

/// Print a finished report as text or JSON
pub fn print_report(report: &MigrationReport, json: bool) -> Result<()> {
    if json {
        let rendered = serde_json::to_string_pretty(&report.to_json())
            .context("Failed to serialize report")?;
        println!("{}", rendered);
    } else {
        println!();
        print!("{}", report);
    }
    Ok(())
}

/// Parse the configured target and open one session to it
///
/// # Errors
///
/// Fails when no target was given, the descriptor is malformed, or the
/// target cannot be reached. Nothing has been executed at that point.
pub async fn open_target(config: &MigrationConfig) -> Result<Box<dyn TargetStore>> {
    let Some(ref raw) = config.target else {
        bail!(
            "No target given. Use --target, set DUMP_MIGRATE_TARGET, \
             or add `target = \"...\"` to the config file"
        );
    };

    let descriptor: TargetDescriptor = raw.parse()?;
    let options = ConnectOptions {
        statement_timeout: config.import.statement_timeout,
    };
    let mut store = store::connect(&descriptor, &options).await?;

    match store.server_version().await {
        Ok(version) => tracing::info!("Target runs {}", version),
        Err(e) => tracing::debug!("Could not read target version: {}", e),
    }

    Ok(store)
}

/// Ask the operator before writing to the target
///
/// Refuses to prompt when stdin is not a terminal; `--yes` is then required.
pub fn confirm_write(target: &str, eligible: usize, yes: bool) -> Result<()> {
    if yes {
        return Ok(());
    }

    if !std::io::stdin().is_terminal() {
        bail!(
            "Refusing to write to {} without confirmation: stdin is not a terminal.\n\
             Pass --yes to proceed non-interactively.",
            target
        );
    }

    println!();
    println!("========================================");
    println!("Import summary");
    println!("========================================");
    println!("Target:     {}", target);
    println!("Statements: {} data statement(s)", eligible);
    println!();
    println!("Each statement commits on its own. A failed statement does not");
    println!("roll back the others, and re-running duplicates rows.");
    println!("========================================");
    println!();

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Proceed with the import?")
        .default(false)
        .interact()
        .context("Failed to get confirmation")?;

    if !confirmed {
        tracing::warn!("⚠ User cancelled operation");
        bail!("Import cancelled by user");
    }

    Ok(())
}

/// Progress bar over the eligible statements, hidden in JSON mode
pub fn statement_progress_bar(total: usize, hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(total as u64);
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} statements {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=>-");
    pb.set_style(style);
    pb
}
