//! Output formatting and display utilities
//!
//! Provides colored, formatted output for the CLI

use colored::{ColoredString, Colorize};
use std::io::Write;

use barbican_remediation::catalog::BackupInfo;
use barbican_remediation::corpus::AutomationStatus;
use barbican_remediation::migrate::{
    ControlStatus, ControlSummary, MigrationReport, Outcome, PreflightReport,
};
use barbican_remediation::format_size;

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red().bold(), msg);
}

/// Print a warning message
pub fn warning(msg: &str) {
    println!("{} {}", "⚠".yellow().bold(), msg);
}

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue().bold(), msg);
}

/// Print a header
pub fn header(msg: &str) {
    println!("\n{}", msg.bold().underline());
}

/// Print a subheader
pub fn subheader(msg: &str) {
    println!("\n{}", msg.bold());
}

fn automation(status: AutomationStatus) -> ColoredString {
    let text = format!("{:<9}", status.to_string());
    match status {
        AutomationStatus::Automated => text.green(),
        AutomationStatus::Partial => text.cyan(),
        AutomationStatus::Manual => text.yellow(),
        AutomationStatus::Pending => text.dimmed(),
    }
}

/// Print a family classification table
pub fn print_status(family: &str, controls: &[ControlSummary]) {
    header(&format!("Family {}", family.to_uppercase()));

    for control in controls {
        let catalog = match (control.in_catalog, control.has_scripts) {
            (false, _) => "not in catalog".red(),
            (true, true) => "has scripts".green(),
            (true, false) => "no scripts".dimmed(),
        };
        println!(
            "  {:<12} {} {:<15} {}",
            control.control_id.bold(),
            automation(control.automation),
            catalog,
            control.title.as_deref().unwrap_or("").dimmed()
        );
        if !control.rules.is_empty() {
            println!("    {}", control.rules.join(", ").dimmed());
        }
    }

    let renderable = controls.iter().filter(|c| c.automation.is_renderable()).count();
    println!();
    info(&format!("{} of {} control(s) renderable", renderable, controls.len()));
}

/// Print pre-flight findings that need the operator's attention
pub fn print_preflight(report: &PreflightReport) {
    for message in &report.errors {
        error(message);
    }
    for message in &report.warnings {
        warning(message);
    }

    let conflicts: Vec<_> = report.conflicts().collect();
    if !conflicts.is_empty() {
        subheader("Existing scripts would be overwritten:");
        for control in conflicts {
            println!(
                "  {} {} {}",
                "↔".yellow(),
                control.control_id.bold(),
                control.conflicts.join(", ").dimmed()
            );
        }
    }
}

/// Print a migration report
pub fn print_report(report: &MigrationReport) {
    header(&format!(
        "Migration {} ({})",
        report.family,
        if report.dry_run { "dry run" } else { "live" }
    ));

    for control in &report.controls {
        let icon = match control.status {
            ControlStatus::Rendered => "✓".green(),
            ControlStatus::Skipped => "·".dimmed(),
            ControlStatus::Failed => "✗".red(),
            ControlStatus::Conflict => "↔".yellow(),
        };
        println!(
            "  {} {:<12} {} {}",
            icon,
            control.control_id.bold(),
            automation(control.automation),
            control.status.to_string().dimmed()
        );
        for err in &control.errors {
            println!("      {}", err.red());
        }
        for warn in &control.warnings {
            println!("      {}", warn.yellow());
        }
    }

    let c = &report.counters;
    println!();
    println!(
        "  {} total, {} rendered, {} skipped, {} failed, {} conflicts, {} scripts",
        c.total, c.rendered, c.skipped, c.failed, c.conflicts, c.scripts
    );
    println!("  stage reached: {}", report.stage);
    if let Some(backup) = &report.backup {
        println!("  backup: {}", backup.display());
    }
    println!();

    match report.outcome {
        Outcome::Succeeded if report.catalog_touched => success("Catalog updated"),
        Outcome::Succeeded => success("Nothing to commit"),
        Outcome::DryRun => info("Dry run complete; catalog not modified"),
        Outcome::Aborted => {
            for err in &report.errors {
                error(err);
            }
        }
    }
}

/// Print the backups of a catalog, newest first
pub fn print_backups(backups: &[BackupInfo]) {
    if backups.is_empty() {
        info("No backups");
        return;
    }
    subheader("Backups:");
    for backup in backups {
        println!(
            "  {} {}  {:>9}  {}",
            "→".cyan(),
            backup.created.format("%Y-%m-%d %H:%M:%S UTC"),
            format_size(backup.size),
            backup.path.display()
        );
        if let Some(label) = &backup.label {
            println!("      {}", label.dimmed());
        }
    }
}

/// Ask a yes/no question on the terminal; anything but "y"/"yes" is no
pub fn confirm(question: &str) -> std::io::Result<bool> {
    print!("{} {} [y/N] ", "?".cyan().bold(), question);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

/// Print a progress spinner for long operations
pub struct Spinner {
    pb: indicatif::ProgressBar,
}

impl Spinner {
    pub fn new(msg: &str) -> Self {
        let pb = indicatif::ProgressBar::new_spinner();
        if let Ok(style) = indicatif::ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        Self { pb }
    }

    pub fn finish_success(self, msg: &str) {
        self.pb.finish_and_clear();
        success(msg);
    }

    pub fn finish_error(self, msg: &str) {
        self.pb.finish_and_clear();
        error(msg);
    }

    /// Clear the spinner without a message
    pub fn clear(self) {
        self.pb.finish_and_clear();
    }
}

/// Print a JSON report
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<(), serde_json::Error> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}
