//! Barbican remediation CLI - operator surface for the catalog pipeline
//!
//! Migrates control families from the rule corpus into the control catalog,
//! previews renders and audit rule reconciliation, and manages catalog
//! backups.

use clap::{Args, Parser, Subcommand};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

mod error;
mod output;

use barbican_remediation::migrate::Outcome;
use barbican_remediation::observability;
use barbican_remediation::render::{AuditRuleSpec, AuditRuleStore, AuditTool, Platform};
use barbican_remediation::{PipelineConfig, RenderTarget, Value};
use error::{CliError, Result};

/// Barbican remediation - render compliance remediations into the control catalog
#[derive(Parser)]
#[command(name = "barbican-remediate")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to remediation.toml (default: ./remediation.toml when present)
    #[arg(short, long, global = true, env = "REMEDIATION_CONFIG")]
    config: Option<PathBuf>,

    /// Corpus root (overrides the configuration)
    #[arg(long, global = true)]
    corpus: Option<PathBuf>,

    /// Catalog file (overrides the configuration)
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a control family and commit it to the catalog
    Migrate(MigrateArgs),

    /// Show the automation classification of a family
    Status {
        /// Control family (e.g., AC)
        #[arg(short, long)]
        family: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the script a rule renders to
    Render {
        /// Rule id
        #[arg(short, long)]
        rule: String,

        /// Platform id (default: first configured platform)
        #[arg(short, long)]
        platform: Option<String>,

        /// Rendering target
        #[arg(short, long, default_value = "bash")]
        target: RenderTarget,
    },

    /// List catalog backups, newest first
    Backups {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Restore the catalog from a backup
    Rollback {
        /// Backup file to restore
        backup: PathBuf,
    },

    /// Preview how an audit rule would land in the local audit rules
    AuditPlan(AuditPlanArgs),
}

#[derive(Args)]
struct MigrateArgs {
    /// Control family (e.g., AC)
    #[arg(short, long)]
    family: String,

    /// Validate only; do not modify the catalog
    #[arg(long)]
    dry_run: bool,

    /// Overwrite existing scripts without asking
    #[arg(long)]
    force: bool,

    /// Output the report as JSON
    #[arg(long)]
    json: bool,

    /// Platform to render for (repeatable; default from configuration)
    #[arg(short, long = "platform")]
    platforms: Vec<String>,

    /// Target to render for (repeatable; default from configuration)
    #[arg(short, long = "target")]
    targets: Vec<RenderTarget>,

    /// Variable override, NAME=VALUE (repeatable)
    #[arg(long = "set", value_name = "NAME=VALUE")]
    overrides: Vec<String>,
}

#[derive(Args)]
struct AuditPlanArgs {
    /// Tool that loads the rules at boot
    #[arg(long, default_value = "augenrules")]
    tool: AuditTool,

    /// Rules file used by auditctl
    #[arg(long, default_value = "/etc/audit/audit.rules")]
    rules_file: PathBuf,

    /// Rules directory used by augenrules
    #[arg(long, default_value = "/etc/audit/rules.d")]
    rules_dir: PathBuf,

    /// Watch this path instead of auditing syscalls
    #[arg(long, conflicts_with = "syscalls")]
    watch: Option<String>,

    /// Watch permission bits
    #[arg(long, default_value = "wa")]
    perm: String,

    /// Rule action list
    #[arg(long, default_value = "always,exit")]
    action: String,

    /// Architecture filter
    #[arg(long, default_value = "b64")]
    arch: String,

    /// Syscalls to audit (comma-separated)
    #[arg(long = "syscall", value_delimiter = ',')]
    syscalls: Vec<String>,

    /// Other filters, e.g. "-F exit=-EACCES"
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    filter: String,

    /// Login uid filters, e.g. "-F auid>=1000 -F auid!=unset"
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    auid_filter: String,

    /// Syscalls an existing rule may be widened with (comma-separated)
    #[arg(long = "group", value_delimiter = ',')]
    grouping: Vec<String>,

    /// Rule key
    #[arg(short, long)]
    key: String,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            output::error(&e.to_string());
            return ExitCode::FAILURE;
        }
    };

    let logging = if cli.verbose {
        config.logging.clone().verbose()
    } else {
        config.logging.clone()
    };
    if let Err(e) = observability::init(&logging) {
        output::warning(&e.to_string());
    }

    let result = match cli.command {
        Commands::Migrate(args) => cmd_migrate(&config, args),
        Commands::Status { family, json } => cmd_status(&config, &family, json),
        Commands::Render {
            rule,
            platform,
            target,
        } => cmd_render(&config, &rule, platform, target),
        Commands::Backups { json } => cmd_backups(&config, json),
        Commands::Rollback { backup } => cmd_rollback(&config, &backup),
        Commands::AuditPlan(args) => cmd_audit_plan(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    if let Some(path) = &cli.config {
        if !path.exists() {
            return Err(CliError::ConfigNotFound { path: path.clone() });
        }
    }

    let mut config = PipelineConfig::load(cli.config.as_deref())?;
    if let Some(corpus) = &cli.corpus {
        config.corpus_dir = corpus.clone();
    }
    if let Some(catalog) = &cli.catalog {
        config.catalog = catalog.clone();
    }
    Ok(config)
}

// =============================================================================
// Command Implementations
// =============================================================================

fn cmd_migrate(config: &PipelineConfig, args: MigrateArgs) -> Result<()> {
    let mut options = config
        .migration_options(&args.family)
        .dry_run(args.dry_run)
        .force(args.force);
    if !args.platforms.is_empty() {
        options = options.platforms(args.platforms);
    }
    if !args.targets.is_empty() {
        options = options.targets(args.targets);
    }
    for assignment in &args.overrides {
        let (name, value) = parse_assignment(assignment)?;
        options = options.with_override(name, value);
    }

    let mut orchestrator = config.orchestrator()?;

    // Conflicts are confirmed interactively; non-interactive runs need --force
    if !args.dry_run && !args.force && !args.json && std::io::stdin().is_terminal() {
        let spinner = output::Spinner::new(&format!("Checking family {}...", options.family.to_uppercase()));
        let plan = orchestrator.preflight(&options)?;
        spinner.clear();

        let conflicts = plan.conflicts().count();
        if conflicts > 0 && !plan.has_errors() {
            output::print_preflight(&plan);
            println!();
            if !output::confirm(&format!("Overwrite existing scripts in {} control(s)?", conflicts))? {
                return Err(CliError::Cancelled);
            }
            options = options.force(true);
        }
    }

    let spinner = (!args.json).then(|| {
        output::Spinner::new(&format!("Migrating family {}...", options.family.to_uppercase()))
    });
    let report = orchestrator.migrate(&options)?;
    if let Some(spinner) = spinner {
        spinner.clear();
    }

    if args.json {
        output::print_json(&report)?;
    } else {
        output::print_report(&report);
    }

    if report.outcome == Outcome::Aborted {
        return Err(CliError::MigrationAborted {
            family: report.family,
            stage: report.stage.to_string(),
        });
    }
    Ok(())
}

fn cmd_status(config: &PipelineConfig, family: &str, json: bool) -> Result<()> {
    let mut orchestrator = config.orchestrator()?;
    let controls = orchestrator.status(family)?;

    if json {
        output::print_json(&controls)?;
    } else {
        output::print_status(family, &controls);
    }
    Ok(())
}

fn cmd_render(config: &PipelineConfig, rule: &str, platform: Option<String>, target: RenderTarget) -> Result<()> {
    let platform_id = platform
        .or_else(|| config.platforms.first().cloned())
        .ok_or_else(|| CliError::invalid("platform", "no platform given or configured"))?;
    let platform = Platform::lookup(&platform_id);

    let mut index = config.index();
    index
        .check_layout()
        .map_err(barbican_remediation::Error::from)?;
    let mut renderer = config.renderer()?;

    match renderer.expand_rule(&mut index, rule, &platform, target)? {
        Ok(expansion) => {
            tracing::debug!(rule, template = %expansion.template, "Rendered rule");
            println!("{}", expansion.text);
            Ok(())
        }
        Err(reason) => Err(CliError::NothingRendered {
            rule: rule.to_string(),
            platform: platform.id.clone(),
            target: target.to_string(),
            reason: format!("{:?}", reason),
        }),
    }
}

fn cmd_backups(config: &PipelineConfig, json: bool) -> Result<()> {
    let store = config.open_store()?;
    let backups = store.list_backups()?;

    if json {
        output::print_json(&backups)?;
    } else {
        output::info(&format!("Catalog: {}", store.path().display()));
        output::print_backups(&backups);
    }
    Ok(())
}

fn cmd_rollback(config: &PipelineConfig, backup: &Path) -> Result<()> {
    let store = config.open_store()?;
    let outcome = store.rollback(backup)?;

    output::success(&format!(
        "Restored {} control(s) from {}",
        outcome.controls.len(),
        backup.display()
    ));
    output::info(&format!("Previous state saved to {}", outcome.backup.display()));
    if !outcome.pruned.is_empty() {
        output::info(&format!("Pruned {} old backup(s)", outcome.pruned.len()));
    }
    Ok(())
}

fn cmd_audit_plan(args: AuditPlanArgs) -> Result<()> {
    let spec = match &args.watch {
        Some(path) => AuditRuleSpec::watch(path, &args.perm, &args.key),
        None if args.syscalls.is_empty() => {
            return Err(CliError::invalid("syscall", "give --syscall or --watch"));
        }
        None => AuditRuleSpec::syscall(
            &format!("-a {} -F arch={}", args.action, args.arch),
            &args.filter,
            &args.auid_filter,
            &args.syscalls,
            &args.key,
            &args.grouping,
        ),
    };

    let store = AuditRuleStore::load(args.tool, &args.rules_file, &args.rules_dir)?;
    let plan = store.plan(&spec);

    if args.json {
        output::print_json(&plan)?;
    } else {
        output::info(&format!("Desired rule ({}): {}", store.tool(), spec.full_rule()));
        println!("{}", plan);
    }
    Ok(())
}

/// Split `NAME=VALUE`; the value is kept as text
fn parse_assignment(assignment: &str) -> Result<(String, Value)> {
    match assignment.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), Value::from(value.to_string())))
        }
        _ => Err(CliError::invalid("--set", format!("expected NAME=VALUE, got '{}'", assignment))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_assignment() {
        let (name, value) = parse_assignment("var_sshd_set_keepalive=1").unwrap();
        assert_eq!(name, "var_sshd_set_keepalive");
        assert_eq!(value, Value::from("1"));

        let (_, value) = parse_assignment("KEY=").unwrap();
        assert_eq!(value, Value::from(""));

        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=x").is_err());
    }

    #[test]
    fn test_rollback_restores_snapshot_and_records_backup() {
        use barbican_remediation::testing::{standard_catalog_entries, write_catalog};

        let dir = tempfile::tempdir().unwrap();
        let entries = standard_catalog_entries();
        let catalog = write_catalog(dir.path(), &entries).unwrap();
        let snapshot = dir.path().join("snapshot.json");
        std::fs::copy(&catalog, &snapshot).unwrap();
        let original = std::fs::read_to_string(&catalog).unwrap();

        write_catalog(dir.path(), &entries[..2]).unwrap();
        let config = PipelineConfig {
            catalog: catalog.clone(),
            ..PipelineConfig::default()
        };

        cmd_rollback(&config, &snapshot).unwrap();
        assert_eq!(std::fs::read_to_string(&catalog).unwrap(), original);

        cmd_backups(&config, true).unwrap();
        let backups = config.open_store().unwrap().list_backups().unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].label.as_deref(), Some("pre-rollback"));
        assert!(backups[0].path.starts_with(dir.path().join("backups")));

        let missing = dir.path().join("missing.json");
        assert!(cmd_rollback(&config, &missing).is_err());
        assert_eq!(std::fs::read_to_string(&catalog).unwrap(), original);
    }

    #[test]
    fn test_migrate_args() {
        let cli = Cli::try_parse_from([
            "barbican-remediate",
            "--catalog",
            "/tmp/controls.json",
            "migrate",
            "--family",
            "AC",
            "--dry-run",
            "-t",
            "bash",
            "--set",
            "KEY=audit",
        ])
        .unwrap();
        assert_eq!(cli.catalog, Some(PathBuf::from("/tmp/controls.json")));
        match cli.command {
            Commands::Migrate(args) => {
                assert_eq!(args.family, "AC");
                assert!(args.dry_run);
                assert_eq!(args.targets, vec![RenderTarget::Bash]);
                assert_eq!(args.overrides, vec!["KEY=audit"]);
            }
            _ => panic!("expected migrate"),
        }
    }
}
