use std::io::Write as _;
use std::process::ExitCode;

use clap::{CommandFactory as _, Parser as _};

use claude_wm::cli::{BackupsCommands, Cli, Commands, ConfigCommands};
use claude_wm::error::WmError;
use claude_wm::merge::apply::CancelToken;
use claude_wm::migrate;
use claude_wm::ops::{self, OpContext};
use claude_wm::recovery::RestoreResult;
use claude_wm::telemetry;

fn main() -> ExitCode {
    let cli = Cli::parse();
    telemetry::init(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, WmError> {
    // Completions need no project context.
    if let Commands::Completions { shell } = &cli.command {
        let mut command = Cli::command();
        let name = command.get_name().to_owned();
        clap_complete::generate(*shell, &mut command, name, &mut std::io::stdout());
        return Ok(ExitCode::SUCCESS);
    }

    let ctx = OpContext::new(&cli.directory)?;
    let cancel = CancelToken::new();
    register_signals(&cancel);

    match cli.command {
        Commands::Config(ConfigCommands::Install) => {
            let outcome = ops::install::run(&ctx)?;
            println!(
                "Installed {} template file(s) into {} ({} new under .claude/).",
                outcome.baseline_files,
                ctx.layout.root().display(),
                outcome.local_files
            );
            if let Some(tag) = outcome.recovery_tag {
                println!("Recovery point: {tag}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config(ConfigCommands::Status(args)) => {
            let report = ops::status::run(&ctx)?;
            if args.json {
                println!("{}", to_json(&report)?);
            } else {
                println!("State: {}", report.state);
                print_changes("Template updates pending", &report.upstream_changes);
                print_changes("Local modifications", &report.local_changes);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config(ConfigCommands::Update(args)) => {
            let op_args = ops::update::UpdateArgs {
                dry_run: args.dry_run,
                conflict_policy: args.conflict_policy(),
                restore_missing: args.restore_missing,
                filters: args.filters.clone(),
                no_backup: args.no_backup,
            };
            match ops::update::run(&ctx, &op_args, &cancel)? {
                ops::update::UpdateOutcome::DryRun(plan) => {
                    println!("{}", plan.to_json_pretty().map_err(json_err)?);
                    // A plan with conflicts is still printed, but the exit
                    // code tells scripts that applying it needs a policy.
                    if plan.has_conflicts() {
                        Ok(ExitCode::from(claude_wm::error::EXIT_CONFLICT))
                    } else {
                        Ok(ExitCode::SUCCESS)
                    }
                }
                ops::update::UpdateOutcome::Applied {
                    outcome,
                    plan,
                    recovery_tag,
                } => {
                    println!(
                        "Applied {} change(s): {} written, {} deleted, {} preserved, {} conflict(s).",
                        outcome.files_written + outcome.files_deleted,
                        outcome.files_written,
                        outcome.files_deleted,
                        plan.summary.n_preserve,
                        plan.summary.n_conflict
                    );
                    for entry in plan.actionable() {
                        println!("  {}", describe_entry(entry));
                    }
                    if let Some(path) = outcome.backup_path {
                        println!("Backup: {}", path.display());
                    }
                    if let Some(tag) = recovery_tag {
                        println!("Recovery point: {tag}");
                    }
                    Ok(ExitCode::SUCCESS)
                }
            }
        }
        Commands::Migrate(args) => {
            let plan = migrate::plan_migration(&ctx.layout.legacy_dir())?;
            if args.dry_run {
                println!("{}", to_json(&plan)?);
                return Ok(ExitCode::SUCCESS);
            }
            let outcome = migrate::apply_migration(
                &plan,
                &ctx.layout,
                migrate::MigrationOptions {
                    archive_legacy: args.archive,
                },
            )?;
            println!(
                "Migrated {} file(s), ignored {}.",
                outcome.migrated, outcome.ignored
            );
            if let Some(bak) = outcome.archived_to {
                println!("Legacy directory archived to {}", bak.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Recover(args) => {
            let op_args = ops::recover::RecoverArgs {
                paths: args.paths.clone(),
                strategy: args.strategy.into(),
            };
            let mut confirm = prompt_confirm;
            let outcome = ops::recover::run(&ctx, &op_args, &mut confirm)?;
            if outcome.report.is_empty() {
                println!("Nothing to recover.");
                return Ok(ExitCode::SUCCESS);
            }
            for (path, result) in &outcome.report {
                match result {
                    RestoreResult::Restored { commit } => {
                        println!("restored  {path}  (from {commit})");
                    }
                    RestoreResult::Declined => println!("declined  {path}"),
                    RestoreResult::Failed { reason } => println!("FAILED    {path}  ({reason})"),
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Backups(BackupsCommands::List) => {
            for archive in ops::backups::list(&ctx)? {
                println!("{}", archive.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Backups(BackupsCommands::Prune { keep }) => {
            let removed = ops::backups::prune(&ctx, keep)?;
            println!("Pruned {} backup archive(s).", removed.len());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Doctor => {
            let checks = ops::doctor::run(&ctx)?;
            let mut all_ok = true;
            for check in &checks {
                let mark = if check.ok { "ok " } else { "FAIL" };
                println!("[{mark}] {:<20} {}", check.name, check.detail);
                all_ok &= check.ok;
            }
            if !all_ok {
                println!("\nSome checks failed; see above.");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Completions { .. } => unreachable!("handled before context setup"),
    }
}

fn register_signals(cancel: &CancelToken) {
    #[cfg(unix)]
    {
        let _ = signal_hook::flag::register(signal_hook::consts::SIGINT, cancel.flag());
        let _ = signal_hook::flag::register(signal_hook::consts::SIGTERM, cancel.flag());
    }
    #[cfg(not(unix))]
    {
        let _ = cancel;
    }
}

fn print_changes(header: &str, changes: &[claude_wm::model::change::Change]) {
    if changes.is_empty() {
        println!("{header}: none");
        return;
    }
    println!("{header}:");
    for change in changes {
        println!("  {:<9} {}", change.kind.to_string(), change.path);
    }
}

fn describe_entry(entry: &claude_wm::merge::plan::PlanEntry) -> String {
    use claude_wm::merge::plan::{ConflictResolution, PlanAction};
    let verb = match entry.action {
        PlanAction::Keep => "keep",
        PlanAction::Apply => "apply",
        PlanAction::PreserveLocal => "preserve",
        PlanAction::Delete => "delete",
        PlanAction::Conflict {
            resolution: ConflictResolution::KeepLocal,
        } => "conflict (kept local)",
        PlanAction::Conflict {
            resolution: ConflictResolution::TakeUpstream,
        } => "conflict (took upstream)",
        PlanAction::Conflict {
            resolution: ConflictResolution::Manual,
        } => "conflict (unresolved)",
    };
    format!("{verb:<24} {}", entry.path)
}

fn prompt_confirm(path: &str, commit: &str) -> bool {
    print!("restore '{path}' from {commit}? [y/N] ");
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim(), "y" | "Y" | "yes")
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, WmError> {
    serde_json::to_string_pretty(value).map_err(json_err)
}

fn json_err(err: serde_json::Error) -> WmError {
    WmError::Io {
        path: std::path::PathBuf::from("<stdout>"),
        source: std::io::Error::other(err),
    }
}
