//! Command-line definitions.
//!
//! The binary surface maps one subcommand to one `ops` module; everything
//! here is parsing and flag plumbing, no behavior.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::merge::plan::ConflictPolicy;
use crate::recovery::RecoveryStrategy;

/// Workflow-management CLI
///
/// claude-wm installs a versioned configuration template tree into your
/// project (under .claude/) and keeps it up to date without losing your
/// edits. It tracks a baseline snapshot of what was installed, detects
/// three-way divergence between the embedded templates, that baseline, and
/// your live configuration, and applies updates atomically with a backup
/// and a recovery trail.
///
/// QUICK START:
///
///   claude-wm config install        # first-time setup in this project
///   claude-wm config status         # what changed, on both sides
///   claude-wm config update         # pull template updates, keep your edits
///
/// Your edits win by default: a file you changed is never overwritten
/// unless you pass --take-upstream. Every update snapshots .claude/ into
/// .wm/backups/ first.
#[derive(Parser)]
#[command(name = "claude-wm")]
#[command(version, about)]
#[command(propagate_version = true)]
#[command(
    after_help = "See 'claude-wm <command> --help' for more information on a specific command."
)]
pub struct Cli {
    /// Project root to operate on.
    #[arg(short = 'C', long = "directory", global = true, default_value = ".")]
    pub directory: PathBuf,

    /// Increase log verbosity (-v info, -vv debug; RUST_LOG overrides).
    #[arg(short = 'v', long = "verbose", global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage the configuration trees
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Migrate a legacy .claude-wm/ layout into .wm/
    Migrate(MigrateArgs),

    /// Restore corrupted state files from recovery history
    Recover(RecoverArgs),

    /// Manage pre-update backup archives
    #[command(subcommand)]
    Backups(BackupsCommands),

    /// Check system requirements and project health
    ///
    /// Also initializes the git recovery repository when git is available —
    /// run this once to turn on recovery points.
    Doctor,

    /// Generate shell completions
    Completions {
        /// The shell to generate for.
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Install the embedded templates into this project
    ///
    /// Creates .claude/ and .wm/baseline/ from the embedded tree and
    /// records meta.json. Fails if the project is already installed.
    /// Pre-existing files under .claude/ are kept.
    Install,

    /// Show divergence between templates, baseline, and local config
    Status(StatusArgs),

    /// Merge template updates into the local configuration
    Update(UpdateArgs),
}

#[derive(Args)]
pub struct StatusArgs {
    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct UpdateArgs {
    /// Compute and print the plan (JSON) without applying it.
    #[arg(long)]
    pub dry_run: bool,

    /// Abort instead of auto-resolving conflicts (exit code 4).
    #[arg(long, conflicts_with = "take_upstream")]
    pub strict: bool,

    /// Resolve conflicts by overwriting local edits with the template.
    #[arg(long)]
    pub take_upstream: bool,

    /// Re-install template files you deleted locally.
    #[arg(long)]
    pub restore_missing: bool,

    /// Only touch paths matching these glob patterns (repeatable).
    #[arg(long = "filter", value_name = "GLOB")]
    pub filters: Vec<String>,

    /// Skip the pre-apply ZIP snapshot.
    #[arg(long)]
    pub no_backup: bool,
}

impl UpdateArgs {
    /// The conflict policy the flags select, if any.
    #[must_use]
    pub fn conflict_policy(&self) -> Option<ConflictPolicy> {
        if self.strict {
            Some(ConflictPolicy::Abort)
        } else if self.take_upstream {
            Some(ConflictPolicy::TakeUpstream)
        } else {
            None
        }
    }
}

#[derive(Args)]
pub struct MigrateArgs {
    /// Print the migration plan (JSON) without applying it.
    #[arg(long)]
    pub dry_run: bool,

    /// Rename the legacy directory to .claude-wm.bak after success.
    #[arg(long)]
    pub archive: bool,
}

#[derive(Args)]
pub struct RecoverArgs {
    /// Restore strategy.
    #[arg(long, value_enum, default_value_t = StrategyArg::Automatic)]
    pub strategy: StrategyArg,

    /// Root-relative paths to restore (default: scan for corruption).
    pub paths: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    /// Restore the newest clean version of each file.
    Automatic,
    /// Confirm each restore.
    Conservative,
    /// Accept lossy restores when no clean version exists.
    Aggressive,
    /// Prompt for every candidate.
    Interactive,
}

impl From<StrategyArg> for RecoveryStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Automatic => Self::Automatic,
            StrategyArg::Conservative => Self::Conservative,
            StrategyArg::Aggressive => Self::Aggressive,
            StrategyArg::Interactive => Self::Interactive,
        }
    }
}

#[derive(Subcommand)]
pub enum BackupsCommands {
    /// List backup archives, oldest first
    List,

    /// Delete all but the newest N archives
    Prune {
        /// How many archives to keep.
        #[arg(long, default_value_t = 10)]
        keep: usize,
    },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).expect("must parse")
    }

    #[test]
    fn parses_config_update_flags() {
        let cli = parse(&[
            "claude-wm",
            "config",
            "update",
            "--dry-run",
            "--restore-missing",
            "--filter",
            "commands/**",
            "--filter",
            "agents/**",
        ]);
        match cli.command {
            Commands::Config(ConfigCommands::Update(args)) => {
                assert!(args.dry_run);
                assert!(args.restore_missing);
                assert_eq!(args.filters, vec!["commands/**", "agents/**"]);
                assert_eq!(args.conflict_policy(), None);
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn strict_and_take_upstream_conflict() {
        assert!(
            Cli::try_parse_from([
                "claude-wm",
                "config",
                "update",
                "--strict",
                "--take-upstream"
            ])
            .is_err()
        );
    }

    #[test]
    fn strict_maps_to_abort_policy() {
        let cli = parse(&["claude-wm", "config", "update", "--strict"]);
        match cli.command {
            Commands::Config(ConfigCommands::Update(args)) => {
                assert_eq!(args.conflict_policy(), Some(ConflictPolicy::Abort));
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn global_directory_flag() {
        let cli = parse(&["claude-wm", "-C", "/tmp/proj", "doctor"]);
        assert_eq!(cli.directory, PathBuf::from("/tmp/proj"));
    }

    #[test]
    fn recover_strategy_parses() {
        let cli = parse(&[
            "claude-wm",
            "recover",
            "--strategy",
            "aggressive",
            ".claude/state.json",
        ]);
        match cli.command {
            Commands::Recover(args) => {
                assert_eq!(args.strategy, StrategyArg::Aggressive);
                assert_eq!(args.paths, vec![".claude/state.json"]);
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn backups_prune_default_keep() {
        let cli = parse(&["claude-wm", "backups", "prune"]);
        match cli.command {
            Commands::Backups(BackupsCommands::Prune { keep }) => assert_eq!(keep, 10),
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn verbosity_counts() {
        let cli = parse(&["claude-wm", "-vv", "doctor"]);
        assert_eq!(cli.verbose, 2);
    }
}
