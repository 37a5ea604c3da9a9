use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

use sticker_dedup::core::duplicate::ExactDuplicateIndex;
use sticker_dedup::core::integrity::IntegrityGate;
use sticker_dedup::core::scanner::ScannerService;
use sticker_dedup::core::similarity::SimilarityClusterer;
use sticker_dedup::history::{History, HistoryAction, RestoreSelection};
use sticker_dedup::{Config, DuplicateAction, Pipeline, RunSummary};

#[derive(Parser, Debug)]
#[command(
    name = "sticker-dedup",
    version,
    about = "Repair, deduplicate and group sticker packs"
)]
struct Cli {
    /// Log at debug level (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON config file (default: <config dir>/sticker-dedup/config.json)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print the run summary as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Repair Apple CgBI PNGs in place, keeping the originals in `broken_imgs`
    Repair(RunArgs),

    /// Archive or delete byte-identical duplicates
    Dedupe(RunArgs),

    /// Group similar PNGs and prefix them with a group id
    Cluster(RunArgs),

    /// Repair, dedupe and cluster in one pass
    Run(RunArgs),

    /// Work with the duplicate history
    History {
        #[command(subcommand)]
        command: HistoryCmd,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// File or directory to process
    #[arg(short, long, value_name = "PATH")]
    path: PathBuf,

    /// Only report what would change (the default)
    #[arg(long, conflicts_with = "live")]
    dry_run: bool,

    /// Apply changes to the filesystem
    #[arg(long)]
    live: bool,

    /// Clusters at or below this score are collapsed to one file
    #[arg(long, value_name = "0..1")]
    exact_copy_threshold: Option<f64>,

    /// Pairs at or below this distance are considered similar
    #[arg(long, value_name = "0..1")]
    similarity_threshold: Option<f64>,

    /// Perceptual hash length in bits
    #[arg(long, value_name = "BITS")]
    hash_precision: Option<u32>,

    /// What to do with exact duplicates
    #[arg(long, value_enum)]
    action: Option<ActionArg>,

    /// Directory to move duplicates into (default: `<dir>_duplicates` next to each directory)
    #[arg(long, value_name = "DIR")]
    archive_dir: Option<PathBuf>,

    /// Do not ask before deleting
    #[arg(short, long)]
    yes: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ActionArg {
    Archive,
    Delete,
}

impl From<ActionArg> for DuplicateAction {
    fn from(action: ActionArg) -> Self {
        match action {
            ActionArg::Archive => DuplicateAction::Archive,
            ActionArg::Delete => DuplicateAction::Delete,
        }
    }
}

#[derive(Subcommand, Debug)]
enum HistoryCmd {
    /// List all duplicate history records
    List {
        /// Directory the runs were made on
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
    },

    /// Move archived duplicates back (latest record by default)
    Restore {
        /// Directory the runs were made on
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
        /// Restore a specific record index
        #[arg(long, conflicts_with = "all")]
        record: Option<usize>,
        /// Restore all records
        #[arg(long, conflicts_with = "record")]
        all: bool,
    },
}

impl RunArgs {
    /// Defaults, then the config file, then flags.
    fn resolve(&self, config_file: Option<&Path>) -> Result<Config> {
        let mut config = Config::load(config_file).context("Failed to load configuration")?;
        if self.live {
            config.dry_run = false;
        }
        if self.dry_run {
            config.dry_run = true;
        }
        if let Some(value) = self.exact_copy_threshold {
            config.exact_copy_threshold = value;
        }
        if let Some(value) = self.similarity_threshold {
            config.similarity_threshold = value;
        }
        if let Some(value) = self.hash_precision {
            config.hash_precision = value;
        }
        if let Some(action) = self.action {
            config.duplicate_action = action.into();
        }
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    fn duplicate_index(&self, config: &Config) -> ExactDuplicateIndex {
        let index = ExactDuplicateIndex::new(config.duplicate_action);
        match &self.archive_dir {
            Some(dir) => index.with_archive_dir(dir),
            None => index,
        }
    }

    /// False when the user declines a live deletion.
    fn confirm(&self, config: &Config) -> Result<bool> {
        if config.dry_run || config.duplicate_action != DuplicateAction::Delete || self.yes {
            return Ok(true);
        }
        Confirm::new()
            .with_prompt(format!(
                "Permanently delete duplicate images under {}?",
                self.path.display()
            ))
            .default(false)
            .interact()
            .context("Failed to read confirmation")
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config_file = cli.config.as_deref();

    match cli.command {
        Commands::Repair(args) => {
            let config = args.resolve(config_file)?;
            println!("▶ Checking PNG integrity in: {}", args.path.display());
            let spinner = spinner("Repairing CgBI images…")?;
            let (_, summary) = benchmark("repair", || {
                IntegrityGate::new().process(&args.path, config.dry_run)
            })
            .with_context(|| format!("Failed to repair {}", args.path.display()))?;
            spinner.finish_with_message("Repair complete");
            report(&summary, cli.json)?;
        }

        Commands::Dedupe(args) => {
            let config = args.resolve(config_file)?;
            if !args.confirm(&config)? {
                println!("Aborted.");
                return Ok(());
            }
            println!("▶ Deduplicating: {}", args.path.display());
            let (files, failures) = ScannerService::images()
                .discover_files(&args.path)
                .with_context(|| format!("Failed to scan {}", args.path.display()))?;

            let spinner = spinner("Hashing file contents…")?;
            let history = History::for_root(&args.path);
            let outcome = benchmark("deduplication", || {
                args.duplicate_index(&config)
                    .deduplicate(files, &config, Some(&history))
            });
            spinner.finish_with_message("Hashing complete");

            if outcome.plans.is_empty() {
                println!("No duplicates found.");
            }
            for (i, plan) in outcome.plans.iter().enumerate() {
                println!("\n✨ Group {}:", i + 1);
                println!("   🏆 Keeping → {}", plan.survivor.display());
                for relocation in &plan.relocations {
                    let prefix = if config.dry_run { "[dry-run] " } else { "" };
                    match &relocation.to {
                        Some(to) => println!(
                            "   📦 {prefix}MOVE {} → {}",
                            relocation.from.display(),
                            to.display()
                        ),
                        None => println!("   🗑️  {prefix}DELETE {}", relocation.from.display()),
                    }
                }
            }

            let mut summary = outcome.summary;
            summary.files_scanned += failures.len();
            summary.extend_failures(failures);
            if config.dry_run {
                println!("\n⚠️  Dry-run only; no files were changed.");
            } else if !outcome.plans.is_empty() {
                println!("\n✅ Recorded history in {}", history.path().display());
            }
            report(&summary, cli.json)?;
        }

        Commands::Cluster(args) => {
            let config = args.resolve(config_file)?;
            println!("▶ Clustering similar PNGs in: {}", args.path.display());
            let spinner = spinner("Computing perceptual hashes…")?;
            let outcome = benchmark("clustering", || {
                SimilarityClusterer::new(&config).process(&args.path, &config)
            })
            .with_context(|| format!("Failed to cluster {}", args.path.display()))?;
            spinner.finish_with_message("Clustering complete");

            print_groups(&outcome.groups);
            report(&outcome.summary, cli.json)?;
        }

        Commands::Run(args) => {
            let config = args.resolve(config_file)?;
            if !args.confirm(&config)? {
                println!("Aborted.");
                return Ok(());
            }
            println!("▶ Processing: {}", args.path.display());
            let pipeline = Pipeline::with_parts(
                IntegrityGate::new(),
                args.duplicate_index(&config),
                SimilarityClusterer::new(&config),
            );

            let spinner = spinner("Repairing, deduplicating and clustering…")?;
            let outcome = benchmark("full run", || pipeline.run(&args.path, &config))
                .with_context(|| format!("Failed to process {}", args.path.display()))?;
            spinner.finish_with_message("Run complete");

            println!("🧮 {} unique contents", outcome.survivors.len());
            print_groups(&outcome.groups);
            report(&outcome.summary, cli.json)?;
        }

        Commands::History { command } => match command {
            HistoryCmd::List { path } => {
                let history = History::for_root(&path);
                let records = history
                    .list()
                    .with_context(|| format!("Could not read history file {:?}", history.path()))?;

                println!("🗂️  Duplicate History:");
                for (i, record) in records {
                    let culled: Vec<&str> = record.culled.iter().map(|c| c.original.as_str()).collect();
                    let action = match record.action {
                        HistoryAction::Moved => "moved",
                        HistoryAction::Deleted => "deleted",
                    };
                    println!(
                        "[{}] {}\n     kept: {}\n     culled: {:?}\n     action: {}\n",
                        i, record.timestamp, record.retained, culled, action
                    );
                }
            }

            HistoryCmd::Restore { path, record, all } => {
                let history = History::for_root(&path);
                let selection = match (record, all) {
                    (_, true) => RestoreSelection::All,
                    (Some(index), false) => RestoreSelection::Record(index),
                    (None, false) => RestoreSelection::Latest,
                };
                let restored = history
                    .restore(selection)
                    .with_context(|| format!("Failed to restore from {:?}", history.path()))?;

                for (from, to) in &restored.restored {
                    println!("🔄 Restored {:?} → {:?}", from, to);
                }
                for skipped in &restored.skipped {
                    eprintln!("⚠️ Could not restore {:?}; skipping", skipped);
                }
                println!(
                    "🧹 Updated history, removed {} record(s)",
                    restored.records_removed
                );
            }
        },
    }

    Ok(())
}

/// Logs go to stderr so `--json` output stays parseable.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn spinner(message: &'static str) -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    Ok(spinner)
}

/// Run `f()`, print how long it took (with `label`), and return its result.
fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    println!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}

fn print_groups(groups: &BTreeMap<String, Vec<PathBuf>>) {
    let shared: Vec<_> = groups.iter().filter(|(_, paths)| paths.len() > 1).collect();
    if shared.is_empty() {
        println!("No similar images found.");
        return;
    }
    println!("Found {} group(s) of similar images:", shared.len());
    for (group_id, paths) in shared {
        println!(" Group {}:", group_id);
        for path in paths {
            println!("   ▶ {}", path.display());
        }
    }
}

/// Printed even when some files failed.
fn report(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        println!("\n{summary}");
    }
    Ok(())
}
