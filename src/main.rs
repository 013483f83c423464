use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Args, Parser, Subcommand};

use mplarchive::config::{ArchiveConfig, IndexFormat};
use mplarchive::ledger::{FileLedgerStore, LedgerStore};
use mplarchive::namer::{self, NamingRules};
use mplarchive::{Conclusion, Pipeline, PipelineOutcome, RunDescriptor};

#[derive(Parser)]
#[command(
    name = "mplarchive",
    about = "Archive CI image-comparison artifacts into a browsable history",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (defaults: $MPLARCHIVE_CONFIG, ./mplarchive.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Site working copy receiving archive, ledger and index
    #[arg(long, global = true)]
    site_root: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Archive the artifacts of a finished CI run and publish the index
    Archive {
        #[command(flatten)]
        run: RunArgs,

        /// Use artifacts already downloaded to this directory instead of `gh`
        #[arg(long)]
        artifacts_dir: Option<PathBuf>,

        /// Write archive, ledger and index but do not commit or push
        #[arg(long)]
        no_publish: bool,

        /// Archive regardless of the run's conclusion
        #[arg(long)]
        any_conclusion: bool,

        /// Index format override
        #[arg(long, value_enum)]
        format: Option<IndexFormat>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Regenerate the index document from the ledger
    Render {
        /// Index format override
        #[arg(long, value_enum)]
        format: Option<IndexFormat>,
    },

    /// Show the history ledger, newest first
    History {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Print the archive path a run would be filed under
    Name {
        /// Full commit SHA
        #[arg(long)]
        sha: String,

        /// Branch name or ref (e.g. main, refs/pull/42/merge)
        #[arg(long)]
        branch: String,

        /// Timestamp as YYYYMMDD_HHMMSS (default: now)
        #[arg(long)]
        at: Option<String>,

        /// Run id, appended when run-id suffixing is enabled
        #[arg(long)]
        run_id: Option<u64>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// GitHub workflow_run event payload
    #[arg(long, env = "GITHUB_EVENT_PATH")]
    event: Option<PathBuf>,

    /// Upstream run id (takes precedence over --event)
    #[arg(long, requires_all = ["sha", "branch", "repo"])]
    run_id: Option<u64>,

    /// Run conclusion (success, failure, ...)
    #[arg(long, default_value = "failure")]
    conclusion: String,

    /// Full head commit SHA
    #[arg(long)]
    sha: Option<String>,

    /// Head branch or ref
    #[arg(long)]
    branch: Option<String>,

    /// Repository hosting the run (owner/name)
    #[arg(long)]
    repo: Option<String>,

    /// Display title of the run
    #[arg(long)]
    title: Option<String>,
}

impl RunArgs {
    fn into_descriptor(self) -> Result<RunDescriptor> {
        if let Some(run_id) = self.run_id {
            return Ok(RunDescriptor {
                run_id,
                conclusion: self.conclusion.parse::<Conclusion>()?,
                head_sha: self.sha.context("--sha is required with --run-id")?,
                head_branch: self.branch.context("--branch is required with --run-id")?,
                repository: self.repo.context("--repo is required with --run-id")?,
                head_repository: None,
                title: self.title.unwrap_or_else(|| format!("Run {}", run_id)),
            });
        }
        let event = self
            .event
            .context("either --run-id or --event (GITHUB_EVENT_PATH) is required")?;
        RunDescriptor::from_event_file(&event)
    }
}

/// Resolve configuration under a stderr subscriber so warnings raised while
/// locating the file are visible before the configured one is installed.
fn load_config(explicit: Option<&Path>, json: bool) -> Result<ArchiveConfig> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        tracing::subscriber::with_default(builder.json().finish(), || {
            ArchiveConfig::resolve(explicit)
        })
    } else {
        tracing::subscriber::with_default(builder.finish(), || ArchiveConfig::resolve(explicit))
    }
}

fn init_tracing(cfg: &ArchiveConfig, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level));

    if json || cfg.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = load_config(cli.config.as_deref(), cli.log_json)?;
    if let Some(site_root) = cli.site_root {
        cfg.archive.site_root = site_root;
    }
    init_tracing(&cfg, cli.log_json);

    match cli.command {
        Commands::Archive {
            run,
            artifacts_dir,
            no_publish,
            any_conclusion,
            format,
            json,
        } => {
            if no_publish {
                cfg.publish.enabled = false;
            }
            if any_conclusion {
                cfg.archive.only_on_failure = false;
            }
            if let Some(format) = format {
                cfg.index.format = format;
            }
            let run = run.into_descriptor()?;
            tracing::info!(run_id = run.run_id, repo = %run.repository, "Archiving run");

            let pipeline = Pipeline::from_config(cfg, artifacts_dir)?;
            let outcome = pipeline.run(&run, Utc::now()).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
                return Ok(());
            }
            match outcome {
                PipelineOutcome::Skipped { run_id, conclusion } => {
                    println!("Run {} concluded '{}'; nothing archived.", run_id, conclusion);
                }
                PipelineOutcome::Archived(report) => {
                    println!("\n=== mplarchive ===");
                    println!("Archive:  {}", report.entry.archive_path);
                    println!("Commit:   {}", report.entry.commit_short);
                    println!("Workflow: {} ({})", report.entry.title, report.entry.branch_label);
                    if report.configurations.is_empty() {
                        println!("Configurations: none (no displayable artifacts)");
                    } else {
                        println!("\n{:<25} | Files", "Configuration");
                        println!("{:-<25}-|-{:-<6}", "", "");
                        for (name, files) in &report.configurations {
                            println!("{:<25} | {}", name, files);
                        }
                    }
                    for path in &report.evicted {
                        println!("Aged out: {}", path);
                    }
                    println!("\nLedger:   {} entr{}", report.ledger_len, if report.ledger_len == 1 { "y" } else { "ies" });
                    println!("Publish:  {}", report.publish);
                    println!();
                }
            }
        }
        Commands::Render { format } => {
            if let Some(format) = format {
                cfg.index.format = format;
            }
            let index = cfg.index_path();
            let pipeline = Pipeline::from_config(cfg, None)?;
            let rows = pipeline.rerender().await?;
            println!("Index written to {} ({} row{}).", index.display(), rows, if rows == 1 { "" } else { "s" });
        }
        Commands::History { json } => {
            let store = FileLedgerStore::new(cfg.ledger_path(), cfg.ledger.capacity);
            let ledger = store.load()?;
            if json {
                println!("{}", serde_json::to_string_pretty(ledger.entries())?);
            } else if ledger.is_empty() {
                println!("No archived runs.");
            } else {
                println!("{:<19} | {:<7} | {:<8} | Archive", "Date/Time", "Commit", "Label");
                println!("{:-<19}-|-{:-<7}-|-{:-<8}-|-{:-<40}", "", "", "", "");
                for entry in ledger.entries() {
                    println!(
                        "{:<19} | {:<7} | {:<8} | {}",
                        entry.display_date(),
                        entry.commit_short,
                        entry.branch_label,
                        entry.archive_path
                    );
                }
            }
        }
        Commands::Name {
            sha,
            branch,
            at,
            run_id,
        } => {
            let now = match at {
                Some(raw) => {
                    let naive = namer::parse_timestamp(&raw)
                        .with_context(|| format!("invalid timestamp '{}', expected YYYYMMDD_HHMMSS", raw))?;
                    Utc.from_utc_datetime(&naive)
                }
                None => Utc::now(),
            };
            let rules = NamingRules {
                root: &cfg.archive.root,
                trunk: &cfg.archive.trunk_branch,
                reject_unrecognized: cfg.archive.reject_unrecognized_refs,
                run_id_suffix: if cfg.archive.append_run_id { run_id } else { None },
            };
            let name = namer::derive_name(&rules, &sha, &branch, now)?;
            println!("{}", name.archive_path());
        }
    }

    Ok(())
}
