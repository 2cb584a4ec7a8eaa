use clap::{Parser, Subcommand};

use adosync::{AdoSync, Settings, SyncOptions, SyncProgress, SyncReport};

#[derive(Parser)]
#[command(name = "adosync", about = "Azure DevOps work item sync CLI")]
struct Cli {
    /// Configuration file path (default: ~/.adosync/config.json)
    #[arg(long)]
    config: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Progress reporter that writes to stderr.
struct StderrProgress;

impl SyncProgress for StderrProgress {
    fn on_items_received(&self, scope: &str, count: usize) {
        eprintln!("[{scope}] {count} work items");
    }

    fn on_spans_computed(&self, scope: &str, starts: usize, targets: usize) {
        eprintln!("[{scope}] {starts} start dates, {targets} target dates");
    }

    fn on_item_updated(&self, scope: &str, id: u64) {
        eprintln!("[{scope}] updated {id}");
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run sync jobs against the configured project
    Sync {
        #[command(subcommand)]
        job: SyncJob,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum SyncJob {
    /// Roll child start/target dates up onto parent items
    Dates {
        /// Maximum concurrent work item fetches
        #[arg(long, default_value = "8")]
        concurrency: usize,
        /// Work item type to aggregate; repeat for multiple passes in order
        #[arg(long = "type", value_name = "TYPE")]
        types: Vec<String>,
    },
    /// Propagate epic tags down the hierarchy
    Tags,
    /// Link configured parent/child pairs
    Relations,
    /// Create configured work items
    Create,
    /// Run every job in order
    All {
        /// Maximum concurrent work item fetches
        #[arg(long, default_value = "8")]
        concurrency: usize,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the resolved configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Show => print_settings(&settings),
        },
        Commands::Sync { job } => {
            let ado = AdoSync::new(settings)?;
            handle_sync(&ado, job).await?;
        }
    }

    Ok(())
}

async fn handle_sync(ado: &AdoSync, job: SyncJob) -> anyhow::Result<()> {
    let progress = StderrProgress;
    match job {
        SyncJob::Dates { concurrency, types } => {
            let options = make_options(concurrency, types);
            let reports = run_cancellable(ado.sync_dates(&options, &progress)).await?;
            for report in &reports {
                print_sync_report(report);
            }
        }
        SyncJob::Tags => {
            let report = run_cancellable(ado.sync_tags(&progress)).await?;
            print_sync_report(&report);
        }
        SyncJob::Relations => {
            let report = run_cancellable(ado.sync_relations(&progress)).await?;
            print_sync_report(&report);
        }
        SyncJob::Create => {
            let report = run_cancellable(ado.create_work_items(&progress)).await?;
            print_sync_report(&report);
        }
        SyncJob::All { concurrency } => {
            let options = SyncOptions {
                concurrency,
                ..SyncOptions::default()
            };
            let reports = run_cancellable(ado.sync_all(&options, &progress)).await?;
            for report in &reports {
                print_sync_report(report);
                println!();
            }
        }
    }
    Ok(())
}

/// Race a job against ctrl-c. Dropping the job future aborts its in-flight
/// fetch tasks.
async fn run_cancellable<T, F>(future: F) -> anyhow::Result<T>
where
    F: std::future::Future<Output = adosync::Result<T>>,
{
    tokio::select! {
        result = future => Ok(result?),
        _ = tokio::signal::ctrl_c() => anyhow::bail!("Interrupted, shutting down"),
    }
}

fn make_options(concurrency: usize, types: Vec<String>) -> SyncOptions {
    let mut options = SyncOptions {
        concurrency,
        ..SyncOptions::default()
    };
    if !types.is_empty() {
        options.work_item_types = types;
    }
    options
}

fn print_settings(settings: &Settings) {
    println!("organization = {}", settings.organization);
    println!("project      = {}", settings.project);
    println!("base_url     = {}", settings.base_url);
    println!(
        "access_token = {}",
        if settings.access_token.is_some() {
            "(set)"
        } else {
            "(not set)"
        }
    );
    println!("relations    = {} configured", settings.relations.len());
    println!("work_items   = {} configured", settings.work_items.len());
}

fn print_sync_report(report: &SyncReport) {
    println!("Sync: {}", report.scope);
    println!("  Status:  {:?}", report.status);
    println!("  Seen:    {} items", report.items_seen);
    println!("  Updated: {} items", report.items_updated);
    println!("  Failed:  {} items", report.items_failed);
    if let Some(ref err) = report.error {
        println!("  Error:   {err}");
    }
}
