//! Vigil - Scan Job Orchestrator CLI

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use vigil::artifacts;
use vigil::config::AppConfig;
use vigil::job::JobRunner;
use vigil::models::{Finding, NmapProfile, ScanPolicy, SeveritySummary};
use vigil::scheduler::{ScanCommand, Scheduler, SystemClock};
use vigil::store::{MemoryStore, Store};
use vigil::targets::normalize_targets;

/// Vigil - orchestrates external security scanners over target sets
#[derive(Parser)]
#[command(name = "vigil", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an ad-hoc scan and stream the live log to stdout
    Scan {
        /// Targets: hosts, IPs, or URLs (whitespace/comma separated)
        #[arg(required = true)]
        targets: Vec<String>,

        #[command(flatten)]
        policy: PolicyArgs,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Run a scan on a cron cadence until interrupted
    Schedule {
        /// Cron expression (e.g. "0 2 * * *")
        #[arg(long)]
        cron: String,

        /// Targets: hosts, IPs, or URLs (whitespace/comma separated)
        #[arg(required = true)]
        targets: Vec<String>,

        #[command(flatten)]
        policy: PolicyArgs,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Print the severity summary for a recorded job directory
    Summary {
        /// Path to the job directory (containing nuclei.jsonl)
        #[arg(short, long)]
        job_dir: PathBuf,
    },
}

#[derive(Args)]
struct PolicyArgs {
    /// Disable the nmap stage
    #[arg(long)]
    no_nmap: bool,

    /// Nmap profile (quick, full, vuln)
    #[arg(long, default_value = "vuln")]
    nmap_profile: String,

    /// Disable the nuclei stage
    #[arg(long)]
    no_nuclei: bool,

    /// Nuclei severity filter
    #[arg(long, default_value = "critical,high,medium")]
    severity: String,

    /// Enable the nikto stage
    #[arg(long)]
    nikto: bool,

    /// Enable the wpscan stage
    #[arg(long)]
    wpscan: bool,

    /// HTTP basic-auth user
    #[arg(long)]
    basic_user: Option<String>,

    /// HTTP basic-auth password
    #[arg(long)]
    basic_pass: Option<String>,

    /// How many targets to scan concurrently
    #[arg(long, default_value_t = 2)]
    concurrency: usize,

    /// Nuclei rate limit (requests per second)
    #[arg(long)]
    rate_limit: Option<u32>,
}

#[derive(Args)]
struct CommonArgs {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory for job logs and findings
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Per-tool read timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl PolicyArgs {
    fn to_policy(&self) -> ScanPolicy {
        ScanPolicy {
            name: "Ad-hoc".to_string(),
            use_nmap: !self.no_nmap,
            nmap_profile: NmapProfile::parse(&self.nmap_profile),
            use_nuclei: !self.no_nuclei,
            nuclei_severity: self.severity.clone(),
            use_nikto: self.nikto,
            use_wpscan: self.wpscan,
            http_basic_user: self.basic_user.clone().unwrap_or_default(),
            http_basic_pass: self.basic_pass.clone().unwrap_or_default(),
            concurrency: self.concurrency,
            nuclei_rate: self.rate_limit,
            exclude_paths: String::new(),
        }
    }
}

impl CommonArgs {
    fn load_config(&self) -> vigil::error::Result<AppConfig> {
        let mut config = AppConfig::load(self.config.as_deref())?;
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(timeout) = self.timeout {
            config.tool_timeout_secs = timeout;
        }
        Ok(config)
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("vigil=debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn print_summary(summary: &SeveritySummary) {
    println!("\n{}", "  Job Summary".bold());
    println!("  {}", "─".repeat(35));
    println!("  Findings: {}", summary.nuclei_findings);
    println!(
        "  {} {} {} {} {}",
        format!("{} critical", summary.severity.critical).red().bold(),
        format!("{} high", summary.severity.high).bright_red(),
        format!("{} medium", summary.severity.medium).yellow(),
        format!("{} low", summary.severity.low).blue(),
        format!("{} info", summary.severity.info).white(),
    );
    println!("  Risk score: {}", summary.risk_score.to_string().bold());
}

/// Seeds the in-memory store with an ad-hoc scan and returns its id
async fn seed_scan(
    store: &MemoryStore,
    targets: &[String],
    policy: ScanPolicy,
    cron: Option<String>,
) -> i64 {
    let policy_id = store.add_policy(policy).await;
    let mut asset_ids = Vec::with_capacity(targets.len());
    for target in targets {
        asset_ids.push(store.add_asset(target).await);
    }
    store.add_scan("Ad-hoc Run", policy_id, asset_ids, cron).await
}

async fn drain_to_stdout(mut stream: mpsc::Receiver<String>) {
    let mut stdout = std::io::stdout();
    while let Some(chunk) = stream.recv().await {
        print!("{chunk}");
        let _ = stdout.flush();
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan {
            targets,
            policy,
            common,
        } => {
            init_tracing(common.verbose);
            let config = common.load_config()?;
            let targets = normalize_targets(&targets.join(" "));
            if targets.is_empty() {
                eprintln!("{}", "No valid targets.".red());
                std::process::exit(1);
            }

            let store = Arc::new(MemoryStore::new());
            let scan_id = seed_scan(&store, &targets, policy.to_policy(), None).await;
            let dyn_store: Arc<dyn Store> = store.clone();
            let runner = JobRunner::new(dyn_store, Arc::new(config));

            drain_to_stdout(runner.run_scan(scan_id)).await;

            if let Some(job) = store.latest_job().await {
                if let Some(summary) = &job.summary {
                    print_summary(summary);
                }
            }
        }

        Commands::Schedule {
            cron,
            targets,
            policy,
            common,
        } => {
            init_tracing(common.verbose);
            let config = common.load_config()?;
            let targets = normalize_targets(&targets.join(" "));
            if targets.is_empty() {
                eprintln!("{}", "No valid targets.".red());
                std::process::exit(1);
            }

            let store = Arc::new(MemoryStore::new());
            let scan_id =
                seed_scan(&store, &targets, policy.to_policy(), Some(cron.clone())).await;
            let dyn_store: Arc<dyn Store> = store.clone();

            let (cmd_tx, mut cmd_rx) = mpsc::channel(16);
            let mut scheduler = Scheduler::new(
                dyn_store.clone(),
                Arc::new(SystemClock),
                cmd_tx,
                Duration::from_secs(config.scheduler_tick_secs),
                config.scheduler_disabled,
            );
            scheduler.register(scan_id, &cron);
            if let Some(next) = scheduler.next_fire_time(scan_id) {
                println!("Scheduled {} for {} (next fire: {next})", "Ad-hoc Run".bold(), cron);
            }
            tokio::spawn(scheduler.run());

            let runner = JobRunner::new(dyn_store, Arc::new(config));
            while let Some(ScanCommand::Run(id)) = cmd_rx.recv().await {
                drain_to_stdout(runner.run_scan(id)).await;
            }
        }

        Commands::Summary { job_dir } => {
            init_tracing(false);
            let findings: Vec<Finding> =
                artifacts::load_jsonl(&job_dir.join("nuclei.jsonl")).await?;
            let summary = SeveritySummary::from_findings(&findings);
            print_summary(&summary);
        }
    }

    Ok(())
}
