use anyhow::Result;
use clap::{Parser, Subcommand};
use proxy_sweep::scan::geo::GeoLocator;
use proxy_sweep::scan::models::Task;
use proxy_sweep::scan::progress::RunContext;
use proxy_sweep::scan::retry::{self, MAX_RETRIES};
use proxy_sweep::scan::targets::{FEEDBACK_RANGE_LIMIT, QUICK_RESCAN_RANGE_LIMIT};
use proxy_sweep::scan::{addr, runner};
use proxy_sweep::{
    report, ResultStore, ScannerConfig, StealthProbe, TargetGenerator, VerificationPipeline,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Targeted scans default to this many generated candidates.
const DEFAULT_TARGET_COUNT: usize = 1000;
/// Upper bound on generated candidates per targeted scan.
const MAX_TARGET_COUNT: usize = 5000;

/// An adaptive open HTTP proxy scanner and verifier
#[derive(Parser)]
#[command(name = "proxy-sweep")]
#[command(about = "An adaptive open HTTP proxy scanner and verifier")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Database file path
    #[arg(short, long, default_value = "proxies.db")]
    database: String,

    /// Configuration file path
    #[arg(short, long, default_value = "proxy_scanner.cfg")]
    config: PathBuf,

    /// MMDB file for locating verified proxies
    #[arg(long)]
    mmdb: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for open proxy candidates
    Scan {
        /// Number of adaptively generated targets
        #[arg(short, long)]
        targeted: Option<usize>,
        /// File of CIDR ranges to sweep completely
        #[arg(short, long)]
        ranges: Option<PathBuf>,
        /// Re-scan previously working ranges
        #[arg(short, long)]
        working: bool,
        /// Candidate CIDR list consumed by targeted generation
        #[arg(long, default_value = "ipranges.txt")]
        candidates: PathBuf,
        /// Output file for open proxy candidates
        #[arg(short, long, default_value = "open_proxies.txt")]
        output: PathBuf,
        /// Results summary file
        #[arg(long, default_value = "results.txt")]
        results: PathBuf,
    },
    /// Verify open candidates and record the working proxies
    Verify {
        /// Input file of open proxy candidates
        #[arg(short, long, default_value = "open_proxies.txt")]
        input: PathBuf,
        /// Output file for working proxies
        #[arg(long, default_value = "working_proxies.txt")]
        proxies_output: PathBuf,
        /// Output file for working ranges
        #[arg(long, default_value = "working_ranges.txt")]
        ranges_output: PathBuf,
        /// Results summary file
        #[arg(long, default_value = "results.txt")]
        results: PathBuf,
    },
    /// Check a single IP:PORT candidate
    Check {
        /// Target in IP:PORT form
        target: String,
    },
    /// List verified proxies, fastest first
    List {
        /// Maximum number of proxies to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },
    /// Write the results summary from the database
    Export {
        /// Results summary file
        #[arg(short, long, default_value = "results.txt")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = ScannerConfig::load(&cli.config);
    if !cli.config.exists() {
        // Working files must be creatable; failing here is fatal.
        config.save(&cli.config)?;
    }

    // Storage must be available; everything past this point is recoverable
    // per task.
    let store = ResultStore::open(&cli.database).await?;
    let geo = match &cli.mmdb {
        Some(path) => Some(GeoLocator::from_path(path)?),
        None => None,
    };

    match cli.command {
        Commands::Scan {
            targeted,
            ranges,
            working,
            candidates,
            output,
            results,
        } => {
            let generator = TargetGenerator::new(config.ports.clone())
                .with_candidate_ranges(load_candidate_ranges(&candidates)?);

            let tasks = if let Some(path) = ranges {
                let nets = addr::load_range_file(&path)?;
                generator.from_ranges(&nets)
            } else if working {
                let feedback = store.working_ranges(QUICK_RESCAN_RANGE_LIMIT as i64).await?;
                generator.from_feedback(&feedback)
            } else {
                let count = targeted
                    .unwrap_or(DEFAULT_TARGET_COUNT)
                    .clamp(10, MAX_TARGET_COUNT);
                let feedback = store.working_ranges(FEEDBACK_RANGE_LIMIT as i64).await?;
                generator.targeted(count, &feedback)
            };

            if tasks.is_empty() {
                println!("No targets to scan.");
                return Ok(());
            }

            println!(
                "Scanning {} targets with concurrency {}, timeout {}s",
                tasks.len(),
                config.concurrency,
                config.timeout_secs
            );

            let ctx = Arc::new(RunContext::new());
            watch_for_ctrl_c(Arc::clone(&ctx));

            let probe = StealthProbe::new(config.timeout());
            let open = runner::discover_open_proxies(&config, &probe, &ctx, tasks).await;
            report::write_task_list(&open, &output)?;

            println!(
                "Found {} open proxies in {}s ({:.0}/s), saved to {:?}",
                open.len(),
                ctx.elapsed().as_secs(),
                ctx.throughput(),
                output
            );
            report::write_summary(&store, &ctx.events(), &results).await?;
        }

        Commands::Verify {
            input,
            proxies_output,
            ranges_output,
            results,
        } => {
            let candidates = report::read_task_list(&input)?;
            if candidates.is_empty() {
                println!("No candidates to verify.");
                return Ok(());
            }

            println!(
                "Verifying {} candidates with concurrency {}",
                candidates.len(),
                config.concurrency
            );

            let ctx = Arc::new(RunContext::new());
            watch_for_ctrl_c(Arc::clone(&ctx));

            let client_ip = VerificationPipeline::discover_client_ip(config.timeout()).await;
            let pipeline = VerificationPipeline::new(config.timeout(), client_ip);

            let probed = candidates.clone();
            let working = runner::verify_candidates(&config, &pipeline, &ctx, candidates).await;
            let stored = runner::record_verified(&store, geo.as_ref(), &probed, &working, &ctx).await;

            let proxies: Vec<Task> = working.iter().map(|(task, _)| *task).collect();
            report::write_task_list(&proxies, &proxies_output)?;

            let mut range_list: Vec<String> = working
                .iter()
                .map(|(task, _)| addr::containing_slash24(task.addr).to_string())
                .collect();
            range_list.sort();
            range_list.dedup();
            report::write_range_list(&range_list, &ranges_output)?;

            println!(
                "Verified {} working proxies in {}s ({} recorded, {} ranges)",
                working.len(),
                ctx.elapsed().as_secs(),
                stored,
                range_list.len()
            );
            report::write_summary(&store, &ctx.events(), &results).await?;
        }

        Commands::Check { target } => {
            let task: Task = target.parse()?;
            println!("Testing {task}...");

            let probe = StealthProbe::new(config.timeout());
            let probe = &probe;
            let open = retry::probe_with_retries(MAX_RETRIES, || async move {
                Ok(probe.classify(task.addr, task.port).await)
            })
            .await;
            if !open {
                println!("Proxy {task} is not working");
                return Ok(());
            }

            println!("Proxy {task} looks open, running full verification...");
            let client_ip = VerificationPipeline::discover_client_ip(config.timeout()).await;
            let pipeline = VerificationPipeline::new(config.timeout(), client_ip);
            match pipeline.verify(task.addr, task.port).await {
                Some(verification) => {
                    println!("Status: WORKING");
                    println!("Speed: {}ms", verification.latency_ms);
                    println!("Anonymity: {}", verification.anonymity);

                    let ctx = RunContext::new();
                    let stored = runner::record_verified(
                        &store,
                        geo.as_ref(),
                        &[task],
                        &[(task, verification)],
                        &ctx,
                    )
                    .await;
                    if stored > 0 {
                        println!("Saved to database");
                    }
                }
                None => println!("Proxy {task} responded but failed full verification"),
            }
        }

        Commands::List { limit } => {
            let proxies = store.top_active(limit).await?;
            if proxies.is_empty() {
                println!("No working proxies found in database");
            } else {
                println!(
                    "{:<21} {:<8} {:>7} {:<12} ISP",
                    "IP:Port", "Country", "Speed", "Anonymity"
                );
                for record in &proxies {
                    println!(
                        "{:<21} {:<8} {:>5}ms {:<12} {}",
                        record.endpoint(),
                        record.country,
                        record.speed,
                        record.anonymity.to_string(),
                        record.isp
                    );
                }
                println!("\nTotal: {} proxies", proxies.len());
            }
        }

        Commands::Export { output } => {
            report::write_summary(&store, &[], &output).await?;
            println!("Results saved to {output:?}");
        }
    }

    Ok(())
}

/// The candidate list is optional: a missing file just means targeted
/// generation runs without an external pool.
fn load_candidate_ranges(path: &PathBuf) -> Result<Vec<ipnet::Ipv4Net>> {
    if path.exists() {
        addr::load_range_file(path)
    } else {
        Ok(Vec::new())
    }
}

/// Ctrl-C requests a cooperative stop; the running batch drains first.
fn watch_for_ctrl_c(ctx: Arc<RunContext>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nStop requested, finishing the current batch...");
            ctx.request_stop();
        }
    });
}
