//! Sieve CLI

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use sieve_core::{
    detect_type, hash_bytes, AnalysisId, ChatCompletionClient, ContentHash, CoreResult, GatewayConfig,
    MemoryResultStore, PgResultStore, Recommender, Report, ResolveResult, ResultStore, ScanOrchestrator,
    SubmitResult, SummarizerConfig, TransportFailure, VirusTotalGateway,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "sieve")]
#[command(about = "File malware scanning with a local verdict cache")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the SHA-256 content hash of a file
    Hash {
        file: PathBuf,
    },

    /// Guess the type label of a file from its name and content
    Sniff {
        file: PathBuf,

        /// Name to use instead of the path's file name
        #[arg(long)]
        name: Option<String>,
    },

    /// Submit a file for scanning
    Submit {
        file: PathBuf,

        /// Keep polling until a report is available
        #[arg(short, long)]
        wait: bool,

        /// Seconds between polls
        #[arg(long, default_value = "10")]
        interval: u64,

        /// Maximum number of polls
        #[arg(long, default_value = "60")]
        max_attempts: u32,
    },

    /// Check an analysis once
    Resolve {
        analysis_id: String,

        /// Content hash of the submitted file
        #[arg(long)]
        hash: Option<String>,
    },

    /// Print the report for a content hash
    Report {
        hash: String,
    },

    /// Print remediation guidance for a content hash
    Recommend {
        hash: String,
    },
}

/// Polling schedule for `submit --wait`
#[derive(Debug, Clone, Copy)]
struct PollSchedule {
    interval: Duration,
    max_attempts: u32,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set subscriber: {}", e);
    }

    let result = match cli.command {
        Commands::Hash { file } => cmd_hash(&file),
        Commands::Sniff { file, name } => cmd_sniff(&file, name.as_deref()),
        Commands::Submit {
            file,
            wait,
            interval,
            max_attempts,
        } => {
            let schedule = wait.then_some(PollSchedule {
                interval: Duration::from_secs(interval),
                max_attempts,
            });
            cmd_submit(&file, schedule).await
        }
        Commands::Resolve { analysis_id, hash } => cmd_resolve(&analysis_id, hash.as_deref()).await,
        Commands::Report { hash } => cmd_report(&hash).await,
        Commands::Recommend { hash } => cmd_recommend(&hash).await,
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, String> {
    if !path.exists() {
        return Err(format!("File not found: {}", path.display()));
    }
    std::fs::read(path).map_err(|e| format!("Failed to read {}: {}", path.display(), e))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.bin".to_string())
}

fn cmd_hash(file: &Path) -> Result<(), String> {
    let data = read_file(file)?;
    println!("{}  {}", hash_bytes(&data), file.display());
    Ok(())
}

fn cmd_sniff(file: &Path, name: Option<&str>) -> Result<(), String> {
    let data = read_file(file)?;
    let name = name.map(str::to_string).unwrap_or_else(|| file_name(file));

    match detect_type(Some(&name), Some(&data)) {
        Some(label) => println!("{}", label),
        None => println!("unknown"),
    }
    Ok(())
}

/// Orchestrator backed by Postgres when `DATABASE_URL` is set, else memory
async fn build_orchestrator() -> CoreResult<ScanOrchestrator> {
    let store: Arc<dyn ResultStore> = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let store = PgResultStore::connect(&url, 2).await?;
            store.migrate().await?;
            debug!("Using Postgres result store");
            Arc::new(store)
        }
        Err(_) => {
            debug!("DATABASE_URL not set, results are kept in memory");
            Arc::new(MemoryResultStore::new())
        }
    };

    let gateway = VirusTotalGateway::new(GatewayConfig::default())?;
    Ok(ScanOrchestrator::new(store, Arc::new(gateway)))
}

fn print_json(value: &Value) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{}", text);
    Ok(())
}

fn failure_message(failure: &TransportFailure) -> String {
    format!("Provider request failed: {}", failure)
}

/// Transient provider failures (429, 5xx, no response) are polled again
/// instead of ending the wait.
fn is_retryable(failure: &TransportFailure) -> bool {
    match failure.status {
        None => true,
        Some(status) => status == 429 || status >= 500,
    }
}

async fn cmd_submit(file: &Path, schedule: Option<PollSchedule>) -> Result<(), String> {
    let data = read_file(file)?;
    let name = file_name(file);
    info!("Submitting {} ({} bytes)", name, data.len());

    let orchestrator = build_orchestrator().await.map_err(|e| e.to_string())?;
    let result = orchestrator
        .submit(&name, &data, "application/octet-stream")
        .await
        .map_err(|e| e.to_string())?;

    match (result, schedule) {
        (SubmitResult::CacheHit { hash, report }, _) => print_json(&json!({
            "cached": true,
            "file_hash": hash,
            "analysis_result": report,
        })),
        (SubmitResult::Failed(failure), _) => Err(failure_message(&failure)),
        (SubmitResult::Submitted { analysis_id, hash }, None) => print_json(&json!({
            "cached": false,
            "analysis_id": analysis_id,
            "file_hash": hash,
        })),
        (SubmitResult::AwaitingReport { hash }, None) => print_json(&json!({
            "cached": false,
            "pending": true,
            "file_hash": hash,
        })),
        (SubmitResult::Submitted { analysis_id, hash }, Some(schedule)) => {
            match wait_for_analysis(&orchestrator, &analysis_id, &hash, schedule).await? {
                Some(report) => print_json(&report),
                None => Err(format!(
                    "No report after {} attempts; resume with `sieve resolve {} --hash {}`",
                    schedule.max_attempts, analysis_id, hash
                )),
            }
        }
        (SubmitResult::AwaitingReport { hash }, Some(schedule)) => {
            match wait_for_report(&orchestrator, &hash, schedule).await? {
                Some(report) => print_json(&report),
                None => Err(format!(
                    "No report after {} attempts; resume with `sieve report {}`",
                    schedule.max_attempts, hash
                )),
            }
        }
    }
}

/// Poll an analysis until it completes with a report or attempts run out
async fn wait_for_analysis(
    orchestrator: &ScanOrchestrator,
    analysis_id: &AnalysisId,
    hash: &ContentHash,
    schedule: PollSchedule,
) -> Result<Option<Value>, String> {
    for attempt in 1..=schedule.max_attempts {
        tokio::time::sleep(schedule.interval).await;
        debug!("Polling analysis {} (attempt {}/{})", analysis_id, attempt, schedule.max_attempts);

        match orchestrator
            .resolve(analysis_id, Some(hash))
            .await
            .map_err(|e| e.to_string())?
        {
            ResolveResult::Pending => continue,
            ResolveResult::Completed {
                report: Some(report), ..
            } => return Ok(Some(report.into_value())),
            ResolveResult::Completed { report: None, .. } => {
                // Analysis done but the report lags behind; keep polling by hash
                debug!("Analysis {} completed without a report yet", analysis_id);
            }
            ResolveResult::Failed(failure) if is_retryable(&failure) => {
                warn!("Poll {} failed: {}", attempt, failure);
            }
            ResolveResult::Failed(failure) => return Err(failure_message(&failure)),
        }
    }
    Ok(None)
}

/// Poll the report by hash until it carries verdicts or attempts run out
async fn wait_for_report(
    orchestrator: &ScanOrchestrator,
    hash: &ContentHash,
    schedule: PollSchedule,
) -> Result<Option<Value>, String> {
    for attempt in 1..=schedule.max_attempts {
        tokio::time::sleep(schedule.interval).await;
        debug!("Polling report {} (attempt {}/{})", hash, attempt, schedule.max_attempts);

        match orchestrator.report_by_hash(hash).await.map_err(|e| e.to_string())? {
            Ok(report) if report.is_usable() => return Ok(Some(report.into_value())),
            Ok(_) => continue,
            Err(failure) if is_retryable(&failure) => warn!("Poll {} failed: {}", attempt, failure),
            Err(failure) => return Err(failure_message(&failure)),
        }
    }
    Ok(None)
}

async fn cmd_resolve(analysis_id: &str, hash: Option<&str>) -> Result<(), String> {
    let analysis_id = AnalysisId::parse(analysis_id).map_err(|e| e.to_string())?;
    let hash = hash.map(ContentHash::parse).transpose().map_err(|e| e.to_string())?;

    let orchestrator = build_orchestrator().await.map_err(|e| e.to_string())?;
    match orchestrator
        .resolve(&analysis_id, hash.as_ref())
        .await
        .map_err(|e| e.to_string())?
    {
        ResolveResult::Pending => print_json(&json!({"status": "pending"})),
        ResolveResult::Completed { hash, report } => print_json(&json!({
            "status": "completed",
            "file_hash": hash,
            "report": report,
        })),
        ResolveResult::Failed(failure) => Err(failure_message(&failure)),
    }
}

async fn cmd_report(hash: &str) -> Result<(), String> {
    let hash = ContentHash::parse(hash).map_err(|e| e.to_string())?;
    let orchestrator = build_orchestrator().await.map_err(|e| e.to_string())?;

    match orchestrator.report_by_hash(&hash).await.map_err(|e| e.to_string())? {
        Ok(report) => print_json(report.as_value()),
        Err(failure) => Err(failure_message(&failure)),
    }
}

async fn cmd_recommend(hash: &str) -> Result<(), String> {
    let hash = ContentHash::parse(hash).map_err(|e| e.to_string())?;
    let orchestrator = build_orchestrator().await.map_err(|e| e.to_string())?;

    let report = scanned_report(&orchestrator, &hash).await?;

    let summarizer = ChatCompletionClient::new(SummarizerConfig::default()).map_err(|e| e.to_string())?;
    let recommendation = Recommender::new(Arc::new(summarizer))
        .summarize(&report)
        .await
        .map_err(|e| e.to_string())?;

    println!("{}", recommendation);
    Ok(())
}

/// Report for a hash, refused while no engine has reported on it
async fn scanned_report(orchestrator: &ScanOrchestrator, hash: &ContentHash) -> Result<Report, String> {
    let report = orchestrator
        .report_by_hash(hash)
        .await
        .map_err(|e| e.to_string())?
        .map_err(|failure| failure_message(&failure))?;

    if !report.is_usable() {
        return Err(format!("Report for {} has no engine verdicts yet", hash));
    }
    Ok(report)
}
