//! News-Harvest main entry point
//!
//! Command-line interface for running crawl workers and result sinks, and
//! for submitting and inspecting crawl jobs.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use news_harvest::config::{load_config_with_hash, Config};
use news_harvest::messages::CrawlRequest;
use news_harvest::shutdown::install_signal_handler;
use news_harvest::sink::{ResultSink, SinkOptions};
use news_harvest::storage::{JobStore, SqliteJobStore};
use news_harvest::stream::{MessageProducer, SqliteStream};
use news_harvest::url::parse_absolute;
use news_harvest::worker::{CrawlPipeline, CrawlWorker, WorkerOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// News-Harvest: a distributed article fetcher
///
/// Workers fetch and extract the pages named on the requests topic; the
/// sink folds their results into per-job progress.
#[derive(Parser, Debug)]
#[command(name = "news-harvest")]
#[command(version = "1.0.0")]
#[command(about = "A distributed article fetcher", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consume crawl requests and publish results until interrupted
    Worker,

    /// Persist crawl results into the job store until interrupted
    Sink,

    /// Create a job and publish one request per URL
    Submit {
        /// File with one URL per line; blank lines and lines starting with # are skipped
        #[arg(long, value_name = "FILE")]
        urls: PathBuf,

        /// Per-attempt timeout for these requests (milliseconds)
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Body size cap for these requests (bytes)
        #[arg(long)]
        max_bytes: Option<u64>,

        /// Check robots.txt before fetching
        #[arg(long)]
        respect_robots: bool,
    },

    /// Show a job's progress
    Status {
        #[arg(value_name = "JOB_ID")]
        job_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    match cli.command {
        Command::Worker => handle_worker(&config).await,
        Command::Sink => handle_sink(&config).await,
        Command::Submit {
            urls,
            timeout_ms,
            max_bytes,
            respect_robots,
        } => handle_submit(&config, &urls, timeout_ms, max_bytes, respect_robots).await,
        Command::Status { job_id } => handle_status(&config, &job_id),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("news_harvest=info,warn"),
            1 => EnvFilter::new("news_harvest=debug,info"),
            2 => EnvFilter::new("news_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn open_stream(config: &Config) -> anyhow::Result<SqliteStream> {
    SqliteStream::open(Path::new(&config.stream.database_path), config.stream.partitions)
        .with_context(|| format!("Failed to open stream at {}", config.stream.database_path))
}

fn open_store(config: &Config) -> anyhow::Result<SqliteJobStore> {
    SqliteJobStore::open(Path::new(&config.store.database_path))
        .with_context(|| format!("Failed to open job store at {}", config.store.database_path))
}

/// Runs the crawl worker loop
async fn handle_worker(config: &Config) -> anyhow::Result<()> {
    let stream = open_stream(config)?;
    let pipeline = CrawlPipeline::from_config(config).context("Failed to build crawl pipeline")?;

    tracing::info!(
        concurrency = config.worker.concurrency,
        domain_concurrency = config.worker.domain_concurrency,
        max_attempts = config.worker.max_attempts,
        "Starting crawl worker"
    );

    let mut worker = CrawlWorker::new(
        Arc::new(pipeline),
        Box::new(stream.consumer(
            config.stream.worker_group.clone(),
            config.stream.requests_topic.clone(),
        )),
        Arc::new(stream.producer()),
        WorkerOptions::from_config(config),
    );

    let shutdown = install_signal_handler();
    worker.run(shutdown).await?;
    Ok(())
}

/// Runs the result sink loop
async fn handle_sink(config: &Config) -> anyhow::Result<()> {
    let stream = open_stream(config)?;
    let store = open_store(config)?;

    let mut sink = ResultSink::new(
        Box::new(stream.consumer(
            config.stream.sink_group.clone(),
            config.stream.results_topic.clone(),
        )),
        store,
        SinkOptions::from_config(config),
    );

    let shutdown = install_signal_handler();
    sink.run(shutdown).await?;
    Ok(())
}

/// Creates a job for the URLs in `urls_path` and publishes its requests
async fn handle_submit(
    config: &Config,
    urls_path: &Path,
    timeout_ms: Option<u64>,
    max_bytes: Option<u64>,
    respect_robots: bool,
) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(urls_path)
        .with_context(|| format!("Failed to read {}", urls_path.display()))?;

    let mut urls = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let url = parse_absolute(line)
            .with_context(|| format!("{}:{}: invalid URL", urls_path.display(), index + 1))?;
        urls.push(url);
    }

    if urls.is_empty() {
        bail!("No URLs found in {}", urls_path.display());
    }

    let stream = open_stream(config)?;
    let producer = stream.producer();

    let mut store = open_store(config)?;
    let job = store
        .create_job(urls.len() as u64)
        .context("Failed to create job")?;
    tracing::info!(job_id = %job.job_id, total = job.total, "Job created");

    let mut sent: u64 = 0;
    for url in urls {
        let mut request = CrawlRequest::new(job.job_id.clone(), url);
        request.timeout_ms = timeout_ms;
        request.max_bytes = max_bytes;
        request.respect_robots = respect_robots;

        let published = match (request.routing_key(), request.to_vec()) {
            (Ok(key), Ok(payload)) => producer
                .send(&config.stream.requests_topic, &key, &payload)
                .await
                .map_err(anyhow::Error::from),
            (Err(e), _) => Err(e.into()),
            (_, Err(e)) => Err(e.into()),
        };

        if let Err(e) = published {
            // Unpublished requests would never report, so the job could never finish
            tracing::error!(job_id = %job.job_id, sent, error = %e, "Submission stopped partway");
            store
                .shrink_job(&job.job_id, sent)
                .context("Failed to shrink job after partial submission")?;
            return Err(e.context(format!(
                "Failed to publish request for {}; job {} keeps {} published request(s)",
                request.url, job.job_id, sent
            )));
        }
        sent += 1;
    }

    println!("{}", job.job_id);
    Ok(())
}

/// Prints a job's record and outcome counts
fn handle_status(config: &Config, job_id: &str) -> anyhow::Result<()> {
    let store = open_store(config)?;

    let Some(job) = store.get_job(job_id)? else {
        bail!("Job not found: {}", job_id);
    };

    println!("Job:       {}", job.job_id);
    println!("State:     {}", job.state);
    println!("Progress:  {}/{}", job.processed(), job.total);
    println!("  Done:    {}", job.done);
    println!("  Failed:  {}", job.failed);
    println!("Articles:  {}", store.count_articles(job_id)?);
    println!("Errors:    {}", store.count_errors(job_id)?);
    println!("Created:   {}", job.created_at.to_rfc3339());
    println!("Updated:   {}", job.updated_at.to_rfc3339());

    Ok(())
}
