use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use relay::{
    config::RelayConfig,
    error::RequestError,
    queue::{CancelOutcome, Collaborators, JobQueue},
    request::{self, Command},
    status::{LogReply, StatusReply, Submitter, ERROR},
    tools, DirectorySink, FfmpegTransformer, FfprobeProbe, YtDlpFetcher,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

/// Media relay daemon: reads requests from stdin, one per line
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory finished files are delivered to (overrides the config file)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// User id requests from stdin are attributed to
    #[arg(long, default_value_t = 0)]
    user_id: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Use RUST_LOG if set, otherwise info (debug with --verbose)
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    let mut cfg = RelayConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(dir) = args.output_dir {
        cfg.output_dir = dir;
    }

    info!("Media relay starting");
    info!("Configuration loaded:");
    info!("  Output dir: {}", cfg.output_dir.display());
    info!("  Socket dir: {}", cfg.socket_dir().display());
    info!("  Job timeout: {}s", cfg.job_timeout_secs);
    info!("  Max probe bytes: {}", cfg.max_probe_bytes);
    if cfg.max_upload_bytes > 0 {
        info!("  Max upload bytes: {}", cfg.max_upload_bytes);
    }

    tools::check_tools(&cfg).await.context("External tool check failed")?;

    std::fs::create_dir_all(&cfg.output_dir)
        .with_context(|| format!("Failed to create output directory: {}", cfg.output_dir.display()))?;

    let collaborators = Collaborators {
        fetcher: Arc::new(YtDlpFetcher::new(&cfg.ytdlp_bin)),
        probe: Arc::new(FfprobeProbe::new(&cfg.ffprobe_bin)),
        transformer: Arc::new(FfmpegTransformer::new(&cfg.ffmpeg_bin)),
        sink: Arc::new(DirectorySink::new(&cfg.output_dir)),
    };
    let queue = JobQueue::new(cfg.clone(), collaborators);

    let shutdown = CancellationToken::new();
    let worker = queue.spawn(shutdown.clone());

    let submitter = Submitter::User { user_id: args.user_id, username: None };
    if !cfg.is_allowed(&submitter) {
        warn!("User {} is not allowed, all requests will be ignored", submitter);
    }

    info!("✅ Ready, reading requests from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut request_count = 0u64;

    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };

        let Some(line) = line else {
            info!("End of input, waiting for {} queued job(s)", queue.len());
            wait_for_drain(&queue).await;
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        debug!("got message from {}: {}", submitter, line);
        if !cfg.is_allowed(&submitter) {
            info!("  user not allowed, ignoring");
            continue;
        }

        request_count += 1;
        let reply = Arc::new(LogReply::new(format!("req-{}", request_count)));
        handle_message(&queue, &submitter, &line, reply).await?;
    }

    shutdown.cancel();
    worker.await.context("Job queue worker panicked")?;
    info!("Media relay stopped");
    Ok(())
}

async fn handle_message(
    queue: &JobQueue,
    submitter: &Submitter,
    line: &str,
    reply: Arc<LogReply>,
) -> Result<()> {
    let command = match request::parse_message(line, submitter) {
        None => return Ok(()),
        Some(Ok(command)) => command,
        Some(Err(RequestError::InvalidUrl)) => {
            info!("  (not an url)");
            reply.edit(&format!("{}: {}", ERROR, RequestError::InvalidUrl)).await;
            return Ok(());
        }
        Some(Err(e)) => {
            reply.edit(&format!("{}: {}", ERROR, e)).await;
            return Ok(());
        }
    };

    match command {
        Command::Download { url, kind } => {
            let ticket = queue.enqueue(&url, kind, submitter.clone(), reply);
            debug!("Job {} queued at position {}", ticket.id, ticket.position);
        }
        Command::Cancel => match queue.cancel_current() {
            CancelOutcome::Canceled(id) => info!("Job {}: canceling", id),
            CancelOutcome::NothingToCancel => {
                reply.edit(&format!("{}: no active request to cancel", ERROR)).await;
            }
        },
        Command::Status => {
            let snapshot = queue.snapshot();
            let json = serde_json::to_string_pretty(&snapshot).context("Failed to serialize queue status")?;
            println!("{}", json);
        }
        Command::Start => reply.edit(request::WELCOME).await,
    }
    Ok(())
}

async fn wait_for_drain(queue: &JobQueue) {
    loop {
        if queue.is_empty() {
            return;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                match queue.cancel_current() {
                    CancelOutcome::Canceled(id) => warn!("Job {}: interrupted", id),
                    CancelOutcome::NothingToCancel => {}
                }
                return;
            }
            _ = tokio::time::sleep(Duration::from_millis(250)) => {}
        }
    }
}
