//! CLI entry point for the Sankaku ripper.

use std::io::{self, IsTerminal};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use ripper_core::config::load_config;
use ripper_core::{
    AlbumRipper, AlbumUrl, AssetCandidate, CrawlContext, FileDownloader, RateLimiter, RetryPolicy,
    RipOptions, RipSummary,
};
use tracing::{debug, error, info, warn};

mod cli;
mod progress;

use cli::Args;

/// Process outcome, mapped to the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessExit {
    Success,
    Partial,
    Failure,
}

impl ProcessExit {
    fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Partial => 1,
            Self::Failure => 2,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(exit) => ExitCode::from(exit.code()),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(ProcessExit::Failure.code())
        }
    }
}

async fn run() -> Result<ProcessExit> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    let loaded = load_config(args.config.as_deref())?;
    let file_config = loaded.config.as_ref();
    init_tracing(args.default_log_level(file_config));

    debug!(?args, "CLI arguments parsed");
    if let Some(path) = loaded.path.as_deref().filter(|_| file_config.is_some()) {
        info!(path = %path.display(), "Using config file");
    }

    let settings = args.resolve_settings(file_config);
    let album = AlbumUrl::parse(&args.url)?;
    info!(gid = %album.gid(), strategy = %settings.strategy, "Sankaku ripper starting");

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_signal = Arc::clone(&interrupted);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupted_signal.store(true, Ordering::SeqCst);
        }
    });

    let rate_limiter = if settings.rate_limit.is_zero() {
        debug!("rate limiting disabled");
        Arc::new(RateLimiter::disabled())
    } else {
        debug!(
            rate_limit_ms = settings.rate_limit.as_millis(),
            "rate limiting enabled"
        );
        Arc::new(RateLimiter::new(settings.rate_limit))
    };

    let ctx = CrawlContext::new(Arc::clone(&rate_limiter), settings.timeouts)?
        .with_cancel_flag(Arc::clone(&interrupted));
    let ripper = AlbumRipper::new(
        album,
        ctx,
        RipOptions {
            strategy: settings.strategy,
            guess: settings.guess.clone(),
            base_url: args.base_url.clone(),
            post_page_interval: None,
        },
    );

    if args.dry_run {
        let candidates = ripper.collect_candidates().await?;
        print_candidates(&candidates, args.json)?;
        return Ok(ProcessExit::Success);
    }

    let target_dir = settings.output_dir.join(ripper.album().folder_name());
    let downloader = FileDownloader::new(&target_dir, Arc::clone(&rate_limiter), settings.timeouts)?
        .with_retry_policy(RetryPolicy::with_max_attempts(settings.max_retries))
        .with_cancel_flag(Arc::clone(&interrupted));

    let use_spinner = progress::should_use_spinner(
        io::stderr().is_terminal(),
        args.quiet,
        progress::is_dumb_terminal(),
    );
    let (progress_handle, progress_stop) = progress::spawn_progress_ui(
        use_spinner,
        ripper.stats(),
        ripper.album().gid().to_string(),
    );

    let result = ripper.rip(&downloader).await;

    progress_stop.store(true, Ordering::SeqCst);
    if let Some(handle) = progress_handle {
        let _ = handle.await;
    }

    let summary = ripper.stats().snapshot();
    print_summary(ripper.album().gid(), &target_dir, &summary, args.json)?;

    match result {
        Ok(_) => Ok(determine_exit_outcome(summary.downloaded, summary.failed)),
        Err(e) if e.is_cancelled() => {
            warn!(
                downloaded = summary.downloaded,
                "Interrupted. Run again to continue."
            );
            Ok(ProcessExit::Partial)
        }
        Err(e) => {
            error!(error = %e, "album crawl aborted");
            Err(e).context("album crawl aborted")
        }
    }
}

fn init_tracing(default_level: &str) {
    // Priority: RUST_LOG env var > CLI/config level
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .try_init();
}

/// Maps download counts to the process exit outcome.
fn determine_exit_outcome(downloaded: usize, failed: usize) -> ProcessExit {
    if failed == 0 {
        ProcessExit::Success
    } else if downloaded > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}

fn print_candidates(candidates: &[AssetCandidate], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(candidates)?);
        return Ok(());
    }
    for candidate in candidates {
        let mode = match candidate.mode {
            ripper_core::ResolutionMode::Guessed => "guessed",
            ripper_core::ResolutionMode::Authoritative => "authoritative",
        };
        println!("{}\t{mode}\t{}", candidate.post_id, candidate.url);
    }
    Ok(())
}

fn print_summary(gid: &str, target_dir: &Path, summary: &RipSummary, json: bool) -> Result<()> {
    if json {
        let report = serde_json::json!({
            "gid": gid,
            "output_dir": target_dir.display().to_string(),
            "stats": summary,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "{gid}: {} downloaded, {} failed, {} skipped ({} pages, {} entries, {} fallbacks)",
        summary.downloaded,
        summary.failed,
        summary.skipped,
        summary.pages,
        summary.entries,
        summary.fallbacks
    );
    if summary.downloaded > 0 {
        println!("Saved to {}", target_dir.display());
    }
    Ok(())
}
