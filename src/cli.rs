//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use url::Url;

use ripper_core::config::{FileConfig, MAX_RETRIES_LIMIT, is_valid_extension};
use ripper_core::{
    AUTHORITATIVE_INTERVAL, DEFAULT_MAX_RETRIES, GUESS_INTERVAL, GuessPolicy, HttpTimeouts,
    ResolveStrategy,
};

/// Rip every asset of a Sankaku Complex tag listing.
///
/// Walks the listing page by page, derives each post's full-size asset URL and
/// downloads it into `sankakucomplex_{gid}` under the output directory.
#[derive(Parser, Debug)]
#[command(name = "sankaku-ripper")]
#[command(author, version, about)]
pub struct Args {
    /// Tag listing URL, e.g. https://idol.sankakucomplex.com/?tags=some_tag
    pub url: String,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/sankaku-ripper/config.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory album folders are created in [default: .]
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Minimum delay between requests to one host in milliseconds (0 to disable, max 60000)
    /// [default: 1000 for guess-first, 2500 for authoritative]
    #[arg(short = 'l', long, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub rate_limit: Option<u64>,

    /// Resolution strategy: guess-first or authoritative [default: guess-first]
    #[arg(short = 's', long)]
    pub strategy: Option<ResolveStrategy>,

    /// Extension assumed by guessed URLs; "" keeps the thumbnail's [default: jpg]
    #[arg(long, value_name = "EXT", value_parser = parse_extension)]
    pub assumed_extension: Option<String>,

    /// Maximum download attempts per asset (0-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u32).range(0..=i64::from(MAX_RETRIES_LIMIT)))]
    pub max_retries: Option<u32>,

    /// List resolved asset URLs without downloading
    #[arg(long)]
    pub dry_run: bool,

    /// Print the final summary as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Fetch the album from this origin instead of the album URL's host
    #[arg(long, hide = true, value_name = "URL")]
    pub base_url: Option<Url>,
}

/// Effective settings after merging CLI flags, the config file and defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    pub output_dir: PathBuf,
    pub rate_limit: Duration,
    pub strategy: ResolveStrategy,
    pub guess: GuessPolicy,
    pub max_retries: u32,
    pub timeouts: HttpTimeouts,
}

impl Args {
    /// Merges explicit flags over `file` over built-in defaults.
    pub fn resolve_settings(&self, file: Option<&FileConfig>) -> Settings {
        let file = file.cloned().unwrap_or_default();

        let strategy = self.strategy.or(file.strategy).unwrap_or_default();
        let rate_limit = self
            .rate_limit
            .or(file.rate_limit_ms)
            .map_or_else(|| default_interval(strategy), Duration::from_millis);

        let mut guess = GuessPolicy::default();
        if let Some(extension) = self
            .assumed_extension
            .clone()
            .or(file.assumed_extension)
        {
            guess.assumed_extension = (!extension.is_empty()).then_some(extension);
        }

        let defaults = HttpTimeouts::default();
        Settings {
            output_dir: self
                .output_dir
                .clone()
                .or(file.output_dir)
                .unwrap_or_else(|| PathBuf::from(".")),
            rate_limit,
            strategy,
            guess,
            max_retries: self
                .max_retries
                .or(file.max_retries)
                .unwrap_or(DEFAULT_MAX_RETRIES),
            timeouts: HttpTimeouts {
                connect_secs: file.connect_timeout_secs.unwrap_or(defaults.connect_secs),
                read_secs: file.read_timeout_secs.unwrap_or(defaults.read_secs),
            },
        }
    }

    /// Default tracing level.
    ///
    /// Priority: quiet flag > verbose flag > config verbosity > info.
    pub fn default_log_level(&self, file: Option<&FileConfig>) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => file
                .and_then(|config| config.verbosity)
                .map_or("info", |verbosity| verbosity.log_level()),
            1 => "debug",
            _ => "trace",
        }
    }
}

fn default_interval(strategy: ResolveStrategy) -> Duration {
    match strategy {
        ResolveStrategy::GuessFirst => GUESS_INTERVAL,
        ResolveStrategy::Authoritative => AUTHORITATIVE_INTERVAL,
    }
}

fn parse_extension(value: &str) -> Result<String, String> {
    let trimmed = value.trim().trim_start_matches('.');
    if is_valid_extension(trimmed) {
        Ok(trimmed.to_ascii_lowercase())
    } else {
        Err(format!("'{value}' is not a file extension"))
    }
}
