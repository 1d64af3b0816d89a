//! CLI parsing and orchestration. Parses args, merges config, runs the engine with a progress bar.
//! Maps errors to exit codes.

use crate::config;
use crate::scraper::engine::{Engine, EngineOptions, ProgressSink, DEFAULT_CONCURRENCY};
use crate::scraper::{
    FetchClient, Router, ScraperError, DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY_MS,
};
use crate::transform::OutputFormat;
use clap::Parser;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Scraper(#[from] ScraperError),

    #[error("{failed} of {total} chapters failed")]
    PartialFailure { failed: usize, total: usize },
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) => 1,
            CliRunError::Scraper(_) => 2,
            CliRunError::PartialFailure { .. } => 4,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "lnscrape")]
#[command(about = "Download every chapter of a web novel into one text file per chapter")]
#[command(
    after_help = "Config file keys (output_dir, concurrency, retry_count, retry_delay_ms, timeout_secs, user_agent, format, [[sites]]) are read from ./lnscrape.toml or the user config dir. CLI flags override config."
)]
pub struct Args {
    /// Novel landing page URL. Its host must be a registered source (see --list-sites).
    #[arg(required_unless_present = "list_sites")]
    pub url: Option<String>,

    /// Output root. Default: ./data (novel directories are created inside it).
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Chapters downloaded at once (default 16).
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Retries after the first attempt for transient failures (default 5).
    #[arg(long)]
    pub retries: Option<u32>,

    /// Base retry delay in milliseconds; attempt n waits n times this (default 100).
    #[arg(long)]
    pub retry_delay_ms: Option<u64>,

    /// Request timeout in seconds (default 30).
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Fixed HTTP User-Agent instead of a random browser identity per request.
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Output format: text (default) or markdown.
    #[arg(long, value_parser = parse_format)]
    pub format: Option<OutputFormat>,

    /// Fetch the chapter list only; print chapter count and output directory without writing.
    #[arg(long)]
    pub dry_run: bool,

    /// Print supported hosts and exit.
    #[arg(long)]
    pub list_sites: bool,

    /// Suppress progress output (errors only).
    #[arg(short, long)]
    pub quiet: bool,

    /// Debug logging and the full error chain.
    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_format(s: &str) -> Result<OutputFormat, String> {
    match s.to_lowercase().as_str() {
        "text" | "txt" => Ok(OutputFormat::Text),
        "markdown" | "md" => Ok(OutputFormat::Markdown),
        _ => Err(format!(
            "Invalid --format value: '{}'. Use text or markdown.",
            s
        )),
    }
}

/// Built-in sources plus `[[sites]]` tables from the config file.
fn build_router(config: Option<&config::Config>) -> Result<Router, CliRunError> {
    let mut router = Router::builtin()?;
    for rules in config.map(|c| c.sites.clone()).unwrap_or_default() {
        let host = rules.host.clone();
        router
            .register_rules(rules)
            .map_err(|e| CliRunError::InvalidInput(format!("Invalid [[sites]] entry for {}: {}", host, e)))?;
    }
    Ok(router)
}

/// Check the URL against the router before any network traffic.
fn check_source(router: &Router, url: &str) -> Result<(), CliRunError> {
    match router.resolve(url) {
        Ok(_) => Ok(()),
        Err(ScraperError::InvalidUrl { input, reason }) => Err(CliRunError::InvalidInput(format!(
            "Expected a novel URL. Example: https://novelfull.com/some-novel.html Invalid: {}: {}",
            input, reason
        ))),
        Err(e) => Err(CliRunError::Scraper(e)),
    }
}

/// `indicatif` bar implementing [ProgressSink]. Failures are echoed above the bar.
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new(quiet: bool) -> Self {
        let bar = ProgressBar::new(0);
        if quiet {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        } else {
            bar.set_draw_target(ProgressDrawTarget::stderr());
        }
        bar.set_style(
            ProgressStyle::with_template("Downloading [{bar:40}] {pos}/{len} Chapters ({elapsed})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▉▊▋▌▍▎▏ "),
        );
        Self { bar }
    }
}

impl ProgressSink for BarProgress {
    fn start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.enable_steady_tick(Duration::from_millis(120));
    }

    fn advance(&self, _done: usize, _total: usize) {
        self.bar.inc(1);
    }

    fn chapter_failed(&self, url: &str, reason: &str) {
        let line = format!("***Error at URL: {}: {}", url, reason);
        if self.bar.is_hidden() {
            eprintln!("{}", line);
        } else {
            self.bar.println(line);
        }
    }

    fn finish(&self) {
        self.bar.disable_steady_tick();
        self.bar.finish();
    }
}

/// Entry point for the CLI. Returns Ok(()) on success; Err with exit code and message on failure.
pub async fn run(args: &Args) -> Result<(), CliRunError> {
    let config = config::load_config().map_err(CliRunError::InvalidInput)?;
    let router = build_router(config.as_ref())?;

    if args.list_sites {
        for host in router.hosts() {
            println!("{}", host);
        }
        return Ok(());
    }

    let url = args
        .url
        .as_deref()
        .ok_or_else(|| CliRunError::InvalidInput("A novel URL is required.".to_string()))?;
    check_source(&router, url)?;

    let output_root = args
        .output
        .clone()
        .or_else(|| config.as_ref().and_then(|c| c.output_dir.clone()))
        .unwrap_or_else(|| EngineOptions::default().output_root);
    let concurrency = args
        .concurrency
        .or_else(|| config.as_ref().and_then(|c| c.concurrency))
        .unwrap_or(DEFAULT_CONCURRENCY);
    if concurrency == 0 {
        return Err(CliRunError::InvalidInput(
            "Concurrency must be at least 1.".to_string(),
        ));
    }
    let retry_count = args
        .retries
        .or_else(|| config.as_ref().and_then(|c| c.retry_count))
        .unwrap_or(DEFAULT_RETRY_COUNT);
    let retry_delay_ms = args
        .retry_delay_ms
        .or_else(|| config.as_ref().and_then(|c| c.retry_delay_ms))
        .unwrap_or(DEFAULT_RETRY_DELAY_MS);
    let timeout_secs = args
        .timeout
        .or_else(|| config.as_ref().and_then(|c| c.timeout_secs))
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    let format = args
        .format
        .or_else(|| config.as_ref().and_then(|c| c.format))
        .unwrap_or_default();
    let user_agent = args
        .user_agent
        .clone()
        .or_else(|| config.as_ref().and_then(|c| c.user_agent.clone()));

    let mut builder = FetchClient::builder()
        .timeout_secs(timeout_secs)
        .retry_count(retry_count)
        .retry_delay(Duration::from_millis(retry_delay_ms))
        .rate_limits(router.rate_limits());
    if let Some(ua) = user_agent {
        builder = builder.user_agent(ua);
    }
    let client = builder
        .build()
        .map_err(|e| CliRunError::InvalidInput(format!("Failed to create HTTP client: {}", e)))?;

    let engine = Engine::new(
        Arc::new(client),
        EngineOptions {
            output_root,
            concurrency,
            format,
        },
    );

    if args.dry_run {
        let job = engine.plan(&router, url).await?;
        eprintln!("Novel: {}", job.novel_name);
        eprintln!("Chapters: {}", job.chapter_urls.len());
        eprintln!("Output: {}", job.novel_dir().display());
        return Ok(());
    }

    let report = engine
        .run(&router, url, Arc::new(BarProgress::new(args.quiet)))
        .await?;

    if !args.quiet {
        eprintln!(
            "Wrote {}/{} chapters to {}",
            report.succeeded(),
            report.total(),
            report.novel_dir.display()
        );
    }
    if report.has_failures() {
        return Err(CliRunError::PartialFailure {
            failed: report.failures().len(),
            total: report.total(),
        });
    }
    Ok(())
}
