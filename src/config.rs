//! Optional config file loading. Search order: ./lnscrape.toml, then
//! $XDG_CONFIG_HOME/lnscrape/config.toml (or ~/.config/lnscrape/config.toml).

use crate::scraper::SiteRules;
use crate::transform::OutputFormat;
use serde::Deserialize;
use std::path::PathBuf;

/// Config file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Parent of novel directories when -o is not set. Relative to CWD.
    pub output_dir: Option<PathBuf>,
    /// Chapters downloaded at once (default 16).
    pub concurrency: Option<usize>,
    /// Retries after the first attempt for transient failures (default 5).
    pub retry_count: Option<u32>,
    /// Base retry delay in milliseconds; attempt n waits n times this (default 100).
    pub retry_delay_ms: Option<u64>,
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Fixed User-Agent. When unset a random one is picked per request.
    pub user_agent: Option<String>,
    /// "text" (default) or "markdown".
    pub format: Option<OutputFormat>,
    /// Extra or replacement site rule tables, one `[[sites]]` entry per host.
    pub sites: Vec<SiteRules>,
}

/// Search order: (1) ./lnscrape.toml, (2) $XDG_CONFIG_HOME/lnscrape/config.toml.
/// Missing file returns Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config() -> Result<Option<Config>, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Cannot determine current directory: {}", e))?;
    let mut paths = vec![cwd.join("lnscrape.toml")];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join("lnscrape").join("config.toml"));
    }
    for path in &paths {
        if path.exists() {
            let s = std::fs::read_to_string(path)
                .map_err(|e| format!("Cannot read config {}: {}", path.display(), e))?;
            let config = parse_config(&s)
                .map_err(|e| format!("Invalid config {}: {}", path.display(), e))?;
            tracing::debug!(path = %path.display(), sites = config.sites.len(), "config loaded");
            return Ok(Some(config));
        }
    }
    Ok(None)
}

pub fn parse_config(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str(s)
}
