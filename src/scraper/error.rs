//! Shared error type for routing, fetching, parsing, and persisting chapters.

use std::path::PathBuf;
use thiserror::Error;

/// Shared scraper error. Fatal variants abort the run; the rest end up on a single chapter task.
#[derive(Debug, Error)]
pub enum ScraperError {
    // Routing
    #[error("Invalid URL: {input}: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("Unsupported source '{host}'. Run with --list-sites to see supported hosts.")]
    UnsupportedSource { host: String },

    #[error("Invalid rule for {host}: {field} {value:?}: {reason}")]
    InvalidRule {
        host: String,
        field: &'static str,
        value: String,
        reason: String,
    },

    // HTTP and network
    #[error("Network error: could not reach {url}: {source}")]
    Network { url: String, source: reqwest::Error },

    #[error("HTTP {status} when fetching: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Failed to read response body from {url}: {source}")]
    BodyRead { url: String, source: reqwest::Error },

    #[error("Giving up on {url} after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last: Box<ScraperError>,
    },

    #[error("Could not build HTTP client: {source}")]
    Client { source: reqwest::Error },

    // Landing page and chapter list
    #[error("Landing page unreachable: {url}: {source}")]
    LandingUnreachable {
        url: String,
        source: Box<ScraperError>,
    },

    #[error("Could not parse landing page {url}: {message}")]
    ParseLanding { url: String, message: String },

    #[error("Could not fetch chapter list page {url}: {source}")]
    ChapterListPage {
        url: String,
        source: Box<ScraperError>,
    },

    #[error("Landing page has no chapters after filtering (nothing to download).")]
    EmptyChapterList,

    // Chapter
    #[error("Could not parse chapter at {url}: missing content container.")]
    ParseChapter { url: String },

    #[error("Could not find a chapter title at {url}.")]
    MissingTitle { url: String },

    // Filesystem
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not a directory: {path}")]
    NotADirectory { path: PathBuf },

    #[error("Chapter task aborted: {reason}")]
    TaskAborted { reason: String },
}

impl ScraperError {
    /// Whether another attempt at the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ScraperError::Network { .. } | ScraperError::BodyRead { .. } => true,
            ScraperError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}
