//! lnscrape: concurrent web-novel scraper writing one text file per chapter.

pub mod cli;
pub mod config;
pub mod model;
pub mod persist;
pub mod scraper;
pub mod telemetry;
pub mod transform;

// Re-exports for CLI and consumers.
pub use model::{ChapterTask, ExtractionJob, RunReport, TaskState};
pub use scraper::engine::{Engine, EngineOptions, NoProgress, ProgressSink};
pub use scraper::{
    Fetch, FetchClient, FetchClientBuilder, Router, ScraperError, SiteRules, Strategy,
};
pub use transform::OutputFormat;
