//! Run data: the extraction job (the read-only plan) and its chapter tasks.

use crate::scraper::Strategy;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// One run: entry URL, resolved strategy, and the chapter plan.
///
/// `chapter_urls` is filled once after the landing page is read and not touched afterwards.
pub struct ExtractionJob {
    pub entry_url: String,
    pub strategy: Arc<dyn Strategy>,
    pub output_root: PathBuf,
    /// Sanitized novel name, also the novel directory name.
    pub novel_name: String,
    /// Chapter URLs in narrative order.
    pub chapter_urls: Vec<String>,
}

impl ExtractionJob {
    /// `<output_root>/<novel_name>`
    pub fn novel_dir(&self) -> PathBuf {
        self.output_root.join(&self.novel_name)
    }
}

impl fmt::Debug for ExtractionJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionJob")
            .field("entry_url", &self.entry_url)
            .field("host", &self.strategy.host())
            .field("output_root", &self.output_root)
            .field("novel_name", &self.novel_name)
            .field("chapters", &self.chapter_urls.len())
            .finish()
    }
}

/// Lifecycle of a single chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    InFlight,
    Succeeded,
    /// Terminal failure with the error message.
    Failed(String),
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed(_))
    }
}

/// Fetch, transform, and write one chapter URL.
#[derive(Debug, Clone)]
pub struct ChapterTask {
    /// 1-based position in the plan.
    pub index: usize,
    pub url: String,
    /// Sanitized title, known once the page has been fetched.
    pub title: Option<String>,
    pub path: Option<PathBuf>,
    pub state: TaskState,
}

impl ChapterTask {
    pub fn new(index: usize, url: impl Into<String>) -> Self {
        Self {
            index,
            url: url.into(),
            title: None,
            path: None,
            state: TaskState::Pending,
        }
    }
}

/// Outcome of a finished batch. Tasks are in plan order.
#[derive(Debug)]
pub struct RunReport {
    pub novel_name: String,
    pub novel_dir: PathBuf,
    pub tasks: Vec<ChapterTask>,
}

impl RunReport {
    pub fn total(&self) -> usize {
        self.tasks.len()
    }

    pub fn succeeded(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.state == TaskState::Succeeded)
            .count()
    }

    /// Failed tasks with their reasons.
    pub fn failures(&self) -> Vec<(&str, &str)> {
        self.tasks
            .iter()
            .filter_map(|t| match &t.state {
                TaskState::Failed(reason) => Some((t.url.as_str(), reason.as_str())),
                _ => None,
            })
            .collect()
    }

    pub fn has_failures(&self) -> bool {
        self.tasks
            .iter()
            .any(|t| matches!(t.state, TaskState::Failed(_)))
    }
}
