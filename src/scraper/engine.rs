//! Extraction engine. Resolves the source, reads the landing page into a chapter plan, then
//! downloads every chapter under a concurrency bound.
//!
//! Parsed documents are not `Send`; they only live inside the synchronous helpers here and never
//! across an `.await`.

use crate::model::{ChapterTask, ExtractionJob, RunReport, TaskState};
use crate::persist;
use crate::scraper::{Fetch, ListOrder, Router, ScraperError, SkipScope, Strategy};
use crate::transform::{self, OutputFormat};
use futures::stream::{self, StreamExt};
use reqwest::Url;
use scraper::Html;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Default number of chapters in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 16;
/// Upper bound on chapter-list pages followed for one novel.
const MAX_LIST_PAGES: usize = 500;

/// Where a run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    LandingFetched,
    ChapterListResolved,
    Downloading,
    Done,
}

/// Receives progress from the download stage. Called from concurrent tasks.
pub trait ProgressSink: Send + Sync {
    fn start(&self, _total: usize) {}
    /// `done` counts tasks in a terminal state, failed ones included.
    fn advance(&self, done: usize, total: usize);
    fn chapter_failed(&self, _url: &str, _reason: &str) {}
    fn finish(&self) {}
}

/// Discards progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn advance(&self, _done: usize, _total: usize) {}
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Parent of every novel directory. Default `./data`.
    pub output_root: PathBuf,
    /// Chapters in flight at once. Default 16.
    pub concurrency: usize,
    pub format: OutputFormat,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("./data"),
            concurrency: DEFAULT_CONCURRENCY,
            format: OutputFormat::Text,
        }
    }
}

/// Title and converted text of one chapter page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedChapter {
    /// Sanitized; names both the chapter directory and its file.
    pub title: String,
    pub text: String,
}

/// Runs extraction jobs against one fetcher.
pub struct Engine {
    fetcher: Arc<dyn Fetch>,
    options: EngineOptions,
}

impl Engine {
    pub fn new(fetcher: Arc<dyn Fetch>, options: EngineOptions) -> Self {
        Self { fetcher, options }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Plan and download. Fatal errors (unsupported source, unreachable landing page, empty
    /// chapter list) are returned; chapter failures are recorded in the report.
    pub async fn run(
        &self,
        router: &Router,
        entry_url: &str,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<RunReport, ScraperError> {
        let job = self.plan(router, entry_url).await?;
        self.download(job, progress).await
    }

    /// Resolve the source, read the landing page (and any further list pages), and build the
    /// chapter plan. Nothing is written to disk.
    pub async fn plan(&self, router: &Router, entry_url: &str) -> Result<ExtractionJob, ScraperError> {
        let strategy = router.resolve(entry_url)?;
        debug!(stage = ?Stage::Idle, host = strategy.host(), "source resolved");

        let landing = self
            .fetcher
            .fetch(entry_url)
            .await
            .map_err(|e| ScraperError::LandingUnreachable {
                url: entry_url.to_string(),
                source: Box::new(e),
            })?;
        debug!(stage = ?Stage::LandingFetched, url = entry_url);

        let first = read_list_page(strategy.as_ref(), &landing, entry_url)?;
        let novel_name = first.novel_name.ok_or_else(|| ScraperError::ParseLanding {
            url: entry_url.to_string(),
            message: "novel name not found (selector or structure may have changed)".to_string(),
        })?;
        let mut links = first.links;
        let mut next = first.next;
        let mut visited = HashSet::from([entry_url.to_string()]);
        while let Some(page_url) = next.take() {
            if visited.len() >= MAX_LIST_PAGES || !visited.insert(page_url.clone()) {
                break;
            }
            let body = self.fetcher.fetch(&page_url).await.map_err(|e| {
                ScraperError::ChapterListPage {
                    url: page_url.clone(),
                    source: Box::new(e),
                }
            })?;
            let page = read_list_page(strategy.as_ref(), &body, &page_url)?;
            debug!(url = %page_url, chapters = page.links.len(), "chapter list page read");
            links.extend(page.links);
            next = page.next;
        }

        if strategy.list_order() == ListOrder::NewestFirst {
            links.reverse();
        }
        let chapter_urls = self.filter_skipped(strategy.as_ref(), links).await;
        if chapter_urls.is_empty() {
            return Err(ScraperError::EmptyChapterList);
        }
        info!(novel = %novel_name, chapters = chapter_urls.len(), "chapter list resolved");
        debug!(stage = ?Stage::ChapterListResolved);

        Ok(ExtractionJob {
            entry_url: entry_url.to_string(),
            strategy,
            output_root: self.options.output_root.clone(),
            novel_name,
            chapter_urls,
        })
    }

    /// Drop listed pages the strategy says are not chapters.
    async fn filter_skipped(&self, strategy: &dyn Strategy, mut urls: Vec<String>) -> Vec<String> {
        match strategy.skip_scope() {
            SkipScope::Never => urls,
            SkipScope::LastEntry => {
                if let Some(last) = urls.last().cloned() {
                    if self.probe_skip(strategy, &last).await {
                        info!(url = %last, "last entry is not a chapter; ignoring it");
                        urls.pop();
                    }
                }
                urls
            }
            SkipScope::EveryEntry => {
                let verdicts: Vec<bool> = stream::iter(urls.iter())
                    .map(|url| self.probe_skip(strategy, url))
                    .buffered(self.options.concurrency.max(1))
                    .collect()
                    .await;
                urls.into_iter()
                    .zip(verdicts)
                    .filter_map(|(url, skip)| {
                        if skip {
                            info!(url = %url, "entry is not a chapter; ignoring it");
                            None
                        } else {
                            Some(url)
                        }
                    })
                    .collect()
            }
        }
    }

    /// Fetch a listed page and ask the strategy whether to skip it. Fetch failures keep the entry.
    async fn probe_skip(&self, strategy: &dyn Strategy, url: &str) -> bool {
        match self.fetcher.fetch(url).await {
            Ok(body) => strategy.should_skip(&Html::parse_document(&body)),
            Err(e) => {
                warn!(url, error = %e, "could not check entry; keeping it");
                false
            }
        }
    }

    /// Create the novel directory and run every chapter task to a terminal state.
    pub async fn download(
        &self,
        job: ExtractionJob,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<RunReport, ScraperError> {
        let novel_dir = job.novel_dir();
        persist::ensure_dir(&novel_dir).await?;

        let total = job.chapter_urls.len();
        debug!(stage = ?Stage::Downloading, total, dir = %novel_dir.display());
        progress.start(total);

        let admission = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let done = Arc::new(AtomicUsize::new(0));
        let ctx = Arc::new(TaskContext {
            fetcher: Arc::clone(&self.fetcher),
            strategy: Arc::clone(&job.strategy),
            novel_dir: novel_dir.clone(),
            format: self.options.format,
        });

        let mut set = JoinSet::new();
        let mut spawned = HashMap::with_capacity(total);
        for (i, url) in job.chapter_urls.iter().enumerate() {
            let task = ChapterTask::new(i + 1, url.clone());
            let admission = Arc::clone(&admission);
            let done = Arc::clone(&done);
            let progress = Arc::clone(&progress);
            let ctx = Arc::clone(&ctx);
            let handle = set.spawn(async move {
                let task = match admission.acquire_owned().await {
                    Ok(_permit) => run_chapter(task, &ctx).await,
                    Err(e) => failed(task, e.to_string()),
                };
                if let TaskState::Failed(reason) = &task.state {
                    warn!(url = %task.url, %reason, "chapter failed");
                    progress.chapter_failed(&task.url, reason);
                }
                let n = done.fetch_add(1, Ordering::SeqCst) + 1;
                progress.advance(n, total);
                task
            });
            spawned.insert(handle.id(), (i + 1, url.clone()));
        }

        let mut tasks = Vec::with_capacity(total);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    let Some((index, url)) = spawned.remove(&e.id()) else {
                        continue;
                    };
                    let reason = ScraperError::TaskAborted {
                        reason: e.to_string(),
                    }
                    .to_string();
                    warn!(url = %url, %reason, "chapter failed");
                    progress.chapter_failed(&url, &reason);
                    let n = done.fetch_add(1, Ordering::SeqCst) + 1;
                    progress.advance(n, total);
                    tasks.push(failed(ChapterTask::new(index, url), reason));
                }
            }
        }
        tasks.sort_by_key(|t| t.index);
        progress.finish();
        debug!(stage = ?Stage::Done, completed = done.load(Ordering::SeqCst));

        Ok(RunReport {
            novel_name: job.novel_name,
            novel_dir,
            tasks,
        })
    }
}

/// Shared, read-only inputs of every chapter task.
struct TaskContext {
    fetcher: Arc<dyn Fetch>,
    strategy: Arc<dyn Strategy>,
    novel_dir: PathBuf,
    format: OutputFormat,
}

fn failed(mut task: ChapterTask, reason: String) -> ChapterTask {
    task.state = TaskState::Failed(reason);
    task
}

async fn run_chapter(mut task: ChapterTask, ctx: &TaskContext) -> ChapterTask {
    task.state = TaskState::InFlight;
    match process_chapter(&mut task, ctx).await {
        Ok(()) => {
            task.state = TaskState::Succeeded;
            task
        }
        Err(e) => failed(task, e.to_string()),
    }
}

async fn process_chapter(task: &mut ChapterTask, ctx: &TaskContext) -> Result<(), ScraperError> {
    let body = ctx.fetcher.fetch(&task.url).await?;
    let chapter = extract_chapter(ctx.strategy.as_ref(), &body, &task.url, ctx.format)?;
    let chapter_dir = ctx.novel_dir.join(&chapter.title);
    let path = persist::chapter_path(&ctx.novel_dir, &chapter.title, ctx.format.extension());
    task.title = Some(chapter.title);
    task.path = Some(path.clone());
    persist::ensure_dir(&chapter_dir).await?;
    persist::write_file(&path, &chapter.text).await
}

/// Turn a chapter page into its sanitized title and final text.
///
/// Noise removal, title lookup (element first, then the strategy's text pattern), conversion,
/// title emphasis, and boilerplate trimming, in that order.
pub fn extract_chapter(
    strategy: &dyn Strategy,
    html: &str,
    url: &str,
    format: OutputFormat,
) -> Result<ExtractedChapter, ScraperError> {
    let mut doc = Html::parse_document(html);
    transform::remove_noise(&mut doc, strategy.noise_selectors());

    let element_title = strategy.chapter_title(&doc);
    let bodies = strategy.chapter_body(&doc);
    if bodies.is_empty() {
        return Err(ScraperError::ParseChapter {
            url: url.to_string(),
        });
    }
    let fragment: String = bodies.iter().map(|el| el.html()).collect();
    let text = format.render(&fragment, &strategy.text_options());

    let raw_title = element_title
        .or_else(|| strategy.title_from_text(&text))
        .ok_or_else(|| ScraperError::MissingTitle {
            url: url.to_string(),
        })?;
    let mut text = transform::emphasize_title(&text, &raw_title, format.emphasis());
    if let Some(pattern) = strategy.boilerplate() {
        text = transform::trim_boilerplate(&text, pattern);
    }

    Ok(ExtractedChapter {
        title: persist::sanitize_title(&raw_title),
        text: text.trim().to_string(),
    })
}

struct ListPage {
    novel_name: Option<String>,
    links: Vec<String>,
    next: Option<String>,
}

/// Read a chapter-list page: sanitized novel name, absolute chapter links, next list page.
fn read_list_page(
    strategy: &dyn Strategy,
    html: &str,
    page_url: &str,
) -> Result<ListPage, ScraperError> {
    let base = Url::parse(page_url).map_err(|e| ScraperError::InvalidUrl {
        input: page_url.to_string(),
        reason: e.to_string(),
    })?;
    let doc = Html::parse_document(html);
    let links = strategy
        .chapter_links(&doc)
        .iter()
        .filter_map(|href| resolve_link(&base, href))
        .collect();
    Ok(ListPage {
        novel_name: strategy
            .novel_name(&doc)
            .map(|name| persist::sanitize_title(&name)),
        links,
        next: strategy
            .next_list_page(&doc)
            .and_then(|href| resolve_link(&base, &href)),
    })
}

/// Absolute http(s) URL for `href` relative to `base`.
fn resolve_link(base: &Url, href: &str) -> Option<String> {
    match base.join(href) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Some(url.to_string()),
        Ok(url) => {
            debug!(%url, "ignoring non-http link");
            None
        }
        Err(e) => {
            debug!(href, error = %e, "ignoring unresolvable link");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::{sites, RuleStrategy};

    #[test]
    fn extract_chapter_runs_full_transform() -> Result<(), ScraperError> {
        let strategy = RuleStrategy::new(sites::wordexcerpt())?;
        let html = r#"<html><body>
            <ol class="breadcrumb"><li class="active">Chapter 7: The Gate</li></ol>
            <div class="text-left">
              <p>Chapter 7: The Gate</p>
              <center>ADVERTISEMENT</center>
              <p>The gate opened.</p>
              <p>Don't want to wait to read ahead? Support us!</p>
              <p>Tier list</p>
            </div></body></html>"#;
        let chapter = extract_chapter(&strategy, html, "https://wordexcerpt.com/x/", OutputFormat::Text)?;
        assert_eq!(chapter.title, "Chapter 7 - The Gate");
        assert_eq!(
            chapter.text,
            "<strong>Chapter 7: The Gate</strong>\n\nThe gate opened."
        );
        Ok(())
    }

    #[test]
    fn extract_chapter_takes_title_from_text() -> Result<(), ScraperError> {
        let strategy = RuleStrategy::new(sites::readlightnovel())?;
        let html = r#"<div class="desc"><small>caption</small><p>Chapter 3.5</p><p>Body.</p></div>"#;
        let chapter = extract_chapter(
            &strategy,
            html,
            "https://readlightnovel.org/n/chapter-3",
            OutputFormat::Text,
        )?;
        assert_eq!(chapter.title, "Chapter 3 -5");
        assert_eq!(chapter.text, "<strong>Chapter 3.5</strong>\n\nBody.");
        Ok(())
    }

    #[test]
    fn extract_chapter_without_body_fails() -> Result<(), String> {
        let strategy = RuleStrategy::new(sites::wordexcerpt()).map_err(|e| e.to_string())?;
        match extract_chapter(&strategy, "<p>nothing</p>", "https://wordexcerpt.com/y/", OutputFormat::Text) {
            Err(ScraperError::ParseChapter { url }) if url == "https://wordexcerpt.com/y/" => Ok(()),
            other => Err(format!("expected ParseChapter, got {:?}", other)),
        }
    }

    #[test]
    fn extract_chapter_without_title_fails() -> Result<(), String> {
        let strategy = RuleStrategy::new(sites::readlightnovel()).map_err(|e| e.to_string())?;
        match extract_chapter(&strategy, r#"<div class="desc"><p>Prologue</p></div>"#, "https://readlightnovel.org/p", OutputFormat::Text) {
            Err(ScraperError::MissingTitle { .. }) => Ok(()),
            other => Err(format!("expected MissingTitle, got {:?}", other)),
        }
    }

    #[test]
    fn list_page_links_are_absolute() -> Result<(), ScraperError> {
        let strategy = RuleStrategy::new(sites::novelfull())?;
        let html = r#"<h3 class="title">Novel: One</h3>
            <div id="list-chapter"><ul class="list-chapter">
              <li><a href="/novel/chapter-1.html">1</a></li>
              <li><a href="javascript:void(0)">bad</a></li>
            </ul>
            <ul class="pagination"><li class="next"><a href="/novel.html?page=2">Next</a></li></ul></div>"#;
        let page = read_list_page(&strategy, html, "https://novelfull.com/novel.html")?;
        assert_eq!(page.novel_name.as_deref(), Some("Novel - One"));
        assert_eq!(page.links, vec!["https://novelfull.com/novel/chapter-1.html"]);
        assert_eq!(
            page.next.as_deref(),
            Some("https://novelfull.com/novel.html?page=2")
        );
        Ok(())
    }
}
