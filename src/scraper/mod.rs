//! Sources and scraping: the per-site strategy contract, the host router, the fetch client, and the engine.

mod client;
mod error;

pub mod engine;
pub mod rules;
pub mod sites;

pub use client::{
    Fetch, FetchClient, FetchClientBuilder, RateLimit, RateLimiter, DEFAULT_RETRY_COUNT,
    DEFAULT_RETRY_DELAY_MS,
};
pub use error::ScraperError;
pub use rules::{RuleStrategy, SiteRules};

use crate::transform::TextOptions;
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Order in which a source lists its chapters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListOrder {
    #[default]
    OldestFirst,
    /// Reversed into narrative order before planning.
    NewestFirst,
}

/// Which chapter-list entries are checked with [Strategy::should_skip].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipScope {
    Never,
    /// Only the final entry in narrative order (sites that append one announcement link).
    #[default]
    LastEntry,
    EveryEntry,
}

/// Site-specific rules for one source.
///
/// Implementations hold no per-run state: one instance is shared by every concurrent chapter task.
/// All page access goes through a parsed [Html] owned by the caller.
pub trait Strategy: Send + Sync {
    /// Exact hostname this strategy is registered under.
    fn host(&self) -> &str;

    /// Novel display name from the landing page.
    fn novel_name(&self, landing: &Html) -> Option<String>;

    /// Chapter hrefs on a chapter-list page, in page order. May be relative.
    fn chapter_links(&self, landing: &Html) -> Vec<String>;

    /// Next chapter-list page for paginated sources.
    fn next_list_page(&self, _landing: &Html) -> Option<String> {
        None
    }

    fn list_order(&self) -> ListOrder {
        ListOrder::OldestFirst
    }

    fn chapter_title(&self, page: &Html) -> Option<String>;

    /// Elements holding the chapter body.
    fn chapter_body<'a>(&self, page: &'a Html) -> Vec<ElementRef<'a>>;

    /// Title for sources that only carry it inside the converted body text.
    fn title_from_text(&self, _text: &str) -> Option<String> {
        None
    }

    fn skip_scope(&self) -> SkipScope {
        SkipScope::Never
    }

    /// True when a listed page is not a real chapter (e.g. an announcement).
    fn should_skip(&self, _page: &Html) -> bool {
        false
    }

    /// Elements removed before any text is taken from a chapter page.
    fn noise_selectors(&self) -> &[Selector] {
        &[]
    }

    fn text_options(&self) -> TextOptions {
        TextOptions::default()
    }

    /// Site-injected trailing text; everything from the first match on is dropped.
    fn boilerplate(&self) -> Option<&Regex> {
        None
    }

    fn rate_limit(&self) -> Option<RateLimit> {
        None
    }
}

/// Maps an exact hostname to its strategy.
#[derive(Clone, Default)]
pub struct Router {
    sources: HashMap<String, Arc<dyn Strategy>>,
}

impl Router {
    /// Empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Router with every built-in source registered.
    pub fn builtin() -> Result<Self, ScraperError> {
        let mut router = Self::new();
        for rules in sites::builtin_rules() {
            router.register_rules(rules)?;
        }
        Ok(router)
    }

    /// Register a strategy under its host, replacing any previous one.
    pub fn register(&mut self, strategy: Arc<dyn Strategy>) -> Option<Arc<dyn Strategy>> {
        self.sources.insert(strategy.host().to_string(), strategy)
    }

    /// Compile and register a rule table.
    pub fn register_rules(&mut self, rules: SiteRules) -> Result<(), ScraperError> {
        let strategy = RuleStrategy::new(rules)?;
        self.register(Arc::new(strategy));
        Ok(())
    }

    /// Strategy for the URL's hostname. Matching is exact: no subdomain or wildcard folding.
    pub fn resolve(&self, url_input: &str) -> Result<Arc<dyn Strategy>, ScraperError> {
        let url = Url::parse(url_input).map_err(|e| ScraperError::InvalidUrl {
            input: url_input.to_string(),
            reason: e.to_string(),
        })?;
        let host = url.host_str().ok_or_else(|| ScraperError::InvalidUrl {
            input: url_input.to_string(),
            reason: "URL has no host".to_string(),
        })?;
        self.sources
            .get(host)
            .cloned()
            .ok_or_else(|| ScraperError::UnsupportedSource {
                host: host.to_string(),
            })
    }

    /// Registered hosts, sorted.
    pub fn hosts(&self) -> Vec<&str> {
        let mut hosts: Vec<&str> = self.sources.keys().map(String::as_str).collect();
        hosts.sort_unstable();
        hosts
    }

    /// Rate limits declared by registered sources, keyed by host.
    pub fn rate_limits(&self) -> Vec<(String, RateLimit)> {
        self.sources
            .iter()
            .filter_map(|(host, s)| s.rate_limit().map(|limit| (host.clone(), limit)))
            .collect()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("hosts", &self.hosts())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_hosts_resolve_to_their_strategy() -> Result<(), ScraperError> {
        let router = Router::builtin()?;
        for (host, url) in [
            ("wordexcerpt.com", "https://wordexcerpt.com/series/some-novel/"),
            ("readlightnovel.org", "https://readlightnovel.org/some-novel"),
            ("novelfull.com", "https://novelfull.com/some-novel.html"),
        ] {
            let strategy = router.resolve(url)?;
            assert_eq!(strategy.host(), host);
        }
        Ok(())
    }

    #[test]
    fn unregistered_host_is_unsupported() -> Result<(), String> {
        let router = Router::builtin().map_err(|e| e.to_string())?;
        match router.resolve("https://example.com/novel") {
            Err(ScraperError::UnsupportedSource { host }) if host == "example.com" => Ok(()),
            other => Err(format!("expected UnsupportedSource, got {:?}", other.map(|s| s.host().to_string()))),
        }
    }

    #[test]
    fn subdomains_are_not_folded() -> Result<(), String> {
        let router = Router::builtin().map_err(|e| e.to_string())?;
        match router.resolve("https://www.wordexcerpt.com/series/x/") {
            Err(ScraperError::UnsupportedSource { host }) if host == "www.wordexcerpt.com" => Ok(()),
            other => Err(format!("expected UnsupportedSource, got {:?}", other.map(|s| s.host().to_string()))),
        }
    }

    #[test]
    fn invalid_url_errors() -> Result<(), String> {
        let router = Router::builtin().map_err(|e| e.to_string())?;
        match router.resolve("not-a-url") {
            Err(ScraperError::InvalidUrl { input, .. }) if input == "not-a-url" => Ok(()),
            other => Err(format!("expected InvalidUrl, got {:?}", other.map(|s| s.host().to_string()))),
        }
    }

    #[test]
    fn hosts_are_sorted_and_rate_limits_reported() -> Result<(), ScraperError> {
        let router = Router::builtin()?;
        assert_eq!(
            router.hosts(),
            vec!["novelfull.com", "readlightnovel.org", "wordexcerpt.com"]
        );
        let limits = router.rate_limits();
        assert_eq!(limits.len(), 1);
        assert_eq!(limits[0].0, "readlightnovel.org");
        assert_eq!(
            limits[0].1,
            RateLimit {
                min_interval_ms: 333,
                max_concurrent: Some(8)
            }
        );
        Ok(())
    }

    #[test]
    fn register_replaces_existing_host() -> Result<(), ScraperError> {
        let mut router = Router::builtin()?;
        let mut rules = sites::wordexcerpt();
        rules.chapter_body_selector = ".entry-content".to_string();
        router.register_rules(rules)?;
        assert_eq!(router.hosts().len(), 3);
        Ok(())
    }
}
