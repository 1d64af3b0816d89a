//! Data-driven strategy: a [SiteRules] table compiled once into selectors and regexes.

use crate::scraper::{ListOrder, RateLimit, ScraperError, SkipScope, Strategy};
use crate::transform::TextOptions;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;

/// Selector and pattern table for one source. Loaded from built-ins or `[[sites]]` in the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct SiteRules {
    pub host: String,
    /// Novel display name on the landing page.
    pub novel_name_selector: String,
    /// Anchors whose `href` are the chapter URLs.
    pub chapter_list_selector: String,
    /// Anchor to the next chapter-list page, for paginated lists.
    #[serde(default)]
    pub next_list_page_selector: Option<String>,
    #[serde(default)]
    pub list_order: ListOrder,
    #[serde(default)]
    pub chapter_title_selector: Option<String>,
    pub chapter_body_selector: String,
    /// Regex finding the title inside the body text when there is no title element.
    #[serde(default)]
    pub title_pattern: Option<String>,
    /// Regex matched against a listed page's title (or body text) to drop non-chapters.
    #[serde(default)]
    pub skip_pattern: Option<String>,
    /// Only used when `skip_pattern` is set. Default: last entry.
    #[serde(default)]
    pub skip_scope: SkipScope,
    #[serde(default)]
    pub noise_selectors: Vec<String>,
    /// Regex for trailing site-injected text.
    #[serde(default)]
    pub boilerplate_pattern: Option<String>,
    #[serde(default)]
    pub wrap_width: Option<usize>,
    #[serde(default)]
    pub uppercase_headings: bool,
    #[serde(default)]
    pub rate_limit: Option<RateLimit>,
}

/// [Strategy] backed by a compiled [SiteRules] table.
#[derive(Debug)]
pub struct RuleStrategy {
    host: String,
    novel_name: Selector,
    chapter_list: Selector,
    next_list_page: Option<Selector>,
    list_order: ListOrder,
    chapter_title: Option<Selector>,
    chapter_body: Selector,
    title_pattern: Option<Regex>,
    skip_pattern: Option<Regex>,
    skip_scope: SkipScope,
    noise: Vec<Selector>,
    boilerplate: Option<Regex>,
    text_options: TextOptions,
    rate_limit: Option<RateLimit>,
}

impl RuleStrategy {
    /// Compile every selector and pattern; an invalid one is reported with the field it came from.
    pub fn new(rules: SiteRules) -> Result<Self, ScraperError> {
        let owned_host = rules.host.clone();
        let host = owned_host.as_str();
        let optional_selector = |field, value: &Option<String>| {
            value
                .as_deref()
                .map(|v| compile_selector(host, field, v))
                .transpose()
        };
        let optional_regex = |field, value: &Option<String>| {
            value
                .as_deref()
                .map(|v| compile_regex(host, field, v))
                .transpose()
        };
        let noise = rules
            .noise_selectors
            .iter()
            .map(|s| compile_selector(host, "noise_selectors", s))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            novel_name: compile_selector(host, "novel_name_selector", &rules.novel_name_selector)?,
            chapter_list: compile_selector(
                host,
                "chapter_list_selector",
                &rules.chapter_list_selector,
            )?,
            next_list_page: optional_selector(
                "next_list_page_selector",
                &rules.next_list_page_selector,
            )?,
            list_order: rules.list_order,
            chapter_title: optional_selector(
                "chapter_title_selector",
                &rules.chapter_title_selector,
            )?,
            chapter_body: compile_selector(
                host,
                "chapter_body_selector",
                &rules.chapter_body_selector,
            )?,
            title_pattern: optional_regex("title_pattern", &rules.title_pattern)?,
            skip_pattern: optional_regex("skip_pattern", &rules.skip_pattern)?,
            skip_scope: rules.skip_scope,
            noise,
            boilerplate: optional_regex("boilerplate_pattern", &rules.boilerplate_pattern)?,
            text_options: TextOptions {
                wrap: rules.wrap_width,
                uppercase_headings: rules.uppercase_headings,
            },
            rate_limit: rules.rate_limit,
            host: rules.host,
        })
    }
}

fn compile_selector(host: &str, field: &'static str, value: &str) -> Result<Selector, ScraperError> {
    Selector::parse(value).map_err(|e| ScraperError::InvalidRule {
        host: host.to_string(),
        field,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn compile_regex(host: &str, field: &'static str, value: &str) -> Result<Regex, ScraperError> {
    Regex::new(value).map_err(|e| ScraperError::InvalidRule {
        host: host.to_string(),
        field,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn first_text(doc: &Html, selector: &Selector) -> Option<String> {
    doc.select(selector)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

impl Strategy for RuleStrategy {
    fn host(&self) -> &str {
        &self.host
    }

    fn novel_name(&self, landing: &Html) -> Option<String> {
        first_text(landing, &self.novel_name)
    }

    fn chapter_links(&self, landing: &Html) -> Vec<String> {
        landing
            .select(&self.chapter_list)
            .filter_map(|a| a.value().attr("href"))
            .map(str::trim)
            .filter(|href| !href.is_empty())
            .map(String::from)
            .collect()
    }

    fn next_list_page(&self, landing: &Html) -> Option<String> {
        let selector = self.next_list_page.as_ref()?;
        landing
            .select(selector)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(|href| href.trim().to_string())
            .filter(|href| !href.is_empty() && !href.starts_with('#'))
    }

    fn list_order(&self) -> ListOrder {
        self.list_order
    }

    fn chapter_title(&self, page: &Html) -> Option<String> {
        first_text(page, self.chapter_title.as_ref()?)
    }

    fn chapter_body<'a>(&self, page: &'a Html) -> Vec<ElementRef<'a>> {
        page.select(&self.chapter_body).collect()
    }

    fn title_from_text(&self, text: &str) -> Option<String> {
        self.title_pattern
            .as_ref()?
            .find(text)
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn skip_scope(&self) -> SkipScope {
        if self.skip_pattern.is_some() {
            self.skip_scope
        } else {
            SkipScope::Never
        }
    }

    fn should_skip(&self, page: &Html) -> bool {
        let Some(pattern) = &self.skip_pattern else {
            return false;
        };
        let probe = self.chapter_title(page).unwrap_or_else(|| {
            self.chapter_body(page)
                .iter()
                .flat_map(|el| el.text())
                .collect::<String>()
        });
        pattern.is_match(&probe)
    }

    fn noise_selectors(&self) -> &[Selector] {
        &self.noise
    }

    fn text_options(&self) -> TextOptions {
        self.text_options
    }

    fn boilerplate(&self) -> Option<&Regex> {
        self.boilerplate.as_ref()
    }

    fn rate_limit(&self) -> Option<RateLimit> {
        self.rate_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::sites;

    #[test]
    fn landing_page_name_and_links() -> Result<(), ScraperError> {
        let strategy = RuleStrategy::new(sites::wordexcerpt())?;
        let html = Html::parse_document(
            r#"<html><body><div class="post-title"><h1> My Novel </h1></div>
            <ul><li class="wp-manga-chapter"><a href="https://wordexcerpt.com/n/ch-2/">Ch 2</a></li>
            <li class="wp-manga-chapter"><a href=" /n/ch-1/ ">Ch 1</a></li>
            <li class="wp-manga-chapter"><a>no href</a></li></ul></body></html>"#,
        );
        assert_eq!(strategy.novel_name(&html).as_deref(), Some("My Novel"));
        assert_eq!(
            strategy.chapter_links(&html),
            vec!["https://wordexcerpt.com/n/ch-2/", "/n/ch-1/"]
        );
        assert_eq!(strategy.list_order(), ListOrder::NewestFirst);
        Ok(())
    }

    #[test]
    fn announcement_is_skipped_by_title() -> Result<(), ScraperError> {
        let strategy = RuleStrategy::new(sites::wordexcerpt())?;
        assert_eq!(strategy.skip_scope(), SkipScope::LastEntry);
        let announcement = Html::parse_document(
            r#"<ol class="breadcrumb"><li class="active">An Announcement!</li></ol><div class="text-left"><p>News</p></div>"#,
        );
        let chapter = Html::parse_document(
            r#"<ol class="breadcrumb"><li class="active">Chapter 3</li></ol><div class="text-left"><p>Story</p></div>"#,
        );
        assert!(strategy.should_skip(&announcement));
        assert!(!strategy.should_skip(&chapter));
        Ok(())
    }

    #[test]
    fn title_pattern_reads_title_from_text() -> Result<(), ScraperError> {
        let strategy = RuleStrategy::new(sites::readlightnovel())?;
        assert_eq!(
            strategy.title_from_text("Some header\nChapter 12.5 - The Fall\nBody").as_deref(),
            Some("Chapter 12.5")
        );
        assert_eq!(strategy.title_from_text("no title here"), None);
        Ok(())
    }

    #[test]
    fn pagination_link_is_read() -> Result<(), ScraperError> {
        let strategy = RuleStrategy::new(sites::novelfull())?;
        let html = Html::parse_document(
            r##"<div id="list-chapter"><ul class="list-chapter"><li><a href="/n/chapter-1.html">1</a></li></ul>
            <ul class="pagination"><li class="next"><a href="/n.html?page=2">Next</a></li></ul></div>"##,
        );
        assert_eq!(strategy.next_list_page(&html).as_deref(), Some("/n.html?page=2"));
        let last_page = Html::parse_document(
            r##"<div id="list-chapter"><ul class="pagination"><li class="next disabled"><a href="#">Next</a></li></ul></div>"##,
        );
        assert_eq!(strategy.next_list_page(&last_page), None);
        Ok(())
    }

    #[test]
    fn invalid_selector_names_the_field() -> Result<(), String> {
        let mut rules = sites::wordexcerpt();
        rules.chapter_body_selector = "div[".to_string();
        match RuleStrategy::new(rules) {
            Err(ScraperError::InvalidRule { field, .. }) if field == "chapter_body_selector" => Ok(()),
            other => Err(format!("expected InvalidRule, got {:?}", other.map(|s| s.host))),
        }
    }

    #[test]
    fn invalid_regex_names_the_field() -> Result<(), String> {
        let mut rules = sites::wordexcerpt();
        rules.skip_pattern = Some("(unclosed".to_string());
        match RuleStrategy::new(rules) {
            Err(ScraperError::InvalidRule { field, .. }) if field == "skip_pattern" => Ok(()),
            other => Err(format!("expected InvalidRule, got {:?}", other.map(|s| s.host))),
        }
    }

    #[test]
    fn rules_deserialize_from_toml() -> Result<(), toml::de::Error> {
        let rules: SiteRules = toml::from_str(
            r##"
            host = "example.org"
            novel_name_selector = "h1"
            chapter_list_selector = ".chapters a"
            chapter_body_selector = "#content"
            list_order = "newest_first"
            skip_pattern = "(?i)notice"
            skip_scope = "every_entry"
            noise_selectors = ["script", ".ad"]
            wrap_width = 80
            rate_limit = { min_interval_ms = 500, max_concurrent = 2 }
            "##,
        )?;
        assert_eq!(rules.host, "example.org");
        assert_eq!(rules.list_order, ListOrder::NewestFirst);
        assert_eq!(rules.skip_scope, SkipScope::EveryEntry);
        assert_eq!(rules.noise_selectors.len(), 2);
        assert_eq!(rules.wrap_width, Some(80));
        assert_eq!(
            rules.rate_limit,
            Some(RateLimit {
                min_interval_ms: 500,
                max_concurrent: Some(2)
            })
        );
        assert!(rules.chapter_title_selector.is_none());
        Ok(())
    }

    #[test]
    fn skip_scope_is_never_without_pattern() -> Result<(), ScraperError> {
        let strategy = RuleStrategy::new(sites::novelfull())?;
        assert_eq!(strategy.skip_scope(), SkipScope::Never);
        Ok(())
    }
}
