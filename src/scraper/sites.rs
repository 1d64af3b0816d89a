//! Built-in rule tables. A `[[sites]]` entry in the config file with the same host replaces one of these.

use crate::scraper::{ListOrder, RateLimit, SiteRules, SkipScope};

/// Every built-in table.
pub fn builtin_rules() -> Vec<SiteRules> {
    vec![wordexcerpt(), readlightnovel(), novelfull()]
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

/// WordExcerpt (Madara theme). Lists newest first and sometimes appends an announcement post;
/// chapters end with a "read ahead" upsell.
pub fn wordexcerpt() -> SiteRules {
    SiteRules {
        host: "wordexcerpt.com".to_string(),
        novel_name_selector: "h1".to_string(),
        chapter_list_selector: ".wp-manga-chapter a".to_string(),
        next_list_page_selector: None,
        list_order: ListOrder::NewestFirst,
        chapter_title_selector: Some(".breadcrumb .active".to_string()),
        chapter_body_selector: ".text-left".to_string(),
        title_pattern: None,
        skip_pattern: Some(r"(?i)an announcement".to_string()),
        skip_scope: SkipScope::LastEntry,
        noise_selectors: strings(&["center", "img"]),
        boilerplate_pattern: Some(r"(?is)[^\n]*wait to read ahead\?.*".to_string()),
        wrap_width: None,
        uppercase_headings: false,
        rate_limit: None,
    }
}

/// ReadLightNovel. No title element on chapter pages; the "Chapter N" heading lives in the body.
/// Throttles aggressive clients, hence the rate limit.
pub fn readlightnovel() -> SiteRules {
    SiteRules {
        host: "readlightnovel.org".to_string(),
        novel_name_selector: "h1".to_string(),
        chapter_list_selector: ".chapter-chs li a".to_string(),
        next_list_page_selector: None,
        list_order: ListOrder::OldestFirst,
        chapter_title_selector: None,
        chapter_body_selector: ".desc".to_string(),
        title_pattern: Some(r"(?i)chapter [\d.]+".to_string()),
        skip_pattern: None,
        skip_scope: SkipScope::Never,
        noise_selectors: strings(&[".trinity-player-iframe-wrapper", "small", "center"]),
        boilerplate_pattern: None,
        wrap_width: Some(130),
        uppercase_headings: true,
        rate_limit: Some(RateLimit {
            min_interval_ms: 333,
            max_concurrent: Some(8),
        }),
    }
}

/// NovelFull. Chapter list is paginated (50 per page).
pub fn novelfull() -> SiteRules {
    SiteRules {
        host: "novelfull.com".to_string(),
        novel_name_selector: "h3.title".to_string(),
        chapter_list_selector: "#list-chapter .list-chapter li a".to_string(),
        next_list_page_selector: Some("#list-chapter .pagination li.next a".to_string()),
        list_order: ListOrder::OldestFirst,
        chapter_title_selector: Some(".chapter-title".to_string()),
        chapter_body_selector: "#chapter-content".to_string(),
        title_pattern: None,
        skip_pattern: None,
        skip_scope: SkipScope::Never,
        noise_selectors: strings(&["script", "ins", ".ads", ".adsbygoogle"]),
        boilerplate_pattern: None,
        wrap_width: None,
        uppercase_headings: false,
        rate_limit: None,
    }
}
