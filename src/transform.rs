//! Content transform: noise removal, HTML to plain text, title emphasis, and boilerplate trimming.
//!
//! Everything here is synchronous; callers run it between fetch and write.

use regex::{Regex, RegexBuilder};
use scraper::{ElementRef, Html, Node, Selector};
use serde::Deserialize;

/// Matches a bare "Chapter 12" / "chapter 3.5: ..." line; used when the title itself is not in the text.
const CHAPTER_LINE_PATTERN: &str = r"(?im)^chapter\s*\d[\d.]*.*$";

/// Options for [to_text].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextOptions {
    /// Wrap lines longer than this many characters. `None` disables wrapping.
    pub wrap: Option<usize>,
    pub uppercase_headings: bool,
}

/// Markers placed around the emphasized title line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Emphasis {
    pub open: &'static str,
    pub close: &'static str,
}

/// `<strong>` markers, for plain-text output.
pub const STRONG: Emphasis = Emphasis {
    open: "<strong>",
    close: "</strong>",
};

/// `**` markers, for markdown output.
pub const MARKDOWN_BOLD: Emphasis = Emphasis {
    open: "**",
    close: "**",
};

/// Chapter file format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Plain text, `.txt`, title wrapped in `<strong>`.
    #[default]
    Text,
    /// Markdown via html2md, `.md`, title in bold.
    Markdown,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Text => "txt",
            OutputFormat::Markdown => "md",
        }
    }

    pub fn emphasis(self) -> Emphasis {
        match self {
            OutputFormat::Text => STRONG,
            OutputFormat::Markdown => MARKDOWN_BOLD,
        }
    }

    /// Convert a chapter body fragment. `options` only applies to plain text.
    pub fn render(self, fragment: &str, options: &TextOptions) -> String {
        match self {
            OutputFormat::Text => to_text(fragment, options),
            OutputFormat::Markdown => to_markdown(fragment),
        }
    }
}

/// Detach every element matched by `selectors` from the document.
pub fn remove_noise(doc: &mut Html, selectors: &[Selector]) {
    let ids: Vec<_> = selectors
        .iter()
        .flat_map(|sel| doc.select(sel).map(|el| el.id()))
        .collect();
    for id in ids {
        if let Some(mut node) = doc.tree.get_mut(id) {
            node.detach();
        }
    }
}

/// Convert an HTML fragment to plain text.
pub fn to_text(fragment: &str, options: &TextOptions) -> String {
    let doc = Html::parse_fragment(fragment);
    let mut builder = TextBuilder::new(options.uppercase_headings);
    walk(doc.root_element(), &mut builder);
    let text = builder.finish();
    match options.wrap {
        Some(width) if width > 0 => wrap_lines(&text, width),
        _ => text,
    }
}

/// Convert an HTML fragment to markdown.
pub fn to_markdown(fragment: &str) -> String {
    html2md::parse_html(fragment).trim().to_string()
}

/// Wrap the first line containing `title` (case-insensitive) in `emphasis`.
///
/// Falls back to the first line starting with "chapter <number>"; if neither exists the
/// text is returned unchanged.
pub fn emphasize_title(text: &str, title: &str, emphasis: Emphasis) -> String {
    let title = title.trim();
    let title_line = if title.is_empty() {
        None
    } else {
        RegexBuilder::new(&format!("^.*{}.*$", regex::escape(title)))
            .case_insensitive(true)
            .multi_line(true)
            .build()
            .ok()
            .and_then(|re| re.find(text).map(|m| m.range()))
    };
    let line = title_line.or_else(|| {
        Regex::new(CHAPTER_LINE_PATTERN)
            .ok()
            .and_then(|re| re.find(text).map(|m| m.range()))
    });
    match line {
        Some(range) => format!(
            "{}{}{}{}{}",
            &text[..range.start],
            emphasis.open,
            &text[range.clone()],
            emphasis.close,
            &text[range.end..]
        ),
        None => text.to_string(),
    }
}

/// Cut everything from the first match of `pattern` to the end of the text.
pub fn trim_boilerplate(text: &str, pattern: &Regex) -> String {
    match pattern.find(text) {
        Some(m) => text[..m.start()].trim_end().to_string(),
        None => text.to_string(),
    }
}

fn walk(el: ElementRef<'_>, builder: &mut TextBuilder) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => builder.push_text(text),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    visit_element(child_el, builder);
                }
            }
            _ => {}
        }
    }
}

fn visit_element(el: ElementRef<'_>, builder: &mut TextBuilder) {
    let name = el.value().name();
    match name {
        "script" | "style" | "noscript" | "template" | "head" => return,
        "br" => {
            builder.line_break();
            return;
        }
        "hr" => {
            builder.block(2);
            return;
        }
        _ => {}
    }
    let breaks = block_breaks(name);
    let heading = matches!(name, "h1" | "h2" | "h3" | "h4" | "h5" | "h6");
    builder.block(breaks);
    if heading {
        builder.heading_depth += 1;
    }
    walk(el, builder);
    if heading {
        builder.heading_depth -= 1;
    }
    builder.block(breaks);
}

/// Newlines emitted around a block element: 2 for paragraph-like blocks, 1 for line-like ones.
fn block_breaks(name: &str) -> usize {
    match name {
        "p" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "blockquote" | "pre" | "ul" | "ol"
        | "table" | "figure" | "dl" => 2,
        "div" | "li" | "tr" | "section" | "article" | "header" | "footer" | "main" | "nav"
        | "aside" | "dd" | "dt" | "figcaption" | "center" => 1,
        _ => 0,
    }
}

struct TextBuilder {
    out: String,
    pending_space: bool,
    pending_breaks: usize,
    heading_depth: usize,
    uppercase_headings: bool,
}

impl TextBuilder {
    fn new(uppercase_headings: bool) -> Self {
        Self {
            out: String::new(),
            pending_space: false,
            pending_breaks: 0,
            heading_depth: 0,
            uppercase_headings,
        }
    }

    fn push_text(&mut self, text: &str) {
        if text.starts_with(char::is_whitespace) {
            self.pending_space = true;
        }
        let mut any = false;
        for word in text.split_whitespace() {
            self.flush_separator();
            if self.uppercase_headings && self.heading_depth > 0 {
                self.out.push_str(&word.to_uppercase());
            } else {
                self.out.push_str(word);
            }
            self.pending_space = true;
            any = true;
        }
        if any {
            self.pending_space = text.ends_with(char::is_whitespace);
        }
    }

    fn flush_separator(&mut self) {
        if self.out.is_empty() {
            self.pending_breaks = 0;
        } else if self.pending_breaks > 0 {
            for _ in 0..self.pending_breaks {
                self.out.push('\n');
            }
            self.pending_breaks = 0;
        } else if self.pending_space {
            self.out.push(' ');
        }
        self.pending_space = false;
    }

    fn block(&mut self, breaks: usize) {
        self.pending_breaks = self.pending_breaks.max(breaks);
    }

    fn line_break(&mut self) {
        self.pending_breaks = (self.pending_breaks + 1).min(2);
    }

    fn finish(self) -> String {
        self.out
    }
}

/// Greedy word wrap of every line longer than `width` characters.
fn wrap_lines(text: &str, width: usize) -> String {
    let mut out = Vec::new();
    for line in text.split('\n') {
        if line.chars().count() <= width {
            out.push(line.to_string());
            continue;
        }
        let mut current = String::new();
        let mut current_len = 0;
        for word in line.split(' ') {
            let word_len = word.chars().count();
            if current_len > 0 && current_len + 1 + word_len > width {
                out.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if current_len > 0 {
                current.push(' ');
                current_len += 1;
            }
            current.push_str(word);
            current_len += word_len;
        }
        out.push(current);
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(html: &str) -> String {
        to_text(html, &TextOptions::default())
    }

    #[test]
    fn paragraphs_become_blank_line_separated() {
        assert_eq!(
            plain("<p>First  paragraph\n here.</p><p>Second.</p>"),
            "First paragraph here.\n\nSecond."
        );
    }

    #[test]
    fn inline_elements_keep_word_spacing() {
        assert_eq!(plain("<p>Hello <b>world</b>!</p>"), "Hello world!");
        assert_eq!(plain("<p>Hel<i>lo</i></p>"), "Hello");
    }

    #[test]
    fn br_and_div_produce_single_newlines() {
        assert_eq!(plain("<div>a<br>b</div><div>c</div>"), "a\nb\nc");
    }

    #[test]
    fn scripts_and_styles_are_dropped() {
        assert_eq!(
            plain("<p>Text</p><script>var x = 1;</script><style>p{}</style>"),
            "Text"
        );
    }

    #[test]
    fn headings_are_not_uppercased_by_default() {
        assert_eq!(plain("<h3>Chapter One</h3><p>Body</p>"), "Chapter One\n\nBody");
        let opts = TextOptions {
            wrap: None,
            uppercase_headings: true,
        };
        assert_eq!(
            to_text("<h3>Chapter One</h3><p>Body</p>", &opts),
            "CHAPTER ONE\n\nBody"
        );
    }

    #[test]
    fn wrap_breaks_long_lines_at_word_boundaries() {
        let opts = TextOptions {
            wrap: Some(10),
            uppercase_headings: false,
        };
        assert_eq!(
            to_text("<p>one two three four five</p>", &opts),
            "one two\nthree four\nfive"
        );
    }

    #[test]
    fn noise_elements_never_reach_the_text() -> Result<(), String> {
        let mut doc = Html::parse_document(
            r#"<div class="body"><p>Real text.</p><center>AD BANNER</center>
            <div class="trinity-player-iframe-wrapper"><p>PLAYER WIDGET</p></div>
            <small>caption noise</small><p>More text.</p></div>"#,
        );
        let selectors = [".trinity-player-iframe-wrapper", "small", "center"]
            .iter()
            .map(|s| Selector::parse(s).map_err(|e| e.to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        remove_noise(&mut doc, &selectors);
        let body_sel = Selector::parse("div.body").map_err(|e| e.to_string())?;
        let body = doc
            .select(&body_sel)
            .next()
            .ok_or("body missing")?
            .html();
        let text = plain(&body);
        for noise in ["AD BANNER", "PLAYER WIDGET", "caption noise"] {
            assert!(!text.contains(noise), "{noise:?} leaked into {text:?}");
        }
        assert!(text.contains("Real text."));
        assert!(text.contains("More text."));
        Ok(())
    }

    #[test]
    fn emphasis_wraps_first_case_insensitive_title_line() {
        let text = "Intro\nchapter 5 - the storm\nBody mentions The Storm again.";
        assert_eq!(
            emphasize_title(text, "The Storm", STRONG),
            "Intro\n<strong>chapter 5 - the storm</strong>\nBody mentions The Storm again."
        );
    }

    #[test]
    fn emphasis_falls_back_to_chapter_number_line() {
        let text = "Some preface\nChapter 12\nBody text.";
        assert_eq!(
            emphasize_title(text, "Unrelated Title", MARKDOWN_BOLD),
            "Some preface\n**Chapter 12**\nBody text."
        );
    }

    #[test]
    fn emphasis_without_any_match_is_a_no_op() {
        let text = "Nothing to see.\nStill nothing.";
        assert_eq!(emphasize_title(text, "Missing", STRONG), text);
        assert_eq!(emphasize_title(text, "", STRONG), text);
    }

    #[test]
    fn emphasis_treats_title_literally() {
        let text = "Chapter 1 (part 1) [draft]?\nBody";
        assert_eq!(
            emphasize_title(text, "(Part 1) [Draft]?", STRONG),
            "<strong>Chapter 1 (part 1) [draft]?</strong>\nBody"
        );
    }

    #[test]
    fn boilerplate_trim_cuts_to_end() -> Result<(), regex::Error> {
        let pattern = Regex::new(r"(?is)[^\n]*wait to read ahead\?.*")?;
        let text = "Story text.\n\nDon't want to wait to read ahead? Join now!\nTier 1\nTier 2";
        assert_eq!(trim_boilerplate(text, &pattern), "Story text.");
        assert_eq!(trim_boilerplate("Clean text.", &pattern), "Clean text.");
        Ok(())
    }

    #[test]
    fn output_format_extensions_and_markers() {
        assert_eq!(OutputFormat::default(), OutputFormat::Text);
        assert_eq!(OutputFormat::Text.extension(), "txt");
        assert_eq!(OutputFormat::Markdown.extension(), "md");
        assert_eq!(OutputFormat::Markdown.emphasis(), MARKDOWN_BOLD);
    }

    #[test]
    fn markdown_conversion_keeps_text() {
        let md = to_markdown("<p>Hello <em>there</em></p>");
        assert!(md.contains("Hello"));
        assert!(md.contains("there"));
    }
}
