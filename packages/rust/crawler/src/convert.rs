//! HTML page → Markdown text.
//!
//! Picks the main content region, drops navigation chrome, converts with
//! `htmd`, then tidies the whitespace.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use sitekb_shared::{Result, SiteKbError};

/// Content regions tried in order before falling back to `<body>`.
const CONTENT_SELECTORS: [&str; 4] = ["main", "article", r#"[role="main"]"#, ".content"];

/// Elements that never carry page content.
const CHROME_SELECTOR: &str = "nav, header, footer, aside, script, style, noscript, .sidebar";

static CHROME: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(CHROME_SELECTOR).expect("valid selector"));
static BODY: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body").expect("valid selector"));
static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("valid selector"));
static H1: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").expect("valid selector"));

/// Page title: `<title>`, else the first `<h1>`, else `"Untitled"`.
pub fn page_title(doc: &Html) -> String {
    [&*TITLE, &*H1]
        .into_iter()
        .find_map(|sel| {
            doc.select(sel)
                .map(|el| collapse_spaces(&el.text().collect::<String>()))
                .find(|t| !t.is_empty())
        })
        .unwrap_or_else(|| "Untitled".to_string())
}

/// Inner HTML of the main content region with chrome removed.
pub fn main_content_html(doc: &Html) -> String {
    for sel_str in CONTENT_SELECTORS {
        let Ok(sel) = Selector::parse(sel_str) else {
            continue;
        };
        if let Some(el) = doc.select(&sel).next() {
            return strip_chrome(&el.inner_html());
        }
    }

    doc.select(&BODY)
        .next()
        .map(|body| strip_chrome(&body.inner_html()))
        .unwrap_or_default()
}

/// Remove navigation/chrome elements from an HTML fragment.
fn strip_chrome(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut result = html.to_string();
    for el in fragment.select(&CHROME) {
        result = result.replace(&el.html(), "");
    }
    result
}

/// Convert a whole HTML document to Markdown, returning `(title, markdown)`.
pub fn document_to_markdown(doc: &Html) -> Result<(String, String)> {
    let title = page_title(doc);
    let markdown = html_to_markdown(&main_content_html(doc))?;
    Ok((title, markdown))
}

/// Convert an HTML fragment to normalized Markdown.
pub fn html_to_markdown(html: &str) -> Result<String> {
    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "nav", "iframe", "noscript", "svg"])
        .build();

    let raw = converter
        .convert(html)
        .map_err(|e| SiteKbError::parse(format!("htmd conversion failed: {e}")))?;

    Ok(normalize_whitespace(&raw))
}

/// Trim trailing spaces on every line and collapse runs of more than two blank lines.
pub fn normalize_whitespace(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{4,}").expect("valid regex"));

    let trimmed: Vec<&str> = md.lines().map(str::trim_end).collect();
    let joined = trimmed.join("\n");
    MULTI_BLANK_RE
        .replace_all(&joined, "\n\n\n")
        .trim()
        .to_string()
}

fn collapse_spaces(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
