//! Page-source helpers for the cohort hub.
//! Regex based, tuned to the markup the hub renders. Tag and attribute names
//! match case-insensitively.

use once_cell::sync::Lazy;
use regex::Regex;

use super::scraper::Cohort;
use crate::config::{DOWNLOAD_EXTENSIONS, MAX_FILENAME_LEN};

static ANCHOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<a\b([^>]*)>(.*?)</a\s*>").unwrap());
static HREF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)\bhref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#).unwrap());
static CLASS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)\bclass\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#).unwrap());
static BLOCK_OPEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<(div|tr|li)\b([^>]*)>").unwrap());
static BLOCK_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<(/?)(div|tr|li)\b[^>]*>").unwrap());
static UNSAFE_FILENAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[<>:"/\\|?*]"#).unwrap());
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// An `<a href>` element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub href: String,
    /// Visible text with tags stripped
    pub text: String,
}

/// Every anchor with an href, in document order
pub fn anchors(html: &str) -> Vec<Anchor> {
    ANCHOR_RE
        .captures_iter(html)
        .filter_map(|cap| {
            let href = attr_value(&HREF_RE, &cap[1])?;
            Some(Anchor {
                href,
                text: strip_tags(&cap[2]),
            })
        })
        .collect()
}

/// Distinct download hrefs in document order
pub fn download_links(html: &str) -> Vec<String> {
    let mut links: Vec<String> = Vec::new();
    for anchor in anchors(html) {
        if is_download_link(&anchor.href) && !links.contains(&anchor.href) {
            links.push(anchor.href);
        }
    }
    links
}

/// Find cohort candidates without knowing their link texts.
///
/// `div`, `tr` and `li` elements whose class mentions `cohort` or `dataset`
/// are candidates; a page without any falls back to its anchors. Candidates
/// need a name of at least three characters and one download link.
pub fn discover_cohorts(html: &str) -> Vec<Cohort> {
    let blocks = class_blocks(html);

    let candidates: Vec<(String, Vec<String>)> = if blocks.is_empty() {
        anchors(html)
            .into_iter()
            .map(|anchor| {
                let links = if is_download_link(&anchor.href) {
                    vec![anchor.href]
                } else {
                    Vec::new()
                };
                (anchor.text, links)
            })
            .collect()
    } else {
        blocks
            .into_iter()
            .map(|(start, end)| {
                let block = &html[start..end];
                (strip_tags(block), download_links(block))
            })
            .collect()
    };

    candidates
        .into_iter()
        .filter(|(name, links)| name.chars().count() >= 3 && !links.is_empty())
        .map(|(name, download_links)| Cohort {
            name,
            download_links,
        })
        .collect()
}

/// Byte ranges of the `div`/`tr`/`li` elements whose class mentions a
/// cohort or dataset
fn class_blocks(html: &str) -> Vec<(usize, usize)> {
    BLOCK_OPEN_RE
        .captures_iter(html)
        .filter_map(|cap| {
            let class = attr_value(&CLASS_RE, &cap[2])?.to_lowercase();
            if !(class.contains("cohort") || class.contains("dataset")) {
                return None;
            }
            let open = cap.get(0)?;
            Some((open.start(), element_end(html, &cap[1], open.end())))
        })
        .collect()
}

/// End of the element whose opening tag ends at `from`, honoring nesting of
/// the same tag. Unclosed elements run to the end of the document.
fn element_end(html: &str, tag: &str, from: usize) -> usize {
    let mut depth = 1usize;
    for cap in BLOCK_TAG_RE.captures_iter(&html[from..]) {
        if !cap[2].eq_ignore_ascii_case(tag) {
            continue;
        }
        if &cap[1] == "/" {
            depth -= 1;
            if depth == 0 {
                return cap.get(0).map_or(html.len(), |m| from + m.end());
            }
        } else {
            depth += 1;
        }
    }
    html.len()
}

fn attr_value(re: &Regex, attrs: &str) -> Option<String> {
    let cap = re.captures(attrs)?;
    let raw = cap.get(1).or_else(|| cap.get(2)).or_else(|| cap.get(3))?;
    Some(decode_entities(raw.as_str()))
}

/// Remove all tags, decode entities, collapse whitespace
pub fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for ch in s.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    normalize_ws(&decode_entities(&out))
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn normalize_ws(s: &str) -> String {
    WHITESPACE_RE.replace_all(s.trim(), " ").into_owned()
}

/// True when the href points at an archive or compressed file
pub fn is_download_link(href: &str) -> bool {
    let href = href.to_lowercase();
    DOWNLOAD_EXTENSIONS.iter().any(|ext| href.contains(ext))
}

/// Make a cohort name safe to use as a directory name
pub fn sanitize_filename(name: &str) -> String {
    let replaced = UNSAFE_FILENAME_RE.replace_all(name, "_");
    let collapsed = WHITESPACE_RE.replace_all(replaced.trim(), "_");
    collapsed.chars().take(MAX_FILENAME_LEN).collect()
}
