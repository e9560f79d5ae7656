use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::AdapterError;

/// Requested output shape for fetched pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Tags stripped, whitespace collapsed.
    #[default]
    Text,
    /// Raw body as received.
    Raw,
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub format: OutputFormat,
    pub include_links: bool,
    pub max_links: usize,
}

impl FetchRequest {
    pub fn text(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            format: OutputFormat::Text,
            include_links: false,
            max_links: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub requested_url: String,
    pub final_url: String,
    pub content_text: String,
    pub title: Option<String>,
    pub date: Option<String>,
    pub links: Vec<String>,
    /// Stable id derived from the final URL, used as provenance.
    pub source_id: String,
}

/// URL → page content interface. Overridable per call through the
/// `FETCH_URL_OVERRIDE` hook before this adapter is reached.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, AdapterError>;
}

/// Plain reqwest-backed fetcher with tag stripping and link harvesting.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, AdapterError> {
        debug!(url = %request.url, "fetching");
        let resp = self
            .client
            .get(&request.url)
            .send()
            .await
            .map_err(|e| AdapterError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(AdapterError::Http(format!(
                "{} returned status {}",
                request.url,
                resp.status()
            )));
        }

        let final_url = resp.url().to_string();
        let body = resp
            .text()
            .await
            .map_err(|e| AdapterError::Http(e.to_string()))?;

        let title = extract_title(&body);
        let links = if request.include_links {
            extract_links(&body, &final_url, request.max_links)
        } else {
            Vec::new()
        };
        let content_text = match request.format {
            OutputFormat::Text => strip_tags(&body),
            OutputFormat::Raw => body,
        };

        Ok(FetchedPage {
            requested_url: request.url.clone(),
            final_url: final_url.clone(),
            content_text,
            title,
            date: None,
            links,
            source_id: source_id_for(&final_url),
        })
    }
}

/// Stable hex id for a URL (first 16 hex chars of its SHA-256).
pub fn source_id_for(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    hex::encode(&digest[..8])
}

/// Remove script/style blocks, then all tags, then collapse whitespace.
pub fn strip_tags(html: &str) -> String {
    let without_blocks = remove_block(html, "script");
    let without_blocks = remove_block(&without_blocks, "style");

    let mut out = String::with_capacity(without_blocks.len() / 2);
    let mut in_tag = false;
    for c in without_blocks.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    decode_entities(&out)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn remove_block(html: &str, tag: &str) -> String {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut out = String::with_capacity(html.len());
    let mut rest = html;
    loop {
        let lower = rest.to_lowercase();
        if lower.len() != rest.len() {
            out.push_str(rest);
            return out;
        }
        match lower.find(&open) {
            Some(start) => {
                out.push_str(&rest[..start]);
                match lower[start..].find(&close) {
                    Some(end_rel) => rest = &rest[start + end_rel + close.len()..],
                    None => return out,
                }
            }
            None => {
                out.push_str(rest);
                return out;
            }
        }
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
}

fn extract_title(html: &str) -> Option<String> {
    let lower = html.to_lowercase();
    // Lowercasing can change byte offsets for some scripts; the offsets
    // below are only valid when it didn't.
    if lower.len() != html.len() {
        return None;
    }
    let start = lower.find("<title")?;
    let open_end = html[start..].find('>')? + start + 1;
    let close = lower[open_end..].find("</title>")? + open_end;
    let title = html[open_end..close].trim();
    (!title.is_empty()).then(|| decode_entities(title))
}

/// Collect absolute href targets, resolving relative paths against the page.
fn extract_links(html: &str, base_url: &str, max_links: usize) -> Vec<String> {
    let mut links = Vec::new();
    let lower = html.to_lowercase();
    if lower.len() != html.len() {
        return links;
    }
    let mut offset = 0;

    while links.len() < max_links {
        let Some(pos) = lower[offset..].find("href=\"") else {
            break;
        };
        let start = offset + pos + 6;
        let Some(len) = html[start..].find('"') else {
            break;
        };
        let href = &html[start..start + len];
        offset = start + len;

        if href.starts_with("http://") || href.starts_with("https://") {
            links.push(href.to_string());
        } else if href.starts_with('/') {
            if let Some(root) = site_root(base_url) {
                links.push(format!("{root}{href}"));
            }
        }
    }
    links
}

fn site_root(url: &str) -> Option<String> {
    let scheme_end = url.find("://")? + 3;
    let host_end = url[scheme_end..]
        .find('/')
        .map(|i| scheme_end + i)
        .unwrap_or(url.len());
    Some(url[..host_end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_tags_removes_markup_and_scripts() {
        let html = "<html><head><script>var x = 1;</script></head>\
                    <body><h1>Title</h1><p>Hello &amp; welcome.</p></body></html>";
        let text = strip_tags(html);
        assert!(text.contains("Title"));
        assert!(text.contains("Hello & welcome."));
        assert!(!text.contains("var x"));
    }

    #[test]
    fn extract_title_finds_the_tag() {
        assert_eq!(
            extract_title("<html><title>My Page</title></html>").as_deref(),
            Some("My Page")
        );
        assert!(extract_title("<html><body>no title</body></html>").is_none());
    }

    #[test]
    fn extract_links_resolves_relative() {
        let html = r#"<a href="https://other.org/page">x</a> <a href="/local">y</a>"#;
        let links = extract_links(html, "https://example.com/dir/page", 10);
        assert_eq!(
            links,
            vec!["https://other.org/page", "https://example.com/local"]
        );
    }

    #[test]
    fn extract_links_honors_cap() {
        let html = r#"<a href="https://a.org/1">1</a><a href="https://a.org/2">2</a>"#;
        assert_eq!(extract_links(html, "https://a.org", 1).len(), 1);
    }

    #[test]
    fn source_id_is_stable_and_short() {
        let a = source_id_for("https://example.com");
        let b = source_id_for("https://example.com");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }
}
