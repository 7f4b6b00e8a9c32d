//! Web fetch tools: page-to-text extraction and video transcript scraping.
//!
//! Both live behind the [`WebClient`] trait so the executor can be tested
//! without touching the network.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Character cap for `fetch_webpage` results.
pub const WEBPAGE_CHAR_CAP: usize = 10_000;
/// Character cap for `fetch_transcript` results.
pub const TRANSCRIPT_CHAR_CAP: usize = 15_000;

/// Download limit so one huge page cannot blow up memory or the transcript.
const MAX_DOWNLOAD_BYTES: usize = 256_000;

/// Plain-text rendering of a fetched page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebPage {
    pub text: String,
    pub truncated: bool,
}

/// Network boundary for the web tools.
#[async_trait]
pub trait WebClient: Send + Sync {
    /// Fetch a page and return its visible text, capped at
    /// [`WEBPAGE_CHAR_CAP`] characters with a truncation flag.
    async fn fetch_page(&self, url: &str) -> Result<WebPage>;

    /// Fetch a video transcript.  `Ok(None)` means "no transcript
    /// available" (wrong host, no caption tracks); errors are reserved for
    /// transport failures.
    async fn fetch_transcript(&self, url: &str) -> Result<Option<String>>;
}

/// reqwest-backed [`WebClient`].
#[derive(Debug, Clone)]
pub struct HttpWebClient {
    client: reqwest::Client,
}

impl HttpWebClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .user_agent("vaultmind/0.1")
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for HttpWebClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebClient for HttpWebClient {
    async fn fetch_page(&self, url: &str) -> Result<WebPage> {
        let parsed = Url::parse(url).with_context(|| format!("invalid url: {url}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!("only http(s) urls are supported, got {}", parsed.scheme());
        }

        let resp = self
            .client
            .get(parsed)
            .header(reqwest::header::ACCEPT, "text/html")
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        if !resp.status().is_success() {
            bail!("fetch of {url} returned status {}", resp.status());
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.contains("text/html") && !content_type.contains("text/plain") {
            bail!("unsupported content type: {content_type}");
        }

        let mut body = resp.text().await.context("reading response body")?;
        if body.len() > MAX_DOWNLOAD_BYTES {
            let mut end = MAX_DOWNLOAD_BYTES;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            body.truncate(end);
        }

        let text = if content_type.contains("text/plain") {
            collapse_whitespace(&body)
        } else {
            html_to_text(&body)
        };
        let (text, truncated) = clip_chars(&text, WEBPAGE_CHAR_CAP);
        debug!(url, chars = text.len(), truncated, "fetched page");
        Ok(WebPage { text, truncated })
    }

    async fn fetch_transcript(&self, url: &str) -> Result<Option<String>> {
        // Only YouTube caption tracks are supported; anything else is
        // "no transcript", not an error.
        let Ok(parsed) = Url::parse(url) else {
            return Ok(None);
        };
        let host = parsed.host_str().unwrap_or("");
        if !host.contains("youtube.com") && !host.contains("youtu.be") {
            return Ok(None);
        }

        let page = self
            .client
            .get(parsed)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?
            .text()
            .await
            .context("reading video page")?;

        let Some(track_url) = caption_track_url(&page) else {
            return Ok(None);
        };

        let xml = self
            .client
            .get(&track_url)
            .send()
            .await
            .context("fetching caption track")?
            .text()
            .await
            .context("reading caption track")?;

        let text = collapse_whitespace(&decode_entities(&strip_tags(&xml)));
        if text.is_empty() {
            return Ok(None);
        }
        let (text, _) = clip_chars(&text, TRANSCRIPT_CHAR_CAP);
        Ok(Some(text))
    }
}

/// First caption track's fetchable URL from a video watch page, if the page
/// advertises any.  The pattern compiles once per process.
fn caption_track_url(page: &str) -> Option<String> {
    static CAPTION_TRACKS: OnceLock<Regex> = OnceLock::new();
    let re = CAPTION_TRACKS
        .get_or_init(|| Regex::new(r#""captionTracks"\s*:\s*(\[[^\]]+\])"#).expect("literal pattern"));
    let caps = re.captures(page)?;
    let tracks: Value = serde_json::from_str(&caps[1]).ok()?;
    let base = tracks.get(0)?.get("baseUrl")?.as_str()?;
    Some(base.replace("\\u0026", "&"))
}

// ── Text extraction helpers ──────────────────────────────────────────────────

const SKIP_TAGS: [&str; 7] = ["script", "style", "nav", "header", "footer", "noscript", "svg"];
const BLOCK_TAGS: [&str; 16] = [
    "p", "div", "br", "h1", "h2", "h3", "h4", "h5", "h6", "li", "tr", "td", "th", "article",
    "section", "main",
];

/// Minimal HTML-to-text extraction: drops script/style/nav chrome, turns
/// block-level tags into newlines, decodes common entities, collapses
/// whitespace.  Good enough for the model to read facts out of.
pub fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 4);
    let mut skip_depth = 0usize;
    let mut chars = html.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '<' {
            if skip_depth == 0 {
                out.push(ch);
            }
            continue;
        }

        let closing = chars.peek() == Some(&'/');
        if closing {
            chars.next();
        }
        let mut tag = String::new();
        while let Some(&c) = chars.peek() {
            if c == '>' || c == '/' || c.is_whitespace() {
                break;
            }
            tag.push(c.to_ascii_lowercase());
            chars.next();
        }
        for c in chars.by_ref() {
            if c == '>' {
                break;
            }
        }

        if SKIP_TAGS.contains(&tag.as_str()) {
            if closing {
                skip_depth = skip_depth.saturating_sub(1);
            } else {
                skip_depth += 1;
            }
        } else if skip_depth == 0 && BLOCK_TAGS.contains(&tag.as_str()) {
            out.push('\n');
        }
    }

    collapse_whitespace(&decode_entities(&out))
}

/// Remove every `<...>` section, keeping only text nodes.  Used for caption
/// track XML where no tag carries meaning.
fn strip_tags(markup: &str) -> String {
    let mut out = String::with_capacity(markup.len());
    let mut in_tag = false;
    for ch in markup.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
}

/// Collapse runs of spaces into one and runs of newlines into at most two;
/// trims the ends.
fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    let mut newlines = 0u32;
    for ch in text.chars() {
        if ch == '\n' {
            newlines += 1;
            pending_space = false;
            if newlines <= 2 {
                out.push('\n');
            }
        } else if ch.is_whitespace() {
            pending_space = true;
        } else {
            if pending_space && !out.is_empty() && !out.ends_with('\n') {
                out.push(' ');
            }
            pending_space = false;
            newlines = 0;
            out.push(ch);
        }
    }
    out.trim().to_string()
}

/// Cap a string at `max` characters (not bytes); the flag reports whether
/// anything was cut.
pub fn clip_chars(s: &str, max: usize) -> (String, bool) {
    match s.char_indices().nth(max) {
        None => (s.to_string(), false),
        Some((idx, _)) => (s[..idx].to_string(), true),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
