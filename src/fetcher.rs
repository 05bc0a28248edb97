//! Web page fetching for the summarizer
//!
//! Downloads a page and keeps only its readable text.

use crate::error::ChatError;
use crate::Result;
use reqwest::{Client, Url};
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tracing::{error, info};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/117.0.0.0 Safari/537.36";
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_CONTENT_CHARS: usize = 50_000;

const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "nav", "header", "footer", "noscript"];

#[async_trait::async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Visible text of the page at `url`
    async fn fetch(&self, url: &str) -> Result<String>;
}

pub struct HttpContentFetcher {
    client: Client,
}

impl HttpContentFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(FETCH_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| ChatError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl ContentFetcher for HttpContentFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let url = parse_web_url(url)?;
        info!(url = %url, "Fetching page");

        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            error!(url = %url, "Page request failed: {}", e);
            ChatError::FetchError(format!("request to {} failed: {}", url, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::FetchError(format!("{} returned {}", url, status)));
        }

        let html = response
            .text()
            .await
            .map_err(|e| ChatError::FetchError(format!("failed to read {}: {}", url, e)))?;

        let text = html_to_text(&html)?;
        info!(url = %url, chars = text.chars().count(), "Page fetched");
        Ok(text)
    }
}

/// Only absolute http(s) URLs are fetched
pub fn parse_web_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ChatError::FetchError(format!("invalid url {:?}: {}", raw, e)))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ChatError::FetchError(format!(
            "unsupported url scheme {:?}",
            other
        ))),
    }
}

/// Title plus visible body text, one block per line, capped at `MAX_CONTENT_CHARS`
pub fn html_to_text(html: &str) -> Result<String> {
    let document = Html::parse_document(html);

    let title_selector = selector("title")?;
    let body_selector = selector("body")?;

    let title = document
        .select(&title_selector)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "No title found".to_string());

    let mut parts = Vec::new();
    if let Some(body) = document.select(&body_selector).next() {
        extract_text(&body, &mut parts);
    }

    let mut text = format!("{}\n\n{}", title, parts.join("\n"));
    if let Some((cut, _)) = text.char_indices().nth(MAX_CONTENT_CHARS) {
        text.truncate(cut);
    }
    Ok(text)
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css)
        .map_err(|e| ChatError::FetchError(format!("bad selector {}: {:?}", css, e)))
}

fn extract_text(element: &ElementRef, parts: &mut Vec<String>) {
    if SKIPPED_ELEMENTS.contains(&element.value().name()) {
        return;
    }

    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                parts.push(trimmed.to_string());
            }
        } else if let Some(child_ref) = ElementRef::wrap(child) {
            extract_text(&child_ref, parts);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visible_text_only() {
        let html = r#"
            <html>
              <head><title> Metals Daily </title><style>body { color: red }</style></head>
              <body>
                <nav>Home | Markets</nav>
                <header>Logo</header>
                <h1>Gold rallies</h1>
                <p>Gold closed at <b>$1.42</b>.</p>
                <script>track()</script>
                <noscript>enable js</noscript>
                <footer>(c) 2025</footer>
              </body>
            </html>"#;

        let text = html_to_text(html).unwrap();
        assert!(text.starts_with("Metals Daily\n\n"));
        assert!(text.contains("Gold rallies"));
        assert!(text.contains("$1.42"));
        for hidden in ["Home | Markets", "Logo", "track()", "enable js", "(c) 2025", "color: red"] {
            assert!(!text.contains(hidden), "leaked {}", hidden);
        }
    }

    #[test]
    fn test_output_is_capped() {
        let html = format!("<html><body><p>{}</p></body></html>", "é".repeat(MAX_CONTENT_CHARS * 2));
        let text = html_to_text(&html).unwrap();
        assert_eq!(text.chars().count(), MAX_CONTENT_CHARS);
    }

    #[test]
    fn test_missing_title() {
        let text = html_to_text("<p>hi</p>").unwrap();
        assert_eq!(text, "No title found\n\nhi");
    }

    #[test]
    fn test_url_scheme_checked() {
        assert!(parse_web_url("https://example.com/stocks").is_ok());
        assert!(matches!(
            parse_web_url("file:///etc/passwd"),
            Err(ChatError::FetchError(_))
        ));
        assert!(parse_web_url("not a url").is_err());
    }

    #[tokio::test]
    async fn test_fetch_rejects_bad_url_without_network() {
        let fetcher = HttpContentFetcher::new().unwrap();
        assert!(matches!(
            fetcher.fetch("ftp://example.com").await,
            Err(ChatError::FetchError(_))
        ));
    }
}
