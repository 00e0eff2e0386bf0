//! Channel-level metadata from the rendered channel page.
//!
//! The page is rendered by a Browserless-style `/content` service and parsed
//! with `scraper` on the blocking pool. Reading channel info never fails the
//! run: once the retry budget is spent the agent hands back an unresolved
//! record with every optional field empty.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::config::BrowserSettings;
use crate::context::RunContext;
use crate::model::ChannelInfo;

#[async_trait]
pub trait ChannelInfoSource: Send + Sync {
    async fn scrape_channel_info(&self, ctx: &RunContext) -> ChannelInfo;
}

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("render service returned {status}: {message}")]
    Api { status: u16, message: String },
}

pub struct BrowserlessAgent {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    retry_limit: u32,
    backoff_unit: Duration,
}

impl BrowserlessAgent {
    pub fn new(settings: &BrowserSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .context("building render service HTTP client")?;
        Ok(Self {
            client,
            base_url: settings.endpoint.trim_end_matches('/').to_string(),
            token: settings.token.clone().filter(|t| !t.is_empty()),
            retry_limit: settings.retry_limit.max(1),
            backoff_unit: Duration::from_secs(2),
        })
    }

    /// Override the wait between attempts (`unit * attempt`).
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    fn content_request(&self, url: &str) -> reqwest::RequestBuilder {
        let endpoint = format!("{}/content", self.base_url);
        let mut req = self.client.post(&endpoint);
        if let Some(token) = &self.token {
            req = req.query(&[("token", token)]);
        }
        req.json(&serde_json::json!({ "url": url }))
    }

    /// Rendered HTML of `url` from the `/content` endpoint.
    pub async fn content(&self, url: &str) -> Result<String, BrowserError> {
        let resp = self.content_request(url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BrowserError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp.text().await?)
    }
}

#[async_trait]
impl ChannelInfoSource for BrowserlessAgent {
    #[instrument(skip_all, fields(channel_id = %ctx.channel_id))]
    async fn scrape_channel_info(&self, ctx: &RunContext) -> ChannelInfo {
        let started = std::time::Instant::now();
        let mut html = None;
        for attempt in 1..=self.retry_limit {
            info!(attempt, max = self.retry_limit, url = %ctx.channel_url, "loading channel page");
            match self.content(&ctx.channel_url).await {
                Ok(body) => {
                    html = Some(body);
                    break;
                }
                Err(err) => {
                    error!(attempt, %err, "failed to load channel page");
                    if attempt < self.retry_limit {
                        tokio::time::sleep(self.backoff_unit * attempt).await;
                    }
                }
            }
        }

        let Some(html) = html else {
            error!("channel page retries exhausted; storing unresolved channel info");
            return ChannelInfo::unresolved(&ctx.channel_id);
        };

        let channel_id = ctx.channel_id.clone();
        let info = match tokio::task::spawn_blocking(move || parse_channel_page(&channel_id, &html))
            .await
        {
            Ok(info) => info,
            Err(err) => {
                error!(?err, "channel page parser panicked");
                ChannelInfo::unresolved(&ctx.channel_id)
            }
        };
        info!(
            title = info.channel_title.as_deref().unwrap_or("N/A"),
            subscribers = ?info.subscribers,
            total_videos = ?info.total_videos,
            monetized = info.monetized,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "channel info scraped"
        );
        info
    }
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|err| panic!("invalid selector {css}: {err:?}"))
}

static META_TITLE: Lazy<Selector> = Lazy::new(|| selector("meta[name='title']"));
static TITLE: Lazy<Selector> = Lazy::new(|| selector("title"));
static ABOUT_ROWS: Lazy<Selector> =
    Lazy::new(|| selector("#additional-info-container tr.description-item"));
static VALUE_CELL: Lazy<Selector> = Lazy::new(|| selector("td:nth-child(2)"));
static DESCRIPTION: Lazy<Selector> = Lazy::new(|| selector("#description-container > span"));
static LINKS: Lazy<Selector> = Lazy::new(|| selector("div#link-list-container"));
static VIDEO_COUNT_FALLBACKS: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        "#video-count",
        "#metadata-line",
        "yt-formatted-string[aria-label*='videos']",
    ]
    .into_iter()
    .map(selector)
    .collect()
});

/// Read channel metadata out of a rendered channel page.
pub fn parse_channel_page(channel_id: &str, html: &str) -> ChannelInfo {
    let doc = Html::parse_document(html);
    let mut info = ChannelInfo::unresolved(channel_id);

    info.channel_title = doc
        .select(&META_TITLE)
        .find_map(|el| el.value().attr("content"))
        .map(strip_site_suffix)
        .or_else(|| doc.select(&TITLE).next().map(|el| strip_site_suffix(&text_of(el))))
        .filter(|t| !t.is_empty());

    for row in doc.select(&ABOUT_ROWS) {
        let Some(cell) = row.select(&VALUE_CELL).next() else {
            continue;
        };
        let text = text_of(cell);
        let lower = text.to_lowercase();
        if lower.contains("subscriber") {
            info.subscribers = parse_count(&text);
        } else if lower.contains("video") {
            info.total_videos = digits_of(&text);
        } else if lower.contains("view") {
            info.total_views = parse_count(&text);
        } else if lower.contains("joined") || lower.contains("date") {
            info.joined_date = Some(text);
        } else if looks_like_region(&text) {
            info.origin = Some(text);
        }
    }

    info.channel_description = doc
        .select(&DESCRIPTION)
        .next()
        .map(text_of)
        .filter(|t| !t.is_empty());
    info.description_links = doc.select(&LINKS).next().map(text_of).filter(|t| !t.is_empty());
    info.monetized = html.contains("badge-style-type-verified");

    if info.total_videos.is_none() {
        let fallback = VIDEO_COUNT_FALLBACKS.iter().find_map(|sel| {
            doc.select(sel).find_map(|el| {
                let text = text_of(el);
                let label = el.value().attr("aria-label").unwrap_or_default();
                let found = [text.as_str(), label]
                    .into_iter()
                    .filter(|t| t.to_lowercase().contains("video"))
                    .find_map(digits_of);
                found
            })
        });
        if fallback.is_none() {
            warn!(channel_id, "no video count on channel page");
        }
        info.total_videos = Some(fallback.unwrap_or(0));
    }

    info
}

/// `"1.2K subscribers"` to 1200. `K`, `M` and `B` suffixes scale; commas are
/// ignored. Returns `None` when no number can be read.
pub fn parse_count(raw: &str) -> Option<i64> {
    let lower = raw.to_lowercase();
    let value = lower
        .replace("subscribers", "")
        .replace("subscriber", "")
        .replace("views", "")
        .replace("view", "")
        .replace(',', "");
    let value = value.trim();
    let (number, scale) = match value.chars().last()? {
        'k' => (&value[..value.len() - 1], 1e3),
        'm' => (&value[..value.len() - 1], 1e6),
        'b' => (&value[..value.len() - 1], 1e9),
        _ => (value, 1.0),
    };
    let number = number.trim();
    if scale == 1.0 {
        return number.parse::<i64>().ok();
    }
    number
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .map(|n| (n * scale).round() as i64)
}

fn digits_of(text: &str) -> Option<i64> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

fn strip_site_suffix(title: &str) -> String {
    title.replace(" - YouTube", "").trim().to_string()
}

fn looks_like_region(text: &str) -> bool {
    !text.is_empty()
        && !text.chars().any(|c| c.is_ascii_digit())
        && !text.contains('.')
        && !text.contains('/')
        && !text.contains('@')
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
