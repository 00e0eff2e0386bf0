//! Adapter over the external item-extraction engine (yt-dlp).
//!
//! One call is one fetch: retries live in the task runner.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::ExtractorSettings;
use crate::model::{ContentKind, ItemDescriptor, RawItem};

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("extractor returned no data for {0}")]
    NoData(String),
    #[error("failed to run extractor: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("extractor exited with {status}: {stderr}")]
    Status { status: String, stderr: String },
    #[error("invalid extractor output: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ExtractionError {
    /// Missing data and malformed output will not change by asking again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ExtractionError::NoData(_) | ExtractionError::Decode(_))
    }
}

#[async_trait]
pub trait ItemExtractor: Send + Sync {
    /// Ordered listing of a channel tab.
    async fn list_items(
        &self,
        channel_url: &str,
        kind: ContentKind,
    ) -> Result<Vec<ItemDescriptor>, ExtractionError>;

    /// Metadata and flat comments for one item.
    async fn extract(&self, item_url: &str) -> Result<RawItem, ExtractionError>;
}

/// Runs the yt-dlp binary as a child process per call.
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    program: String,
    user_agent: Option<String>,
    extra_args: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Playlist {
    #[serde(default)]
    entries: Vec<Option<PlaylistEntry>>,
}

#[derive(Debug, Deserialize)]
struct PlaylistEntry {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

impl YtDlpExtractor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            user_agent: None,
            extra_args: Vec::new(),
        }
    }

    pub fn from_settings(settings: &ExtractorSettings) -> Self {
        Self {
            program: settings.program.clone(),
            user_agent: settings
                .user_agent
                .clone()
                .filter(|ua| !ua.trim().is_empty()),
            extra_args: settings.extra_args.clone(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--no-warnings")
            .arg("--quiet")
            .arg("--no-progress");
        if let Some(ua) = &self.user_agent {
            cmd.arg("--user-agent").arg(ua);
        }
        cmd.args(&self.extra_args);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A unit cancelled by its deadline must not leave the process behind.
            .kill_on_drop(true);
        cmd
    }

    async fn dump_json(&self, mut cmd: Command, target: &str) -> Result<Value, ExtractionError> {
        let output = cmd.output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let trimmed = stdout.trim();

        if !output.status.success() && trimmed.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ExtractionError::Status {
                status: output.status.to_string(),
                stderr,
            });
        }
        if trimmed.is_empty() || trimmed == "null" {
            return Err(ExtractionError::NoData(target.to_string()));
        }
        // --ignore-errors may still print warnings after the document.
        let first_line = trimmed.lines().next().unwrap_or(trimmed);
        Ok(serde_json::from_str(first_line)?)
    }
}

#[async_trait]
impl ItemExtractor for YtDlpExtractor {
    async fn list_items(
        &self,
        channel_url: &str,
        kind: ContentKind,
    ) -> Result<Vec<ItemDescriptor>, ExtractionError> {
        let list_url = build_channel_list_url(channel_url, kind);
        let mut cmd = self.command();
        cmd.arg("--flat-playlist")
            .arg("--dump-single-json")
            .arg("--ignore-errors")
            .arg(&list_url);
        debug!(url = %list_url, "listing channel tab");

        let value = self.dump_json(cmd, &list_url).await?;
        let playlist: Playlist = serde_json::from_value(value)?;
        Ok(descriptors_from_entries(playlist.entries, kind))
    }

    async fn extract(&self, item_url: &str) -> Result<RawItem, ExtractionError> {
        let mut cmd = self.command();
        cmd.arg("--dump-single-json")
            .arg("--skip-download")
            .arg("--write-comments")
            .arg(item_url);

        let value = self.dump_json(cmd, item_url).await?;
        if !value.is_object() {
            return Err(ExtractionError::NoData(item_url.to_string()));
        }
        Ok(serde_json::from_value(value)?)
    }
}

fn descriptors_from_entries(
    entries: Vec<Option<PlaylistEntry>>,
    kind: ContentKind,
) -> Vec<ItemDescriptor> {
    entries
        .into_iter()
        .flatten()
        .filter_map(|entry| {
            let url = entry
                .url
                .clone()
                .filter(|u| !u.trim().is_empty())
                .or_else(|| entry.id.as_deref().map(|id| kind.item_url(id)));
            match url {
                Some(url) => Some(ItemDescriptor {
                    url,
                    id: entry.id,
                    title: entry.title,
                }),
                None => {
                    warn!(kind = kind.as_str(), ?entry.title, "listing entry without url or id");
                    None
                }
            }
        })
        .collect()
}

/// Append the tab suffix unless already present, keeping query and fragment.
pub fn build_channel_list_url(channel_url: &str, kind: ContentKind) -> String {
    let (without_fragment, fragment) = match channel_url.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (channel_url, None),
    };
    let (base, query) = match without_fragment.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (without_fragment, None),
    };

    let base = base.trim_end_matches('/');
    let suffix = format!("/{}", kind.as_str());
    let mut result = if base.ends_with(&suffix) {
        base.to_string()
    } else {
        format!("{base}{suffix}")
    };

    if let Some(query) = query {
        result.push('?');
        result.push_str(query);
    }
    if let Some(fragment) = fragment {
        result.push('#');
        result.push_str(fragment);
    }
    result
}
