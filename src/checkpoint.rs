//! Durable per-channel resume state, one JSON document per channel.
//!
//! Loading never fails the run: a missing, unreadable or corrupt file yields
//! a fresh checkpoint, and fields absent from older files take defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::model::{ChannelInfo, ContentItem, ContentKind};

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("checkpoint encode/decode error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Checkpoint {
    pub channel_info_scraped: bool,
    pub videos_processed: usize,
    pub shorts_processed: usize,
    pub videos: Vec<ContentItem>,
    pub shorts: Vec<ContentItem>,
    pub channel_info: Option<ChannelInfo>,
}

impl Checkpoint {
    pub fn processed(&self, kind: ContentKind) -> usize {
        match kind {
            ContentKind::Video => self.videos_processed,
            ContentKind::Short => self.shorts_processed,
        }
    }

    pub fn items(&self, kind: ContentKind) -> &[ContentItem] {
        match kind {
            ContentKind::Video => &self.videos,
            ContentKind::Short => &self.shorts,
        }
    }

    pub fn items_mut(&mut self, kind: ContentKind) -> &mut Vec<ContentItem> {
        match kind {
            ContentKind::Video => &mut self.videos,
            ContentKind::Short => &mut self.shorts,
        }
    }

    /// Move the processed marker to `upto` (absolute, exclusive). The marker
    /// never moves backwards.
    pub fn advance(&mut self, kind: ContentKind, upto: usize) {
        let counter = match kind {
            ContentKind::Video => &mut self.videos_processed,
            ContentKind::Short => &mut self.shorts_processed,
        };
        if upto < *counter {
            warn!(kind = kind.as_str(), current = *counter, upto, "refusing to move checkpoint backwards");
            return;
        }
        *counter = upto;
    }

    pub fn record_channel_info(&mut self, info: ChannelInfo) {
        self.channel_info = Some(info);
        self.channel_info_scraped = true;
    }
}

/// Directory of checkpoint files keyed by channel id.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, channel_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}_checkpoint.json", sanitize_filename(channel_id)))
    }

    /// Read the checkpoint for a channel, falling back to a fresh one.
    pub async fn load(&self, channel_id: &str) -> Checkpoint {
        let path = self.path_for(channel_id);
        match read_checkpoint(&path).await {
            Ok(Some(cp)) => {
                info!(
                    path = %path.display(),
                    videos_processed = cp.videos_processed,
                    shorts_processed = cp.shorts_processed,
                    "loaded checkpoint"
                );
                cp
            }
            Ok(None) => Checkpoint::default(),
            Err(err) => {
                error!(?err, path = %path.display(), "unreadable checkpoint; starting fresh");
                Checkpoint::default()
            }
        }
    }

    /// Overwrite the checkpoint via a temp file and rename.
    pub async fn save(&self, channel_id: &str, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let path = self.path_for(channel_id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(checkpoint)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        info!(path = %path.display(), "checkpoint saved");
        Ok(())
    }

    /// Save and log on failure; the run carries on with in-memory state.
    pub async fn save_or_warn(&self, channel_id: &str, checkpoint: &Checkpoint) -> bool {
        match self.save(channel_id, checkpoint).await {
            Ok(()) => true,
            Err(err) => {
                error!(?err, channel_id, "failed to save checkpoint; continuing in memory");
                false
            }
        }
    }
}

async fn read_checkpoint(path: &Path) -> Result<Option<Checkpoint>, CheckpointError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Strip characters that are invalid in file names and replace spaces.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .map(|c| if c == ' ' { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    fn item(id: &str) -> ContentItem {
        ContentItem {
            item_id: id.into(),
            title: format!("title {id}"),
            description: String::new(),
            views: 1,
            duration: 2,
            upload_date: "N/A".into(),
            likes: 3,
            comment_count: 0,
            fetched_at: Utc::now(),
            comments: vec![],
        }
    }

    #[test]
    fn sanitize_strips_reserved_characters() {
        assert_eq!(sanitize_filename(r#"a<b>c:"d/e\f|g?h*i j"#), "abcdefghi_j");
        assert_eq!(sanitize_filename("My Channel"), "My_Channel");
    }

    #[tokio::test]
    async fn missing_file_gives_default() {
        let td = tempdir().unwrap();
        let store = CheckpointStore::new(td.path());
        assert_eq!(store.load("chan").await, Checkpoint::default());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let td = tempdir().unwrap();
        let store = CheckpointStore::new(td.path().join("nested"));
        let mut cp = Checkpoint::default();
        cp.record_channel_info(ChannelInfo::unresolved("chan"));
        cp.items_mut(ContentKind::Video).push(item("v1"));
        cp.advance(ContentKind::Video, 10);

        store.save("chan", &cp).await.unwrap();
        let loaded = store.load("chan").await;
        assert_eq!(loaded, cp);
        assert!(!store.path_for("chan").with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_file_gives_default() {
        let td = tempdir().unwrap();
        let store = CheckpointStore::new(td.path());
        std::fs::write(store.path_for("chan"), b"{\"videos_processed\": 1").unwrap();
        assert_eq!(store.load("chan").await, Checkpoint::default());
    }

    #[tokio::test]
    async fn older_schema_is_backfilled() {
        let td = tempdir().unwrap();
        let store = CheckpointStore::new(td.path());
        std::fs::write(
            store.path_for("chan"),
            br#"{"channel_info_scraped": true, "videos_processed": 20, "legacy": 1}"#,
        )
        .unwrap();
        let cp = store.load("chan").await;
        assert!(cp.channel_info_scraped);
        assert_eq!(cp.videos_processed, 20);
        assert_eq!(cp.shorts_processed, 0);
        assert!(cp.videos.is_empty() && cp.shorts.is_empty());
        assert!(cp.channel_info.is_none());
    }

    #[test]
    fn advance_is_monotonic() {
        let mut cp = Checkpoint::default();
        cp.advance(ContentKind::Short, 10);
        cp.advance(ContentKind::Short, 5);
        assert_eq!(cp.processed(ContentKind::Short), 10);
        assert_eq!(cp.processed(ContentKind::Video), 0);
    }

    #[tokio::test]
    async fn save_failure_is_reported_not_fatal() {
        let td = tempdir().unwrap();
        let blocker = td.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        // The checkpoint dir is a regular file, so creating it fails.
        let store = CheckpointStore::new(&blocker);
        assert!(!store.save_or_warn("chan", &Checkpoint::default()).await);
    }
}
