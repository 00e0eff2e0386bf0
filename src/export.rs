//! Combined JSON snapshot of a finished run.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;

use crate::checkpoint::{sanitize_filename, Checkpoint};
use crate::model::{ChannelInfo, ContentKind, ContentSection, ExportArtifact};

/// Assemble the artifact from the accumulated checkpoint lists. `listed`
/// gives each section's `total`: the length of the channel listing, which
/// can exceed the items collected.
pub fn build_artifact(
    channel_info: ChannelInfo,
    checkpoint: &Checkpoint,
    listed: impl Fn(ContentKind) -> usize,
) -> ExportArtifact {
    let section = |kind| ContentSection {
        total: listed(kind),
        items: checkpoint.items(kind).to_vec(),
    };
    ExportArtifact {
        videos: section(ContentKind::Video),
        shorts: section(ContentKind::Short),
        channel_info,
        scraped_at: Utc::now(),
    }
}

/// `<dir>/<sanitized title>_new_data.json`, falling back to the channel id.
pub fn export_path(dir: &Path, info: &ChannelInfo) -> PathBuf {
    let stem = info
        .channel_title
        .as_deref()
        .map(sanitize_filename)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| sanitize_filename(&info.channel_id));
    dir.join(format!("{stem}_new_data.json"))
}

pub async fn write_artifact(dir: &Path, artifact: &ExportArtifact) -> Result<PathBuf> {
    let path = export_path(dir, &artifact.channel_info);
    let body = serde_json::to_vec_pretty(artifact).context("encoding export artifact")?;
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating export dir {}", dir.display()))?;
    tokio::fs::write(&path, body)
        .await
        .with_context(|| format!("writing export {}", path.display()))?;
    info!(
        path = %path.display(),
        videos = artifact.videos.total,
        shorts = artifact.shorts.total,
        "export written"
    );
    Ok(path)
}
