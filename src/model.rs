use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The two content partitions a channel is harvested in. Both flow through the
/// same pipeline; only the storage tables and URL shapes differ.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Video,
    Short,
}

/// Table and column names for one content partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindTables {
    pub items: &'static str,
    pub id_column: &'static str,
    pub comments: &'static str,
    pub replies: &'static str,
}

impl ContentKind {
    pub const ALL: [ContentKind; 2] = [ContentKind::Video, ContentKind::Short];

    /// Plural slug used in channel tab URLs and log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Video => "videos",
            ContentKind::Short => "shorts",
        }
    }

    pub fn singular(&self) -> &'static str {
        match self {
            ContentKind::Video => "video",
            ContentKind::Short => "short",
        }
    }

    pub fn tables(&self) -> KindTables {
        match self {
            ContentKind::Video => KindTables {
                items: "Videos",
                id_column: "video_id",
                comments: "Videos_Comments",
                replies: "Videos_Replies",
            },
            ContentKind::Short => KindTables {
                items: "Shorts",
                id_column: "short_id",
                comments: "Shorts_Comments",
                replies: "Shorts_Replies",
            },
        }
    }

    /// Canonical watch URL for an item id of this kind.
    pub fn item_url(&self, item_id: &str) -> String {
        match self {
            ContentKind::Video => format!("https://www.youtube.com/watch?v={item_id}"),
            ContentKind::Short => format!("https://www.youtube.com/shorts/{item_id}"),
        }
    }
}

/// Stable identity for a channel derived from its source URL.
pub fn channel_id_for(channel_url: &str) -> String {
    hex::encode(Sha256::digest(channel_url.as_bytes()))
}

/// Channel-level metadata scraped once per channel by the browser agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelInfo {
    pub channel_id: String,
    pub channel_title: Option<String>,
    pub subscribers: Option<i64>,
    pub total_views: Option<i64>,
    pub joined_date: Option<String>,
    pub total_videos: Option<i64>,
    pub origin: Option<String>,
    pub channel_description: Option<String>,
    pub description_links: Option<String>,
    pub monetized: bool,
    pub fetched_at: DateTime<Utc>,
}

impl ChannelInfo {
    /// Record returned when the channel page could not be read at all.
    pub fn unresolved(channel_id: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            channel_title: None,
            subscribers: None,
            total_views: None,
            joined_date: None,
            total_videos: None,
            origin: None,
            channel_description: None,
            description_links: None,
            monetized: false,
            fetched_at: Utc::now(),
        }
    }
}

/// Entry of a channel listing: enough to fetch the item later.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemDescriptor {
    pub url: String,
    pub id: Option<String>,
    pub title: Option<String>,
}

/// A fully transformed video or short, ready to persist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentItem {
    pub item_id: String,
    pub title: String,
    pub description: String,
    pub views: i64,
    pub duration: i64,
    pub upload_date: String,
    pub likes: i64,
    pub comment_count: i64,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

impl ContentItem {
    pub fn reply_count(&self) -> usize {
        self.comments.iter().map(|c| c.replies.len()).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    pub comment_id: String,
    pub text: String,
    pub author: String,
    pub author_channel_id: String,
    pub timestamp: String,
    #[serde(default)]
    pub replies: Vec<Reply>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reply {
    pub reply_id: String,
    pub text: String,
    pub author: String,
    pub timestamp: String,
}

/// Timestamp as the extraction engine reports it: epoch seconds or free text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RawTimestamp {
    Epoch(f64),
    Text(String),
}

/// Flat comment record as emitted by the extraction engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawComment {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default, alias = "channel_id")]
    pub author_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<RawTimestamp>,
}

/// Item metadata plus flat comments as emitted by the extraction engine.
/// Everything is optional because older uploads may lack fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawItem {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub view_count: Option<i64>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub upload_date: Option<String>,
    #[serde(default)]
    pub like_count: Option<i64>,
    #[serde(default)]
    pub comment_count: Option<i64>,
    #[serde(default)]
    pub comments: Option<Vec<RawComment>>,
}

/// One content section of the export artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentSection {
    pub total: usize,
    pub items: Vec<ContentItem>,
}

/// Combined snapshot written once a run reaches its terminal stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportArtifact {
    pub channel_info: ChannelInfo,
    pub videos: ContentSection,
    pub shorts: ContentSection,
    pub scraped_at: DateTime<Utc>,
}
