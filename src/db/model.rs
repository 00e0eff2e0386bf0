//! Row models returned by repositories.

use chrono::{DateTime, Utc};

use crate::model::ChannelInfo;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChannelInfoRow {
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

impl From<ChannelInfoRow> for ChannelInfo {
    fn from(row: ChannelInfoRow) -> Self {
        ChannelInfo {
            channel_id: row.channel_id,
            channel_title: row.channel_title,
            subscribers: row.subscribers,
            total_views: row.total_views,
            joined_date: row.joined_date,
            total_videos: row.total_videos,
            origin: row.origin,
            channel_description: row.channel_description,
            description_links: row.description_links,
            monetized: row.monetized,
            fetched_at: row.fetched_at,
        }
    }
}
